use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::{
        registration::RegistrationView,
        sse::{Handshake, ServerEvent, SystemStatus},
    },
    services::registration::TeamFormationController,
};

fn to_event(payload: ServerEvent) -> Event {
    Event::default().event(payload.event).data(payload.data)
}

fn view_event(view: &RegistrationView) -> Option<ServerEvent> {
    ServerEvent::json("view", view)
        .inspect_err(|err| warn!(error = %err, "failed to serialise registration view"))
        .ok()
}

/// Stream every published view of `controller`, plus degraded-mode changes.
///
/// The stream opens with a `handshake` event followed by the current view.
pub fn session_stream(
    controller: TeamFormationController,
    mut degraded: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let mut views = controller.subscribe();
    let session_id = controller.id();

    tokio::spawn(async move {
        let mut initial = Vec::with_capacity(2);
        let handshake = Handshake {
            session_id,
            degraded: *degraded.borrow_and_update(),
        };
        if let Ok(event) = ServerEvent::json("handshake", &handshake) {
            initial.push(event);
        }
        let view = views.borrow_and_update().clone();
        initial.extend(view_event(&view));
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            let payload = tokio::select! {
                _ = tx.closed() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    view_event(&view)
                }
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = SystemStatus { degraded: *degraded.borrow_and_update() };
                    ServerEvent::json("system", &status).ok()
                }
            };

            if let Some(payload) = payload
                && tx.send(Ok(to_event(payload))).await.is_err()
            {
                break;
            }
        }

        // idle expiry counts from the moment the stream went away
        controller.touch();
        drop(views);
        drop(controller);
        info!(session = %session_id, "registration SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
