//! Frames pushed over the session event stream.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Named SSE frame with a JSON body.
#[derive(Clone, Debug)]
pub struct ServerEvent {
    /// SSE event name.
    pub event: &'static str,
    /// Serialized payload.
    pub data: String,
}

impl ServerEvent {
    /// Serializes `payload` as the frame body.
    pub fn json<T: Serialize>(event: &'static str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event,
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of a session stream.
pub struct Handshake {
    /// Session the stream belongs to.
    pub session_id: Uuid,
    /// Whether the backend is running without a document store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// New value of the degraded flag.
    pub degraded: bool,

}
