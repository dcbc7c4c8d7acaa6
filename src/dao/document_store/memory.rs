//! Process-local document store used for tests and single-node deployments.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{StreamExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::{
    Document, DocumentStore, DocumentStream, FieldEquals, StoredDocument, merge_patch,
};
use crate::dao::storage::{StorageError, StorageResult};

const WATCH_CAPACITY: usize = 32;

type DocKey = (String, String);

/// Raised while the store is switched offline.
#[derive(Debug, Error)]
#[error("in-memory document store is offline")]
pub struct MemoryStoreOffline;

/// Document store keeping everything in a [`DashMap`], with one broadcast
/// channel per watched document.
///
/// Writes hold the map entry while notifying watchers, so subscribers see
/// changes of a document in write order.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    documents: DashMap<DocKey, Document>,
    watchers: DashMap<DocKey, broadcast::Sender<Option<Document>>>,
    offline: AtomicBool,
}

fn key(collection: &str, id: &str) -> DocKey {
    (collection.to_owned(), id.to_owned())
}

fn offline_error() -> StorageError {
    StorageError::unavailable("in-memory store is offline".into(), MemoryStoreOffline)
}

impl MemoryInner {
    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(offline_error())
        } else {
            Ok(())
        }
    }

    fn notify(&self, key: &DocKey, snapshot: Option<Document>) {
        if let Some(sender) = self.watchers.get(key) {
            let _ = sender.send(snapshot);
        }
    }

    fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        self.ensure_online()?;
        Ok(self
            .documents
            .get(&key(collection, id))
            .map(|doc| doc.value().clone()))
    }

    fn set(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        self.ensure_online()?;
        match self.documents.entry(key(collection, id)) {
            Entry::Occupied(mut entry) => {
                entry.insert(data.clone());
                self.notify(entry.key(), Some(data));
            }
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                let _guard = entry.insert(data.clone());
                self.notify(&key, Some(data));
            }
        }
        Ok(())
    }

    fn create(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        self.ensure_online()?;
        match self.documents.entry(key(collection, id)) {
            Entry::Occupied(_) => Err(StorageError::already_exists(collection, id)),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                let _guard = entry.insert(data.clone());
                self.notify(&key, Some(data));
                Ok(())
            }
        }
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> StorageResult<Document> {
        self.ensure_online()?;
        match self.documents.entry(key(collection, id)) {
            Entry::Vacant(_) => Err(StorageError::not_found(collection, id)),
            Entry::Occupied(mut entry) => {
                if let Some(condition) = precondition
                    && !condition.matches(entry.get())
                {
                    return Err(condition.failed(collection, id));
                }
                merge_patch(entry.get_mut(), patch);
                let updated = entry.get().clone();
                self.notify(entry.key(), Some(updated.clone()));
                Ok(updated)
            }
        }
    }

    fn delete(&self, collection: &str, id: &str, precondition: Option<FieldEquals>) -> StorageResult<bool> {
        self.ensure_online()?;
        match self.documents.entry(key(collection, id)) {
            Entry::Vacant(_) => Ok(false),
            Entry::Occupied(entry) => {
                if let Some(condition) = precondition
                    && !condition.matches(entry.get())
                {
                    return Ok(false);
                }
                self.notify(entry.key(), None);
                entry.remove();
                Ok(true)
            }
        }
    }

    fn scan(&self, collection: &str, filter: Option<&FieldEquals>) -> StorageResult<Vec<StoredDocument>> {
        self.ensure_online()?;
        let mut found: Vec<StoredDocument> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .filter(|entry| filter.is_none_or(|condition| condition.matches(entry.value())))
            .map(|entry| StoredDocument {
                id: entry.key().1.clone(),
                data: entry.value().clone(),
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

impl MemoryDocumentStore {
    /// Empty, online store.
    pub fn new() -> Self {

        Self::default()
    }

    /// Simulate a backend outage: every call fails with
    /// [`StorageError::Unavailable`] and open watch streams end with an error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.inner.watchers.clear();
        }
    }

    fn watch(&self, collection: &str, id: &str) -> StorageResult<DocumentStream> {
        self.inner.ensure_online()?;
        let key = key(collection, id);
        let receiver = self
            .inner
            .watchers
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(WATCH_CAPACITY).0)
            .subscribe();
        let initial = self.inner.documents.get(&key).map(|doc| doc.value().clone());
        let mut subscription = WatchSubscription {
            inner: self.inner.clone(),
            key,
            receiver: Some(receiver),
        };

        let stream = async_stream::stream! {
            yield Ok(initial);
            loop {
                match subscription.recv().await {
                    Ok(snapshot) => yield Ok(snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        let (collection, id) = &subscription.key;
                        debug!(skipped, %collection, %id, "document watcher lagged; resending current state");
                        yield Ok(subscription.current());
                    }
                    Err(RecvError::Closed) => {
                        if subscription.inner.offline.load(Ordering::SeqCst) {
                            yield Err(offline_error());
                        }
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Receiving end of one watch; the document's sender is dropped with its
/// last subscription.
struct WatchSubscription {
    inner: Arc<MemoryInner>,
    key: DocKey,
    receiver: Option<broadcast::Receiver<Option<Document>>>,
}

impl WatchSubscription {
    async fn recv(&mut self) -> Result<Option<Document>, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }

    fn current(&self) -> Option<Document> {
        self.inner.documents.get(&self.key).map(|doc| doc.value().clone())
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.receiver.take();
        self.inner
            .watchers
            .remove_if(&self.key, |_, sender| sender.receiver_count() == 0);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let result = self.inner.get(collection, id);
        Box::pin(async move { result })
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.inner.set(collection, id, data);
        Box::pin(async move { result })
    }

    fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.inner.create(collection, id, data);
        Box::pin(async move { result })
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> BoxFuture<'static, StorageResult<Document>> {
        let result = self.inner.update(collection, id, patch, precondition);
        Box::pin(async move { result })
    }

    fn delete_document(&self, collection: &str, id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self.inner.delete(collection, id, None);
        Box::pin(async move { result })
    }

    fn delete_document_if(
        &self,
        collection: &str,
        id: &str,
        precondition: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self.inner.delete(collection, id, Some(precondition));
        Box::pin(async move { result })
    }

    fn query_equals(
        &self,
        collection: &str,
        filter: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let result = self.inner.scan(collection, Some(&filter));
        Box::pin(async move { result })
    }

    fn list_documents(
        &self,
        collection: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let result = self.inner.scan(collection, None);
        Box::pin(async move { result })
    }

    fn watch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>> {
        let result = self.watch(collection, id);
        Box::pin(async move { result })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.inner.ensure_online();
        Box::pin(async move { result })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.inner.ensure_online();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_is_insert_if_absent() {
        let store = MemoryDocumentStore::new();
        store
            .create_document("tos_teams", "ALPHA", doc(json!({"mode": "SOLO"})))
            .await
            .unwrap();

        let err = store
            .create_document("tos_teams", "ALPHA", doc(json!({"mode": "DUO"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let stored = store.get_document("tos_teams", "ALPHA").await.unwrap();
        assert_eq!(stored, Some(doc(json!({"mode": "SOLO"}))));
    }

    #[tokio::test]
    async fn concurrent_creates_have_a_single_winner() {
        let store = MemoryDocumentStore::new();
        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_document("tos_teams", "CHARLIE", doc(json!({ "by": n })))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn update_checks_precondition() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("tos_invites", "i1", doc(json!({"status": "PENDING"})))
            .await
            .unwrap();

        let err = store
            .update_document(
                "tos_invites",
                "i1",
                doc(json!({"status": "COMPLETED"})),
                Some(FieldEquals::new("status", "ACCEPTED")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));

        let updated = store
            .update_document(
                "tos_invites",
                "i1",
                doc(json!({"status": "ACCEPTED"})),
                Some(FieldEquals::new("status", "PENDING")),
            )
            .await
            .unwrap();
        assert_eq!(updated, doc(json!({"status": "ACCEPTED"})));

        let err = store
            .update_document("tos_invites", "missing", Document::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn conditional_delete_leaves_foreign_documents() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("slots", "a@x.com", doc(json!({"invite_id": "i1"})))
            .await
            .unwrap();

        let removed = store
            .delete_document_if("slots", "a@x.com", FieldEquals::new("invite_id", "i2"))
            .await
            .unwrap();
        assert!(!removed);

        let removed = store
            .delete_document_if("slots", "a@x.com", FieldEquals::new("invite_id", "i1"))
            .await
            .unwrap();
        assert!(removed);
        assert!(!store.delete_document("slots", "a@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn query_filters_by_collection_and_field() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("users", "u1", doc(json!({"email": "a@x.com"})))
            .await
            .unwrap();
        store
            .set_document("users", "u2", doc(json!({"email": "b@x.com"})))
            .await
            .unwrap();
        store
            .set_document("orders", "o1", doc(json!({"email": "a@x.com"})))
            .await
            .unwrap();

        let found = store
            .query_equals("users", FieldEquals::new("email", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u1");
        assert_eq!(store.list_documents("users").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn watch_yields_initial_state_then_changes() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("tos_invites", "i1", doc(json!({"status": "PENDING"})))
            .await
            .unwrap();

        let mut stream = store.watch_document("tos_invites", "i1").await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(doc(json!({"status": "PENDING"})))
        );

        store
            .update_document(
                "tos_invites",
                "i1",
                doc(json!({"status": "ACCEPTED"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(doc(json!({"status": "ACCEPTED"})))
        );

        store.delete_document("tos_invites", "i1").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn dropping_the_last_watch_forgets_the_channel() {
        let store = MemoryDocumentStore::new();
        let first = store.watch_document("tos_invites", "i1").await.unwrap();
        let second = store.watch_document("tos_invites", "i1").await.unwrap();
        assert_eq!(store.inner.watchers.len(), 1);

        drop(first);
        assert_eq!(store.inner.watchers.len(), 1);
        drop(second);
        assert!(store.inner.watchers.is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_calls_and_ends_watches() {
        let store = MemoryDocumentStore::new();
        let mut stream = store.watch_document("tos_invites", "i1").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        store.set_offline(true);
        assert!(stream.next().await.unwrap().unwrap_err().is_unavailable());
        assert!(stream.next().await.is_none());
        assert!(store.health_check().await.is_err());
        assert!(store.get_document("tos_invites", "i1").await.is_err());

        store.set_offline(false);
        assert!(store.try_reconnect().await.is_ok());
    }
}
