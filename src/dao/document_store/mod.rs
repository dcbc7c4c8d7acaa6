//! Key-document store abstraction consumed by the registration workflow.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Every backend
//! offers the same primitives: plain reads and upserts, an insert-if-absent
//! write used for uniqueness claims, compare-and-set updates and deletes, and
//! a push stream of changes for a single document.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::dao::storage::{StorageError, StorageResult};

pub use memory::MemoryDocumentStore;

/// JSON object stored under a document id.
pub type Document = Map<String, Value>;

/// Stream of snapshots for one document; `None` means the document is gone.
///
/// The first item is always the state at subscription time.
pub type DocumentStream = BoxStream<'static, StorageResult<Option<Document>>>;

/// Document returned by collection scans, paired with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Id within the collection.
    pub id: String,
    /// Document body.
    pub data: Document,
}

/// Equality condition on a top-level string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEquals {
    /// Top-level field name.
    pub field: String,
    /// Expected string value.
    pub value: String,
}

impl FieldEquals {
    /// Condition `field == value`.
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether `document` carries `field` with exactly this string value.
    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }

    pub(crate) fn failed(&self, collection: &str, id: &str) -> StorageError {
        StorageError::PreconditionFailed {
            collection: collection.to_owned(),
            id: id.to_owned(),
            field: self.field.clone(),
            expected: self.value.clone(),
        }
    }
}

/// Abstraction over the key-document database backing registration.
pub trait DocumentStore: Send + Sync {
    /// Read a document, `None` when absent.
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>>;

    /// Create or fully replace a document.
    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert a document only if the id is free, failing with
    /// [`StorageError::AlreadyExists`] otherwise.
    fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Merge `patch` into an existing document and return the result.
    ///
    /// With a precondition the write only happens when it holds at write time.
    fn update_document(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> BoxFuture<'static, StorageResult<Document>>;

    /// Delete a document, returning whether it existed.
    fn delete_document(&self, collection: &str, id: &str) -> BoxFuture<'static, StorageResult<bool>>;

    /// Delete a document only when `precondition` holds, returning whether it was removed.
    fn delete_document_if(
        &self,
        collection: &str,
        id: &str,
        precondition: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Every document of `collection` matching `filter`.
    fn query_equals(
        &self,
        collection: &str,
        filter: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>>;

    /// Every document of `collection`.
    fn list_documents(&self, collection: &str)
    -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>>;

    /// Subscribe to changes of a single document.
    fn watch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>>;

    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Re-establish the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;

}

/// Shallow merge of `patch` into `target`; `null` values remove the field.
pub fn merge_patch(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

/// Serialise an entity into a document body.
pub fn to_document<T: Serialize>(
    collection: &str,
    id: &str,
    value: &T,
) -> StorageResult<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StorageError::decode(
            collection,
            id,
            <serde_json::Error as serde::ser::Error>::custom("entity is not a JSON object"),
        )),
        Err(source) => Err(StorageError::decode(collection, id, source)),
    }
}

/// Deserialise a document body into an entity.
pub fn from_document<T: DeserializeOwned>(
    collection: &str,
    id: &str,
    document: Document,
) -> StorageResult<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|source| StorageError::decode(collection, id, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn merge_patch_overwrites_and_removes() {
        let mut target = doc(json!({"status": "PENDING", "team_name": "OLD", "keep": 1}));
        merge_patch(
            &mut target,
            doc(json!({"status": "COMPLETED", "team_name": null})),
        );

        assert_eq!(target, doc(json!({"status": "COMPLETED", "keep": 1})));
    }

    #[test]
    fn field_equals_only_matches_strings() {
        let document = doc(json!({"status": "PENDING", "rank": 1}));
        assert!(FieldEquals::new("status", "PENDING").matches(&document));
        assert!(!FieldEquals::new("status", "ACCEPTED").matches(&document));
        assert!(!FieldEquals::new("rank", "1").matches(&document));
        assert!(!FieldEquals::new("missing", "").matches(&document));
    }

    #[test]
    fn to_document_rejects_non_objects() {
        let err = to_document("c", "id", &42).unwrap_err();
        assert!(matches!(err, StorageError::Decode { .. }));
    }
}
