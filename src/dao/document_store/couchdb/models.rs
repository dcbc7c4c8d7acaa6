use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::document_store::{Document, StoredDocument};

pub const ID_SEPARATOR: &str = "::";
pub const END_SUFFIX: &str = "\u{ffff}";

/// All collections share one database; ids are prefixed with the collection.
pub fn doc_id(collection: &str, id: &str) -> String {
    format!("{collection}{ID_SEPARATOR}{id}")
}

pub fn collection_prefix(collection: &str) -> String {
    format!("{collection}{ID_SEPARATOR}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: Document,
}

impl CouchDocument {
    pub fn new(id: String, rev: Option<String>, body: Document) -> Self {
        Self { id, rev, body }
    }

    /// Strip the collection prefix and CouchDB bookkeeping fields.
    pub fn into_stored(mut self, prefix: &str) -> StoredDocument {
        self.body.remove("_deleted");
        let id = self
            .id
            .strip_prefix(prefix)
            .map(str::to_owned)
            .unwrap_or(self.id);
        StoredDocument {
            id,
            data: self.body,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<CouchDocument>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<CouchDocument>,
}

/// Sequence ids are opaque strings on CouchDB 2+ and integers on 1.x.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_round_trips_bookkeeping_fields() {
        let raw = json!({"_id": "tos_teams::ALPHA", "_rev": "1-abc", "mode": "SOLO"});
        let doc: CouchDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.rev.as_deref(), Some("1-abc"));
        assert_eq!(doc.body.get("mode"), Some(&json!("SOLO")));
        assert!(!doc.body.contains_key("_id"));

        let stored = doc.into_stored(&collection_prefix("tos_teams"));
        assert_eq!(stored.id, "ALPHA");
    }

    #[test]
    fn new_documents_omit_revision() {
        let doc = CouchDocument::new(doc_id("tos_teams", "ALPHA"), None, Document::new());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"_id": "tos_teams::ALPHA"}));
    }

    #[test]
    fn sequence_params_accept_both_formats() {
        assert_eq!(seq_param(&json!("12-g1AAAA")), "12-g1AAAA");
        assert_eq!(seq_param(&json!(42)), "42");
    }
}
