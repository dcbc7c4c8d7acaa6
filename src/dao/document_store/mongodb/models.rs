use serde::{Deserialize, Serialize};

use crate::dao::document_store::{Document, StoredDocument};

/// Wire shape of every document: the string id, a revision counter used for
/// compare-and-set, and the flattened body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default)]
    pub rev: i64,
    #[serde(flatten)]
    pub body: Document,
}

impl MongoDocument {
    pub fn new(id: &str, rev: i64, body: Document) -> Self {
        Self {
            id: id.to_owned(),
            rev,
            body,
        }
    }
}

impl From<MongoDocument> for StoredDocument {
    fn from(value: MongoDocument) -> Self {
        Self {
            id: value.id,
            data: value.body,
        }
    }
}
