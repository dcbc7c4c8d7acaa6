use std::time::Duration;

use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB did not answer the initial ping")]
    InitialPing {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB database `{database}` did not answer within {after:?}")]
    PingTimeout { database: String, after: Duration },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load document `{collection}/{id}`")]
    Load {
        collection: String,
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write document `{collection}/{id}`")]
    Write {
        collection: String,
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete document `{collection}/{id}`")]
    Delete {
        collection: String,
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to query collection `{collection}`")]
    Query {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("change stream on `{collection}/{id}` failed")]
    Watch {
        collection: String,
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("gave up updating `{collection}/{id}` after {attempts} concurrent writes")]
    Contention {
        collection: String,
        id: String,
        attempts: u32,
    },
}
