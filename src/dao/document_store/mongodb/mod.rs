//! MongoDB backend built on change streams and revision counters.

mod config;
mod connection;
mod error;
mod models;
mod store;

pub use config::MongoConfig;
pub use store::MongoDocumentStore;

use crate::dao::storage::StorageError;
use error::MongoDaoError;


impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
