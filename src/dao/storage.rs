use std::error::Error;
use thiserror::Error;


/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable or refusing the call.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Backend description of the failure.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Insert-if-absent lost against an existing document.
    #[error("document `{collection}/{id}` already exists")]
    AlreadyExists {
        /// Target collection.
        collection: String,
        /// Contested id.
        id: String,
    },
    /// Conditional write targeted a missing document.
    #[error("document `{collection}/{id}` not found")]
    NotFound {
        /// Target collection.
        collection: String,
        /// Missing id.
        id: String,
    },
    /// Compare-and-set precondition did not hold.
    #[error("precondition `{field} == {expected}` failed on `{collection}/{id}`")]
    PreconditionFailed {
        /// Target collection.
        collection: String,
        /// Target id.
        id: String,
        /// Field the condition was on.
        field: String,
        /// Value the caller expected.
        expected: String,
    },
    /// Stored payload does not match the expected entity shape.
    #[error("failed to decode document `{collection}/{id}`")]
    Decode {
        /// Source collection.
        collection: String,
        /// Offending id.
        id: String,
        /// Serde failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    pub(crate) fn already_exists(collection: &str, id: &str) -> Self {
        StorageError::AlreadyExists {
            collection: collection.to_owned(),
            id: id.to_owned(),
        }
    }

    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        StorageError::NotFound {
            collection: collection.to_owned(),
            id: id.to_owned(),
        }
    }

    pub(crate) fn decode(collection: &str, id: &str, source: serde_json::Error) -> Self {
        StorageError::Decode {
            collection: collection.to_owned(),
            id: id.to_owned(),
            source,
        }
    }

    /// Whether the error reports a transport or backend outage.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
