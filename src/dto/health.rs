//! Health check payload.

use serde::Serialize;
use utoipa::ToSchema;

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` while a document store is installed, `degraded` otherwise.
    pub status: &'static str,
    /// Whether the installed store answered its ping just now.
    pub store_reachable: bool,
    /// Number of open registration sessions.
    pub sessions: usize,
}

impl HealthResponse {
    /// Status string follows `degraded`.
    pub fn new(
degraded: bool, store_reachable: bool, sessions: usize) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" },
            store_reachable,
            sessions,
        }
    }
}
