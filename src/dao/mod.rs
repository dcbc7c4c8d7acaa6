//! Data access: the document store and the typed collections built on it.

/// Document store abstraction and its backends.
pub mod document_store;
/// Invitation records and the per-email slots guarding them.
pub mod invites;
/// Precomputed tournament standings.
pub mod leaderboard;
/// Database model definitions.
pub mod models;
/// Storage error types shared by every backend.
pub mod storage;
/// Team documents and team name rules.
pub mod teams;
/// User profiles, orders and ticket checks.
pub mod users;
