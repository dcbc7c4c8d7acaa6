//! Business services behind the HTTP routes.

/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Cached standings joined with team members.
pub mod leaderboard_service;
/// HTTP client for the external match engine.
pub mod match_engine;
/// Registration sessions and the team formation controller.
pub mod registration;
/// Draft submission and locking through the match engine.
pub mod sandbox_service;
/// Server-Sent Events streams of session views.
pub mod sse_service;
/// Document store connection supervisor with backoff.
pub mod storage_supervisor;
