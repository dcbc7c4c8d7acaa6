//! DTO definitions for the simulation sandbox.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::{validate_draft_id, validate_strategy_source};

/// Strategy draft forwarded to the match engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_strategy_source"))]
pub struct SubmitDraftRequest {
    /// Registered team submitting the draft.
    #[validate(length(min = 1, max = 64))]
    pub team_name: String,
    /// `draft_1` or `draft_2`.
    #[validate(custom(function = "validate_draft_id"))]
    pub draft_id: String,
    /// Name shown on the leaderboard.
    #[validate(length(min = 1, max = 80))]
    pub strategy_name: String,
    /// Plain-language description the engine turns into code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 4000))]
    pub strategy_desc: Option<String>,
    /// Source code, used as is when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20000))]
    pub strategy_code: Option<String>,
}

/// Selection of the draft to lock in as the team's final strategy.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LockSelectionRequest {
    /// Registered team.
    #[validate(length(min = 1, max = 64))]
    pub team_name: String,
    /// Draft to lock in.
    #[validate(custom(function = "validate_draft_id"))]
    pub draft_id: String,
}

/// Tournament statistics of one strategy.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct StrategyStatsDto {
    /// Strategy name.
    pub strategy: String,
    /// One-based position.
    pub rank: u32,
    /// Tournament points.
    pub points: f64,
    /// Matches won.
    pub wins: u32,
    /// Matches drawn.
    pub draws: u32,
    /// Matches lost.
    pub losses: u32,
    /// Nodes captured over all matches.
    pub total_nodes: u64,
    /// Matches played.
    pub matches: u32,
}

/// Engine answer to a draft submission.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct SubmitDraftResponse {
    /// Engine status message.
    pub message: String,
    /// Whether the strategy's logic differs from every known one.
    pub is_unique: bool,
    /// Standings ordered by rank.
    pub standings: Vec<StrategyStatsDto>,
}

/// Engine answer to a lock-in.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct LockSelectionResponse {
    /// Engine status message.
    pub message: String,
    /// Strategy name kept for the tournament.
    pub final_name: String,
    /// The engine renamed the strategy to avoid a clash.
    pub name_changed: bool,
    /// Whether the logic differs from every other locked strategy.
    pub is_logic_unique: bool,
}

