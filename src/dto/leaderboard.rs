//! DTO definitions for the public leaderboard.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dao::models::LeaderboardEntryEntity;

/// Query string of `GET /leaderboard`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Maximum number of entries; defaults to the configured limit.
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

/// Standing of one strategy joined with its team's players.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct LeaderboardEntryDto {
    /// One-based position.
    pub rank: u32,
    /// Strategy name.
    pub strategy: String,
    /// Owning team, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// Display names of the team members that have a profile.
    pub players: Vec<String>,
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

impl LeaderboardEntryDto {
    /// Joins a stored standing with the resolved player names.
    pub fn new(entry: LeaderboardEntryEntity, players: Vec<String>) -> Self {
        Self {
            rank: entry.rank,
            strategy: entry.strategy,
            team_name: entry.team_name,
            players,
            points: entry.points,
            wins: entry.wins,
            draws: entry.draws,
            losses: entry.losses,
            total_nodes: entry.total_nodes,
            matches: entry.matches,
        }
    }
}

/// Body of `GET /leaderboard`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    /// Standings ordered by rank.
    pub entries: Vec<LeaderboardEntryDto>,

    /// RFC 3339 time the standings were read from the store.
    pub fetched_at: String,
}
