use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    dao::{leaderboard::LeaderboardStore, teams::TeamStore, users::UserDirectory},
    dto::{
        format_system_time,
        leaderboard::{LeaderboardEntryDto, LeaderboardResponse},
    },
    error::ServiceError,
    state::SharedState,
};

struct CachedBoard {
    fetched_at: Instant,
    response: Arc<LeaderboardResponse>,
}

/// Per-limit cache of joined standings, expired after a fixed TTL.
pub struct LeaderboardCache {
    ttl: Duration,
    boards: DashMap<usize, CachedBoard>,
}

impl LeaderboardCache {
    /// Snapshots older than `ttl` are refetched.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            boards: DashMap::new(),
        }
    }

    fn get(&self, limit: usize) -> Option<Arc<LeaderboardResponse>> {
        let board = self.boards.get(&limit)?;
        (board.fetched_at.elapsed() < self.ttl).then(|| board.response.clone())
    }

    fn put(&self, limit: usize, response: Arc<LeaderboardResponse>) {
        self.boards.insert(
            limit,
            CachedBoard {
                fetched_at: Instant::now(),
                response,
            },
        );
    }

    /// Drop every cached snapshot.
    pub fn invalidate(&self) {

        self.boards.clear();
    }
}

/// Top `limit` standings with the display names of each team's players.
pub async fn leaderboard(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<Arc<LeaderboardResponse>, ServiceError> {
    let limit = limit.unwrap_or(state.config().leaderboard_default_limit);
    if let Some(cached) = state.leaderboard().get(limit) {
        return Ok(cached);
    }

    let store = state.require_document_store().await?;
    let entries = LeaderboardStore::new(store.clone()).top_entries(limit).await?;
    let teams = TeamStore::new(store.clone());
    let users = UserDirectory::new(store);

    let mut players_by_team: HashMap<String, Vec<String>> = HashMap::new();
    let mut joined = Vec::with_capacity(entries.len());
    for entry in entries {
        let players = match entry.team_name.as_deref() {
            Some(team_name) => match players_by_team.get(team_name) {
                Some(players) => players.clone(),
                None => {
                    let players = team_players(&teams, &users, team_name).await?;
                    players_by_team.insert(team_name.to_string(), players.clone());
                    players
                }
            },
            None => Vec::new(),
        };
        joined.push(LeaderboardEntryDto::new(entry, players));
    }

    debug!(limit, entries = joined.len(), "leaderboard refreshed");
    let response = Arc::new(LeaderboardResponse {
        entries: joined,
        fetched_at: format_system_time(SystemTime::now()),
    });
    state.leaderboard().put(limit, response.clone());
    Ok(response)
}

async fn team_players(
    teams: &TeamStore,
    users: &UserDirectory,
    team_name: &str,
) -> Result<Vec<String>, ServiceError> {
    let Some(team) = teams.find_team(team_name).await? else {
        warn!(team = %team_name, "leaderboard references an unknown team");
        return Ok(Vec::new());
    };

    let mut players = Vec::with_capacity(team.members.len());
    for uid in &team.members {
        if let Some(name) = users.find_profile(uid).await?.and_then(|profile| profile.name) {
            players.push(name);
        }
    }
    Ok(players)
}
