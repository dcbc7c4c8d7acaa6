//! HTTP client for the external match engine that simulates drafts.

use std::cmp::Ordering;

use indexmap::IndexMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    config::MatchEngineConfig,
    dto::sandbox::{
        LockSelectionRequest, LockSelectionResponse, StrategyStatsDto, SubmitDraftRequest,
        SubmitDraftResponse,
    },
    error::ServiceError,
};

const SUCCESS_STATUS: &str = "success";

/// Client forwarding sandbox requests to the match engine.
#[derive(Clone)]
pub struct MatchEngineClient {
    http: Client,
    config: MatchEngineConfig,
}

#[derive(Debug, Deserialize)]
struct EngineErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct SubmitDraftPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
    is_unique: bool,
    leaderboard: IndexMap<String, StrategyStatsPayload>,
}

#[derive(Debug, Deserialize)]
struct StrategyStatsPayload {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    rank: Option<u32>,
    points: f64,
    wins: u32,
    draws: u32,
    losses: u32,
    total_nodes: u64,
    matches: u32,
}

#[derive(Debug, Deserialize)]
struct LockSelectionPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
    final_name: String,
    name_changed: bool,
    is_logic_unique: bool,
}

impl MatchEngineClient {
    /// Client with the configured request timeout.
    pub fn new(config: MatchEngineConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| ServiceError::Engine {
                status: None,
                message: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self { http, config })
    }

    /// Engine root URL.
    pub fn base_url(&self) -> &str {

        &self.config.base_url
    }

    /// Submit a draft and return the tournament standings it produced.
    pub async fn submit_draft(
        &self,
        request: &SubmitDraftRequest,
    ) -> Result<SubmitDraftResponse, ServiceError> {
        let body = self.post(&self.config.submit_draft_path, request).await?;
        parse_submit_draft(&body)
    }

    /// Lock one of the team's drafts as its final strategy.
    pub async fn lock_selection(
        &self,
        request: &LockSelectionRequest,
    ) -> Result<LockSelectionResponse, ServiceError> {
        let body = self.post(&self.config.lock_selection_path, request).await?;
        parse_lock_selection(&body)
    }

    async fn post<T: serde::Serialize>(&self, path: &str, payload: &T) -> Result<String, ServiceError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        debug!(%url, "forwarding request to match engine");

        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(%url, %status, "match engine rejected request");
            return Err(engine_error(status, &body));
        }
        Ok(body)
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        return ServiceError::Timeout;
    }
    ServiceError::Engine {
        status: None,
        message: format!("match engine unreachable: {err}"),
    }
}

fn engine_error(status: StatusCode, body: &str) -> ServiceError {
    let message = serde_json::from_str::<EngineErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });
    ServiceError::Engine {
        status: Some(status.as_u16()),
        message,
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|err| ServiceError::Protocol(err.to_string()))
}

fn ensure_success(status: &str) -> Result<(), ServiceError> {
    if status == SUCCESS_STATUS {
        Ok(())
    } else {
        Err(ServiceError::Protocol(format!(
            "unexpected status `{status}` in a successful response"
        )))
    }
}

pub(crate) fn parse_submit_draft(body: &str) -> Result<SubmitDraftResponse, ServiceError> {
    let payload: SubmitDraftPayload = decode(body)?;
    ensure_success(&payload.status)?;

    let mut standings: Vec<StrategyStatsDto> = payload
        .leaderboard
        .into_iter()
        .map(|(key, stats)| StrategyStatsDto {
            strategy: stats.strategy.unwrap_or(key),
            rank: stats.rank.unwrap_or(0),
            points: stats.points,
            wins: stats.wins,
            draws: stats.draws,
            losses: stats.losses,
            total_nodes: stats.total_nodes,
            matches: stats.matches,
        })
        .collect();

    if standings.iter().any(|entry| entry.rank == 0) {
        rank_standings(&mut standings);
    } else {
        standings.sort_by_key(|entry| entry.rank);
    }

    Ok(SubmitDraftResponse {
        message: payload
            .message
            .unwrap_or_else(|| "draft submitted".to_string()),
        is_unique: payload.is_unique,
        standings,
    })
}

pub(crate) fn parse_lock_selection(body: &str) -> Result<LockSelectionResponse, ServiceError> {
    let payload: LockSelectionPayload = decode(body)?;
    ensure_success(&payload.status)?;
    if payload.final_name.trim().is_empty() {
        return Err(ServiceError::Protocol("empty final_name".into()));
    }

    Ok(LockSelectionResponse {
        message: payload
            .message
            .unwrap_or_else(|| "selection locked".to_string()),
        final_name: payload.final_name,
        name_changed: payload.name_changed,
        is_logic_unique: payload.is_logic_unique,
    })
}

/// Order by points then captured nodes, both descending, and number from 1.
fn rank_standings(standings: &mut [StrategyStatsDto]) {
    standings.sort_by(|a, b| {
        b.points
            .partial_cmp(&a.points)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.total_nodes.cmp(&a.total_nodes))
    });
    for (index, entry) in standings.iter_mut().enumerate() {
        entry.rank = index as u32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(points: f64, nodes: u64, rank: Option<u32>) -> serde_json::Value {
        let mut value = serde_json::json!({
            "points": points, "wins": 1, "draws": 0, "losses": 1,
            "total_nodes": nodes, "matches": 2
        });
        if let Some(rank) = rank {
            value["rank"] = rank.into();
        }
        value
    }

    #[test]
    fn submit_draft_keeps_engine_ranks() {
        let body = serde_json::json!({
            "status": "success",
            "message": "Draft simulated",
            "is_unique": true,
            "leaderboard": {
                "Turtle": stats(3.0, 40, Some(2)),
                "Blitz": stats(6.0, 10, Some(1)),
            }
        })
        .to_string();

        let parsed = parse_submit_draft(&body).unwrap();
        assert_eq!(parsed.message, "Draft simulated");
        assert!(parsed.is_unique);
        let order: Vec<_> = parsed.standings.iter().map(|s| s.strategy.as_str()).collect();
        assert_eq!(order, ["Blitz", "Turtle"]);
    }

    #[test]
    fn missing_ranks_are_recomputed_from_points_then_nodes() {
        let body = serde_json::json!({
            "status": "success",
            "is_unique": false,
            "leaderboard": {
                "A": stats(3.0, 10, None),
                "B": stats(3.0, 25, None),
                "C": stats(9.0, 0, None),
            }
        })
        .to_string();

        let parsed = parse_submit_draft(&body).unwrap();
        let ranked: Vec<_> = parsed
            .standings
            .iter()
            .map(|s| (s.strategy.as_str(), s.rank))
            .collect();
        assert_eq!(ranked, [("C", 1), ("B", 2), ("A", 3)]);
        assert_eq!(parsed.message, "draft submitted");
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        assert!(matches!(
            parse_submit_draft(r#"{"status":"success","leaderboard":{}}"#),
            Err(ServiceError::Protocol(_))
        ));
        assert!(matches!(
            parse_submit_draft(r#"{"status":"error","is_unique":true,"leaderboard":{}}"#),
            Err(ServiceError::Protocol(_))
        ));
        assert!(matches!(
            parse_lock_selection("not json"),
            Err(ServiceError::Protocol(_))
        ));
        assert!(matches!(
            parse_lock_selection(
                r#"{"status":"success","final_name":" ","name_changed":false,"is_logic_unique":true}"#
            ),
            Err(ServiceError::Protocol(_))
        ));
    }

    #[test]
    fn lock_selection_parses_rename() {
        let parsed = parse_lock_selection(
            r#"{"status":"success","message":"Locked","final_name":"Turtle_2","name_changed":true,"is_logic_unique":false}"#,
        )
        .unwrap();
        assert_eq!(parsed.final_name, "Turtle_2");
        assert!(parsed.name_changed);
        assert!(!parsed.is_logic_unique);
    }

    #[test]
    fn engine_errors_carry_status_and_message() {
        match engine_error(StatusCode::NOT_FOUND, r#"{"error":"Team not found"}"#) {
            ServiceError::Engine { status, message } => {
                assert_eq!(status, Some(404));
                assert_eq!(message, "Team not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match engine_error(StatusCode::INTERNAL_SERVER_ERROR, "<html>") {
            ServiceError::Engine { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_engine_is_an_engine_error() {
        let client = MatchEngineClient::new(MatchEngineConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..MatchEngineConfig::default()
        })
        .unwrap();
        let request = LockSelectionRequest {
            team_name: "ALPHA".into(),
            draft_id: "draft_1".into(),
        };
        let err = client.lock_selection(&request).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Engine { status: None, .. } | ServiceError::Timeout
        ));
    }
}
