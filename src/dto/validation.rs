//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dto::sandbox::SubmitDraftRequest;

/// Draft slots offered by the match engine.
pub const DRAFT_IDS: [&str; 2] = ["draft_1", "draft_2"];

/// Validates that a draft id names one of the two draft slots.
///
/// ```ignore
/// validate_draft_id("draft_1") // Ok
/// validate_draft_id("draft_3") // Err
/// ```
pub fn validate_draft_id(id: &str) -> Result<(), ValidationError> {
    if DRAFT_IDS.contains(&id) {
        return Ok(());
    }

    let mut err = ValidationError::new("draft_id");
    err.message = Some(format!("draft_id must be one of {DRAFT_IDS:?} (got `{id}`)").into());
    Err(err)
}

/// A draft needs a description or code to start from.
pub fn validate_strategy_source(request: &SubmitDraftRequest) -> Result<(), ValidationError> {
    let filled = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if filled(&request.strategy_desc) || filled(&request.strategy_code) {
        return Ok(());
    }

    let mut err = ValidationError::new("strategy_source");
    err.message = Some("provide either strategy_desc or strategy_code".into());
    Err(err)
}
