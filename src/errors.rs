//! The error taxonomy of §7: validation, authorization, not-found, and
//! conflict errors are values surfaced with a stable code; each component
//! gets its own enum so callers can match exhaustively, and each
//! implements `IntoResponse` the way `auth::middleware::AuthError` does.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

fn error_response(status: StatusCode, code: &str, message: impl fmt::Display) -> Response {
    (
        status,
        Json(json!({ "error": code, "message": message.to_string() })),
    )
        .into_response()
}

#[derive(Debug)]
pub enum MatchError {
    NotFound,
    InvariantViolation(String),
    InvalidStatusTransition { from: &'static str, to: &'static str },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::NotFound => write!(f, "match not found"),
            MatchError::InvariantViolation(msg) => write!(f, "{msg}"),
            MatchError::InvalidStatusTransition { from, to } => {
                write!(f, "cannot transition match from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for MatchError {}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        match &self {
            MatchError::NotFound => error_response(StatusCode::NOT_FOUND, "match_not_found", &self),
            MatchError::InvariantViolation(_) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_match", &self)
            }
            MatchError::InvalidStatusTransition { .. } => {
                error_response(StatusCode::CONFLICT, "invalid_status_transition", &self)
            }
        }
    }
}

#[derive(Debug)]
pub enum PredictionError {
    MatchNotFound,
    MatchClosed,
    NotGroupMember,
    InvalidPayload(String),
    AlreadyExists(uuid::Uuid),
    NotOwner,
    NotPending,
    NotFound,
    Internal(String),
}

impl fmt::Display for PredictionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionError::MatchNotFound => write!(f, "match not found"),
            PredictionError::MatchClosed => write!(f, "betting window is closed for this match"),
            PredictionError::NotGroupMember => write!(f, "not an active member of this group"),
            PredictionError::InvalidPayload(msg) => write!(f, "{msg}"),
            PredictionError::AlreadyExists(id) => {
                write!(f, "a prediction already exists: {id}")
            }
            PredictionError::NotOwner => write!(f, "not the owner of this prediction"),
            PredictionError::NotPending => write!(f, "prediction is no longer pending"),
            PredictionError::NotFound => write!(f, "prediction not found"),
            PredictionError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PredictionError {}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        match &self {
            PredictionError::MatchNotFound | PredictionError::NotFound => {
                error_response(StatusCode::NOT_FOUND, "not_found", &self)
            }
            PredictionError::MatchClosed => {
                error_response(StatusCode::CONFLICT, "match_closed", &self)
            }
            PredictionError::NotGroupMember => {
                error_response(StatusCode::FORBIDDEN, "not_group_member", &self)
            }
            PredictionError::InvalidPayload(_) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_payload", &self)
            }
            PredictionError::AlreadyExists(id) => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "already_exists",
                    "message": self.to_string(),
                    "existing_prediction_id": id.to_string(),
                })),
            )
                .into_response(),
            PredictionError::NotOwner => {
                error_response(StatusCode::FORBIDDEN, "not_owner", &self)
            }
            PredictionError::NotPending => {
                error_response(StatusCode::CONFLICT, "not_pending", &self)
            }
            PredictionError::Internal(_) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &self)
            }
        }
    }
}

#[derive(Debug)]
pub enum ResultError {
    MatchNotFound,
    NotFound,
    DuplicateResult,
    InvalidScores,
    NotPending,
    NotConfirmable,
    NotAmendable,
    MatchNotScorable,
    ValidationFailed(String),
    Internal(String),
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultError::MatchNotFound => write!(f, "match not found"),
            ResultError::NotFound => write!(f, "result not found"),
            ResultError::DuplicateResult => write!(f, "a result of this type already exists"),
            ResultError::InvalidScores => write!(f, "scores must be non-negative"),
            ResultError::NotPending => write!(f, "result is not pending"),
            ResultError::NotConfirmable => write!(f, "result cannot be confirmed from its current state"),
            ResultError::NotAmendable => write!(f, "result cannot be amended from its current state"),
            ResultError::MatchNotScorable => {
                write!(f, "match is not yet in a terminal-for-scoring state")
            }
            ResultError::ValidationFailed(msg) => write!(f, "{msg}"),
            ResultError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ResultError {}

impl IntoResponse for ResultError {
    fn into_response(self) -> Response {
        match &self {
            ResultError::MatchNotFound | ResultError::NotFound => {
                error_response(StatusCode::NOT_FOUND, "not_found", &self)
            }
            ResultError::DuplicateResult => {
                error_response(StatusCode::CONFLICT, "duplicate_result", &self)
            }
            ResultError::InvalidScores | ResultError::ValidationFailed(_) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_scores", &self)
            }
            ResultError::NotPending => error_response(StatusCode::CONFLICT, "not_pending", &self),
            ResultError::NotConfirmable => {
                error_response(StatusCode::CONFLICT, "not_confirmable", &self)
            }
            ResultError::NotAmendable => {
                error_response(StatusCode::CONFLICT, "not_amendable", &self)
            }
            ResultError::MatchNotScorable => {
                error_response(StatusCode::CONFLICT, "match_not_scorable", &self)
            }
            ResultError::Internal(_) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &self)
            }
        }
    }
}

#[derive(Debug)]
pub enum LeaderboardError {
    GroupNotFound,
    NotRanked,
    Internal(String),
}

impl fmt::Display for LeaderboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaderboardError::GroupNotFound => write!(f, "group not found"),
            LeaderboardError::NotRanked => write!(f, "user has no settlements in this scope"),
            LeaderboardError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LeaderboardError {}

impl IntoResponse for LeaderboardError {
    fn into_response(self) -> Response {
        match &self {
            LeaderboardError::GroupNotFound => {
                error_response(StatusCode::NOT_FOUND, "group_not_found", &self)
            }
            LeaderboardError::NotRanked => {
                error_response(StatusCode::NOT_FOUND, "not_ranked", &self)
            }
            LeaderboardError::Internal(_) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &self)
            }
        }
    }
}

/// Any unexpected storage failure funnels through here so handlers don't
/// need to hand-wrap every `rusqlite::Error`.
pub fn internal(err: impl fmt::Display) -> String {
    tracing::error!(error = %err, "internal invariant or storage failure");
    err.to_string()
}
