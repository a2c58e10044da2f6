//! The contest engine's HTTP surface (§6): predictions, results, and
//! leaderboard reads, each handler translating a `Subject` + request body
//! into a call against the relevant store/engine.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::Utc;

use crate::api::dto::{
    AmendResultRequest, DisputeResultRequest, LeaderboardQuery, ListPredictionsQuery,
    PredictionResponse, PredictionStatsResponse, RankedEntryResponse, RecordResultRequest,
    ResultResponse, SubmitPredictionRequest, UpdatePredictionRequest,
};
use crate::api::AppState;
use crate::errors::{LeaderboardError, PredictionError, ResultError};
use crate::models::{Dispute, DisputeId, GroupId, PredictionFilter, PredictionId, PredictionPayload, ResultId, Subject};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/predictions", post(submit_prediction).get(list_predictions))
        .route("/api/predictions/stats", get(prediction_stats))
        .route(
            "/api/predictions/:id",
            patch(update_prediction).delete(cancel_prediction),
        )
        .route("/api/results", post(record_result))
        .route("/api/results/:id/confirm", post(confirm_result))
        .route("/api/results/:id/dispute", post(dispute_result))
        .route("/api/results/:id/amend", post(amend_result))
        .route("/api/results/:id/void", post(void_result))
        .route("/api/disputes/:id/resolve", post(resolve_dispute))
        .route("/api/groups/:group_id/leaderboard/top", get(group_leaderboard_top))
        .route("/api/groups/:group_id/leaderboard/me", get(group_leaderboard_me))
        .route("/api/groups/:group_id/leaderboard/around", get(group_leaderboard_around))
        .with_state(state)
}

async fn submit_prediction(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(req): Json<SubmitPredictionRequest>,
) -> Result<Json<PredictionResponse>, PredictionError> {
    let payload = PredictionPayload {
        predicted_winner: req.predicted_winner,
        predicted_home_score: req.predicted_home_score,
        predicted_away_score: req.predicted_away_score,
        notes: req.notes,
    };
    let prediction = state.predictions.submit(
        subject.user_id,
        req.group_id,
        req.match_id,
        &payload,
        Utc::now(),
    )?;
    Ok(Json(prediction.into()))
}

async fn update_prediction(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<PredictionId>,
    Json(req): Json<UpdatePredictionRequest>,
) -> Result<Json<PredictionResponse>, PredictionError> {
    let payload = PredictionPayload {
        predicted_winner: req.predicted_winner,
        predicted_home_score: req.predicted_home_score,
        predicted_away_score: req.predicted_away_score,
        notes: req.notes,
    };
    let prediction = state.predictions.update(id, subject.user_id, &payload, Utc::now())?;
    Ok(Json(prediction.into()))
}

async fn cancel_prediction(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<PredictionId>,
) -> Result<Json<PredictionResponse>, PredictionError> {
    let prediction = state.predictions.cancel(id, subject.user_id)?;
    Ok(Json(prediction.into()))
}

async fn list_predictions(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(query): Query<ListPredictionsQuery>,
) -> Result<Json<Vec<PredictionResponse>>, PredictionError> {
    let filter = PredictionFilter {
        group_id: query.group_id,
        match_id: query.match_id,
        status: None,
        date_from: query.date_from,
        date_to: query.date_to,
    };
    let predictions = state.predictions.list_for_user(subject.user_id, &filter)?;
    Ok(Json(predictions.into_iter().map(PredictionResponse::from).collect()))
}

async fn prediction_stats(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(query): Query<ListPredictionsQuery>,
) -> Result<Json<PredictionStatsResponse>, PredictionError> {
    let stats = state.predictions.user_stats(subject.user_id, query.group_id)?;
    Ok(Json(PredictionStatsResponse { stats }))
}

/// Result mutations are operator actions; there is no dedicated authz error
/// in `ResultError` (it is a storage/domain taxonomy, §7), so a forbidden
/// admin check here is surfaced the same way an invalid request body is.
fn require_admin(subject: &Subject) -> Result<(), ResultError> {
    if subject.is_admin() {
        Ok(())
    } else {
        Err(ResultError::ValidationFailed("admin role required".into()))
    }
}

async fn record_result(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(req): Json<RecordResultRequest>,
) -> Result<Json<ResultResponse>, ResultError> {
    require_admin(&subject)?;
    let result = state.results.record(
        req.match_id,
        req.result_type,
        req.home_score,
        req.away_score,
        subject.user_id,
        Utc::now(),
    )?;
    Ok(Json(result.into()))
}

async fn confirm_result(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<ResultId>,
) -> Result<Json<ResultResponse>, ResultError> {
    require_admin(&subject)?;
    let result = state.results.confirm(id, Utc::now())?;
    Ok(Json(result.into()))
}

async fn amend_result(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<ResultId>,
    Json(req): Json<AmendResultRequest>,
) -> Result<Json<ResultResponse>, ResultError> {
    require_admin(&subject)?;
    let result = state
        .results
        .amend(id, req.home_score, req.away_score, subject.user_id, Utc::now())?;
    Ok(Json(result.into()))
}

async fn void_result(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<ResultId>,
) -> Result<Json<ResultResponse>, ResultError> {
    require_admin(&subject)?;
    let result = state.results.void(id, Utc::now())?;
    Ok(Json(result.into()))
}

async fn dispute_result(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<ResultId>,
    Json(req): Json<DisputeResultRequest>,
) -> Result<Response, ResultError> {
    let dispute: Dispute = state
        .results
        .dispute(id, subject.user_id, req.reason, req.evidence, Utc::now())?;
    Ok((StatusCode::CREATED, Json(dispute)).into_response())
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(dispute_id): Path<DisputeId>,
) -> Result<Json<ResultResponse>, ResultError> {
    require_admin(&subject)?;
    let result = state.results.resolve(dispute_id, Utc::now())?;
    Ok(Json(result.into()))
}

async fn group_leaderboard_top(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<RankedEntryResponse>>, LeaderboardError> {
    let n = query.limit.unwrap_or(50);
    let ranked = state.leaderboard.top_n(group_id, query.season_id, n)?;
    Ok(Json(ranked.into_iter().map(RankedEntryResponse::from).collect()))
}

async fn group_leaderboard_me(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<RankedEntryResponse>, LeaderboardError> {
    let ranked = state.leaderboard.user_rank(group_id, query.season_id, subject.user_id)?;
    Ok(Json(ranked.into()))
}

async fn group_leaderboard_around(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<RankedEntryResponse>>, LeaderboardError> {
    let k = query.limit.unwrap_or(5);
    let ranked = state
        .leaderboard
        .around_user(group_id, query.season_id, subject.user_id, k)?;
    Ok(Json(ranked.into_iter().map(RankedEntryResponse::from).collect()))
}
