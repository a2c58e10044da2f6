//! Request/response bodies for the contest engine's HTTP surface (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    GroupId, LeaderboardEntry, MatchId, Outcome, Prediction, PredictionStats, RankedEntry,
    ResultRecord, ResultType, SeasonId,
};

#[derive(Debug, Deserialize)]
pub struct SubmitPredictionRequest {
    pub group_id: GroupId,
    pub match_id: MatchId,
    pub predicted_winner: Option<Outcome>,
    pub predicted_home_score: Option<i32>,
    pub predicted_away_score: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePredictionRequest {
    pub predicted_winner: Option<Outcome>,
    pub predicted_home_score: Option<i32>,
    pub predicted_away_score: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
}

impl From<Prediction> for PredictionResponse {
    fn from(prediction: Prediction) -> Self {
        Self { prediction }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListPredictionsQuery {
    pub group_id: Option<GroupId>,
    pub match_id: Option<MatchId>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PredictionStatsResponse {
    #[serde(flatten)]
    pub stats: PredictionStats,
}

#[derive(Debug, Deserialize)]
pub struct RecordResultRequest {
    pub match_id: MatchId,
    pub result_type: ResultType,
    pub home_score: i32,
    pub away_score: i32,
}

#[derive(Debug, Deserialize)]
pub struct AmendResultRequest {
    pub home_score: i32,
    pub away_score: i32,
}

#[derive(Debug, Deserialize)]
pub struct DisputeResultRequest {
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    #[serde(flatten)]
    pub result: ResultRecord,
}

impl From<ResultRecord> for ResultResponse {
    fn from(result: ResultRecord) -> Self {
        Self { result }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub season_id: SeasonId,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RankedEntryResponse {
    pub rank: i64,
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
}

impl From<RankedEntry> for RankedEntryResponse {
    fn from(r: RankedEntry) -> Self {
        Self { rank: r.rank, entry: r.entry }
    }
}
