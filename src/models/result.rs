//! Recorded match outcomes and the confirmation state machine's data shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DisputeId, MatchId, ResultId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    FullTime,
    HalfTime,
    ExtraTime,
    Penalties,
    Final,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::FullTime => "full_time",
            ResultType::HalfTime => "half_time",
            ResultType::ExtraTime => "extra_time",
            ResultType::Penalties => "penalties",
            ResultType::Final => "final",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "full_time" => ResultType::FullTime,
            "half_time" => ResultType::HalfTime,
            "extra_time" => ResultType::ExtraTime,
            "penalties" => ResultType::Penalties,
            "final" => ResultType::Final,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Confirmed,
    Disputed,
    Amended,
    Voided,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Confirmed => "confirmed",
            ResultStatus::Disputed => "disputed",
            ResultStatus::Amended => "amended",
            ResultStatus::Voided => "voided",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ResultStatus::Pending,
            "confirmed" => ResultStatus::Confirmed,
            "disputed" => ResultStatus::Disputed,
            "amended" => ResultStatus::Amended,
            "voided" => ResultStatus::Voided,
            _ => return None,
        })
    }
}

/// One version of a match result. `(match_id, result_type)` identifies the
/// result lineage; `version` increments on every amendment (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ResultId,
    pub match_id: MatchId,
    pub result_type: ResultType,
    pub version: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub status: ResultStatus,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub additional_data: Option<String>,
}

impl ResultRecord {
    pub fn validate_scores(home: i32, away: i32) -> Result<(), String> {
        if home < 0 || away < 0 {
            return Err("result scores must be non-negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub result_id: ResultId,
    pub disputer: UserId,
    pub reason: String,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}
