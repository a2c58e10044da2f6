//! A user's forecast for one match within one group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GroupId, MatchId, PredictionId, SeasonId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Home => "home",
            Outcome::Draw => "draw",
            Outcome::Away => "away",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "home" => Outcome::Home,
            "draw" => Outcome::Draw,
            "away" => Outcome::Away,
            _ => return None,
        })
    }

    /// Derive H/D/A from a final score pair.
    pub fn from_scores(home: i32, away: i32) -> Outcome {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Less => Outcome::Away,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Settled,
    Voided,
    Cancelled,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Settled => "settled",
            PredictionStatus::Voided => "voided",
            PredictionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => PredictionStatus::Pending,
            "settled" => PredictionStatus::Settled,
            "voided" => PredictionStatus::Voided,
            "cancelled" => PredictionStatus::Cancelled,
            _ => return None,
        })
    }

    /// Cancelled and voided predictions never score (§4.4 settlement loop).
    pub fn is_scorable(&self) -> bool {
        matches!(self, PredictionStatus::Pending | PredictionStatus::Settled)
    }
}

/// The payload carried by `Submit`/`Update`; not yet validated or normalized.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionPayload {
    pub predicted_winner: Option<Outcome>,
    pub predicted_home_score: Option<i32>,
    pub predicted_away_score: Option<i32>,
    pub notes: Option<String>,
}

impl PredictionPayload {
    /// §3 invariant: at least one of (winner, exact-score pair) present;
    /// if both given, the implied winner from the scores must agree with
    /// the explicit winner. Normalizes the stored winner from scores when
    /// the winner field was left blank.
    pub fn validate_and_normalize(&self) -> Result<Outcome, String> {
        let score_pair = match (self.predicted_home_score, self.predicted_away_score) {
            (Some(h), Some(a)) => {
                if h < 0 || a < 0 {
                    return Err("predicted scores must be non-negative".into());
                }
                Some((h, a))
            }
            (None, None) => None,
            _ => return Err("both predicted scores must be set together, or neither".into()),
        };

        match (self.predicted_winner, score_pair) {
            (None, None) => Err("winner or exact score is required".into()),
            (Some(w), None) => Ok(w),
            (None, Some((h, a))) => Ok(Outcome::from_scores(h, a)),
            (Some(w), Some((h, a))) => {
                let implied = Outcome::from_scores(h, a);
                if implied != w {
                    Err("predicted winner does not match predicted score".into())
                } else {
                    Ok(w)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub match_id: MatchId,
    /// Denormalized from the match at submission time — `season(p)` in
    /// §4.4's settlement algorithm, cached so settlement never has to join
    /// back to `matches` to find the leaderboard scope.
    pub season_id: SeasonId,
    pub predicted_winner: Outcome,
    pub predicted_home_score: Option<i32>,
    pub predicted_away_score: Option<i32>,
    pub placed_at: DateTime<Utc>,
    pub status: PredictionStatus,
    pub points_earned: i32,
    /// The scoring rule the last settlement applied (`"exact"`/`"winner"`/
    /// `"miss"`), mirroring `settlements.rule_applied`. `None` until settled.
    /// Read back instead of inferring a rule from `points_earned`, since a
    /// custom `ScoringConfig` can make point values ambiguous.
    pub rule_applied: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionFilter {
    pub match_id: Option<MatchId>,
    pub group_id: Option<GroupId>,
    pub status: Option<PredictionStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Read-side aggregate used by `user_stats`/`match_stats` (SPEC_FULL §2
/// supplement, grounded in `bet_service.py::get_user_statistics`).
#[derive(Debug, Clone, Serialize, Default)]
pub struct PredictionStats {
    pub total_predictions: u64,
    pub total_points: i64,
    pub exact_score_count: u64,
    pub winner_only_count: u64,
    pub pending_count: u64,
}
