//! Per-(group, season, user) aggregate maintained by the Leaderboard Aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GroupId, SeasonId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub group_id: GroupId,
    pub season_id: SeasonId,
    pub user_id: UserId,
    pub total_points: i64,
    pub exact_score_count: i64,
    pub winner_only_count: i64,
    pub settled_prediction_count: i64,
    pub last_updated_at: DateTime<Utc>,
    pub rank_cached: Option<i64>,
}

/// An additive delta applied to one entry (§4.5 `Apply`). All fields may be
/// negative to support amendment compensation and void reversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaderboardDelta {
    pub points: i64,
    pub exact: i64,
    pub winner_only: i64,
    pub settled_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyTieBreak {
    /// Fewer predictions for the same points ranks higher (default).
    FewerPredictionsHigher,
    MorePredictionsHigher,
}

impl Default for EfficiencyTieBreak {
    fn default() -> Self {
        EfficiencyTieBreak::FewerPredictionsHigher
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub entry: LeaderboardEntry,
    pub rank: i64,
}
