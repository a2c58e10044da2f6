//! The immutable record pairing a prediction with a confirmed result version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PredictionId, SettlementId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub prediction_id: PredictionId,
    pub result_version: i64,
    pub points_awarded: i32,
    pub scored_at: DateTime<Utc>,
    pub rule_applied: String,
}

/// A dedicated marker version used for void reversals (§4.4), distinct
/// from any real confirmed result version (which are always >= 1).
pub const VOID_MARKER_VERSION: i64 = -1;
