//! Group membership — the scope for prediction admission and leaderboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GroupId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Member,
    Moderator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub role: MembershipRole,
}

impl GroupMembership {
    /// §3: a prediction is admissible only if the membership is active at
    /// `placedAt`.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.joined_at <= at && self.left_at.map_or(true, |left| at < left)
    }
}
