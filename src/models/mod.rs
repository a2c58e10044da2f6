//! Core domain types (§3). Pure data + the invariants that govern it;
//! no storage or transport concerns live here.

pub mod event;
pub mod group;
pub mod identity;
pub mod ids;
pub mod leaderboard;
pub mod match_;
pub mod prediction;
pub mod result;
pub mod settlement;

pub use event::{EventKind, OutboxEvent};
pub use group::{GroupMembership, MembershipRole};
pub use identity::{Role, Subject};
pub use ids::*;
pub use leaderboard::{EfficiencyTieBreak, LeaderboardDelta, LeaderboardEntry, RankedEntry};
pub use match_::{Match, MatchOpenness, MatchStatus};
pub use prediction::{Outcome, Prediction, PredictionFilter, PredictionPayload, PredictionStats, PredictionStatus};
pub use result::{Dispute, ResultRecord, ResultStatus, ResultType};
pub use settlement::{Settlement, VOID_MARKER_VERSION};
