//! Opaque 128-bit identifiers shared across the core.
//!
//! Every entity in the contest engine is keyed by a `Uuid`; these aliases
//! exist purely so signatures read as domain types instead of bare `Uuid`.

use uuid::Uuid;

pub type MatchId = Uuid;
pub type CompetitionId = Uuid;
pub type ParticipantId = Uuid;
pub type SeasonId = Uuid;
pub type UserId = Uuid;
pub type GroupId = Uuid;
pub type PredictionId = Uuid;
pub type ResultId = Uuid;
pub type DisputeId = Uuid;
pub type SettlementId = Uuid;
pub type EventId = Uuid;
