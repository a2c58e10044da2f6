//! Outbox event envelope (§6, §8): durable, written in the same transaction
//! as the state change that produces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::EventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ResultConfirmed,
    ResultAmended,
    ResultVoided,
    DeadlineClosed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ResultConfirmed => "result_confirmed",
            EventKind::ResultAmended => "result_amended",
            EventKind::ResultVoided => "result_voided",
            EventKind::DeadlineClosed => "deadline_closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "result_confirmed" => EventKind::ResultConfirmed,
            "result_amended" => EventKind::ResultAmended,
            "result_voided" => EventKind::ResultVoided,
            "deadline_closed" => EventKind::DeadlineClosed,
            _ => return None,
        })
    }
}

/// `{ eventId, type, key, version, payload, emittedAt }` from §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub kind: EventKind,
    /// `matchId` for `DeadlineClosed`, `resultId` for the result-lifecycle events.
    pub key: Uuid,
    pub version: i64,
    pub payload: String,
    pub emitted_at: DateTime<Utc>,
    pub delivered: bool,
}
