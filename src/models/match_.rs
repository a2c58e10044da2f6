//! The scheduled contest between two participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CompetitionId, MatchId, ParticipantId, SeasonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    HalfTime,
    ExtraTime,
    Penalties,
    Finished,
    Postponed,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::HalfTime => "halftime",
            MatchStatus::ExtraTime => "extra_time",
            MatchStatus::Penalties => "penalties",
            MatchStatus::Finished => "finished",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "scheduled" => MatchStatus::Scheduled,
            "live" => MatchStatus::Live,
            "halftime" => MatchStatus::HalfTime,
            "extra_time" => MatchStatus::ExtraTime,
            "penalties" => MatchStatus::Penalties,
            "finished" => MatchStatus::Finished,
            "postponed" => MatchStatus::Postponed,
            "cancelled" => MatchStatus::Cancelled,
            _ => return None,
        })
    }

    /// Terminal with respect to scoring: no further predictions can ever
    /// be settled meaningfully against this match.
    pub fn is_terminal_for_scoring(&self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Cancelled)
    }

    /// Matches that can never again accept a prediction submission.
    pub fn is_closed_for_admission(&self) -> bool {
        !matches!(self, MatchStatus::Scheduled)
    }

    /// Valid forward transitions for the match lifecycle (3.1).
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Scheduled, Live) | (Scheduled, Postponed) | (Scheduled, Cancelled) => true,
            (Live, HalfTime) | (Live, ExtraTime) | (Live, Finished) | (Live, Cancelled) => true,
            (HalfTime, Live) | (HalfTime, Finished) | (HalfTime, Cancelled) => true,
            (ExtraTime, Penalties) | (ExtraTime, Finished) | (ExtraTime, Cancelled) => true,
            (Penalties, Finished) | (Penalties, Cancelled) => true,
            // Postponed matches can be rescheduled back to `scheduled`.
            (Postponed, Scheduled) | (Postponed, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub competition_id: CompetitionId,
    /// The season this match belongs to — the scope of leaderboard
    /// aggregation (§3 `LeaderboardEntry` key). Seasons are otherwise a
    /// referenceable entity with no behavior of their own (§1 Non-goals).
    pub season_id: SeasonId,
    pub home_participant_id: ParticipantId,
    pub away_participant_id: ParticipantId,
    pub scheduled_at: DateTime<Utc>,
    pub betting_closes_at: DateTime<Utc>,
    pub status: MatchStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub round_number: Option<i32>,
    pub match_day: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOpenness {
    Open,
    Closed,
    Unknown,
}

impl Match {
    /// §3 invariants: home != away; closesAt <= scheduledAt; scores >= 0.
    pub fn validate(&self) -> Result<(), String> {
        if self.home_participant_id == self.away_participant_id {
            return Err("home and away participant must differ".into());
        }
        if self.betting_closes_at > self.scheduled_at {
            return Err("bettingClosesAt must be <= scheduledAt".into());
        }
        if let Some(h) = self.home_score {
            if h < 0 {
                return Err("home score must be non-negative".into());
            }
        }
        if let Some(a) = self.away_score {
            if a < 0 {
                return Err("away score must be non-negative".into());
            }
        }
        Ok(())
    }

    /// §4.1 `IsOpen`: open iff scheduled and `at` strictly precedes the deadline.
    pub fn openness_at(&self, at: DateTime<Utc>) -> MatchOpenness {
        if self.status == MatchStatus::Scheduled && at < self.betting_closes_at {
            MatchOpenness::Open
        } else {
            MatchOpenness::Closed
        }
    }
}
