//! Match storage. Backs the `MatchReader` capability consumed by Admission,
//! the Result FSM, and the Deadline Gate.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::errors::MatchError;
use crate::models::{CompetitionId, Match, MatchId, MatchStatus, ParticipantId, SeasonId};

fn row_to_match(row: &rusqlite::Row) -> rusqlite::Result<Match> {
    let status: String = row.get(7)?;
    Ok(Match {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        competition_id: row.get::<_, String>(1)?.parse().unwrap(),
        season_id: row.get::<_, String>(2)?.parse().unwrap(),
        home_participant_id: row.get::<_, String>(3)?.parse().unwrap(),
        away_participant_id: row.get::<_, String>(4)?.parse().unwrap(),
        scheduled_at: row.get::<_, String>(5)?.parse().unwrap(),
        betting_closes_at: row.get::<_, String>(6)?.parse().unwrap(),
        status: MatchStatus::from_str(&status).unwrap_or(MatchStatus::Scheduled),
        home_score: row.get(8)?,
        away_score: row.get(9)?,
        round_number: row.get(10)?,
        match_day: row.get(11)?,
    })
}

const SELECT_COLUMNS: &str = "id, competition_id, season_id, home_participant_id, away_participant_id, \
     scheduled_at, betting_closes_at, status, home_score, away_score, round_number, match_day";

fn fetch_by_id(conn: &Connection, id: MatchId) -> rusqlite::Result<Option<Match>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM matches WHERE id = ?1"),
        params![id.to_string()],
        row_to_match,
    )
    .optional()
}

#[derive(Clone)]
pub struct MatchStore {
    db: Db,
}

impl MatchStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a new match in the `scheduled` state.
    pub fn create(
        &self,
        competition_id: CompetitionId,
        season_id: SeasonId,
        home_participant_id: ParticipantId,
        away_participant_id: ParticipantId,
        scheduled_at: DateTime<Utc>,
        betting_closes_at: DateTime<Utc>,
        round_number: Option<i32>,
        match_day: Option<i32>,
    ) -> Result<Match, MatchError> {
        let m = Match {
            id: Uuid::new_v4(),
            competition_id,
            season_id,
            home_participant_id,
            away_participant_id,
            scheduled_at,
            betting_closes_at,
            status: MatchStatus::Scheduled,
            home_score: None,
            away_score: None,
            round_number,
            match_day,
        };
        m.validate().map_err(MatchError::InvariantViolation)?;

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO matches (id, competition_id, season_id, home_participant_id, away_participant_id, \
                     scheduled_at, betting_closes_at, status, home_score, away_score, round_number, match_day) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        m.id.to_string(),
                        m.competition_id.to_string(),
                        m.season_id.to_string(),
                        m.home_participant_id.to_string(),
                        m.away_participant_id.to_string(),
                        m.scheduled_at.to_rfc3339(),
                        m.betting_closes_at.to_rfc3339(),
                        m.status.as_str(),
                        m.home_score,
                        m.away_score,
                        m.round_number,
                        m.match_day,
                    ],
                )
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))?;

        Ok(m)
    }

    pub fn get(&self, id: MatchId) -> Result<Option<Match>, MatchError> {
        self.db
            .with_conn(|conn| fetch_by_id(conn, id))
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))
    }

    pub fn require(&self, id: MatchId) -> Result<Match, MatchError> {
        self.get(id)?.ok_or(MatchError::NotFound)
    }

    /// Advance the match's status, enforcing the transition table (§4.1
    /// supplement). Once `status` is terminal-for-scoring, `scheduled_at`
    /// and the participant ids are frozen (§3 invariant); this method only
    /// ever touches `status`/scores so that invariant holds by construction.
    pub fn set_status(&self, id: MatchId, next: MatchStatus) -> Result<Match, MatchError> {
        let current = self.require(id)?;
        if !current.status.can_transition_to(next) {
            return Err(MatchError::InvalidStatusTransition {
                from: current.status.as_str(),
                to: next.as_str(),
            });
        }
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE matches SET status = ?1 WHERE id = ?2",
                    params![next.as_str(), id.to_string()],
                )
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))?;
        self.require(id)
    }

    /// Record the final score for a match (does not itself confirm a
    /// Result row; that is the Result FSM's job).
    pub fn set_score(&self, id: MatchId, home: i32, away: i32) -> Result<Match, MatchError> {
        if home < 0 || away < 0 {
            return Err(MatchError::InvariantViolation("scores must be non-negative".into()));
        }
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE matches SET home_score = ?1, away_score = ?2 WHERE id = ?3",
                    params![home, away, id.to_string()],
                )
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))?;
        self.require(id)
    }

    /// Revise the betting deadline. Per §4.2 edge-case policy this never
    /// retroactively accepts rejected writes; callers must retry.
    pub fn set_betting_closes_at(
        &self,
        id: MatchId,
        closes_at: DateTime<Utc>,
    ) -> Result<Match, MatchError> {
        let current = self.require(id)?;
        if closes_at > current.scheduled_at {
            return Err(MatchError::InvariantViolation(
                "bettingClosesAt must be <= scheduledAt".into(),
            ));
        }
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE matches SET betting_closes_at = ?1 WHERE id = ?2",
                    params![closes_at.to_rfc3339(), id.to_string()],
                )
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))?;
        self.require(id)
    }

    /// All matches still `scheduled` with a deadline at or before `before`,
    /// ordered by deadline — used both by `NextClosure` and by startup
    /// recovery (§4.1 failure semantics).
    pub fn scheduled_due_before(&self, before: DateTime<Utc>) -> Result<Vec<Match>, MatchError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM matches WHERE status = 'scheduled' AND betting_closes_at <= ?1 \
                     ORDER BY betting_closes_at ASC"
                ))?;
                let rows = stmt
                    .query_map(params![before.to_rfc3339()], row_to_match)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))
    }

    /// All `scheduled` matches ordered by deadline, for seeding the heap.
    pub fn all_scheduled(&self) -> Result<Vec<Match>, MatchError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM matches WHERE status = 'scheduled' ORDER BY betting_closes_at ASC"
                ))?;
                let rows = stmt
                    .query_map([], row_to_match)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .map_err(|e| MatchError::InvariantViolation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> MatchStore {
        MatchStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn create_and_fetch_roundtrip() {
        let store = store();
        let now = Utc::now();
        let m = store
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now, now, None, None)
            .unwrap();
        let fetched = store.require(m.id).unwrap();
        assert_eq!(fetched.id, m.id);
        assert_eq!(fetched.status, MatchStatus::Scheduled);
    }

    #[test]
    fn rejects_equal_participants() {
        let store = store();
        let now = Utc::now();
        let same = Uuid::new_v4();
        let err = store
            .create(Uuid::new_v4(), Uuid::new_v4(), same, same, now, now, None, None)
            .unwrap_err();
        assert!(matches!(err, MatchError::InvariantViolation(_)));
    }

    #[test]
    fn invalid_status_transition_rejected() {
        let store = store();
        let now = Utc::now();
        let m = store
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now, now, None, None)
            .unwrap();
        let err = store.set_status(m.id, MatchStatus::Finished).unwrap_err();
        assert!(matches!(err, MatchError::InvalidStatusTransition { .. }));

        store.set_status(m.id, MatchStatus::Live).unwrap();
        store.set_status(m.id, MatchStatus::Finished).unwrap();
    }

    #[test]
    fn deadline_revision_past_scheduled_start_rejected() {
        let store = store();
        let now = Utc::now();
        let m = store
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                now,
                now - Duration::minutes(5),
                None,
                None,
            )
            .unwrap();
        let err = store
            .set_betting_closes_at(m.id, now + Duration::minutes(1))
            .unwrap_err();
        assert!(matches!(err, MatchError::InvariantViolation(_)));
    }
}
