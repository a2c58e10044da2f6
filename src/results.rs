//! The Result FSM (§4.3), grounded in `result_service.py::create_result`
//! (duplicate-result detection) and its confirmation path (confirmation is
//! what triggers settlement). Every state transition writes its outbox
//! event in the same transaction as the row update, so a crash between the
//! two can never happen (§4.3 failure semantics, §8).

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::errors::ResultError;
use crate::matches::MatchStore;
use crate::models::{DisputeId, Dispute, EventKind, MatchId, ResultId, ResultRecord, ResultStatus, ResultType, UserId};
use crate::outbox::Outbox;

fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<ResultRecord> {
    let result_type: String = row.get(2)?;
    let status: String = row.get(6)?;
    Ok(ResultRecord {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        match_id: row.get::<_, String>(1)?.parse().unwrap(),
        result_type: ResultType::from_str(&result_type).unwrap_or(ResultType::FullTime),
        version: row.get(3)?,
        home_score: row.get(4)?,
        away_score: row.get(5)?,
        status: ResultStatus::from_str(&status).unwrap_or(ResultStatus::Pending),
        recorded_by: row.get::<_, String>(7)?.parse().unwrap(),
        recorded_at: row.get::<_, String>(8)?.parse().unwrap(),
        confirmed_at: row.get::<_, Option<String>>(9)?.map(|s| s.parse().unwrap()),
        additional_data: row.get(10)?,
    })
}

const SELECT_COLUMNS: &str = "id, match_id, result_type, version, home_score, away_score, \
     status, recorded_by, recorded_at, confirmed_at, additional_data";

fn row_to_dispute(row: &rusqlite::Row) -> rusqlite::Result<Dispute> {
    let evidence: String = row.get(4)?;
    Ok(Dispute {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        result_id: row.get::<_, String>(1)?.parse().unwrap(),
        disputer: row.get::<_, String>(2)?.parse().unwrap(),
        reason: row.get(3)?,
        evidence: evidence.split('\u{1f}').filter(|s| !s.is_empty()).map(String::from).collect(),
        created_at: row.get::<_, String>(5)?.parse().unwrap(),
        resolved: row.get::<_, i64>(6)? != 0,
    })
}

fn can_transition(from: ResultStatus, to: ResultStatus) -> bool {
    use ResultStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Disputed) | (Pending, Voided)
            | (Disputed, Pending) | (Disputed, Amended)
            | (Confirmed, Amended) | (Confirmed, Voided)
    )
}

#[derive(Clone)]
pub struct ResultStore {
    db: Db,
    matches: MatchStore,
    outbox: Outbox,
}

impl ResultStore {
    pub fn new(db: Db, matches: MatchStore, outbox: Outbox) -> Self {
        Self { db, matches, outbox }
    }

    pub fn get(&self, id: ResultId) -> AnyResult<Option<ResultRecord>, ResultError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM results WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_result,
                )
                .optional()
            })
            .map_err(|e| ResultError::Internal(e.to_string()))
    }

    pub fn require(&self, id: ResultId) -> AnyResult<ResultRecord, ResultError> {
        self.get(id)?.ok_or(ResultError::NotFound)
    }

    /// The highest-version row in a `(match_id, result_type)` lineage.
    pub fn current_for(&self, match_id: MatchId, result_type: ResultType) -> AnyResult<Option<ResultRecord>, ResultError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM results WHERE match_id = ?1 AND result_type = ?2 \
                         ORDER BY version DESC LIMIT 1"
                    ),
                    params![match_id.to_string(), result_type.as_str()],
                    row_to_result,
                )
                .optional()
            })
            .map_err(|e| ResultError::Internal(e.to_string()))
    }

    /// `Record` (§4.3): the first version of a `(match_id, result_type)`
    /// lineage. Any later version comes only from `amend`.
    pub fn record(
        &self,
        match_id: MatchId,
        result_type: ResultType,
        home_score: i32,
        away_score: i32,
        recorded_by: UserId,
        now: DateTime<Utc>,
    ) -> AnyResult<ResultRecord, ResultError> {
        ResultRecord::validate_scores(home_score, away_score).map_err(|_| ResultError::InvalidScores)?;
        if self.current_for(match_id, result_type)?.is_some() {
            return Err(ResultError::DuplicateResult);
        }
        let record = ResultRecord {
            id: Uuid::new_v4(),
            match_id,
            result_type,
            version: 1,
            home_score,
            away_score,
            status: ResultStatus::Pending,
            recorded_by,
            recorded_at: now,
            confirmed_at: None,
            additional_data: None,
        };
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO results (id, match_id, result_type, version, home_score, away_score, \
                     status, recorded_by, recorded_at, confirmed_at, additional_data) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)",
                    params![
                        record.id.to_string(),
                        record.match_id.to_string(),
                        record.result_type.as_str(),
                        record.version,
                        record.home_score,
                        record.away_score,
                        record.status.as_str(),
                        record.recorded_by.to_string(),
                        record.recorded_at.to_rfc3339(),
                    ],
                )
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?;
        Ok(record)
    }

    fn transition_with_event(
        &self,
        id: ResultId,
        to: ResultStatus,
        confirmed_at: Option<DateTime<Utc>>,
        event: Option<EventKind>,
    ) -> AnyResult<ResultRecord, ResultError> {
        let current = self.require(id)?;
        if !can_transition(current.status, to) {
            return Err(match to {
                ResultStatus::Confirmed => ResultError::NotConfirmable,
                _ => ResultError::NotPending,
            });
        }
        self.db
            .with_tx(|tx| {
                tx.execute(
                    "UPDATE results SET status = ?1, confirmed_at = ?2 WHERE id = ?3",
                    params![
                        to.as_str(),
                        confirmed_at.map(|t| t.to_rfc3339()),
                        id.to_string(),
                    ],
                )?;
                if let Some(kind) = event {
                    let payload = serde_json::json!({
                        "matchId": current.match_id,
                        "resultType": current.result_type.as_str(),
                        "homeScore": current.home_score,
                        "awayScore": current.away_score,
                    })
                    .to_string();
                    Outbox::emit_in_tx(tx, kind, id, current.version, &payload)?;
                }
                Ok(())
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?;
        self.require(id)
    }

    /// `Confirm` (§4.3): the transition that triggers settlement. Guarded on
    /// the match itself having reached a terminal-for-scoring status — a
    /// `fullTime`/`final` result cannot be confirmed (and settlement
    /// triggered) while the match is still `scheduled` or `live`.
    pub fn confirm(&self, id: ResultId, now: DateTime<Utc>) -> AnyResult<ResultRecord, ResultError> {
        let current = self.require(id)?;
        let m = self
            .matches
            .get(current.match_id)
            .map_err(|e| ResultError::Internal(e.to_string()))?
            .ok_or(ResultError::MatchNotFound)?;
        if !m.status.is_terminal_for_scoring() {
            return Err(ResultError::MatchNotScorable);
        }
        self.transition_with_event(id, ResultStatus::Confirmed, Some(now), Some(EventKind::ResultConfirmed))
    }

    /// `Dispute` (§4.3): only a pending result can be disputed.
    pub fn dispute(
        &self,
        id: ResultId,
        disputer: UserId,
        reason: String,
        evidence: Vec<String>,
        now: DateTime<Utc>,
    ) -> AnyResult<Dispute, ResultError> {
        let current = self.require(id)?;
        if current.status != ResultStatus::Pending {
            return Err(ResultError::NotPending);
        }
        let dispute = Dispute {
            id: Uuid::new_v4(),
            result_id: id,
            disputer,
            reason,
            evidence,
            created_at: now,
            resolved: false,
        };
        self.db
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO result_disputes (id, result_id, disputer, reason, evidence, created_at, resolved) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                    params![
                        dispute.id.to_string(),
                        dispute.result_id.to_string(),
                        dispute.disputer.to_string(),
                        dispute.reason,
                        dispute.evidence.join("\u{1f}"),
                        dispute.created_at.to_rfc3339(),
                    ],
                )?;
                tx.execute(
                    "UPDATE results SET status = 'disputed' WHERE id = ?1",
                    params![id.to_string()],
                )?;
                Ok(())
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?;
        Ok(dispute)
    }

    /// `Resolve` (§4.3): a dispute is settled without an amendment; the
    /// result returns to `pending` awaiting re-confirmation.
    pub fn resolve(&self, dispute_id: DisputeId, now: DateTime<Utc>) -> AnyResult<ResultRecord, ResultError> {
        let dispute = self
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id, result_id, disputer, reason, evidence, created_at, resolved \
                     FROM result_disputes WHERE id = ?1",
                    params![dispute_id.to_string()],
                    row_to_dispute,
                )
                .optional()
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?
            .ok_or(ResultError::NotFound)?;
        let _ = now;
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE result_disputes SET resolved = 1 WHERE id = ?1",
                    params![dispute_id.to_string()],
                )
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?;
        self.transition_with_event(dispute.result_id, ResultStatus::Pending, None, None)
    }

    /// `Amend` (§4.3): writes a new version in the lineage; settlement of
    /// the points delta between the old and new version is the Scoring
    /// Engine's job, triggered off `ResultAmended`.
    pub fn amend(
        &self,
        id: ResultId,
        new_home_score: i32,
        new_away_score: i32,
        recorded_by: UserId,
        now: DateTime<Utc>,
    ) -> AnyResult<ResultRecord, ResultError> {
        let current = self.require(id)?;
        if !matches!(current.status, ResultStatus::Disputed | ResultStatus::Confirmed) {
            return Err(ResultError::NotAmendable);
        }
        ResultRecord::validate_scores(new_home_score, new_away_score).map_err(|_| ResultError::InvalidScores)?;

        let amended = ResultRecord {
            id: Uuid::new_v4(),
            match_id: current.match_id,
            result_type: current.result_type,
            version: current.version + 1,
            home_score: new_home_score,
            away_score: new_away_score,
            status: ResultStatus::Amended,
            recorded_by,
            recorded_at: now,
            confirmed_at: Some(now),
            additional_data: None,
        };
        self.db
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO results (id, match_id, result_type, version, home_score, away_score, \
                     status, recorded_by, recorded_at, confirmed_at, additional_data) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
                    params![
                        amended.id.to_string(),
                        amended.match_id.to_string(),
                        amended.result_type.as_str(),
                        amended.version,
                        amended.home_score,
                        amended.away_score,
                        amended.status.as_str(),
                        amended.recorded_by.to_string(),
                        amended.recorded_at.to_rfc3339(),
                        amended.confirmed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
                let payload = serde_json::json!({
                    "matchId": amended.match_id,
                    "resultType": amended.result_type.as_str(),
                    "homeScore": amended.home_score,
                    "awayScore": amended.away_score,
                    "previousVersion": current.version,
                })
                .to_string();
                Outbox::emit_in_tx(tx, EventKind::ResultAmended, amended.id, amended.version, &payload)?;
                Ok(())
            })
            .map_err(|e| ResultError::Internal(e.to_string()))?;
        Ok(amended)
    }

    /// `Void` (§4.3): reverses any settlement already applied for this
    /// result version; the reversal logic lives in the Scoring Engine.
    pub fn void(&self, id: ResultId, now: DateTime<Utc>) -> AnyResult<ResultRecord, ResultError> {
        self.transition_with_event(id, ResultStatus::Voided, Some(now), Some(EventKind::ResultVoided))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;

    fn store() -> (ResultStore, MatchStore) {
        let db = Db::open_in_memory().unwrap();
        let matches = MatchStore::new(db.clone());
        (ResultStore::new(db.clone(), matches.clone(), Outbox::new(db)), matches)
    }

    /// A match already finished, so `confirm` never trips the scorability guard.
    fn finished_match(matches: &MatchStore, now: DateTime<Utc>) -> MatchId {
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now, now, None, None)
            .unwrap();
        matches.set_status(m.id, MatchStatus::Live).unwrap();
        matches.set_status(m.id, MatchStatus::Finished).unwrap();
        m.id
    }

    #[test]
    fn record_then_duplicate_rejected() {
        let (store, _matches) = store();
        let match_id = Uuid::new_v4();
        let now = Utc::now();
        store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        let err = store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap_err();
        assert!(matches!(err, ResultError::DuplicateResult));
    }

    #[test]
    fn confirm_emits_result_confirmed() {
        let (store, matches) = store();
        let now = Utc::now();
        let match_id = finished_match(&matches, now);
        let r = store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        let mut rx = store.outbox.subscribe();
        let confirmed = store.confirm(r.id, now).unwrap();
        assert_eq!(confirmed.status, ResultStatus::Confirmed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::ResultConfirmed);
        assert_eq!(event.key, r.id);
    }

    #[test]
    fn confirm_rejected_while_match_not_terminal() {
        let (store, matches) = store();
        let now = Utc::now();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now, now, None, None)
            .unwrap();
        let r = store
            .record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        let err = store.confirm(r.id, now).unwrap_err();
        assert!(matches!(err, ResultError::MatchNotScorable));

        matches.set_status(m.id, MatchStatus::Live).unwrap();
        let err = store.confirm(r.id, now).unwrap_err();
        assert!(matches!(err, ResultError::MatchNotScorable));
    }

    #[test]
    fn dispute_then_resolve_returns_to_pending() {
        let (store, matches) = store();
        let now = Utc::now();
        let match_id = finished_match(&matches, now);
        let r = store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        let dispute = store
            .dispute(r.id, Uuid::new_v4(), "wrong score".into(), vec!["photo.png".into()], now)
            .unwrap();
        let disputed = store.require(r.id).unwrap();
        assert_eq!(disputed.status, ResultStatus::Disputed);

        let resolved = store.resolve(dispute.id, now).unwrap();
        assert_eq!(resolved.status, ResultStatus::Pending);
    }

    #[test]
    fn amend_confirmed_result_creates_new_version() {
        let (store, matches) = store();
        let now = Utc::now();
        let match_id = finished_match(&matches, now);
        let r = store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        store.confirm(r.id, now).unwrap();
        let amended = store.amend(r.id, 3, 1, Uuid::new_v4(), now).unwrap();
        assert_eq!(amended.version, 2);
        assert_eq!(amended.status, ResultStatus::Amended);
        assert_eq!(amended.home_score, 3);
    }

    #[test]
    fn void_pending_result_emits_result_voided() {
        let (store, matches) = store();
        let now = Utc::now();
        let match_id = finished_match(&matches, now);
        let r = store
            .record(match_id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now)
            .unwrap();
        let mut rx = store.outbox.subscribe();
        let voided = store.void(r.id, now).unwrap();
        assert_eq!(voided.status, ResultStatus::Voided);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::ResultVoided);
    }
}
