//! Prediction admission and storage (§3, §4.2), grounded in
//! `bet_service.py::create_bet`/`update_bet`/`get_user_statistics`: a
//! prediction is only admissible while its match is open and the caller is
//! an active group member at the moment of submission.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::errors::PredictionError;
use crate::matches::MatchStore;
use crate::membership::MembershipStore;
use crate::models::{
    GroupId, MatchId, MatchOpenness, Outcome, Prediction, PredictionFilter, PredictionId,
    PredictionPayload, PredictionStats, PredictionStatus, UserId,
};

fn row_to_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    let winner: String = row.get(5)?;
    let status: String = row.get(9)?;
    Ok(Prediction {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        user_id: row.get::<_, String>(1)?.parse().unwrap(),
        group_id: row.get::<_, String>(2)?.parse().unwrap(),
        match_id: row.get::<_, String>(3)?.parse().unwrap(),
        season_id: row.get::<_, String>(4)?.parse().unwrap(),
        predicted_winner: Outcome::from_str(&winner).unwrap_or(Outcome::Draw),
        predicted_home_score: row.get(6)?,
        predicted_away_score: row.get(7)?,
        placed_at: row.get::<_, String>(8)?.parse().unwrap(),
        status: PredictionStatus::from_str(&status).unwrap_or(PredictionStatus::Pending),
        points_earned: row.get(10)?,
        rule_applied: row.get(11)?,
        notes: row.get(12)?,
    })
}

const SELECT_COLUMNS: &str = "id, user_id, group_id, match_id, season_id, predicted_winner, \
     predicted_home_score, predicted_away_score, placed_at, status, points_earned, rule_applied, notes";

#[derive(Clone)]
pub struct PredictionStore {
    db: Db,
    matches: MatchStore,
    membership: MembershipStore,
}

impl PredictionStore {
    pub fn new(db: Db, matches: MatchStore, membership: MembershipStore) -> Self {
        Self {
            db,
            matches,
            membership,
        }
    }

    fn existing(
        &self,
        user_id: UserId,
        group_id: GroupId,
        match_id: MatchId,
    ) -> Result<Option<Prediction>, PredictionError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM predictions \
                         WHERE user_id = ?1 AND group_id = ?2 AND match_id = ?3"
                    ),
                    params![user_id.to_string(), group_id.to_string(), match_id.to_string()],
                    row_to_prediction,
                )
                .optional()
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))
    }

    /// `Submit` (§4.2): one active prediction per (user, group, match).
    pub fn submit(
        &self,
        user_id: UserId,
        group_id: GroupId,
        match_id: MatchId,
        payload: &PredictionPayload,
        placed_at: DateTime<Utc>,
    ) -> Result<Prediction, PredictionError> {
        let m = self
            .matches
            .get(match_id)
            .map_err(|e| PredictionError::Internal(e.to_string()))?
            .ok_or(PredictionError::MatchNotFound)?;
        if m.openness_at(placed_at) != MatchOpenness::Open {
            return Err(PredictionError::MatchClosed);
        }
        if !self
            .membership
            .is_active(user_id, group_id, placed_at)
            .map_err(|e| PredictionError::Internal(e.to_string()))?
        {
            return Err(PredictionError::NotGroupMember);
        }
        if let Some(existing) = self.existing(user_id, group_id, match_id)? {
            if existing.status != PredictionStatus::Cancelled {
                return Err(PredictionError::AlreadyExists(existing.id));
            }
        }
        let winner = payload
            .validate_and_normalize()
            .map_err(PredictionError::InvalidPayload)?;

        let prediction = Prediction {
            id: Uuid::new_v4(),
            user_id,
            group_id,
            match_id,
            season_id: m.season_id,
            predicted_winner: winner,
            predicted_home_score: payload.predicted_home_score,
            predicted_away_score: payload.predicted_away_score,
            placed_at,
            status: PredictionStatus::Pending,
            points_earned: 0,
            rule_applied: None,
            notes: payload.notes.clone(),
        };

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO predictions (id, user_id, group_id, match_id, season_id, predicted_winner, \
                     predicted_home_score, predicted_away_score, placed_at, status, points_earned, rule_applied, notes) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                     ON CONFLICT (user_id, group_id, match_id) DO UPDATE SET \
                       predicted_winner = excluded.predicted_winner, \
                       predicted_home_score = excluded.predicted_home_score, \
                       predicted_away_score = excluded.predicted_away_score, \
                       placed_at = excluded.placed_at, status = excluded.status, \
                       points_earned = 0, rule_applied = NULL, notes = excluded.notes \
                     WHERE predictions.status = 'cancelled'",
                    params![
                        prediction.id.to_string(),
                        prediction.user_id.to_string(),
                        prediction.group_id.to_string(),
                        prediction.match_id.to_string(),
                        prediction.season_id.to_string(),
                        prediction.predicted_winner.as_str(),
                        prediction.predicted_home_score,
                        prediction.predicted_away_score,
                        prediction.placed_at.to_rfc3339(),
                        prediction.status.as_str(),
                        prediction.points_earned,
                        prediction.rule_applied,
                        prediction.notes,
                    ],
                )
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))?;

        self.existing(user_id, group_id, match_id)?
            .ok_or_else(|| PredictionError::Internal("prediction vanished after insert".into()))
    }

    pub fn get(&self, id: PredictionId) -> Result<Option<Prediction>, PredictionError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM predictions WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_prediction,
                )
                .optional()
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))
    }

    pub fn require(&self, id: PredictionId) -> Result<Prediction, PredictionError> {
        self.get(id)?.ok_or(PredictionError::NotFound)
    }

    /// `Update` (§4.2): only the owner, only while pending, only while the
    /// match is still open.
    pub fn update(
        &self,
        id: PredictionId,
        user_id: UserId,
        payload: &PredictionPayload,
        now: DateTime<Utc>,
    ) -> Result<Prediction, PredictionError> {
        let existing = self.require(id)?;
        if existing.user_id != user_id {
            return Err(PredictionError::NotOwner);
        }
        if existing.status != PredictionStatus::Pending {
            return Err(PredictionError::NotPending);
        }
        let m = self
            .matches
            .require(existing.match_id)
            .map_err(|e| PredictionError::Internal(e.to_string()))?;
        if m.openness_at(now) != MatchOpenness::Open {
            return Err(PredictionError::MatchClosed);
        }
        let winner = payload
            .validate_and_normalize()
            .map_err(PredictionError::InvalidPayload)?;

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE predictions SET predicted_winner = ?1, predicted_home_score = ?2, \
                     predicted_away_score = ?3, notes = ?4 WHERE id = ?5",
                    params![
                        winner.as_str(),
                        payload.predicted_home_score,
                        payload.predicted_away_score,
                        payload.notes,
                        id.to_string(),
                    ],
                )
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))?;
        self.require(id)
    }

    /// `Cancel` (§4.2): soft state transition, not a row delete, so the
    /// audit trail and any prior settlement history stay intact.
    pub fn cancel(&self, id: PredictionId, user_id: UserId) -> Result<Prediction, PredictionError> {
        let existing = self.require(id)?;
        if existing.user_id != user_id {
            return Err(PredictionError::NotOwner);
        }
        if existing.status != PredictionStatus::Pending {
            return Err(PredictionError::NotPending);
        }
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE predictions SET status = 'cancelled' WHERE id = ?1",
                    params![id.to_string()],
                )
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))?;
        self.require(id)
    }

    pub fn list_for_match(&self, match_id: MatchId) -> Result<Vec<Prediction>, PredictionError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM predictions WHERE match_id = ?1 ORDER BY placed_at ASC"
                ))?;
                stmt.query_map(params![match_id.to_string()], row_to_prediction)?
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))
    }

    pub fn list_for_user(&self, user_id: UserId, filter: &PredictionFilter) -> Result<Vec<Prediction>, PredictionError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM predictions WHERE user_id = ?1 ORDER BY placed_at DESC"
                ))?;
                let rows = stmt
                    .query_map(params![user_id.to_string()], row_to_prediction)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows
                    .into_iter()
                    .filter(|p| filter.group_id.map_or(true, |g| g == p.group_id))
                    .filter(|p| filter.match_id.map_or(true, |m| m == p.match_id))
                    .filter(|p| filter.status.map_or(true, |s| s == p.status))
                    .filter(|p| filter.date_from.map_or(true, |from| p.placed_at >= from))
                    .filter(|p| filter.date_to.map_or(true, |to| p.placed_at <= to))
                    .collect())
            })
            .map_err(|e| PredictionError::Internal(e.to_string()))
    }

    /// `get_user_statistics` equivalent (SPEC_FULL §2 supplement).
    pub fn user_stats(&self, user_id: UserId, group_id: Option<GroupId>) -> Result<PredictionStats, PredictionError> {
        let filter = PredictionFilter {
            group_id,
            ..Default::default()
        };
        let predictions = self.list_for_user(user_id, &filter)?;
        Ok(summarize(&predictions))
    }

    /// `get_match_statistics` equivalent (SPEC_FULL §2 supplement).
    pub fn match_stats(&self, match_id: MatchId) -> Result<PredictionStats, PredictionError> {
        Ok(summarize(&self.list_for_match(match_id)?))
    }
}

fn summarize(predictions: &[Prediction]) -> PredictionStats {
    let mut stats = PredictionStats::default();
    for p in predictions {
        if p.status == PredictionStatus::Cancelled {
            continue;
        }
        stats.total_predictions += 1;
        stats.total_points += p.points_earned as i64;
        match p.status {
            PredictionStatus::Pending => stats.pending_count += 1,
            PredictionStatus::Settled => match p.rule_applied.as_deref() {
                Some("exact") => stats.exact_score_count += 1,
                Some("winner") => stats.winner_only_count += 1,
                _ => {}
            },
            _ => {}
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MembershipRole;
    use chrono::Duration;

    fn stores() -> (PredictionStore, MatchStore, MembershipStore) {
        let db = Db::open_in_memory().unwrap();
        let matches = MatchStore::new(db.clone());
        let membership = MembershipStore::new(db.clone());
        let predictions = PredictionStore::new(db, matches.clone(), membership.clone());
        (predictions, matches, membership)
    }

    fn payload_winner(outcome: Outcome) -> PredictionPayload {
        PredictionPayload {
            predicted_winner: Some(outcome),
            predicted_home_score: None,
            predicted_away_score: None,
            notes: None,
        }
    }

    #[test]
    fn submit_requires_active_membership() {
        let (predictions, matches, _membership) = stores();
        let now = Utc::now();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();
        let err = predictions
            .submit(Uuid::new_v4(), Uuid::new_v4(), m.id, &payload_winner(Outcome::Home), now)
            .unwrap_err();
        assert!(matches!(err, PredictionError::NotGroupMember));
    }

    #[test]
    fn submit_rejects_when_match_closed() {
        let (predictions, matches, membership) = stores();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now - Duration::hours(1), now - Duration::hours(1), None, None)
            .unwrap();
        let err = predictions
            .submit(user, group, m.id, &payload_winner(Outcome::Home), now)
            .unwrap_err();
        assert!(matches!(err, PredictionError::MatchClosed));
    }

    #[test]
    fn duplicate_submission_rejected() {
        let (predictions, matches, membership) = stores();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();
        predictions.submit(user, group, m.id, &payload_winner(Outcome::Home), now).unwrap();
        let err = predictions
            .submit(user, group, m.id, &payload_winner(Outcome::Away), now)
            .unwrap_err();
        assert!(matches!(err, PredictionError::AlreadyExists(_)));
    }

    #[test]
    fn cancel_then_resubmit_is_allowed() {
        let (predictions, matches, membership) = stores();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();
        let p = predictions.submit(user, group, m.id, &payload_winner(Outcome::Home), now).unwrap();
        predictions.cancel(p.id, user).unwrap();
        let resubmitted = predictions
            .submit(user, group, m.id, &payload_winner(Outcome::Away), now)
            .unwrap();
        assert_eq!(resubmitted.predicted_winner, Outcome::Away);
        assert_eq!(resubmitted.status, PredictionStatus::Pending);
    }

    #[test]
    fn update_rejects_non_owner() {
        let (predictions, matches, membership) = stores();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();
        let p = predictions.submit(user, group, m.id, &payload_winner(Outcome::Home), now).unwrap();
        let err = predictions
            .update(p.id, Uuid::new_v4(), &payload_winner(Outcome::Away), now)
            .unwrap_err();
        assert!(matches!(err, PredictionError::NotOwner));
    }

    #[test]
    fn invalid_payload_rejected() {
        let (predictions, matches, membership) = stores();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();
        let bad = PredictionPayload {
            predicted_winner: Some(Outcome::Home),
            predicted_home_score: Some(1),
            predicted_away_score: Some(2),
            notes: None,
        };
        let err = predictions.submit(user, group, m.id, &bad, now).unwrap_err();
        assert!(matches!(err, PredictionError::InvalidPayload(_)));
    }
}
