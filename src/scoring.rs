//! The Scoring & Settlement Engine (§4.4), grounded in
//! `bet_service.py::calculate_points`/`settle_bets`: a pure scoring rule
//! plus an event-driven subscriber that turns confirmed/amended/voided
//! results into idempotent `Settlement` rows and leaderboard deltas.
//!
//! Every prediction's settlement — the row insert, the prediction status
//! flip, and the leaderboard delta — commits in one transaction, so a crash
//! mid-settlement never leaves the aggregate and the prediction disagreeing.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{RetryConfig, ScoringConfig};
use crate::db::Db;
use crate::leaderboard::LeaderboardAggregator;
use crate::models::{EventKind, LeaderboardDelta, MatchId, OutboxEvent, Outcome, Prediction, PredictionStatus, VOID_MARKER_VERSION};
use crate::outbox::Outbox;
use crate::predictions::PredictionStore;

/// `score(prediction, result)` (§4.4): exact score beats correct-winner-only
/// beats a miss. Ties never arise — the two conditions are mutually
/// exclusive (an exact score implies the derived winner also matches).
pub fn score(
    predicted_winner: Outcome,
    predicted_home_score: Option<i32>,
    predicted_away_score: Option<i32>,
    actual_home: i32,
    actual_away: i32,
    scoring: &ScoringConfig,
) -> (i32, &'static str) {
    if predicted_home_score == Some(actual_home) && predicted_away_score == Some(actual_away) {
        return (scoring.exact_points, "exact");
    }
    if predicted_winner == Outcome::from_scores(actual_home, actual_away) {
        return (scoring.winner_points, "winner");
    }
    (0, "miss")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultEventPayload {
    match_id: MatchId,
    home_score: i32,
    away_score: i32,
    #[serde(default)]
    previous_version: Option<i64>,
}

#[derive(Clone)]
pub struct SettlementEngine {
    db: Db,
    predictions: PredictionStore,
    outbox: Outbox,
    scoring: ScoringConfig,
    retry: RetryConfig,
}

impl SettlementEngine {
    pub fn new(db: Db, predictions: PredictionStore, outbox: Outbox, scoring: ScoringConfig) -> Self {
        Self::with_retry(db, predictions, outbox, scoring, RetryConfig::default())
    }

    pub fn with_retry(
        db: Db,
        predictions: PredictionStore,
        outbox: Outbox,
        scoring: ScoringConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            predictions,
            outbox,
            scoring,
            retry,
        }
    }

    /// Record a handler failure that exhausted its retry budget, so an
    /// operator can inspect and replay it instead of it vanishing into logs.
    fn dead_letter(&self, event: &OutboxEvent, error: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO dead_letter_events (id, kind, key, version, payload, error, failed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    event.kind.as_str(),
                    event.key.to_string(),
                    event.version,
                    event.payload,
                    error,
                    Utc::now().to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    fn is_exact_or_winner(rule: &str) -> (i64, i64) {
        match rule {
            "exact" => (1, 0),
            "winner" => (0, 1),
            _ => (0, 0),
        }
    }

    /// Settle a single freshly-confirmed (or freshly-amended with no prior
    /// settlement) version for one prediction. Returns `true` if this call
    /// produced the settlement (vs. a no-op replay of an already-settled
    /// version, which the `ON CONFLICT DO NOTHING` silently absorbs).
    fn settle_one(&self, prediction: &Prediction, result_version: i64, home: i32, away: i32) -> Result<bool> {
        let (points, rule) = score(
            prediction.predicted_winner,
            prediction.predicted_home_score,
            prediction.predicted_away_score,
            home,
            away,
            &self.scoring,
        );
        let now = Utc::now();
        let (exact, winner_only) = Self::is_exact_or_winner(rule);

        let inserted = self.db.with_tx(|tx| {
            let changed = tx.execute(
                "INSERT INTO settlements (id, prediction_id, result_version, points_awarded, scored_at, rule_applied) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (prediction_id, result_version) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    prediction.id.to_string(),
                    result_version,
                    points,
                    now.to_rfc3339(),
                    rule,
                ],
            )?;
            if changed > 0 {
                tx.execute(
                    "UPDATE predictions SET points_earned = ?1, rule_applied = ?2, status = 'settled' WHERE id = ?3",
                    params![points, rule, prediction.id.to_string()],
                )?;
                LeaderboardAggregator::apply_in_tx(
                    tx,
                    prediction.group_id,
                    prediction.season_id,
                    prediction.user_id,
                    LeaderboardDelta {
                        points: points as i64,
                        exact,
                        winner_only,
                        settled_count: 1,
                    },
                    now,
                )?;
            }
            Ok(changed > 0)
        })?;
        Ok(inserted)
    }

    /// `ResultConfirmed` (§4.4): settle every still-scorable prediction for
    /// the match against the confirmed score.
    pub fn handle_result_confirmed(&self, result_version: i64, match_id: MatchId, home: i32, away: i32) -> Result<usize> {
        let mut settled = 0;
        for prediction in self.predictions.list_for_match(match_id)? {
            if !prediction.status.is_scorable() {
                continue;
            }
            if self.settle_one(&prediction, result_version, home, away)? {
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// `ResultAmended` (§4.4): recompute the score against the new line and
    /// apply the delta against whatever was previously booked for
    /// `previous_version`. A prediction with no prior settlement (e.g.
    /// submitted, then the match never settled before the amendment landed)
    /// is settled fresh instead.
    pub fn handle_result_amended(
        &self,
        result_version: i64,
        previous_version: i64,
        match_id: MatchId,
        home: i32,
        away: i32,
    ) -> Result<usize> {
        let mut settled = 0;
        for prediction in self.predictions.list_for_match(match_id)? {
            if prediction.status == PredictionStatus::Cancelled || prediction.status == PredictionStatus::Voided {
                continue;
            }
            let prior = self.db.with_conn(|conn| {
                conn.query_row(
                    "SELECT points_awarded, rule_applied FROM settlements \
                     WHERE prediction_id = ?1 AND result_version = ?2",
                    params![prediction.id.to_string(), previous_version],
                    |row| Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
            })?;

            let Some((prior_points, prior_rule)) = prior else {
                if self.settle_one(&prediction, result_version, home, away)? {
                    settled += 1;
                }
                continue;
            };

            let (new_points, new_rule) = score(
                prediction.predicted_winner,
                prediction.predicted_home_score,
                prediction.predicted_away_score,
                home,
                away,
                &self.scoring,
            );
            let now = Utc::now();
            let (prior_exact, prior_winner) = Self::is_exact_or_winner(&prior_rule);
            let (new_exact, new_winner) = Self::is_exact_or_winner(new_rule);

            let inserted = self.db.with_tx(|tx| {
                let changed = tx.execute(
                    "INSERT INTO settlements (id, prediction_id, result_version, points_awarded, scored_at, rule_applied) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (prediction_id, result_version) DO NOTHING",
                    params![
                        Uuid::new_v4().to_string(),
                        prediction.id.to_string(),
                        result_version,
                        new_points,
                        now.to_rfc3339(),
                        new_rule,
                    ],
                )?;
                if changed > 0 {
                    tx.execute(
                        "UPDATE predictions SET points_earned = ?1, rule_applied = ?2, status = 'settled' WHERE id = ?3",
                        params![new_points, new_rule, prediction.id.to_string()],
                    )?;
                    LeaderboardAggregator::apply_in_tx(
                        tx,
                        prediction.group_id,
                        prediction.season_id,
                        prediction.user_id,
                        LeaderboardDelta {
                            points: (new_points - prior_points) as i64,
                            exact: new_exact - prior_exact,
                            winner_only: new_winner - prior_winner,
                            settled_count: 0,
                        },
                        now,
                    )?;
                }
                Ok(changed > 0)
            })?;
            if inserted {
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// `ResultVoided` (§4.4): reverse whatever was booked for `result_version`
    /// and mark the prediction voided. Idempotent on the single void-marker
    /// row per prediction.
    pub fn handle_result_voided(&self, result_version: i64, match_id: MatchId) -> Result<usize> {
        let mut reversed = 0;
        for prediction in self.predictions.list_for_match(match_id)? {
            let prior = self.db.with_conn(|conn| {
                conn.query_row(
                    "SELECT points_awarded, rule_applied FROM settlements \
                     WHERE prediction_id = ?1 AND result_version = ?2",
                    params![prediction.id.to_string(), result_version],
                    |row| Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
            })?;
            let Some((prior_points, prior_rule)) = prior else {
                continue;
            };
            let now = Utc::now();
            let (prior_exact, prior_winner) = Self::is_exact_or_winner(&prior_rule);

            let inserted = self.db.with_tx(|tx| {
                let changed = tx.execute(
                    "INSERT INTO settlements (id, prediction_id, result_version, points_awarded, scored_at, rule_applied) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'void') \
                     ON CONFLICT (prediction_id, result_version) DO NOTHING",
                    params![
                        Uuid::new_v4().to_string(),
                        prediction.id.to_string(),
                        VOID_MARKER_VERSION,
                        -prior_points,
                        now.to_rfc3339(),
                    ],
                )?;
                if changed > 0 {
                    tx.execute(
                        "UPDATE predictions SET points_earned = 0, rule_applied = NULL, status = 'voided' WHERE id = ?1",
                        params![prediction.id.to_string()],
                    )?;
                    LeaderboardAggregator::apply_in_tx(
                        tx,
                        prediction.group_id,
                        prediction.season_id,
                        prediction.user_id,
                        LeaderboardDelta {
                            points: -(prior_points as i64),
                            exact: -prior_exact,
                            winner_only: -prior_winner,
                            settled_count: -1,
                        },
                        now,
                    )?;
                }
                Ok(changed > 0)
            })?;
            if inserted {
                reversed += 1;
            }
        }
        Ok(reversed)
    }

    fn handle(&self, event: &OutboxEvent) -> Result<()> {
        match event.kind {
            EventKind::ResultConfirmed => {
                let payload: ResultEventPayload = serde_json::from_str(&event.payload)?;
                let settled = self.handle_result_confirmed(event.version, payload.match_id, payload.home_score, payload.away_score)?;
                debug!(match_id = %payload.match_id, settled, "settled predictions for confirmed result");
            }
            EventKind::ResultAmended => {
                let payload: ResultEventPayload = serde_json::from_str(&event.payload)?;
                let previous_version = payload.previous_version.unwrap_or(event.version - 1);
                let settled = self.handle_result_amended(
                    event.version,
                    previous_version,
                    payload.match_id,
                    payload.home_score,
                    payload.away_score,
                )?;
                debug!(match_id = %payload.match_id, settled, "resettled predictions for amended result");
            }
            EventKind::ResultVoided => {
                let payload: ResultEventPayload = serde_json::from_str(&event.payload)?;
                let reversed = self.handle_result_voided(event.version, payload.match_id)?;
                debug!(match_id = %payload.match_id, reversed, "reversed settlements for voided result");
            }
            EventKind::DeadlineClosed => {
                // Match lifecycle, not settlement; the Deadline Gate owns it.
            }
        }
        Ok(())
    }

    /// Bounded retry with exponential backoff (§5): doubling from
    /// `base_delay_secs`, capped at `max_delay_secs`, abandoned once
    /// `budget_secs` of wall clock has elapsed since the first attempt —
    /// at which point the event is written to the dead-letter table instead
    /// of being dropped silently.
    async fn handle_with_retry(&self, event: &OutboxEvent) {
        let started = Instant::now();
        let mut delay = Duration::from_secs(self.retry.base_delay_secs.max(1));
        let budget = Duration::from_secs(self.retry.budget_secs);
        loop {
            match self.handle(event) {
                Ok(()) => return,
                Err(err) => {
                    if started.elapsed() >= budget {
                        error!(
                            error = %err,
                            kind = event.kind.as_str(),
                            key = %event.key,
                            "settlement handling exhausted its retry budget, dead-lettering"
                        );
                        if let Err(dl_err) = self.dead_letter(event, &err.to_string()) {
                            error!(error = %dl_err, "failed to write dead-letter row");
                        }
                        return;
                    }
                    warn!(
                        error = %err,
                        kind = event.kind.as_str(),
                        key = %event.key,
                        retry_in_secs = delay.as_secs(),
                        "settlement handling failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs(
                        (delay.as_secs() * 2).min(self.retry.max_delay_secs.max(1)),
                    );
                }
            }
        }
    }

    /// The subscriber loop: drain the outbox broadcast, settle each
    /// lifecycle event. A lagged receiver (very bursty confirm/amend/void
    /// traffic outrunning `CHANNEL_CAPACITY`) just logs and resumes from
    /// the next event — nothing is lost, since the outbox row itself, not
    /// the broadcast, is the durable record; the engine reconciles missed
    /// deltas on the next `rebuild()`.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.outbox.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_with_retry(&event).await,
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "settlement engine lagged behind outbox broadcast");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::MatchStore;
    use crate::membership::MembershipStore;
    use crate::models::{MembershipRole, PredictionPayload, ResultType};
    use crate::results::ResultStore;
    use chrono::Duration;

    struct Harness {
        db: Db,
        matches: MatchStore,
        membership: MembershipStore,
        predictions: PredictionStore,
        results: ResultStore,
        leaderboard: LeaderboardAggregator,
        outbox: Outbox,
        engine: SettlementEngine,
    }

    fn harness() -> Harness {
        let db = Db::open_in_memory().unwrap();
        let matches = MatchStore::new(db.clone());
        let membership = MembershipStore::new(db.clone());
        let predictions = PredictionStore::new(db.clone(), matches.clone(), membership.clone());
        let outbox = Outbox::new(db.clone());
        let results = ResultStore::new(db.clone(), matches.clone(), outbox.clone());
        let leaderboard = LeaderboardAggregator::new(db.clone(), &crate::config::Config::from_env().unwrap());
        let engine = SettlementEngine::new(db.clone(), predictions.clone(), outbox.clone(), ScoringConfig::default());
        Harness { db, matches, membership, predictions, results, leaderboard, outbox, engine }
    }

    fn winner_payload(outcome: Outcome) -> PredictionPayload {
        PredictionPayload {
            predicted_winner: Some(outcome),
            predicted_home_score: None,
            predicted_away_score: None,
            notes: None,
        }
    }

    #[test]
    fn confirm_settles_exact_and_winner_only_predictions() {
        let h = harness();
        let now = Utc::now();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let exact_user = Uuid::new_v4();
        let winner_user = Uuid::new_v4();
        h.membership.join(exact_user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        h.membership.join(winner_user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();

        let m = h.matches.create(Uuid::new_v4(), season, Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None).unwrap();

        let exact_payload = PredictionPayload {
            predicted_winner: Some(Outcome::Home),
            predicted_home_score: Some(2),
            predicted_away_score: Some(1),
            notes: None,
        };
        let exact_pred = h.predictions.submit(exact_user, group, m.id, &exact_payload, now).unwrap();
        let winner_pred = h.predictions.submit(winner_user, group, m.id, &winner_payload(Outcome::Home), now).unwrap();

        h.matches.set_status(m.id, crate::models::MatchStatus::Live).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Finished).unwrap();
        let r = h.results.record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now).unwrap();
        let confirmed = h.results.confirm(r.id, now).unwrap();

        let settled = h.engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();
        assert_eq!(settled, 2);

        let exact_after = h.predictions.require(exact_pred.id).unwrap();
        assert_eq!(exact_after.points_earned, 3);
        assert_eq!(exact_after.status, PredictionStatus::Settled);

        let winner_after = h.predictions.require(winner_pred.id).unwrap();
        assert_eq!(winner_after.points_earned, 1);

        let entry = h.leaderboard.get(group, season, exact_user).unwrap().unwrap();
        assert_eq!(entry.total_points, 3);
        assert_eq!(entry.exact_score_count, 1);
    }

    #[test]
    fn settlement_is_idempotent_on_replay() {
        let h = harness();
        let now = Utc::now();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let user = Uuid::new_v4();
        h.membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = h.matches.create(Uuid::new_v4(), season, Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None).unwrap();
        h.predictions.submit(user, group, m.id, &winner_payload(Outcome::Home), now).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Live).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Finished).unwrap();
        let r = h.results.record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now).unwrap();
        let confirmed = h.results.confirm(r.id, now).unwrap();

        let first = h.engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();
        let second = h.engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let entry = h.leaderboard.get(group, season, user).unwrap().unwrap();
        assert_eq!(entry.total_points, 1);
    }

    #[test]
    fn amendment_applies_compensating_delta() {
        let h = harness();
        let now = Utc::now();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let user = Uuid::new_v4();
        h.membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = h.matches.create(Uuid::new_v4(), season, Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None).unwrap();
        let exact_payload = PredictionPayload {
            predicted_winner: Some(Outcome::Home),
            predicted_home_score: Some(2),
            predicted_away_score: Some(1),
            notes: None,
        };
        let pred = h.predictions.submit(user, group, m.id, &exact_payload, now).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Live).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Finished).unwrap();
        let r = h.results.record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now).unwrap();
        let confirmed = h.results.confirm(r.id, now).unwrap();
        h.engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();

        let amended = h.results.amend(r.id, 3, 1, Uuid::new_v4(), now).unwrap();
        let settled = h.engine
            .handle_result_amended(amended.version, confirmed.version, m.id, 3, 1)
            .unwrap();
        assert_eq!(settled, 1);

        let after = h.predictions.require(pred.id).unwrap();
        assert_eq!(after.points_earned, 1);

        let entry = h.leaderboard.get(group, season, user).unwrap().unwrap();
        assert_eq!(entry.total_points, 1);
        assert_eq!(entry.exact_score_count, 0);
        assert_eq!(entry.winner_only_count, 1);
    }

    #[test]
    fn void_reverses_settlement_and_leaderboard_delta() {
        let h = harness();
        let now = Utc::now();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let user = Uuid::new_v4();
        h.membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = h.matches.create(Uuid::new_v4(), season, Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None).unwrap();
        let pred = h.predictions.submit(user, group, m.id, &winner_payload(Outcome::Home), now).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Live).unwrap();
        h.matches.set_status(m.id, crate::models::MatchStatus::Finished).unwrap();
        let r = h.results.record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now).unwrap();
        let confirmed = h.results.confirm(r.id, now).unwrap();
        h.engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();

        h.results.void(r.id, now).unwrap();
        let reversed = h.engine.handle_result_voided(confirmed.version, m.id).unwrap();
        assert_eq!(reversed, 1);

        let after = h.predictions.require(pred.id).unwrap();
        assert_eq!(after.points_earned, 0);
        assert_eq!(after.status, PredictionStatus::Voided);

        let entry = h.leaderboard.get(group, season, user).unwrap().unwrap();
        assert_eq!(entry.total_points, 0);
        assert_eq!(entry.settled_prediction_count, 0);
    }

    /// §5: once the retry budget is exhausted the event lands in the
    /// dead-letter table instead of vanishing after a single failed attempt.
    #[tokio::test]
    async fn exhausted_retry_budget_dead_letters_the_event() {
        let h = harness();
        let engine = SettlementEngine::with_retry(
            h.db.clone(),
            h.predictions.clone(),
            h.outbox.clone(),
            ScoringConfig::default(),
            crate::config::RetryConfig { base_delay_secs: 1, max_delay_secs: 1, budget_secs: 0 },
        );

        let event = OutboxEvent {
            id: Uuid::new_v4(),
            kind: EventKind::ResultConfirmed,
            key: Uuid::new_v4(),
            version: 1,
            payload: "not json".to_string(),
            emitted_at: Utc::now(),
            delivered: false,
        };

        engine.handle_with_retry(&event).await;

        let rows: i64 = h
            .db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM dead_letter_events", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
