//! The Leaderboard Aggregator (§4.5): per-`(group, season)` rank vectors
//! maintained incrementally off settlement deltas, with a replay-based
//! rebuild for drift recovery.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::config::Config;
use crate::db::Db;
use crate::errors::LeaderboardError;
use crate::models::{EfficiencyTieBreak, GroupId, LeaderboardDelta, LeaderboardEntry, RankedEntry, SeasonId, UserId};

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LeaderboardEntry> {
    Ok(LeaderboardEntry {
        group_id: row.get::<_, String>(0)?.parse().unwrap(),
        season_id: row.get::<_, String>(1)?.parse().unwrap(),
        user_id: row.get::<_, String>(2)?.parse().unwrap(),
        total_points: row.get(3)?,
        exact_score_count: row.get(4)?,
        winner_only_count: row.get(5)?,
        settled_prediction_count: row.get(6)?,
        last_updated_at: row.get::<_, String>(7)?.parse().unwrap(),
        rank_cached: row.get(8)?,
    })
}

const SELECT_COLUMNS: &str = "group_id, season_id, user_id, total_points, exact_score_count, \
     winner_only_count, settled_prediction_count, last_updated_at, rank_cached";

#[derive(Clone)]
pub struct LeaderboardAggregator {
    db: Db,
    tie_break: EfficiencyTieBreak,
}

impl LeaderboardAggregator {
    pub fn new(db: Db, config: &Config) -> Self {
        Self {
            db,
            tie_break: config.tie_break,
        }
    }

    /// `Apply` (§4.5): additive upsert under the row's implicit lock (the
    /// single shared connection serializes all writers). Called from within
    /// a caller-supplied transaction so it commits atomically with the
    /// settlement row that produced the delta (§4.4).
    pub fn apply_in_tx(
        tx: &rusqlite::Transaction,
        group_id: GroupId,
        season_id: SeasonId,
        user_id: UserId,
        delta: LeaderboardDelta,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT INTO leaderboard_entries (group_id, season_id, user_id, total_points, \
             exact_score_count, winner_only_count, settled_prediction_count, last_updated_at, rank_cached) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL) \
             ON CONFLICT (group_id, season_id, user_id) DO UPDATE SET \
               total_points = total_points + excluded.total_points, \
               exact_score_count = exact_score_count + excluded.exact_score_count, \
               winner_only_count = winner_only_count + excluded.winner_only_count, \
               settled_prediction_count = settled_prediction_count + excluded.settled_prediction_count, \
               last_updated_at = excluded.last_updated_at, \
               rank_cached = NULL",
            params![
                group_id.to_string(),
                season_id.to_string(),
                user_id.to_string(),
                delta.points,
                delta.exact,
                delta.winner_only,
                delta.settled_count,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn entries(&self, group_id: GroupId, season_id: SeasonId) -> Result<Vec<LeaderboardEntry>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM leaderboard_entries WHERE group_id = ?1 AND season_id = ?2"
            ))?;
            stmt.query_map(params![group_id.to_string(), season_id.to_string()], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows)
    }

    /// The four-level tie-break ordering (§4.5): points desc, exact desc,
    /// settled-count asc-by-default (config-invertible), userId asc.
    fn sort_key(&self, e: &LeaderboardEntry) -> (i64, i64, i64, UserId) {
        let settled = match self.tie_break {
            EfficiencyTieBreak::FewerPredictionsHigher => e.settled_prediction_count,
            EfficiencyTieBreak::MorePredictionsHigher => -e.settled_prediction_count,
        };
        (-e.total_points, -e.exact_score_count, settled, e.user_id)
    }

    fn ranked(&self, group_id: GroupId, season_id: SeasonId) -> Result<Vec<RankedEntry>> {
        let mut entries = self.entries(group_id, season_id)?;
        entries.sort_by_key(|e| self.sort_key(e));

        let mut ranked = Vec::with_capacity(entries.len());
        let mut rank = 0i64;
        let mut last_key: Option<(i64, i64, i64)> = None;
        for (idx, entry) in entries.into_iter().enumerate() {
            let (p, x, s, _) = self.sort_key(&entry);
            let key = (p, x, s);
            if last_key != Some(key) {
                rank = idx as i64 + 1;
                last_key = Some(key);
            }
            ranked.push(RankedEntry { entry, rank });
        }
        Ok(ranked)
    }

    /// `TopN` (§4.5).
    pub fn top_n(&self, group_id: GroupId, season_id: SeasonId, n: usize) -> Result<Vec<RankedEntry>, LeaderboardError> {
        let ranked = self
            .ranked(group_id, season_id)
            .map_err(|e| LeaderboardError::Internal(e.to_string()))?;
        Ok(ranked.into_iter().take(n).collect())
    }

    /// `UserRank` (§4.5).
    pub fn user_rank(&self, group_id: GroupId, season_id: SeasonId, user_id: UserId) -> Result<RankedEntry, LeaderboardError> {
        let ranked = self
            .ranked(group_id, season_id)
            .map_err(|e| LeaderboardError::Internal(e.to_string()))?;
        ranked
            .into_iter()
            .find(|r| r.entry.user_id == user_id)
            .ok_or(LeaderboardError::NotRanked)
    }

    /// `AroundUser` (§4.5): `2k+1` entries centered on the user.
    pub fn around_user(
        &self,
        group_id: GroupId,
        season_id: SeasonId,
        user_id: UserId,
        k: usize,
    ) -> Result<Vec<RankedEntry>, LeaderboardError> {
        let ranked = self
            .ranked(group_id, season_id)
            .map_err(|e| LeaderboardError::Internal(e.to_string()))?;
        let idx = ranked
            .iter()
            .position(|r| r.entry.user_id == user_id)
            .ok_or(LeaderboardError::NotRanked)?;
        let start = idx.saturating_sub(k);
        let end = (idx + k + 1).min(ranked.len());
        Ok(ranked[start..end].to_vec())
    }

    pub fn get(&self, group_id: GroupId, season_id: SeasonId, user_id: UserId) -> Result<Option<LeaderboardEntry>> {
        let entry = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM leaderboard_entries WHERE group_id = ?1 AND season_id = ?2 AND user_id = ?3"),
                params![group_id.to_string(), season_id.to_string(), user_id.to_string()],
                row_to_entry,
            )
            .optional()
        })?;
        Ok(entry)
    }

    /// `Rebuild` (§4.5): zero the entries for this scope, then replay each
    /// prediction's *net* contribution — `predictions.points_earned`/
    /// `rule_applied` already hold the settled-in-full result of whatever
    /// sequence of confirm/amend/void events it last went through (§4.4
    /// keeps them in the same transaction as the settlement row), so a
    /// prediction contributes exactly once here regardless of how many
    /// settlement rows its history accumulated. Summing raw `settlements`
    /// rows instead would double-count an amended prediction (its original
    /// and amended version both carry full, not delta, point values) and
    /// would need to explicitly suppress voided predictions; reading the
    /// already-reconciled `predictions` row sidesteps both problems, so the
    /// result matches a live replay against only the current result version
    /// (P4, P7).
    pub fn rebuild(&self, group_id: GroupId, season_id: SeasonId) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM leaderboard_entries WHERE group_id = ?1 AND season_id = ?2",
                params![group_id.to_string(), season_id.to_string()],
            )?;

            let mut stmt = tx.prepare(
                "SELECT user_id, points_earned, rule_applied FROM predictions \
                 WHERE group_id = ?1 AND season_id = ?2 AND status = 'settled'",
            )?;
            let settled: Vec<(UserId, i32, Option<String>)> = stmt
                .query_map(params![group_id.to_string(), season_id.to_string()], |row| {
                    let user_id: String = row.get(0)?;
                    let points: i32 = row.get(1)?;
                    let rule: Option<String> = row.get(2)?;
                    Ok((user_id.parse().unwrap(), points, rule))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            let now = Utc::now();
            for (user_id, points, rule) in settled {
                let delta = LeaderboardDelta {
                    points: points as i64,
                    exact: if rule.as_deref() == Some("exact") { 1 } else { 0 },
                    winner_only: if rule.as_deref() == Some("winner") { 1 } else { 0 },
                    settled_count: 1,
                };
                Self::apply_in_tx(tx, group_id, season_id, user_id, delta, now)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn aggregator() -> LeaderboardAggregator {
        let db = Db::open_in_memory().unwrap();
        LeaderboardAggregator::new(db, &Config::from_env().unwrap())
    }

    #[test]
    fn apply_then_get_reflects_delta() {
        let agg = aggregator();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let user = Uuid::new_v4();
        let now = Utc::now();
        agg.db
            .with_tx(|tx| {
                LeaderboardAggregator::apply_in_tx(
                    tx,
                    group,
                    season,
                    user,
                    LeaderboardDelta { points: 3, exact: 1, winner_only: 0, settled_count: 1 },
                    now,
                )
            })
            .unwrap();
        let entry = agg.get(group, season, user).unwrap().unwrap();
        assert_eq!(entry.total_points, 3);
        assert_eq!(entry.exact_score_count, 1);
    }

    #[test]
    fn ranking_breaks_ties_by_settled_count_then_user_id() {
        let agg = aggregator();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let now = Utc::now();
        let efficient = Uuid::new_v4();
        let inefficient = Uuid::new_v4();
        agg.db
            .with_tx(|tx| {
                LeaderboardAggregator::apply_in_tx(
                    tx, group, season, efficient,
                    LeaderboardDelta { points: 3, exact: 1, winner_only: 0, settled_count: 1 }, now,
                )?;
                LeaderboardAggregator::apply_in_tx(
                    tx, group, season, inefficient,
                    LeaderboardDelta { points: 3, exact: 0, winner_only: 3, settled_count: 3 }, now,
                )
            })
            .unwrap();
        let top = agg.top_n(group, season, 10).unwrap();
        assert_eq!(top[0].entry.user_id, efficient);
        assert_eq!(top[0].rank, 1);
    }

    #[test]
    fn not_ranked_for_unknown_user() {
        let agg = aggregator();
        let err = agg.user_rank(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LeaderboardError::NotRanked));
    }

    /// P4/P7: rebuilding after an amendment must equal what a fresh replay
    /// against the amended result alone would produce, not the sum of the
    /// original settlement plus the amendment (spec.md §8 Scenario 5).
    #[test]
    fn rebuild_after_amendment_matches_live_state() {
        use crate::config::ScoringConfig;
        use crate::matches::MatchStore;
        use crate::membership::MembershipStore;
        use crate::models::{MembershipRole, Outcome, PredictionPayload, ResultType};
        use crate::outbox::Outbox;
        use crate::predictions::PredictionStore;
        use crate::results::ResultStore;
        use crate::scoring::SettlementEngine;
        use chrono::Duration;

        let db = Db::open_in_memory().unwrap();
        let matches = MatchStore::new(db.clone());
        let membership = MembershipStore::new(db.clone());
        let predictions = PredictionStore::new(db.clone(), matches.clone(), membership.clone());
        let outbox = Outbox::new(db.clone());
        let results = ResultStore::new(db.clone(), matches.clone(), outbox.clone());
        let leaderboard = LeaderboardAggregator::new(db.clone(), &Config::from_env().unwrap());
        let engine = SettlementEngine::new(db.clone(), predictions.clone(), outbox.clone(), ScoringConfig::default());

        let now = Utc::now();
        let group = Uuid::new_v4();
        let season = Uuid::new_v4();
        let user = Uuid::new_v4();
        membership.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        let m = matches
            .create(Uuid::new_v4(), season, Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(1), now + Duration::hours(1), None, None)
            .unwrap();

        let exact_payload = PredictionPayload {
            predicted_winner: Some(Outcome::Home),
            predicted_home_score: Some(2),
            predicted_away_score: Some(1),
            notes: None,
        };
        predictions.submit(user, group, m.id, &exact_payload, now).unwrap();

        matches.set_status(m.id, crate::models::MatchStatus::Live).unwrap();
        matches.set_status(m.id, crate::models::MatchStatus::Finished).unwrap();

        let r = results.record(m.id, ResultType::FullTime, 2, 1, Uuid::new_v4(), now).unwrap();
        let confirmed = results.confirm(r.id, now).unwrap();
        engine.handle_result_confirmed(confirmed.version, m.id, 2, 1).unwrap();

        let amended = results.amend(r.id, 3, 1, Uuid::new_v4(), now).unwrap();
        engine
            .handle_result_amended(amended.version, confirmed.version, m.id, 3, 1)
            .unwrap();

        let live = leaderboard.get(group, season, user).unwrap().unwrap();
        assert_eq!(live.total_points, 1);
        assert_eq!(live.exact_score_count, 0);
        assert_eq!(live.winner_only_count, 1);
        assert_eq!(live.settled_prediction_count, 1);

        leaderboard.rebuild(group, season).unwrap();
        let rebuilt = leaderboard.get(group, season, user).unwrap().unwrap();
        assert_eq!(rebuilt.total_points, live.total_points);
        assert_eq!(rebuilt.exact_score_count, live.exact_score_count);
        assert_eq!(rebuilt.winner_only_count, live.winner_only_count);
        assert_eq!(rebuilt.settled_prediction_count, live.settled_prediction_count);
    }
}
