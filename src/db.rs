//! Shared SQLite connection and schema.
//!
//! A single persistent connection behind a `parking_lot::Mutex` (rather
//! than the teacher's per-call `Connection::open`, see `user_store.rs`)
//! because the Scoring Engine and Result FSM need explicit multi-table
//! transactions (§4.4, §9) that a fresh connection per call cannot give us.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    competition_id TEXT NOT NULL,
    season_id TEXT NOT NULL,
    home_participant_id TEXT NOT NULL,
    away_participant_id TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    betting_closes_at TEXT NOT NULL,
    status TEXT NOT NULL,
    home_score INTEGER,
    away_score INTEGER,
    round_number INTEGER,
    match_day INTEGER
);

CREATE TABLE IF NOT EXISTS group_memberships (
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    left_at TEXT,
    role TEXT NOT NULL,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS predictions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    match_id TEXT NOT NULL,
    season_id TEXT NOT NULL,
    predicted_winner TEXT NOT NULL,
    predicted_home_score INTEGER,
    predicted_away_score INTEGER,
    placed_at TEXT NOT NULL,
    status TEXT NOT NULL,
    points_earned INTEGER NOT NULL DEFAULT 0,
    rule_applied TEXT,
    notes TEXT,
    UNIQUE (user_id, group_id, match_id)
);

CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id);
CREATE INDEX IF NOT EXISTS idx_predictions_user ON predictions(user_id);

CREATE TABLE IF NOT EXISTS results (
    id TEXT PRIMARY KEY,
    match_id TEXT NOT NULL,
    result_type TEXT NOT NULL,
    version INTEGER NOT NULL,
    home_score INTEGER NOT NULL,
    away_score INTEGER NOT NULL,
    status TEXT NOT NULL,
    recorded_by TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    confirmed_at TEXT,
    additional_data TEXT,
    UNIQUE (match_id, result_type, version)
);

CREATE INDEX IF NOT EXISTS idx_results_match_type ON results(match_id, result_type);

CREATE TABLE IF NOT EXISTS result_disputes (
    id TEXT PRIMARY KEY,
    result_id TEXT NOT NULL,
    disputer TEXT NOT NULL,
    reason TEXT NOT NULL,
    evidence TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS settlements (
    id TEXT PRIMARY KEY,
    prediction_id TEXT NOT NULL,
    result_version INTEGER NOT NULL,
    points_awarded INTEGER NOT NULL,
    scored_at TEXT NOT NULL,
    rule_applied TEXT NOT NULL,
    UNIQUE (prediction_id, result_version)
);

CREATE TABLE IF NOT EXISTS leaderboard_entries (
    group_id TEXT NOT NULL,
    season_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    exact_score_count INTEGER NOT NULL DEFAULT 0,
    winner_only_count INTEGER NOT NULL DEFAULT 0,
    settled_prediction_count INTEGER NOT NULL DEFAULT 0,
    last_updated_at TEXT NOT NULL,
    rank_cached INTEGER,
    PRIMARY KEY (group_id, season_id, user_id)
);

CREATE TABLE IF NOT EXISTS outbox_events (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    version INTEGER NOT NULL,
    payload TEXT NOT NULL,
    emitted_at TEXT NOT NULL,
    delivered INTEGER NOT NULL DEFAULT 0,
    UNIQUE (kind, key, version)
);

CREATE INDEX IF NOT EXISTS idx_outbox_undelivered ON outbox_events(delivered);

CREATE TABLE IF NOT EXISTS dead_letter_events (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    version INTEGER NOT NULL,
    payload TEXT NOT NULL,
    error TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Shared handle to the contest engine's SQLite store.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("applying schema")?;
        info!(path, "database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests; each call gets an isolated store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("applying schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the shared connection without an explicit transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`
    /// (via `Transaction`'s `Drop`). This is the primitive every
    /// cross-table write in §4.4/§4.3 is built on.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
