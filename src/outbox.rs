//! The durable outbox (§4.3 failure semantics, §6 event envelope, §8).
//!
//! A state transition and its outbox row are written in the same SQLite
//! transaction so the event can never be lost relative to the change that
//! produced it. A background pump polls undelivered rows and fans them out
//! to in-process subscribers over a `tokio::sync::broadcast` channel —
//! delivery to subscribers is at-least-once; subscribers (the Scoring
//! Engine) dedupe via the `Settlement` uniqueness constraint (§4.4).

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::models::{EventKind, OutboxEvent};

const CHANNEL_CAPACITY: usize = 4096;

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<OutboxEvent> {
    let kind: String = row.get(1)?;
    Ok(OutboxEvent {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        kind: EventKind::from_str(&kind).unwrap_or(EventKind::DeadlineClosed),
        key: row.get::<_, String>(2)?.parse().unwrap(),
        version: row.get(3)?,
        payload: row.get(4)?,
        emitted_at: row.get::<_, String>(5)?.parse().unwrap(),
        delivered: row.get::<_, i64>(6)? != 0,
    })
}

#[derive(Clone)]
pub struct Outbox {
    db: Db,
    sender: broadcast::Sender<OutboxEvent>,
}

impl Outbox {
    pub fn new(db: Db) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { db, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.sender.subscribe()
    }

    /// Write the event row as part of a caller-supplied transaction, so it
    /// commits atomically with the state change that produced it.
    pub fn emit_in_tx(
        tx: &rusqlite::Transaction,
        kind: EventKind,
        key: Uuid,
        version: i64,
        payload: &str,
    ) -> rusqlite::Result<OutboxEvent> {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            kind,
            key,
            version,
            payload: payload.to_string(),
            emitted_at: Utc::now(),
            delivered: false,
        };
        tx.execute(
            "INSERT INTO outbox_events (id, kind, key, version, payload, emitted_at, delivered) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                event.id.to_string(),
                event.kind.as_str(),
                event.key.to_string(),
                event.version,
                event.payload,
                event.emitted_at.to_rfc3339(),
            ],
        )?;
        Ok(event)
    }

    /// Standalone emit for events with no accompanying row mutation (the
    /// Deadline Gate's `DeadlineClosed`, which is purely time-driven).
    pub fn emit(&self, kind: EventKind, key: Uuid, version: i64, payload: &str) -> Result<OutboxEvent> {
        let event = self
            .db
            .with_tx(|tx| Self::emit_in_tx(tx, kind, key, version, payload))?;
        Ok(event)
    }

    fn undelivered(&self) -> Result<Vec<OutboxEvent>> {
        let events = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, key, version, payload, emitted_at, delivered \
                 FROM outbox_events WHERE delivered = 0 ORDER BY emitted_at ASC",
            )?;
            stmt.query_map([], row_to_event)?.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(events)
    }

    fn mark_delivered(&self, id: Uuid) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE outbox_events SET delivered = 1 WHERE id = ?1",
                params![id.to_string()],
            )
        })?;
        Ok(())
    }

    /// Look up an event's delivery status by id, used in tests and by
    /// operators inspecting whether a dispatch succeeded.
    pub fn get(&self, id: Uuid) -> Result<Option<OutboxEvent>> {
        let event = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, key, version, payload, emitted_at, delivered \
                 FROM outbox_events WHERE id = ?1",
                params![id.to_string()],
                row_to_event,
            )
            .optional()
        })?;
        Ok(event)
    }

    /// Background pump: poll for undelivered rows, broadcast each, mark
    /// delivered. A dropped broadcast (no active subscribers) still marks
    /// delivered — the outbox's job is fan-out, not subscriber retry;
    /// subscriber-side retry is the Scoring Engine's bounded backoff (§5).
    pub async fn run_pump(self: Arc<Self>, poll_interval: Duration) {
        loop {
            match self.undelivered() {
                Ok(events) => {
                    for event in events {
                        debug!(kind = event.kind.as_str(), key = %event.key, version = event.version, "dispatching outbox event");
                        let _ = self.sender.send(event.clone());
                        if let Err(err) = self.mark_delivered(event.id) {
                            warn!(error = %err, "failed to mark outbox event delivered");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "outbox poll failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_then_fetch_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::new(db);
        let key = Uuid::new_v4();
        let event = outbox
            .emit(EventKind::DeadlineClosed, key, 0, "{}")
            .unwrap();
        assert!(!event.delivered);
        let fetched = outbox.get(event.id).unwrap().unwrap();
        assert_eq!(fetched.key, key);
    }

    #[tokio::test]
    async fn pump_marks_events_delivered_and_broadcasts() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Arc::new(Outbox::new(db));
        let mut rx = outbox.subscribe();
        let key = Uuid::new_v4();
        outbox
            .emit(EventKind::ResultConfirmed, key, 1, "{}")
            .unwrap();

        let pump = tokio::spawn(outbox.clone().run_pump(Duration::from_millis(5)));
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("pump should dispatch within timeout")
            .unwrap();
        assert_eq!(received.key, key);
        pump.abort();
    }
}
