//! The Match Clock & Deadline Gate (§4.1): a single scheduler task that
//! tracks every scheduled match's betting deadline in a min-heap and fires
//! a `DeadlineClosed` event the instant `now >= bettingClosesAt`, including
//! synthetic firings at startup for deadlines that already passed while the
//! process was down.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::errors::MatchError;
use crate::matches::MatchStore;
use crate::models::{EventKind, MatchId, MatchOpenness};
use crate::outbox::Outbox;

type HeapEntry = Reverse<(DateTime<Utc>, MatchId)>;

pub struct DeadlineGate {
    matches: MatchStore,
    outbox: Outbox,
    heap: Mutex<BinaryHeap<HeapEntry>>,
    notify: Notify,
}

impl DeadlineGate {
    pub fn new(matches: MatchStore, outbox: Outbox) -> Arc<Self> {
        Arc::new(Self {
            matches,
            outbox,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        })
    }

    /// Load every `scheduled` match's deadline into the heap. Deadlines
    /// already in the past are seeded too, so the run loop fires their
    /// `DeadlineClosed` event immediately as startup recovery.
    pub fn seed(&self) -> Result<(), MatchError> {
        let matches = self.matches.all_scheduled()?;
        let mut heap = self.heap.lock();
        for m in matches {
            heap.push(Reverse((m.betting_closes_at, m.id)));
        }
        drop(heap);
        self.notify.notify_one();
        Ok(())
    }

    /// Register or update a match's deadline. Safe to call repeatedly for
    /// the same match (e.g. after a reschedule); stale heap entries are
    /// discarded harmlessly when they reach the front.
    pub fn schedule(&self, match_id: MatchId, closes_at: DateTime<Utc>) {
        self.heap.lock().push(Reverse((closes_at, match_id)));
        self.notify.notify_one();
    }

    /// `IsOpen(matchId, at)` (§4.1).
    pub fn is_open(&self, match_id: MatchId, at: DateTime<Utc>) -> Result<MatchOpenness, MatchError> {
        let m = self.matches.require(match_id)?;
        Ok(m.openness_at(at))
    }

    /// `NextClosure()`: the soonest still-queued deadline, if any.
    pub fn next_closure(&self) -> Option<(DateTime<Utc>, MatchId)> {
        self.heap.lock().peek().map(|Reverse(entry)| *entry)
    }

    fn pop_due(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, MatchId)> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(Reverse((at, _))) if *at <= now => heap.pop().map(|Reverse(entry)| entry),
            _ => None,
        }
    }

    /// Emit `DeadlineClosed` for `match_id`, unless the heap entry was made
    /// stale by a reschedule or the match already left `scheduled` (e.g.
    /// kicked off early, or postponed).
    fn fire(&self, match_id: MatchId, fired_for: DateTime<Utc>) {
        let m = match self.matches.get(match_id) {
            Ok(Some(m)) => m,
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, %match_id, "deadline gate: match lookup failed");
                return;
            }
        };
        if m.status != crate::models::MatchStatus::Scheduled || m.betting_closes_at != fired_for {
            return;
        }
        let payload = serde_json::json!({ "matchId": match_id }).to_string();
        match self.outbox.emit(EventKind::DeadlineClosed, match_id, 0, &payload) {
            Ok(_) => info!(%match_id, "betting window closed"),
            Err(err) => debug!(error = %err, %match_id, "failed to emit DeadlineClosed"),
        }
    }

    /// The scheduler loop: wait for the next deadline (or a `schedule()`
    /// wake-up that might have moved it earlier), fire it, repeat.
    pub async fn run(self: Arc<Self>) {
        loop {
            let next = self.next_closure();
            match next {
                Some((at, _)) => {
                    let now = Utc::now();
                    if at <= now {
                        if let Some((fired_for, match_id)) = self.pop_due(now) {
                            self.fire(match_id, fired_for);
                        }
                        continue;
                    }
                    let sleep_dur = (at - now).to_std().unwrap_or(std::time::Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_dur) => {
                            let now = Utc::now();
                            if let Some((fired_for, match_id)) = self.pop_due(now) {
                                self.fire(match_id, fired_for);
                            }
                        }
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::Duration;
    use uuid::Uuid;

    fn gate() -> (Arc<DeadlineGate>, MatchStore) {
        let db = Db::open_in_memory().unwrap();
        let matches = MatchStore::new(db.clone());
        let outbox = Outbox::new(db);
        (DeadlineGate::new(matches.clone(), outbox), matches)
    }

    #[test]
    fn next_closure_returns_soonest() {
        let (gate, _matches) = gate();
        let now = Utc::now();
        let later = Uuid::new_v4();
        let sooner = Uuid::new_v4();
        gate.schedule(later, now + Duration::minutes(10));
        gate.schedule(sooner, now + Duration::minutes(1));
        let (_, next_id) = gate.next_closure().unwrap();
        assert_eq!(next_id, sooner);
    }

    #[test]
    fn is_open_reflects_match_state() {
        let (gate, matches) = gate();
        let now = Utc::now();
        let m = matches
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                now + Duration::hours(1),
                now + Duration::minutes(30),
                None,
                None,
            )
            .unwrap();
        assert_eq!(gate.is_open(m.id, now).unwrap(), MatchOpenness::Open);
        assert_eq!(
            gate.is_open(m.id, now + Duration::hours(1)).unwrap(),
            MatchOpenness::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fires_deadline_closed_when_due() {
        let (gate, matches) = gate();
        let now = Utc::now();
        let m = matches
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                now + Duration::seconds(5),
                now + Duration::seconds(5),
                None,
                None,
            )
            .unwrap();
        gate.schedule(m.id, m.betting_closes_at);

        let mut rx = gate.outbox.subscribe();
        let runner = tokio::spawn(gate.clone().run());

        tokio::time::advance(std::time::Duration::from_secs(6)).await;
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("deadline should fire")
            .unwrap();
        assert_eq!(event.kind, EventKind::DeadlineClosed);
        assert_eq!(event.key, m.id);
        runner.abort();
    }

    #[tokio::test]
    async fn seed_recovers_already_past_deadlines() {
        let (gate, matches) = gate();
        let now = Utc::now();
        let m = matches
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                now - Duration::minutes(1),
                now - Duration::minutes(2),
                None,
                None,
            )
            .unwrap();
        gate.seed().unwrap();

        let mut rx = gate.outbox.subscribe();
        let runner = tokio::spawn(gate.clone().run());
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("past deadline should fire immediately")
            .unwrap();
        assert_eq!(event.key, m.id);
        runner.abort();
    }
}
