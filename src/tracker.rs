//! Order Tracker (spec.md §4.4): bridges push-based `OrderUpdate` events to
//! pull-based "await order completion" semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::exchange::{OrderStatus, OrderUpdate};
use crate::stop::StopHandle;

/// Outcome of [`OrderTracker::await_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    Filled,
    NotFilled(NonFillStatus),
    TimedOut,
    /// The enclosing stop signal fired before a terminal status arrived.
    /// Not named in spec.md's three-way enum, but required by the
    /// "AwaitCompletion must... return promptly when the stop signal fires"
    /// contract (spec.md §4.4).
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonFillStatus {
    Canceled,
    Rejected,
    Expired,
}

struct Entry {
    tx: watch::Sender<OrderStatus>,
}

/// Maps exchange order ids to status, with a one-shot-per-terminal-event
/// wait primitive. Tolerates `Observe` arriving before `Register` by
/// buffering the most recent update per unregistered order id (spec.md
/// §4.5 step 3, §9 "Push/pull bridging").
#[derive(Clone)]
pub struct OrderTracker {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    buffered: Arc<Mutex<HashMap<String, OrderUpdate>>>,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            buffered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates the tracking entry for `order_id` if it doesn't already
    /// exist. If an update was observed before registration, that buffered
    /// update immediately seeds the entry's state (and its terminality).
    pub async fn register(&self, order_id: &str) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(order_id) {
            return;
        }
        let buffered_status = {
            let mut buffered = self.buffered.lock().await;
            buffered.remove(order_id).map(|u| u.status)
        };
        let (tx, _rx) = watch::channel(buffered_status.unwrap_or(OrderStatus::Pending));
        entries.insert(order_id.to_string(), Entry { tx });
    }

    /// Called by the order-event-stream sink. Updates latest status; once
    /// terminal, no further transitions are recorded (spec.md §3 invariant).
    pub async fn observe(&self, update: OrderUpdate) {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&update.order_id) {
            Some(entry) => {
                let currently_terminal = entry.tx.borrow().is_terminal();
                if !currently_terminal {
                    // `send` only updates the stored value when at least one
                    // receiver is alive; a terminal update observed before
                    // any `await_completion` call has subscribed would
                    // otherwise be silently dropped. `send_replace` updates
                    // the value unconditionally.
                    entry.tx.send_replace(update.status);
                }
            }
            None => {
                // Not registered yet: buffer it so a subsequent `register`
                // can pick it up immediately (handles the fast-filling race
                // described in spec.md §4.5 step 3).
                let mut buffered = self.buffered.lock().await;
                buffered.insert(update.order_id.clone(), update);
            }
        }
    }

    pub async fn forget(&self, order_id: &str) {
        self.entries.lock().await.remove(order_id);
        self.buffered.lock().await.remove(order_id);
    }

    /// Waits for `order_id` to reach a terminal status, or for `timeout` to
    /// elapse, or for `stop` to fire — whichever comes first. Supports
    /// multiple concurrent waiters on the same id (spec.md §4.4
    /// concurrency note): every caller subscribes its own `watch::Receiver`
    /// off the same sender, so all observe the same final value.
    pub async fn await_completion(
        &self,
        order_id: &str,
        timeout: Duration,
        stop: &StopHandle,
    ) -> AwaitOutcome {
        let mut rx = {
            let entries = self.entries.lock().await;
            match entries.get(order_id) {
                Some(entry) => entry.tx.subscribe(),
                None => return AwaitOutcome::TimedOut,
            }
        };

        if let Some(outcome) = terminal_outcome(&rx.borrow()) {
            return outcome;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if stop.is_stopped() {
                return AwaitOutcome::Canceled;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return AwaitOutcome::TimedOut;
            }
            // Poll the stop flag at <=100ms granularity even while waiting
            // on the watch channel, per spec.md §4.4/§5's 100ms bound.
            let poll_slice = remaining.min(Duration::from_millis(100));
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return AwaitOutcome::TimedOut;
                    }
                    if let Some(outcome) = terminal_outcome(&rx.borrow()) {
                        return outcome;
                    }
                }
                _ = tokio::time::sleep(poll_slice) => {}
            }
        }
    }
}

fn terminal_outcome(status: &OrderStatus) -> Option<AwaitOutcome> {
    match status {
        OrderStatus::Filled => Some(AwaitOutcome::Filled),
        OrderStatus::Canceled => Some(AwaitOutcome::NotFilled(NonFillStatus::Canceled)),
        OrderStatus::Rejected => Some(AwaitOutcome::NotFilled(NonFillStatus::Rejected)),
        OrderStatus::Expired => Some(AwaitOutcome::NotFilled(NonFillStatus::Expired)),
        OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::Pending => None,
    }
}
