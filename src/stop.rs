//! Stop Coordinator (spec.md §4.8): a one-way cancellation latch with
//! per-strategy and per-user scopes, OR'd at every checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A single idempotent one-way latch. Once set, `is_set()` returns `true`
/// forever; `set()` called again is a no-op (spec.md §8 property 7).
#[derive(Debug, Default)]
struct Latch {
    flag: AtomicBool,
    notify: Notify,
}

impl Latch {
    fn set(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already set; otherwise waits to be woken.
    /// The `Notified` future is created *before* the `is_set()` check so a
    /// `set()` landing in between is never lost (tokio's documented
    /// lost-wakeup-safe ordering for `Notify`).
    async fn notified_or_set(&self) {
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// Per-strategy stop scope. Setting it stops every user in the strategy.
#[derive(Debug, Default, Clone)]
pub struct StrategyStopScope {
    latch: Arc<Latch>,
}

impl StrategyStopScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.latch.set();
    }

    pub fn is_stopped(&self) -> bool {
        self.latch.is_set()
    }
}

/// Per-user stop scope, used for auth-failure / stream-failure termination
/// of a single user without affecting siblings.
#[derive(Debug, Default, Clone)]
pub struct UserStopScope {
    latch: Arc<Latch>,
}

impl UserStopScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.latch.set();
    }

    pub fn is_stopped(&self) -> bool {
        self.latch.is_set()
    }
}

/// The OR of a strategy scope and a user scope, read at every cooperative
/// checkpoint (spec.md §4.8, §5). Cheap to clone — every field is an `Arc`.
#[derive(Debug, Clone)]
pub struct StopHandle {
    strategy: StrategyStopScope,
    user: UserStopScope,
}

impl StopHandle {
    pub fn new(strategy: StrategyStopScope, user: UserStopScope) -> Self {
        Self { strategy, user }
    }

    pub fn is_stopped(&self) -> bool {
        self.strategy.is_stopped() || self.user.is_stopped()
    }

    /// Sleeps for `duration`, returning early (within ~100ms per spec.md
    /// §4.6/§5) if either scope is set in the meantime.
    pub async fn interruptible_sleep(&self, duration: Duration) {
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.strategy.latch.notified_or_set() => {}
            _ = self.user.latch.notified_or_set() => {}
        }
    }

    /// Runs `fut` to completion unless a stop scope fires first, in which
    /// case `None` is returned promptly.
    pub async fn race<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        if self.is_stopped() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            _ = self.strategy.latch.notified_or_set() => None,
            _ = self.user.latch.notified_or_set() => None,
        }
    }
}
