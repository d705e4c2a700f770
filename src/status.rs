//! Status reporting (spec.md §4.7/§6/§7): per-user terminal causes and the
//! status snapshot surface exposed to external callers.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

/// Terminal cause of a per-user run (spec.md §6 "Exit codes / error
/// surfacing").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCause {
    Success,
    Canceled,
    AuthFailed,
    StreamFailed,
    ListenKeyFailed,
    ConfigError,
    Error(String),
}

/// Current lifecycle status of one `(strategy_id, user_id)` (spec.md
/// §4.7's observability-outputs list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserStatus {
    NotStarted,
    FilteredSatisfied,
    Running,
    StoppedSuccess,
    StoppedCanceled,
    StoppedAuthFailed,
    StoppedStreamFailed,
    StoppedError,
}

impl From<&TerminalCause> for UserStatus {
    fn from(cause: &TerminalCause) -> Self {
        match cause {
            TerminalCause::Success => UserStatus::StoppedSuccess,
            TerminalCause::Canceled => UserStatus::StoppedCanceled,
            TerminalCause::AuthFailed => UserStatus::StoppedAuthFailed,
            TerminalCause::StreamFailed | TerminalCause::ListenKeyFailed => {
                UserStatus::StoppedStreamFailed
            }
            TerminalCause::ConfigError | TerminalCause::Error(_) => UserStatus::StoppedError,
        }
    }
}

/// One-line, non-sensitive, operator-actionable rendering of a terminal
/// cause (spec.md §7). `AuthFailed` always carries the credential-refresh
/// phrase, verbatim, regardless of the underlying exchange message.
pub fn render_operator_message(user_id: i64, cause: &TerminalCause) -> String {
    match cause {
        TerminalCause::Success => format!("user {user_id}: reached target volume"),
        TerminalCause::Canceled => format!("user {user_id}: stopped by cancellation"),
        TerminalCause::AuthFailed => format!(
            "user {user_id}: credentials were rejected by the exchange — refresh credentials and restart this user"
        ),
        TerminalCause::StreamFailed => {
            format!("user {user_id}: order event stream disconnected and exhausted reconnect attempts")
        }
        TerminalCause::ListenKeyFailed => {
            format!("user {user_id}: listen key refresh failed repeatedly, run terminated")
        }
        TerminalCause::ConfigError => format!("user {user_id}: configuration error, run terminated"),
        TerminalCause::Error(msg) => format!("user {user_id}: unexpected error: {msg}"),
    }
}

/// Snapshot of one user's progress, suitable for a status query endpoint
/// (spec.md §4.7 "Observability outputs", §3 `UserRunState`).
#[derive(Debug, Clone)]
pub struct UserStatusView {
    pub user_id: i64,
    pub status: UserStatus,
    pub last_volume: Option<Decimal>,
    pub last_error: Option<String>,
}

/// Snapshot of every user in one strategy run. Supplements spec.md's
/// "Status queries (provided)" with a concrete shape (SPEC_FULL.md §3).
#[derive(Debug, Clone, Default)]
pub struct StrategyStatusView {
    pub users: HashMap<i64, UserStatusView>,
}

/// Shared, lock-guarded status map updated by the Strategy Executor and
/// read by an external status query surface.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StrategyStatusView>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, user_id: i64, status: UserStatus) {
        let mut view = self.inner.write().await;
        let entry = view.users.entry(user_id).or_insert_with(|| UserStatusView {
            user_id,
            status: UserStatus::NotStarted,
            last_volume: None,
            last_error: None,
        });
        entry.status = status;
    }

    pub async fn record_volume(&self, user_id: i64, volume: Decimal) {
        let mut view = self.inner.write().await;
        if let Some(entry) = view.users.get_mut(&user_id) {
            entry.last_volume = Some(volume);
        }
    }

    pub async fn record_terminal(&self, user_id: i64, cause: &TerminalCause) {
        let mut view = self.inner.write().await;
        let entry = view.users.entry(user_id).or_insert_with(|| UserStatusView {
            user_id,
            status: UserStatus::NotStarted,
            last_volume: None,
            last_error: None,
        });
        entry.status = UserStatus::from(cause);
        if let TerminalCause::Error(msg) = cause {
            entry.last_error = Some(msg.clone());
        }
    }

    pub async fn snapshot(&self) -> StrategyStatusView {
        self.inner.read().await.clone()
    }
}
