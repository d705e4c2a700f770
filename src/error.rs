//! Error taxonomy shared by the exchange client, order tracker, and
//! per-user orchestration. See `spec.md` §7.

use thiserror::Error;

/// Errors surfaced by the [`crate::exchange::ExchangeClient`] trait.
///
/// `AuthenticationFailed` is terminal for the affected user; everything
/// else is either retried by the caller's natural retry cadence (`Transient`
/// via `Transport`) or counted as a failed trade (`Rejected`).
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("credentials rejected by exchange: {0}")]
    AuthenticationFailed(String),

    #[error("order rejected: {reason}")]
    Rejected { reason: String },
}

impl ExchangeError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ExchangeError::AuthenticationFailed(_))
    }
}

/// Errors internal to a single user's run, rolled up by the strategy
/// executor into a [`crate::status::TerminalCause`].
#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("config error: {0}")]
    Config(String),

    #[error("order event stream gave up: {0}")]
    StreamFailed(String),

    #[error("listen key lifecycle failed: {0}")]
    ListenKeyFailed(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}
