//! Batch Loop (spec.md §4.6): drives one user toward `target_volume` with
//! minimum-waste iteration, re-anchoring against authoritative volume after
//! every batch.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::StrategyConfig;
use crate::credentials::UserCredentials;
use crate::error::OrchestratorError;
use crate::exchange::ExchangeClient;
use crate::single_trade::SingleTradeExecutor;
use crate::status::TerminalCause;
use crate::stop::StopHandle;

/// Runs the per-user control loop until `target_volume` is reached, the
/// stop signal fires, or an unrecoverable error terminates the user.
///
/// This is the only place `order_timeout_seconds`/`trade_interval_seconds`/
/// `retry_delay_seconds` from the config are consumed; the single-trade
/// executor itself is config-agnostic beyond what's passed to it.
pub async fn run_batch_loop<C: ExchangeClient>(
    client: Arc<C>,
    executor: &SingleTradeExecutor<C>,
    config: &StrategyConfig,
    creds: &UserCredentials,
    stop: &StopHandle,
) -> TerminalCause {
    let order_timeout = Duration::from_secs(config.order_timeout_seconds);
    let trade_interval = Duration::from_secs(config.trade_interval_seconds);
    let retry_delay = Duration::from_secs(config.retry_delay_seconds);

    loop {
        if stop.is_stopped() {
            return TerminalCause::Canceled;
        }

        let snapshot = match client.fetch_user_volume(creds).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_auth_failure() => return TerminalCause::AuthFailed,
            Err(e) => {
                warn!(error = %e, "fetch_user_volume failed, retrying after delay");
                stop.interruptible_sleep(retry_delay).await;
                continue;
            }
        };

        let current = snapshot.volume_for(&config.target_token_symbol);
        if current >= config.target_volume {
            info!(current = %current, target = %config.target_volume, "target volume reached");
            return TerminalCause::Success;
        }

        let remaining = config.target_volume - current;
        let catalog = match client.fetch_token_catalog().await {
            Ok(catalog) => catalog,
            Err(e) if e.is_auth_failure() => return TerminalCause::AuthFailed,
            Err(e) => {
                warn!(error = %e, "fetch_token_catalog failed, retrying after delay");
                stop.interruptible_sleep(retry_delay).await;
                continue;
            }
        };
        let mul_point = catalog
            .iter()
            .find(|e| e.symbol == config.target_token_symbol)
            .map(|e| e.mul_point)
            .unwrap_or(1);

        let single_real = config.single_trade_amount_usdt / Decimal::from(mul_point.max(1));
        let loop_count = loop_count_for(remaining, single_real);

        for _ in 0..loop_count {
            if stop.is_stopped() {
                return TerminalCause::Canceled;
            }

            let outcome = match executor
                .execute_one_trade(
                    creds,
                    &config.target_token_symbol,
                    config.single_trade_amount_usdt,
                    config.buy_offset_percentage,
                    config.sell_profit_percentage,
                    order_timeout,
                    stop,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(OrchestratorError::Exchange(e)) if e.is_auth_failure() => {
                    return TerminalCause::AuthFailed;
                }
                Err(OrchestratorError::Config(msg)) => {
                    warn!(msg, "batch loop terminating on config error");
                    return TerminalCause::ConfigError;
                }
                Err(e) => {
                    warn!(error = %e, "unexpected error from single-trade executor");
                    return TerminalCause::Error(e.to_string());
                }
            };

            if outcome.success {
                stop.interruptible_sleep(trade_interval).await;
            } else {
                stop.interruptible_sleep(retry_delay).await;
            }
        }
    }
}

/// `loop_count = max(1, ceil(remaining / single_real))` (spec.md §4.6 step
/// 6). Guards the edge case where a single trade already covers what's left.
fn loop_count_for(remaining: Decimal, single_real: Decimal) -> u64 {
    if single_real <= Decimal::ZERO {
        return 1;
    }
    let quotient = remaining / single_real;
    let ceiled = quotient.ceil();
    let count: u64 = ceiled.try_into().unwrap_or(u64::MAX);
    count.max(1)
}
