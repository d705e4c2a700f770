//! Single-Trade Executor (spec.md §4.5): composes one round-trip OTO order
//! and reports its authoritative volume contribution.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::credentials::UserCredentials;
use crate::error::OrchestratorError;
use crate::exchange::ExchangeClient;
use crate::stop::StopHandle;
use crate::tracker::{AwaitOutcome, OrderTracker};

/// Outcome of one round-trip attempt: whether it succeeded, and the real
/// (mulPoint-adjusted) volume it contributed regardless of the sell leg's
/// fate (spec.md §4.5 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeOutcome {
    pub success: bool,
    pub real_volume_delta: Decimal,
}

impl TradeOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            real_volume_delta: Decimal::ZERO,
        }
    }
}

pub struct SingleTradeExecutor<C> {
    client: Arc<C>,
    tracker: OrderTracker,
}

impl<C: ExchangeClient> SingleTradeExecutor<C> {
    pub fn new(client: Arc<C>, tracker: OrderTracker) -> Self {
        Self { client, tracker }
    }

    /// Executes exactly one round-trip. `AuthenticationFailed` is
    /// propagated immediately, bypassing retry, per spec.md §4.5's failure
    /// modes paragraph; every other failure collapses to `(false, 0)`.
    pub async fn execute_one_trade(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        single_trade_amount_usdt: Decimal,
        buy_offset_percentage: Decimal,
        sell_profit_percentage: Decimal,
        order_timeout: Duration,
        stop: &StopHandle,
    ) -> Result<TradeOutcome, OrchestratorError> {
        let catalog = self.client.fetch_token_catalog().await?;
        let entry = catalog
            .iter()
            .find(|e| e.symbol == symbol)
            .ok_or_else(|| OrchestratorError::Config(format!("symbol {symbol} not in catalog")))?;

        let hundred = Decimal::from(100);
        let buy_price = (entry.last_price * (Decimal::ONE + buy_offset_percentage / hundred))
            .round_dp_with_strategy(8, rust_decimal::RoundingStrategy::ToZero);
        let sell_price = (buy_price * (Decimal::ONE - sell_profit_percentage / hundred))
            .round_dp_with_strategy(8, rust_decimal::RoundingStrategy::ToZero);
        let quantity = (single_trade_amount_usdt / buy_price)
            .round_dp_with_strategy(8, rust_decimal::RoundingStrategy::ToZero);
        let real_volume_delta = single_trade_amount_usdt / Decimal::from(entry.mul_point.max(1));

        let placement = match self
            .client
            .place_oto_order(creds, symbol, quantity, buy_price, sell_price)
            .await
        {
            Ok(placement) => placement,
            Err(e) if e.is_auth_failure() => return Err(OrchestratorError::Exchange(e)),
            Err(e) => {
                warn!(error = %e, symbol, "oto placement failed");
                return Ok(TradeOutcome::failed());
            }
        };

        // Register before returning to the event loop that feeds the
        // tracker: the tracker tolerates a terminal update arriving before
        // `register` by buffering it (spec.md §4.5 step 3, §9).
        self.tracker.register(&placement.working_order_id).await;
        self.tracker.register(&placement.pending_order_id).await;

        let working_outcome = self
            .tracker
            .await_completion(&placement.working_order_id, order_timeout, stop)
            .await;
        if !matches!(working_outcome, AwaitOutcome::Filled) {
            info!(
                order_id = %placement.working_order_id,
                outcome = ?working_outcome,
                "working leg did not fill"
            );
            return Ok(TradeOutcome::failed());
        }

        let pending_outcome = self
            .tracker
            .await_completion(&placement.pending_order_id, order_timeout, stop)
            .await;
        if !matches!(pending_outcome, AwaitOutcome::Filled) {
            info!(
                order_id = %placement.pending_order_id,
                outcome = ?pending_outcome,
                "pending leg did not fill; counting buy-leg volume and proceeding (no cancel)"
            );
        }

        // The buy leg already consumed the notional regardless of the sell
        // leg's fate — count it and let the next batch's re-anchoring query
        // reconcile reality (spec.md §4.5 step 5, §9 Open Question 1).
        Ok(TradeOutcome {
            success: true,
            real_volume_delta,
        })
    }
}
