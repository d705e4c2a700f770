//! Strategy configuration (spec.md §3 `StrategyConfig`).
//!
//! The inheritance rules described in spec.md §6 (global defaults → strategy
//! → per-user overrides) are an explicit external-collaborator concern and
//! are not implemented here: [`load_strategy_config`] reads one
//! already-resolved document, matching the "resolved ... struct" contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    pub target_token_symbol: String,
    pub target_chain: String,
    pub target_volume: Decimal,
    pub single_trade_amount_usdt: Decimal,
    pub trade_interval_seconds: u64,
    pub buy_offset_percentage: Decimal,
    pub sell_profit_percentage: Decimal,
    pub order_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
    pub user_ids: Vec<i64>,
}

impl StrategyConfig {
    /// Validates the invariants from spec.md §3: positive trade amount and
    /// target volume, non-negative offsets.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.single_trade_amount_usdt <= Decimal::ZERO {
            return Err(OrchestratorError::Config(
                "single_trade_amount_usdt must be > 0".into(),
            ));
        }
        if self.target_volume <= Decimal::ZERO {
            return Err(OrchestratorError::Config(
                "target_volume must be > 0".into(),
            ));
        }
        if self.buy_offset_percentage < Decimal::ZERO || self.sell_profit_percentage < Decimal::ZERO
        {
            return Err(OrchestratorError::Config(
                "offset/profit percentages must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Reads a single resolved `StrategyConfig` document from a YAML file.
pub fn load_strategy_config(path: impl AsRef<Path>) -> Result<StrategyConfig, OrchestratorError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Config(format!("failed to read config file: {e}")))?;
    parse_strategy_config(&raw)
}

pub fn parse_strategy_config(raw: &str) -> Result<StrategyConfig, OrchestratorError> {
    let cfg: StrategyConfig = serde_yaml::from_str(raw)
        .map_err(|e| OrchestratorError::Config(format!("invalid strategy config: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
