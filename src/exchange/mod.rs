//! Exchange Client (spec.md §4.1): typed, credential-scoped request/response
//! against the exchange.

pub mod auth_classifier;
pub mod http_client;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::credentials::UserCredentials;
use crate::error::ExchangeError;

pub use http_client::HttpExchangeClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// One row of the exchange's token catalog (spec.md §3).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TokenCatalogEntry {
    pub symbol: String,
    pub last_price: Decimal,
    #[serde(default = "default_mul_point")]
    pub mul_point: u32,
}

fn default_mul_point() -> u32 {
    1
}

/// Result of a successful OTO placement (spec.md §3).
#[derive(Debug, Clone)]
pub struct OtoOrderPlacement {
    pub working_order_id: String,
    pub pending_order_id: String,
}

/// One decoded order-event (spec.md §3). Terminal statuses are
/// `Filled | Canceled | Rejected | Expired`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Pending,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub side: OrderSide,
    pub event_time_ms: i64,
}

/// Authoritative per-token volume for one user (spec.md §3). Never
/// reconstructed locally — always the result of `fetch_user_volume`.
#[derive(Debug, Clone, Default)]
pub struct UserVolumeSnapshot {
    pub volumes: HashMap<String, Decimal>,
}

impl UserVolumeSnapshot {
    pub fn volume_for(&self, symbol: &str) -> Decimal {
        self.volumes.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Typed, credential-scoped exchange operations (spec.md §4.1).
///
/// Every operation takes credentials explicitly — there is no ambient auth.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_token_catalog(&self) -> Result<Vec<TokenCatalogEntry>, ExchangeError>;

    async fn fetch_user_volume(
        &self,
        creds: &UserCredentials,
    ) -> Result<UserVolumeSnapshot, ExchangeError>;

    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        quantity: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> Result<OtoOrderPlacement, ExchangeError>;

    async fn obtain_listen_key(&self, creds: &UserCredentials) -> Result<String, ExchangeError>;

    async fn keep_alive_listen_key(
        &self,
        creds: &UserCredentials,
        key: &str,
    ) -> Result<(), ExchangeError>;

    /// May legitimately observe a not-found condition on the exchange side;
    /// that must not be surfaced as an error (spec.md §4.1).
    async fn close_listen_key(&self, creds: &UserCredentials, key: &str) -> Result<(), ExchangeError>;
}
