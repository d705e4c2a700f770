//! End-to-end scenario tests (spec.md §8) driving the Strategy Executor
//! against in-memory fake `ExchangeClient`/`OrderEventStream` implementations.
//! No live network is touched anywhere in this suite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alpha_volume_orchestrator::config::StrategyConfig;
use alpha_volume_orchestrator::credentials::{CredentialsStore, InMemoryCredentialsStore, UserCredentials};
use alpha_volume_orchestrator::error::ExchangeError;
use alpha_volume_orchestrator::exchange::{
    ExchangeClient, OtoOrderPlacement, TokenCatalogEntry, UserVolumeSnapshot,
};
use alpha_volume_orchestrator::order_stream::{OrderEventStream, StreamEvent};
use alpha_volume_orchestrator::status::UserStatus;
use alpha_volume_orchestrator::stop::StopHandle;
use alpha_volume_orchestrator::strategy_executor::StrategyExecutor;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

fn base_config(target_volume: Decimal, mul_point: u32, user_ids: Vec<i64>) -> (StrategyConfig, Vec<TokenCatalogEntry>) {
    let config = StrategyConfig {
        id: "alpha-booster".into(),
        display_name: "Alpha Volume Booster".into(),
        enabled: true,
        target_token_symbol: "ALPHA".into(),
        target_chain: "alpha-mainnet".into(),
        target_volume,
        single_trade_amount_usdt: dec!(30),
        trade_interval_seconds: 0,
        buy_offset_percentage: dec!(10),
        sell_profit_percentage: dec!(10),
        order_timeout_seconds: 2,
        retry_delay_seconds: 0,
        user_ids,
    };
    let catalog = vec![TokenCatalogEntry {
        symbol: "ALPHA".into(),
        last_price: dec!(1.00),
        mul_point,
    }];
    (config, catalog)
}

fn creds_store(user_ids: &[i64]) -> Arc<InMemoryCredentialsStore> {
    let mut store = InMemoryCredentialsStore::new();
    for &id in user_ids {
        store.insert(
            id,
            UserCredentials {
                headers: Default::default(),
                cookies: id.to_string(),
            },
        );
    }
    Arc::new(store)
}

fn user_id_of(creds: &UserCredentials) -> i64 {
    creds.cookies.parse().expect("test credentials encode user id as cookies")
}

/// An `ExchangeClient` fake whose `place_oto_order` immediately counts
/// volume (as if both legs were about to fill) and whose
/// `fetch_user_volume` reflects that ledger. Order ids it hands out encode
/// the user id and a sequence number so a companion `OrderEventStream` fake
/// can synthesize matching fills.
struct FakeExchange {
    catalog: Vec<TokenCatalogEntry>,
    volumes: Mutex<HashMap<i64, Decimal>>,
    volume_bump: Decimal,
    placements: Mutex<Vec<(i64, String, String)>>,
    auth_fail_after_nth_placement_for: Mutex<HashMap<i64, u32>>,
    placement_count: Mutex<HashMap<i64, u32>>,
}

impl FakeExchange {
    fn new(catalog: Vec<TokenCatalogEntry>, initial_volumes: HashMap<i64, Decimal>, volume_bump: Decimal) -> Self {
        Self {
            catalog,
            volumes: Mutex::new(initial_volumes),
            volume_bump,
            placements: Mutex::new(Vec::new()),
            auth_fail_after_nth_placement_for: Mutex::new(HashMap::new()),
            placement_count: Mutex::new(HashMap::new()),
        }
    }

    fn placement_count_for(&self, user_id: i64) -> usize {
        self.placements
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| *u == user_id)
            .count()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn fetch_token_catalog(&self) -> Result<Vec<TokenCatalogEntry>, ExchangeError> {
        Ok(self.catalog.clone())
    }

    async fn fetch_user_volume(&self, creds: &UserCredentials) -> Result<UserVolumeSnapshot, ExchangeError> {
        let user_id = user_id_of(creds);
        let volumes = self.volumes.lock().unwrap();
        let mut map = HashMap::new();
        map.insert("ALPHA".to_string(), *volumes.get(&user_id).unwrap_or(&Decimal::ZERO));
        Ok(UserVolumeSnapshot { volumes: map })
    }

    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        _symbol: &str,
        _quantity: Decimal,
        _buy_price: Decimal,
        _sell_price: Decimal,
    ) -> Result<OtoOrderPlacement, ExchangeError> {
        let user_id = user_id_of(creds);

        let mut counts = self.placement_count.lock().unwrap();
        let count = counts.entry(user_id).or_insert(0);
        *count += 1;
        let this_count = *count;
        drop(counts);

        if let Some(&fail_at) = self.auth_fail_after_nth_placement_for.lock().unwrap().get(&user_id) {
            if this_count == fail_at {
                return Err(ExchangeError::AuthenticationFailed("session expired".into()));
            }
        }

        let working = format!("w-{user_id}-{this_count}");
        let pending = format!("p-{user_id}-{this_count}");
        self.placements.lock().unwrap().push((user_id, working.clone(), pending.clone()));

        let mut volumes = self.volumes.lock().unwrap();
        *volumes.entry(user_id).or_insert(Decimal::ZERO) += self.volume_bump;

        Ok(OtoOrderPlacement {
            working_order_id: working,
            pending_order_id: pending,
        })
    }

    async fn obtain_listen_key(&self, _creds: &UserCredentials) -> Result<String, ExchangeError> {
        Ok("listen-key".to_string())
    }

    async fn keep_alive_listen_key(&self, _creds: &UserCredentials, _key: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn close_listen_key(&self, _creds: &UserCredentials, _key: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}

/// An `OrderEventStream` fake that polls `exchange`'s placement ledger and
/// emits `FILLED` for both legs of every order it sees placed for its user,
/// a fixed delay after placement — standing in for a real exchange's
/// asynchronous fill confirmation.
struct FakeStream {
    exchange: Arc<FakeExchange>,
    fill_delay: Duration,
}

#[async_trait]
impl OrderEventStream for FakeStream {
    async fn run(&self, listen_key: String, sink: mpsc::Sender<StreamEvent>, stop: StopHandle) {
        let user_id: i64 = listen_key.parse().unwrap_or(-1);
        let _ = sink.send(StreamEvent::Connected).await;
        let mut emitted = std::collections::HashSet::new();

        while !stop.is_stopped() {
            stop.interruptible_sleep(self.fill_delay).await;
            if stop.is_stopped() {
                break;
            }
            let placements = self.exchange.placements.lock().unwrap().clone();
            for (u, working, pending) in placements {
                if u != user_id {
                    continue;
                }
                for order_id in [working, pending] {
                    if emitted.contains(&order_id) {
                        continue;
                    }
                    emitted.insert(order_id.clone());
                    let update = alpha_volume_orchestrator::exchange::OrderUpdate {
                        order_id,
                        status: alpha_volume_orchestrator::exchange::OrderStatus::Filled,
                        executed_quantity: Decimal::ZERO,
                        side: alpha_volume_orchestrator::exchange::OrderSide::Buy,
                        event_time_ms: 0,
                    };
                    if sink.send(StreamEvent::Order(update)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// We encode the user id as the "listen key" the fake exchange hands back,
/// so `FakeStream` (which has no direct user-id parameter in its trait
/// contract) can find its own user's placements. A real listen key carries
/// no such structure; this is purely a test-fixture convenience.
struct PerUserListenKeyExchange(Arc<FakeExchange>);

#[async_trait]
impl ExchangeClient for PerUserListenKeyExchange {
    async fn fetch_token_catalog(&self) -> Result<Vec<TokenCatalogEntry>, ExchangeError> {
        self.0.fetch_token_catalog().await
    }
    async fn fetch_user_volume(&self, creds: &UserCredentials) -> Result<UserVolumeSnapshot, ExchangeError> {
        self.0.fetch_user_volume(creds).await
    }
    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        quantity: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> Result<OtoOrderPlacement, ExchangeError> {
        self.0.place_oto_order(creds, symbol, quantity, buy_price, sell_price).await
    }
    async fn obtain_listen_key(&self, creds: &UserCredentials) -> Result<String, ExchangeError> {
        Ok(user_id_of(creds).to_string())
    }
    async fn keep_alive_listen_key(&self, creds: &UserCredentials, key: &str) -> Result<(), ExchangeError> {
        self.0.keep_alive_listen_key(creds, key).await
    }
    async fn close_listen_key(&self, creds: &UserCredentials, key: &str) -> Result<(), ExchangeError> {
        self.0.close_listen_key(creds, key).await
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_user_status(
    strategy: &Arc<alpha_volume_orchestrator::strategy_executor::RunningStrategy>,
    user_id: i64,
    expected: UserStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = strategy.status().await;
        if snapshot.users.get(&user_id).map(|u| &u.status) == Some(&expected) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("user {user_id} did not reach status {expected:?} within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// Scenario A — cold start, single user, mulPoint=1.
#[tokio::test]
async fn scenario_a_cold_start_single_user_mulpoint_one() {
    let (config, catalog) = base_config(dec!(60), 1, vec![1]);
    let mut initial = HashMap::new();
    initial.insert(1, Decimal::ZERO);
    let exchange = Arc::new(FakeExchange::new(catalog, initial, dec!(30)));
    let client = Arc::new(PerUserListenKeyExchange(exchange.clone()));
    let stream = Arc::new(FakeStream {
        exchange: exchange.clone(),
        fill_delay: Duration::from_millis(20),
    });

    let strategy = StrategyExecutor::start(config, client, stream, creds_store(&[1])).await;

    wait_for_user_status(&strategy, 1, UserStatus::StoppedSuccess, Duration::from_secs(5)).await;
    strategy.stop().await;

    assert_eq!(exchange.placement_count_for(1), 2, "exactly two OTO placements");
}

// Scenario B — mulPoint=4, partial under-fill requires re-batch.
#[tokio::test]
async fn scenario_b_mulpoint_four_rebatches_on_underfill() {
    let (config, catalog) = base_config(dec!(30), 4, vec![1]);
    let mut initial = HashMap::new();
    initial.insert(1, Decimal::ZERO);
    // volume_bump models a 7.5 real-volume contribution per trade (30/4).
    let exchange = Arc::new(FakeExchange::new(catalog, initial, dec!(7.5)));
    let client = Arc::new(PerUserListenKeyExchange(exchange.clone()));
    let stream = Arc::new(FakeStream {
        exchange: exchange.clone(),
        fill_delay: Duration::from_millis(15),
    });

    let strategy = StrategyExecutor::start(config, client, stream, creds_store(&[1])).await;

    wait_until(
        || {
            let volumes = exchange.volumes.lock().unwrap();
            *volumes.get(&1).unwrap_or(&Decimal::ZERO) >= dec!(30)
        },
        Duration::from_secs(8),
    )
    .await;

    strategy.stop().await;
    assert_eq!(exchange.placement_count_for(1), 4, "four trades cover 30 at 7.5 each");
}

// Scenario C — authentication failure mid-run, isolation from sibling user.
#[tokio::test]
async fn scenario_c_auth_failure_is_isolated_to_affected_user() {
    let (config, catalog) = base_config(dec!(60), 1, vec![1, 2]);
    let mut initial = HashMap::new();
    initial.insert(1, Decimal::ZERO);
    initial.insert(2, Decimal::ZERO);
    let exchange = Arc::new(FakeExchange::new(catalog, initial, dec!(30)));
    exchange.auth_fail_after_nth_placement_for.lock().unwrap().insert(1, 2);
    let client = Arc::new(PerUserListenKeyExchange(exchange.clone()));
    let stream = Arc::new(FakeStream {
        exchange: exchange.clone(),
        fill_delay: Duration::from_millis(15),
    });

    let strategy = StrategyExecutor::start(config, client, stream, creds_store(&[1, 2])).await;

    wait_for_user_status(&strategy, 1, UserStatus::StoppedAuthFailed, Duration::from_secs(5)).await;
    wait_for_user_status(&strategy, 2, UserStatus::StoppedSuccess, Duration::from_secs(5)).await;

    strategy.stop().await;
}

// Scenario D — stop during trade.
#[tokio::test]
async fn scenario_d_stop_during_trade_returns_promptly() {
    let (mut config, catalog) = base_config(dec!(60), 1, vec![1]);
    config.trade_interval_seconds = 5;
    let mut initial = HashMap::new();
    initial.insert(1, Decimal::ZERO);
    let exchange = Arc::new(FakeExchange::new(catalog, initial, dec!(30)));
    let client = Arc::new(PerUserListenKeyExchange(exchange.clone()));
    let stream = Arc::new(FakeStream {
        exchange: exchange.clone(),
        fill_delay: Duration::from_millis(15),
    });

    let strategy = StrategyExecutor::start(config, client, stream, creds_store(&[1])).await;

    wait_until(
        || exchange.placement_count_for(1) >= 1,
        Duration::from_secs(3),
    )
    .await;
    // Give the loop a moment to enter its inter-trade sleep, then stop.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = tokio::time::Instant::now();
    strategy.stop().await;
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_millis(500), "elapsed={:?}", elapsed);
    assert_eq!(exchange.placement_count_for(1), 1, "no further trades after stop");
}

// Scenario F — satisfied user at start: zero orders, prefiltered.
#[tokio::test]
async fn scenario_f_satisfied_user_is_filtered_before_any_resource_use() {
    let (config, catalog) = base_config(dec!(30), 1, vec![1]);
    let mut initial = HashMap::new();
    initial.insert(1, dec!(100));
    let exchange = Arc::new(FakeExchange::new(catalog, initial, dec!(30)));
    let client = Arc::new(PerUserListenKeyExchange(exchange.clone()));
    let stream = Arc::new(FakeStream {
        exchange: exchange.clone(),
        fill_delay: Duration::from_millis(15),
    });

    let strategy = StrategyExecutor::start(config, client, stream, creds_store(&[1])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = strategy.status().await;
    strategy.stop().await;

    assert_eq!(status.users.get(&1).unwrap().status, UserStatus::FilteredSatisfied);
    assert_eq!(exchange.placement_count_for(1), 0);
}
