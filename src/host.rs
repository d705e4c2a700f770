//! Multi-strategy host (spec.md §6 "Control (provided): Start(strategy) /
//! Stop(strategy) / StopAll()"). The teacher's `main.rs` only ever drives one
//! bot instance; this generalizes that to the orchestrator's actual
//! multi-strategy control surface.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::StrategyConfig;
use crate::credentials::CredentialsStore;
use crate::exchange::ExchangeClient;
use crate::order_stream::OrderEventStream;
use crate::strategy_executor::{RunningStrategy, StrategyExecutor};

/// Registry of concurrently-running strategies, keyed by `StrategyConfig::id`.
/// `Start`/`Stop`/`StopAll` are all idempotent per spec.md §6.
#[derive(Default)]
pub struct StrategyHost {
    strategies: RwLock<HashMap<String, Arc<RunningStrategy>>>,
}

impl StrategyHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `config` under `client`/`stream`/`creds_store`. Idempotent: a
    /// strategy id already running is returned as-is, not restarted.
    pub async fn start<C: ExchangeClient + 'static>(
        &self,
        config: StrategyConfig,
        client: Arc<C>,
        stream: Arc<dyn OrderEventStream>,
        creds_store: Arc<dyn CredentialsStore>,
    ) -> Arc<RunningStrategy> {
        let id = config.id.clone();
        let mut strategies = self.strategies.write().await;
        if let Some(existing) = strategies.get(&id) {
            warn!(strategy_id = id, "strategy already running, ignoring duplicate start");
            return existing.clone();
        }
        let running = StrategyExecutor::start(config, client, stream, creds_store).await;
        strategies.insert(id, running.clone());
        running
    }

    /// Stops one strategy by id, removing it from the registry. A no-op if
    /// the id isn't running.
    pub async fn stop(&self, strategy_id: &str) {
        let running = self.strategies.write().await.remove(strategy_id);
        if let Some(running) = running {
            running.stop().await;
        }
    }

    /// Stops every currently-running strategy concurrently.
    pub async fn stop_all(&self) {
        let drained: Vec<Arc<RunningStrategy>> = self.strategies.write().await.drain().map(|(_, v)| v).collect();
        join_all(drained.iter().map(|s| s.stop())).await;
    }

    pub async fn running_strategy_ids(&self) -> Vec<String> {
        self.strategies.read().await.keys().cloned().collect()
    }
}
