//! Composition root: loads a strategy config and a demo env-backed
//! credential store, wires a `HttpExchangeClient` + `WsOrderEventStream`
//! into the `StrategyExecutor`, and connects `Ctrl+C` to the stop
//! coordinator — the same shape as the teacher's single-bot `main.rs`,
//! generalized to N fanned-out users.

use std::env;
use std::sync::Arc;

use alpha_volume_orchestrator::config::load_strategy_config;
use alpha_volume_orchestrator::credentials::{InMemoryCredentialsStore, UserCredentials};
use alpha_volume_orchestrator::exchange::HttpExchangeClient;
use alpha_volume_orchestrator::host::StrategyHost;
use alpha_volume_orchestrator::order_stream::WsOrderEventStream;
use tracing_subscriber::EnvFilter;

/// Builds a demo credential store from `ORCH_USER_<id>_COOKIES` env vars.
/// A real deployment plugs in whatever persistent store spec.md §6 names
/// as an external collaborator; this is intentionally minimal.
fn credentials_from_env(user_ids: &[i64]) -> InMemoryCredentialsStore {
    let mut store = InMemoryCredentialsStore::new();
    for &user_id in user_ids {
        let cookies = env::var(format!("ORCH_USER_{user_id}_COOKIES")).unwrap_or_default();
        if cookies.is_empty() {
            continue;
        }
        store.insert(
            user_id,
            UserCredentials {
                headers: Default::default(),
                cookies,
            },
        );
    }
    store
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::var("ORCH_STRATEGY_CONFIG").unwrap_or_else(|_| "strategy.yaml".to_string());
    let config = load_strategy_config(&config_path)?;

    let base_url = env::var("ORCH_EXCHANGE_BASE_URL")
        .unwrap_or_else(|_| "https://exchange.example.com".to_string());
    let ws_url = env::var("ORCH_EXCHANGE_WS_URL")
        .unwrap_or_else(|_| "wss://exchange.example.com/ws".to_string());

    let client = Arc::new(HttpExchangeClient::new(base_url));
    let stream = Arc::new(WsOrderEventStream::new(ws_url));
    let creds_store = Arc::new(credentials_from_env(&config.user_ids));

    let strategy_id = config.id.clone();
    tracing::info!(strategy_id, users = config.user_ids.len(), "starting strategy");
    let host = StrategyHost::new();
    host.start(config, client, stream, creds_store).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!(strategy_id, "ctrl-c received, stopping all strategies");
    host.stop_all().await;

    Ok(())
}
