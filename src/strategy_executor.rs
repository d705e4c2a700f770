//! Strategy Executor (spec.md §4.7): orchestrates all users of one strategy
//! — pre-filtering, per-user fan-out with full isolation, aggregated
//! status, and coordinated stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::batch_loop::run_batch_loop;
use crate::config::StrategyConfig;
use crate::credentials::{CredentialsStore, UserCredentials};
use crate::exchange::ExchangeClient;
use crate::listen_key::{ListenKeyLifecycle, ListenKeyState};
use crate::order_stream::{OrderEventStream, StreamEvent};
use crate::single_trade::SingleTradeExecutor;
use crate::status::{StatusBoard, TerminalCause, UserStatus};
use crate::stop::{StopHandle, StrategyStopScope, UserStopScope};
use crate::tracker::OrderTracker;

/// Grace period bounding teardown after a stop signal (spec.md §4.7 Stop,
/// §5 "bounds teardown by a grace period (default 10 s)").
const TEARDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A running strategy: owns the per-strategy stop scope, the status board,
/// and the per-user task handles spawned at start.
pub struct RunningStrategy {
    pub strategy_id: String,
    strategy_stop: StrategyStopScope,
    status: StatusBoard,
    user_tasks: tokio::sync::Mutex<Vec<(i64, JoinHandle<()>, UserStopScope)>>,
}

impl RunningStrategy {
    pub async fn status(&self) -> crate::status::StrategyStatusView {
        self.status.snapshot().await
    }

    /// Sets the per-strategy stop flag and waits for every per-user unit to
    /// tear down, up to the grace period — after which stragglers are
    /// aborted outright. Idempotent: a second call finds no tasks left to
    /// await (spec.md §8 property 7).
    pub async fn stop(&self) {
        self.strategy_stop.stop();
        let mut tasks = self.user_tasks.lock().await;
        let handles: Vec<JoinHandle<()>> = tasks.drain(..).map(|(_, h, _)| h).collect();
        let all = join_all(handles.into_iter().map(|h| async move { h.await }));
        if tokio::time::timeout(TEARDOWN_GRACE_PERIOD, all).await.is_err() {
            warn!(strategy_id = %self.strategy_id, "teardown grace period exceeded, some user tasks left running");
        }
    }
}

/// Strategy Executor: the entry point fanning a resolved strategy config
/// out into isolated per-user runs.
pub struct StrategyExecutor;

impl StrategyExecutor {
    pub async fn start<C: ExchangeClient + 'static>(
        config: StrategyConfig,
        client: Arc<C>,
        stream: Arc<dyn OrderEventStream>,
        creds_store: Arc<dyn CredentialsStore>,
    ) -> Arc<RunningStrategy> {
        let status = StatusBoard::new();
        let strategy_stop = StrategyStopScope::new();
        let config = Arc::new(config);

        // Step 1: resolve credentials for every configured user.
        let mut resolved: HashMap<i64, UserCredentials> = HashMap::new();
        for &user_id in &config.user_ids {
            status.set_status(user_id, UserStatus::NotStarted).await;
            match creds_store.get_credentials(user_id) {
                Some(creds) => {
                    resolved.insert(user_id, creds);
                }
                None => {
                    warn!(user_id, "no credentials found, skipping user");
                    status
                        .record_terminal(
                            user_id,
                            &TerminalCause::Error("no credentials available".into()),
                        )
                        .await;
                }
            }
        }

        // Step 2: concurrently pre-filter by authoritative volume
        // (spec.md §4.7 step 2).
        let prefilter_results = join_all(resolved.iter().map(|(&user_id, creds)| {
            let client = client.clone();
            let creds = creds.clone();
            let config = config.clone();
            async move {
                let volume = client.fetch_user_volume(&creds).await;
                (user_id, volume, config)
            }
        }))
        .await;

        let mut active_users: Vec<i64> = Vec::new();
        for (user_id, volume_result, config) in prefilter_results {
            match volume_result {
                Ok(snapshot) => {
                    let current = snapshot.volume_for(&config.target_token_symbol);
                    status.record_volume(user_id, current).await;
                    if current >= config.target_volume {
                        info!(user_id, "user already satisfied, filtering out");
                        status.set_status(user_id, UserStatus::FilteredSatisfied).await;
                    } else {
                        active_users.push(user_id);
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    status.record_terminal(user_id, &TerminalCause::AuthFailed).await;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "pre-filter volume query failed, skipping user");
                    status
                        .record_terminal(user_id, &TerminalCause::Error(e.to_string()))
                        .await;
                }
            }
        }

        // Step 3: spawn a fully isolated per-user unit for each active user.
        let mut user_tasks = Vec::new();
        for user_id in active_users {
            let creds = resolved.get(&user_id).expect("resolved above").clone();
            let client = client.clone();
            let stream = stream.clone();
            let config = config.clone();
            let status = status.clone();
            let user_scope = UserStopScope::new();
            let stop = StopHandle::new(strategy_stop.clone(), user_scope.clone());

            let handle = tokio::spawn(run_user_unit(
                client, stream, config, user_id, creds, stop, user_scope.clone(), status,
            ));
            user_tasks.push((user_id, handle, user_scope));
        }

        Arc::new(RunningStrategy {
            strategy_id: config.id.clone(),
            strategy_stop,
            status,
            user_tasks: tokio::sync::Mutex::new(user_tasks),
        })
    }
}

/// One user's fully isolated run: listen key, order stream, tracker, batch
/// loop, and their teardown. A panic anywhere in this task fails only this
/// task's `JoinHandle` — it cannot affect sibling users (spec.md §7
/// propagation policy, §9 "Failure isolation").
async fn run_user_unit<C: ExchangeClient + 'static>(
    client: Arc<C>,
    stream: Arc<dyn OrderEventStream>,
    config: Arc<StrategyConfig>,
    user_id: i64,
    creds: UserCredentials,
    stop: StopHandle,
    user_scope: UserStopScope,
    status: StatusBoard,
) {
    status.set_status(user_id, UserStatus::Running).await;
    let cause = run_user_unit_inner(client, stream, config, user_id, &creds, stop, user_scope).await;
    info!(user_id, cause = ?cause, "user run terminated");
    status.record_terminal(user_id, &cause).await;
}

async fn run_user_unit_inner<C: ExchangeClient + 'static>(
    client: Arc<C>,
    stream: Arc<dyn OrderEventStream>,
    config: Arc<StrategyConfig>,
    user_id: i64,
    creds: &UserCredentials,
    stop: StopHandle,
    user_scope: UserStopScope,
) -> TerminalCause {
    let lifecycle = match ListenKeyLifecycle::start(client.clone(), creds.clone(), stop.clone()).await {
        Ok(lifecycle) => lifecycle,
        Err(e) if e.is_auth_failure() => return TerminalCause::AuthFailed,
        Err(e) => {
            warn!(user_id, error = %e, "failed to obtain initial listen key");
            return TerminalCause::ListenKeyFailed;
        }
    };

    let initial_key = match lifecycle.current() {
        ListenKeyState::Active(key) => key,
        ListenKeyState::Failed => return TerminalCause::ListenKeyFailed,
    };

    let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(256);
    let tracker = OrderTracker::new();

    let stream_handle = tokio::spawn({
        let stream = stream.clone();
        let stop = stop.clone();
        async move { stream.run(initial_key, stream_tx, stop).await }
    });

    let bridge_handle = tokio::spawn({
        let tracker = tracker.clone();
        let user_scope = user_scope.clone();
        async move {
            let mut gave_up = false;
            while let Some(event) = stream_rx.recv().await {
                match event {
                    StreamEvent::Order(update) => tracker.observe(update).await,
                    StreamEvent::GaveUp { reason } => {
                        warn!(reason, "order event stream gave up");
                        gave_up = true;
                        user_scope.stop();
                        break;
                    }
                    _ => {}
                }
            }
            gave_up
        }
    });

    // Only ever breaks out on `Failed` or on stop firing — never on a
    // normal `Success`/`Canceled` run, since the watch sender stays alive
    // for the lifecycle's whole life. Racing against `stop` (rather than
    // just `rx.changed()`) is what lets this task actually finish during
    // teardown instead of being awaited forever.
    let lifecycle_watch_handle = tokio::spawn({
        let mut rx = lifecycle.watch();
        let user_scope = user_scope.clone();
        let stop = stop.clone();
        async move {
            loop {
                match stop.race(rx.changed()).await {
                    Some(Ok(())) => {
                        if matches!(*rx.borrow(), ListenKeyState::Failed) {
                            user_scope.stop();
                            return;
                        }
                    }
                    _ => return,
                }
            }
        }
    });

    let executor = SingleTradeExecutor::new(client.clone(), tracker.clone());
    let mut cause = run_batch_loop(client.clone(), &executor, &config, creds, &stop).await;

    // Tear down this user's resources regardless of how the batch loop
    // ended; bounded by the per-unit watchers' own cooperative stop.
    user_scope.stop();
    let _ = stream_handle.await;
    let stream_gave_up = bridge_handle.await.unwrap_or(false);
    let _ = lifecycle_watch_handle.await;
    let listen_key_failed = matches!(lifecycle.current(), ListenKeyState::Failed);
    lifecycle.stop(client.as_ref(), creds).await;

    if cause == TerminalCause::Canceled {
        if listen_key_failed {
            cause = TerminalCause::ListenKeyFailed;
        } else if stream_gave_up {
            cause = TerminalCause::StreamFailed;
        }
    }
    cause
}
