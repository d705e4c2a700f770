//! Listen-Key Lifecycle (spec.md §4.3): keeps a valid listen key available
//! to the Order Event Stream for the duration of a user's run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::credentials::UserCredentials;
use crate::exchange::ExchangeClient;
use crate::stop::StopHandle;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);
const FAILURE_COUNT_THRESHOLD: u32 = 3;
const FAILURE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Observable lifecycle state (spec.md §4.3's "terminal `Failed` state
/// observable by the caller").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenKeyState {
    Active(String),
    Failed,
}

/// Obtains, periodically refreshes, and releases a listen key. The policy
/// from spec.md §4.3 is deliberately conservative: a listen-key failure is
/// treated as fatal for the user rather than attempting a silent
/// resubscription, so callers should watch for `Failed` and tear the user
/// down the same way they would a stream `GaveUp`.
pub struct ListenKeyLifecycle {
    state_tx: watch::Sender<ListenKeyState>,
    state_rx: watch::Receiver<ListenKeyState>,
    refresh_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ListenKeyLifecycle {
    /// Obtains the initial key and spawns the 30-minute refresh loop.
    pub async fn start<C: ExchangeClient + Send + Sync + 'static>(
        client: Arc<C>,
        creds: UserCredentials,
        stop: StopHandle,
    ) -> Result<Arc<Self>, crate::error::ExchangeError> {
        let initial_key = client.obtain_listen_key(&creds).await?;
        let (state_tx, state_rx) = watch::channel(ListenKeyState::Active(initial_key));

        let lifecycle = Arc::new(Self {
            state_tx,
            state_rx,
            refresh_task: tokio::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(refresh_loop(client, creds, lifecycle.clone(), stop));
        *lifecycle.refresh_task.lock().await = Some(handle);
        Ok(lifecycle)
    }

    pub fn current(&self) -> ListenKeyState {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ListenKeyState> {
        self.state_rx.clone()
    }

    /// Cancels the refresh schedule and best-effort closes the key.
    /// Idempotent: calling `stop` twice is safe, the second call finds no
    /// task and no key worth closing.
    pub async fn stop<C: ExchangeClient>(&self, client: &C, creds: &UserCredentials) {
        if let Some(handle) = self.refresh_task.lock().await.take() {
            handle.abort();
        }
        if let ListenKeyState::Active(key) = self.current() {
            if let Err(e) = client.close_listen_key(creds, &key).await {
                warn!(error = %e, "best-effort listen key close failed");
            }
        }
    }
}

async fn refresh_loop<C: ExchangeClient + 'static>(
    client: Arc<C>,
    creds: UserCredentials,
    lifecycle: Arc<ListenKeyLifecycle>,
    stop: StopHandle,
) {
    let mut first_failure_at: Option<tokio::time::Instant> = None;
    let mut failure_count: u32 = 0;

    loop {
        stop.interruptible_sleep(REFRESH_INTERVAL).await;
        if stop.is_stopped() {
            return;
        }

        let key = match lifecycle.current() {
            ListenKeyState::Active(key) => key,
            ListenKeyState::Failed => return,
        };

        match client.keep_alive_listen_key(&creds, &key).await {
            Ok(()) => {
                first_failure_at = None;
                failure_count = 0;
            }
            Err(e) => {
                failure_count += 1;
                let window_start = *first_failure_at.get_or_insert_with(tokio::time::Instant::now);
                warn!(error = %e, failure_count, "listen key refresh failed");

                if failure_count >= FAILURE_COUNT_THRESHOLD
                    && window_start.elapsed() > FAILURE_WINDOW
                {
                    warn!("listen key lifecycle exhausted retry budget, transitioning to Failed");
                    let _ = lifecycle.state_tx.send(ListenKeyState::Failed);
                    return;
                }

                stop.interruptible_sleep(REFRESH_RETRY_DELAY).await;
                if stop.is_stopped() {
                    return;
                }
            }
        }
    }
}
