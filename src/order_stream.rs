//! Order Event Stream (spec.md §4.2): per-user WebSocket connector that
//! delivers a lazy, ordered sequence of decoded order events.
//!
//! Reconnects with capped exponential backoff, the same shape as the
//! teacher's `modules::user_ws`/`modules::websocket` connect loops, but
//! emitting typed connection-state events instead of `println!`-ing them
//! and handing decoded updates to an `mpsc` sink instead of mutating shared
//! `AppState` directly.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::exchange::{OrderSide, OrderStatus, OrderUpdate};
use crate::stop::StopHandle;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Connection-state transitions emitted alongside decoded orders (spec.md
/// §4.2). Carried on the same channel as [`OrderUpdate`]s so a single
/// receiver sees both in arrival order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, backoff_ms: u64 },
    GaveUp { reason: String },
    Order(OrderUpdate),
}

/// A per-user order-event connector. One instance's `run` call corresponds
/// to exactly one listen-key lifetime (spec.md §3 invariant: at most one
/// stream per `(strategy_id, user_id)` lifetime).
#[async_trait]
pub trait OrderEventStream: Send + Sync {
    /// Runs until `stop` fires or the stream gives up, forwarding every
    /// event to `sink`. Returns once the socket is fully closed.
    async fn run(&self, listen_key: String, sink: mpsc::Sender<StreamEvent>, stop: StopHandle);
}

pub struct WsOrderEventStream {
    ws_url: String,
}

impl WsOrderEventStream {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

#[async_trait]
impl OrderEventStream for WsOrderEventStream {
    async fn run(&self, listen_key: String, sink: mpsc::Sender<StreamEvent>, stop: StopHandle) {
        let mut attempt: u32 = 0;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if stop.is_stopped() {
                return;
            }

            match connect_async(&self.ws_url).await {
                Ok((mut ws, _)) => {
                    let sub = json!({
                        "method": "SUBSCRIBE",
                        "params": [format!("user@{listen_key}")],
                        "id": 1,
                    });
                    if ws.send(Message::Text(sub.to_string().into())).await.is_err() {
                        if !reconnect_or_give_up(&sink, &mut attempt, &mut backoff, &stop, "subscribe send failed").await {
                            return;
                        }
                        continue;
                    }

                    attempt = 0;
                    backoff = INITIAL_BACKOFF;
                    let _ = sink.send(StreamEvent::Connected).await;
                    info!("order event stream connected");

                    loop {
                        let next = stop.race(ws.next()).await;
                        let Some(msg) = next else {
                            let _ = ws.close(None).await;
                            return;
                        };
                        match msg {
                            Some(Ok(Message::Text(txt))) => {
                                if let Some(update) = decode_execution_report(&txt) {
                                    if sink.send(StreamEvent::Order(update)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = sink
                                    .send(StreamEvent::Disconnected {
                                        reason: "socket closed".to_string(),
                                    })
                                    .await;
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = sink
                                    .send(StreamEvent::Disconnected {
                                        reason: e.to_string(),
                                    })
                                    .await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    if !reconnect_or_give_up(&sink, &mut attempt, &mut backoff, &stop, &e.to_string()).await {
                        return;
                    }
                    continue;
                }
            }

            if stop.is_stopped() {
                return;
            }
            if !reconnect_or_give_up(&sink, &mut attempt, &mut backoff, &stop, "disconnected").await {
                return;
            }
        }
    }
}

/// Advances the backoff state, emitting `Reconnecting` or `GaveUp`. Returns
/// `false` once the caller should stop looping (gave up, or stop fired
/// during the interruptible backoff sleep).
async fn reconnect_or_give_up(
    sink: &mpsc::Sender<StreamEvent>,
    attempt: &mut u32,
    backoff: &mut Duration,
    stop: &StopHandle,
    reason: &str,
) -> bool {
    *attempt += 1;
    if *attempt > MAX_RECONNECT_ATTEMPTS {
        warn!(reason, attempts = *attempt, "order event stream giving up");
        let _ = sink
            .send(StreamEvent::GaveUp {
                reason: reason.to_string(),
            })
            .await;
        return false;
    }
    debug!(attempt = *attempt, backoff_ms = backoff.as_millis() as u64, "reconnecting");
    let _ = sink
        .send(StreamEvent::Reconnecting {
            attempt: *attempt,
            backoff_ms: backoff.as_millis() as u64,
        })
        .await;
    stop.interruptible_sleep(*backoff).await;
    *backoff = (*backoff * 2).min(MAX_BACKOFF);
    !stop.is_stopped()
}

#[derive(Debug, Deserialize)]
struct ExecutionReportFrame {
    #[serde(rename = "executionReport")]
    execution_report: ExecutionReport,
}

#[derive(Debug, Deserialize)]
struct ExecutionReport {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    #[serde(rename = "executedQty")]
    executed_qty: Decimal,
    side: String,
    #[serde(rename = "eventTime")]
    event_time: i64,
}

fn decode_execution_report(txt: &str) -> Option<OrderUpdate> {
    let frame: ExecutionReportFrame = serde_json::from_str(txt).ok()?;
    let report = frame.execution_report;
    let status = match report.status.as_str() {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        "PENDING" => OrderStatus::Pending,
        _ => return None,
    };
    let side = if report.side.eq_ignore_ascii_case("BUY") {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    Some(OrderUpdate {
        order_id: report.order_id,
        status,
        executed_quantity: report.executed_qty,
        side,
        event_time_ms: report.event_time,
    })
}
