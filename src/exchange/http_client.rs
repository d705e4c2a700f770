//! `HttpExchangeClient` — `reqwest`-backed [`ExchangeClient`] implementation.
//!
//! Parses the `{ code, message, data, success }` envelope described in
//! spec.md §6 and routes failures through the [`AuthFailureClassifier`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::credentials::UserCredentials;
use crate::error::ExchangeError;
use crate::exchange::auth_classifier::{AuthFailureClassifier, ErrorClass};
use crate::exchange::{ExchangeClient, OtoOrderPlacement, TokenCatalogEntry, UserVolumeSnapshot};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: String,
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

/// Token catalog changes rarely; both the batch loop (once per batch) and
/// the single-trade executor (once per trade) ask for it, so a short TTL
/// keeps both call sites cheap without either needing to know about caching.
const CATALOG_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CatalogCache {
    entries: Vec<TokenCatalogEntry>,
    fetched_at: Option<Instant>,
}

pub struct HttpExchangeClient {
    http: reqwest::Client,
    base_url: String,
    classifier: AuthFailureClassifier,
    catalog_cache: Mutex<CatalogCache>,
}

impl HttpExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds with static config"),
            base_url: base_url.into(),
            classifier: AuthFailureClassifier::default(),
            catalog_cache: Mutex::new(CatalogCache::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: AuthFailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn apply_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        creds: &UserCredentials,
    ) -> reqwest::RequestBuilder {
        for (k, v) in &creds.headers {
            builder = builder.header(k, v);
        }
        if !creds.cookies.is_empty() {
            builder = builder.header(reqwest::header::COOKIE, creds.cookies.clone());
        }
        builder
    }

    async fn send_envelope<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ExchangeError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let envelope: Envelope<T> = serde_json::from_slice(&bytes)
            .map_err(|e| ExchangeError::Protocol(format!("malformed envelope: {e}")))?;

        if envelope.success {
            return envelope
                .data
                .ok_or_else(|| ExchangeError::Protocol("success envelope missing data".into()));
        }

        match self.classifier.classify(envelope.code, &envelope.message) {
            ErrorClass::AuthenticationFailed => {
                warn!(code = envelope.code, "exchange reported credential revocation");
                Err(ExchangeError::AuthenticationFailed(envelope.message))
            }
            ErrorClass::Rejected => Err(ExchangeError::Rejected {
                reason: envelope.message,
            }),
            ErrorClass::Transient => Err(ExchangeError::Transport(envelope.message)),
        }
    }
}

#[async_trait]
impl ExchangeClient for HttpExchangeClient {
    async fn fetch_token_catalog(&self) -> Result<Vec<TokenCatalogEntry>, ExchangeError> {
        {
            let cache = self.catalog_cache.lock().await;
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < CATALOG_CACHE_TTL {
                    return Ok(cache.entries.clone());
                }
            }
        }

        let url = format!("{}/api/v1/market/catalog", self.base_url);
        debug!(url, "fetching token catalog");
        let entries: Vec<TokenCatalogEntry> = self.send_envelope(self.http.get(url)).await?;

        let mut cache = self.catalog_cache.lock().await;
        cache.entries = entries.clone();
        cache.fetched_at = Some(Instant::now());
        Ok(entries)
    }

    async fn fetch_user_volume(
        &self,
        creds: &UserCredentials,
    ) -> Result<UserVolumeSnapshot, ExchangeError> {
        let url = format!("{}/api/v1/user/volume", self.base_url);
        let builder = self.apply_headers(self.http.get(url), creds);
        let raw: HashMap<String, Decimal> = self.send_envelope(builder).await?;
        Ok(UserVolumeSnapshot { volumes: raw })
    }

    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        quantity: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> Result<OtoOrderPlacement, ExchangeError> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            symbol: &'a str,
            side: &'static str,
            quantity: String,
            working_price: String,
            pending_side: &'static str,
            pending_price: String,
        }
        #[derive(Deserialize)]
        struct PlacementData {
            working_order_id: String,
            pending_order_id: String,
        }

        let url = format!("{}/api/v1/order/oto", self.base_url);
        let body = Body {
            symbol,
            side: "BUY",
            quantity: quantity.to_string(),
            working_price: buy_price.to_string(),
            pending_side: "SELL",
            pending_price: sell_price.to_string(),
        };
        let builder = self.apply_headers(self.http.post(url).json(&body), creds);
        let data: PlacementData = self.send_envelope(builder).await?;
        Ok(OtoOrderPlacement {
            working_order_id: data.working_order_id,
            pending_order_id: data.pending_order_id,
        })
    }

    async fn obtain_listen_key(&self, creds: &UserCredentials) -> Result<String, ExchangeError> {
        #[derive(Deserialize)]
        struct ListenKeyData {
            listen_key: String,
        }
        let url = format!("{}/api/v1/userDataStream", self.base_url);
        let builder = self.apply_headers(self.http.post(url), creds);
        let data: ListenKeyData = self.send_envelope(builder).await?;
        Ok(data.listen_key)
    }

    async fn keep_alive_listen_key(
        &self,
        creds: &UserCredentials,
        key: &str,
    ) -> Result<(), ExchangeError> {
        let url = format!("{}/api/v1/userDataStream?listenKey={}", self.base_url, key);
        let builder = self.apply_headers(self.http.put(url), creds);
        let _: serde_json::Value = self.send_envelope(builder).await?;
        Ok(())
    }

    async fn close_listen_key(&self, creds: &UserCredentials, key: &str) -> Result<(), ExchangeError> {
        let url = format!("{}/api/v1/userDataStream?listenKey={}", self.base_url, key);
        let builder = self.apply_headers(self.http.delete(url), creds);
        match self.send_envelope::<serde_json::Value>(builder).await {
            Ok(_) => Ok(()),
            // A not-found listen key on close is not an error (spec.md §4.1).
            Err(ExchangeError::Rejected { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_deserializes_success_and_failure_shapes() {
        let ok: Envelope<i32> =
            serde_json::from_str(r#"{"code":0,"message":"ok","success":true,"data":42}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.data, Some(42));

        let err: Envelope<i32> = serde_json::from_str(
            r#"{"code":401,"message":"session expired","success":false,"data":null}"#,
        )
        .unwrap();
        assert!(!err.success);
        assert_eq!(err.code, 401);
    }
}
