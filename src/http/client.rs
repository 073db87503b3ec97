//! Low-level HTTP client: `TradeHttp`.
//!
//! One method per REST endpoint the streaming layer needs: chart history and
//! contract replay. GETs run under `RetryPolicy::Idempotent`.

use std::sync::Arc;
use std::time::Duration;

use async_lock::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::domain::chart::wire::CandlesResponse;
use crate::domain::chart::{ChartMessage, ChartRequest, TickHistory};
use crate::domain::contract::ContractReplay;
use crate::error::HttpError;
use crate::http::retry::RetryPolicy;

/// REST client for history and replay endpoints.
#[derive(Clone)]
pub struct TradeHttp {
    base_url: String,
    client: Client,
    /// Bearer token. Never exposed publicly.
    auth_token: Arc<RwLock<Option<String>>>,
}

impl TradeHttp {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("HTTP client builder failed, using defaults: {}", e);
                Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) async fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().await = token;
    }

    /// Set the token without waiting. Returns `false` if the lock is held.
    pub(crate) fn try_set_auth_token(&self, token: Option<String>) -> bool {
        match self.auth_token.try_write() {
            Some(mut guard) => {
                *guard = token;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn clear_auth_token(&self) {
        *self.auth_token.write().await = None;
    }

    #[cfg(test)]
    pub(crate) async fn has_auth_token(&self) -> bool {
        self.auth_token.read().await.is_some()
    }

    // ── Charts ───────────────────────────────────────────────────────────

    /// Tick history for `request`, as a `history` message.
    pub async fn get_ticks_history(&self, request: &ChartRequest) -> Result<ChartMessage, HttpError> {
        let url = self.url_with_query("/v1/market/ticks", &request.history_params());
        let history: TickHistory = self.get(&url, RetryPolicy::Idempotent).await?;
        Ok(ChartMessage::History { history })
    }

    /// Candle history for `request`, as a `candles` message.
    pub async fn get_candles(&self, request: &ChartRequest) -> Result<ChartMessage, HttpError> {
        let url = self.url_with_query("/v1/market/candles", &request.history_params());
        let response: CandlesResponse = self.get(&url, RetryPolicy::Idempotent).await?;
        Ok(ChartMessage::Candles {
            candles: response.candles,
        })
    }

    // ── Contracts ────────────────────────────────────────────────────────

    pub async fn get_contract_replay(
        &self,
        contract_id: &str,
        account_id: &str,
    ) -> Result<ContractReplay, HttpError> {
        let path = format!("/v1/contracts/{}/replay", urlencoding::encode(contract_id));
        let url = self.url_with_query(&path, &[("account_id", account_id)]);
        self.get(&url, RetryPolicy::Idempotent).await
    }

    // ── Internal HTTP methods ────────────────────────────────────────────

    fn url_with_query<K, V>(&self, path: &str, params: &[(K, V)]) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        crate::stream::with_query(&format!("{}{}", self.base_url, path), params)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, retry: RetryPolicy) -> Result<T, HttpError> {
        let Some(config) = retry.config() else {
            return self.do_get(url).await;
        };

        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.do_get::<T>(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let should_retry = match &e {
                        HttpError::ServerError { status, .. } => config.is_retryable_status(*status),
                        HttpError::RateLimited { retry_after_ms } => {
                            if let Some(ms) = retry_after_ms {
                                futures_timer::Delay::new(Duration::from_millis(*ms)).await;
                            }
                            config.is_retryable_status(429)
                        }
                        HttpError::Timeout => true,
                        HttpError::Reqwest(re) => re.is_connect() || re.is_timeout() || re.is_request(),
                        _ => false,
                    };

                    if should_retry && attempt < config.max_retries {
                        let delay = config.delay_for_attempt(attempt);
                        tracing::debug!(
                            attempt = attempt + 1,
                            max = config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying request to {}",
                            url
                        );
                        futures_timer::Delay::new(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(HttpError::MaxRetriesExceeded {
            attempts: config.max_retries + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let mut req = self.client.get(url);
        if let Some(token) = self.auth_token.read().await.as_ref() {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let retry_after_ms = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), body, retry_after_ms))
    }
}

fn status_error(status: u16, body: String, retry_after_ms: Option<u64>) -> HttpError {
    match status {
        401 => HttpError::Unauthorized,
        404 => HttpError::NotFound(body),
        429 => HttpError::RateLimited { retry_after_ms },
        400..=499 => HttpError::BadRequest(body),
        _ => HttpError::ServerError { status, body },
    }
}
