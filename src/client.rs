//! High-level client: `TradeStreamClient`.
//!
//! Wires the REST client, the stream configuration and one transport from a
//! single builder. Price services are created per call (their connection
//! lifetime belongs to the caller); the chart registry is shared so every
//! chart on the client de-duplicates against the same set of streams.
//!
//! Background work (transport I/O, reconnect timers, history fetches) runs on
//! the Tokio runtime captured by `build()`, or the one passed to
//! [`TradeStreamClientBuilder::runtime`]. After that every method may be
//! called from any thread.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::domain::chart::{ApiChartFeed, ChartSubscriptions};
use crate::domain::contract::ContractPriceService;
use crate::domain::market::MarketPriceService;
use crate::error::{SdkError, StreamError};
use crate::http::TradeHttp;
use crate::stream::sse::SseTransport;
use crate::stream::{
    create_sse_connection, Access, ReconnectPolicy, SseConnection, SseConnectionOptions,
    Spawner, StreamConfig, TokenStore, Transport,
};

/// The primary entry point.
#[derive(Clone)]
pub struct TradeStreamClient {
    http: TradeHttp,
    stream_config: StreamConfig,
    ws_config: StreamConfig,
    transport: Arc<dyn Transport>,
    charts: ChartSubscriptions,
    auth_token: Arc<RwLock<Option<String>>>,
}

impl TradeStreamClient {
    pub fn builder() -> TradeStreamClientBuilder {
        TradeStreamClientBuilder::default()
    }

    pub fn http(&self) -> &TradeHttp {
        &self.http
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }

    /// Config for WebSocket streams. Pair it with a WebSocket transport.
    pub fn ws_config(&self) -> &StreamConfig {
        &self.ws_config
    }

    // ── Streams ──────────────────────────────────────────────────────────

    /// A new instrument price service, protected when a token is set.
    pub fn market_prices(&self) -> MarketPriceService {
        MarketPriceService::new(self.stream_config.clone(), Arc::clone(&self.transport), self.access())
    }

    /// A new contract price service, protected when a token is set.
    pub fn contract_prices(&self) -> ContractPriceService {
        ContractPriceService::new(self.stream_config.clone(), Arc::clone(&self.transport), self.access())
    }

    /// The client's shared chart registry.
    pub fn charts(&self) -> &ChartSubscriptions {
        &self.charts
    }

    /// An ad-hoc SSE stream against the client's stream URL.
    pub fn sse_connection<T>(&self, options: SseConnectionOptions<T>) -> SseConnection
    where
        T: DeserializeOwned + Send + 'static,
    {
        create_sse_connection(&self.stream_config, Arc::clone(&self.transport), options)
    }

    /// A WebSocket transport for use with [`Self::ws_config`].
    #[cfg(feature = "ws-native")]
    pub fn ws_transport(&self) -> Arc<dyn Transport> {
        Arc::new(crate::stream::ws::WsTransport::with_spawner(
            self.stream_config.spawner.clone(),
        ))
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    /// Rotate the bearer token for REST calls and for services created
    /// afterwards. Running services keep theirs; use their
    /// `update_auth_token`.
    pub async fn set_auth_token(&self, token: impl Into<String>) -> Result<(), SdkError> {
        let token = token.into();
        TokenStore::new(token.as_str())?;
        self.http.set_auth_token(Some(token.clone())).await;
        *self.auth_token.write() = Some(token);
        tracing::info!("Auth token updated");
        Ok(())
    }

    pub async fn clear_auth_token(&self) {
        self.http.clear_auth_token().await;
        *self.auth_token.write() = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.read().is_some()
    }

    fn access(&self) -> Access {
        match self.auth_token.read().as_deref() {
            Some(token) => match TokenStore::new(token) {
                Ok(store) => Access::Protected(store),
                Err(e) => {
                    tracing::warn!("Stored auth token rejected, using public channel: {}", e);
                    Access::Public
                }
            },
            None => Access::Public,
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct TradeStreamClientBuilder {
    base_url: String,
    stream_url: String,
    ws_url: String,
    auth_token: Option<String>,
    reconnect_attempts: u32,
    reconnect_policy: ReconnectPolicy,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
}

impl Default for TradeStreamClientBuilder {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            base_url: crate::network::DEFAULT_API_URL.to_string(),
            stream_url: stream.base_url,
            ws_url: crate::network::DEFAULT_WS_URL.to_string(),
            auth_token: None,
            reconnect_attempts: stream.reconnect_attempts,
            reconnect_policy: stream.reconnect_policy,
            transport: None,
            runtime: None,
        }
    }
}

impl TradeStreamClientBuilder {
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn stream_url(mut self, url: &str) -> Self {
        self.stream_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = url.to_string();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Replace the default reqwest SSE transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run background work on `handle` instead of the runtime `build()` is
    /// called from.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the client. Fails on a blank auth token, or when no runtime was
    /// given and `build()` runs outside one.
    ///
    /// The token is installed on the HTTP client without awaiting; the lock
    /// is uncontended because nothing else holds the client yet.
    pub fn build(self) -> Result<TradeStreamClient, SdkError> {
        if let Some(token) = &self.auth_token {
            TokenStore::new(token.as_str())?;
        }

        let spawner = match self.runtime {
            Some(handle) => Spawner::with_handle(handle),
            None => Spawner::current(),
        };
        if !spawner.is_available() {
            return Err(StreamError::NoRuntime.into());
        }

        let stream_config = StreamConfig {
            base_url: self.stream_url,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_policy: self.reconnect_policy.clone(),
            spawner: spawner.clone(),
            ..StreamConfig::default()
        };
        let ws_config = StreamConfig {
            base_url: self.ws_url,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_policy: self.reconnect_policy,
            spawner: spawner.clone(),
            ..StreamConfig::websocket()
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(SseTransport::new().with_spawner(spawner.clone())) as Arc<dyn Transport>);
        let http = TradeHttp::new(&self.base_url);
        if let Some(token) = &self.auth_token {
            if !http.try_set_auth_token(Some(token.clone())) {
                return Err(SdkError::Other("HTTP auth token lock unavailable".into()));
            }
        }

        let feed = ApiChartFeed::new(http.clone(), stream_config.clone(), Arc::clone(&transport));
        Ok(TradeStreamClient {
            http,
            stream_config,
            ws_config,
            transport,
            charts: ChartSubscriptions::with_spawner(Arc::new(feed), spawner),
            auth_token: Arc::new(RwLock::new(self.auth_token)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, TransportKind};
    use crate::stream::{ConnectionState, MemoryTransport};

    fn client(transport: &MemoryTransport) -> TradeStreamClient {
        TradeStreamClient::builder()
            .base_url("https://api.test")
            .stream_url("https://stream.test")
            .ws_url("wss://ws.test")
            .reconnect_attempts(2)
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builder_configs() {
        let transport = MemoryTransport::new();
        let client = client(&transport);

        assert_eq!(client.http().base_url(), "https://api.test");
        assert_eq!(client.stream_config().base_url, "https://stream.test");
        assert_eq!(client.stream_config().reconnect_attempts, 2);
        assert_eq!(client.ws_config().kind, TransportKind::WebSocket);
        assert_eq!(client.ws_config().base_url, "wss://ws.test");
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_services_follow_auth_token() {
        let transport = MemoryTransport::new();
        let client = client(&transport);

        let public = client.market_prices();
        public.subscribe_to_price("R_100");
        assert!(transport.last_url().unwrap().contains("/v1/stream/public?"));

        tokio_test::assert_ok!(client.set_auth_token("secret").await);
        assert!(client.is_authenticated());
        assert!(client.http().has_auth_token().await);

        let protected = client.contract_prices();
        protected.request_price(crate::domain::contract::ContractPriceRequest::new(
            "1h", "R_100", "CALL", "USD", "100",
        ));
        let request = transport.request(1).unwrap();
        assert!(request.url.contains("/v1/stream/protected?"));
        assert_eq!(request.header_value("Authorization"), Some("Bearer secret"));
        assert_eq!(protected.state(), ConnectionState::Connecting);

        // Running public services are unaffected.
        assert_eq!(
            public.update_auth_token("other"),
            Err(AuthError::PublicChannel)
        );
    }

    #[tokio::test]
    async fn test_blank_token_rejected() {
        let transport = MemoryTransport::new();
        let client = client(&transport);
        assert!(matches!(
            client.set_auth_token("  ").await,
            Err(SdkError::Auth(AuthError::InvalidToken(_)))
        ));
        assert!(!client.is_authenticated());

        let built = TradeStreamClient::builder()
            .auth_token("")
            .transport(Arc::new(transport))
            .build();
        assert!(built.is_err());
    }

    #[tokio::test]
    async fn test_charts_are_shared_across_clones() {
        let transport = MemoryTransport::new();
        let client = client(&transport);
        let clone = client.clone();

        let sub = client
            .charts()
            .subscribe(crate::domain::chart::ChartRequest::ticks("R_100"), |_: &crate::domain::chart::ChartMessage| {});
        assert_eq!(clone.charts().active_keys().len(), 1);
        sub.unsubscribe();
        assert!(clone.charts().active_keys().is_empty());
    }

    #[test]
    fn test_build_needs_a_runtime() {
        let built = TradeStreamClient::builder().build();
        assert!(matches!(built, Err(SdkError::Stream(StreamError::NoRuntime))));
    }

    #[test]
    fn test_runtime_handle_serves_plain_threads() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let transport = MemoryTransport::new();
        let client = TradeStreamClient::builder()
            .base_url("http://127.0.0.1:1")
            .stream_url("https://stream.test")
            .reconnect_policy(ReconnectPolicy::Fixed(std::time::Duration::from_millis(10)))
            .transport(Arc::new(transport.clone()))
            .runtime(rt.handle().clone())
            .build()
            .unwrap();

        let prices = client.market_prices();
        prices.subscribe_to_price("R_100");
        transport.emit_error("reset");
        rt.block_on(async { tokio::time::sleep(std::time::Duration::from_millis(50)).await });
        assert_eq!(transport.connection_count(), 2);

        let sub = client.charts().subscribe(
            crate::domain::chart::ChartRequest::ticks("R_100"),
            |_: &crate::domain::chart::ChartMessage| {},
        );
        assert_eq!(client.charts().active_keys().len(), 1);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_sse_connection_uses_stream_url() {
        let transport = MemoryTransport::new();
        let client = client(&transport);
        let connection = client.sse_connection(
            SseConnectionOptions::new(|_: serde_json::Value| {}).param("action", "ticks"),
        );
        assert_eq!(connection.url(), "https://stream.test/v1/stream/public?action=ticks");
        connection.cleanup();
    }
}
