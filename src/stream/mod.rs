//! Streaming layer: transports, the connection manager, and the ad-hoc SSE helper.
//!
//! Layering, leaf first:
//! - [`transport`]: the `Transport` seam, implemented by [`sse::SseTransport`],
//!   [`ws::WsTransport`] and the in-process [`memory::MemoryTransport`]
//! - [`service`]: `StreamService<M>`, one managed connection with bounded
//!   reconnection and action-keyed dispatch
//! - [`access`]: public vs. bearer-protected channels
//! - [`helper`]: `create_sse_connection`, a one-shot stream with its own retry loop

pub mod access;
pub mod endpoint;
pub mod handlers;
pub mod helper;
pub mod memory;
pub mod runtime;
pub mod service;
pub mod sse;
pub mod transport;

#[cfg(feature = "ws-native")]
pub mod ws;

use std::time::Duration;

use crate::error::TransportKind;
use crate::http::retry::RetryConfig;

pub use access::{Access, TokenStore};
pub use endpoint::{with_query, EndpointBuilder};
pub use handlers::{HandlerId, MessageMap};
pub use helper::{create_sse_connection, SseConnection, SseConnectionOptions};
pub use memory::MemoryTransport;
pub use runtime::Spawner;
pub use service::StreamService;
pub use transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};

// ─── Connection state ────────────────────────────────────────────────────────

/// Connection lifecycle of a managed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport, nothing scheduled.
    #[default]
    Disconnected,
    /// A transport was opened and has not reported `Open` yet.
    Connecting,
    /// The transport reported `Open`.
    Open,
}

// ─── Reconnect policy ────────────────────────────────────────────────────────

/// Delay between a transport error and the next connection attempt.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    /// Same delay after every error.
    Fixed(Duration),
    /// Exponential backoff with optional jitter. `RetryConfig::max_retries` is
    /// ignored here; the attempt cap is `StreamConfig::reconnect_attempts`.
    Backoff(RetryConfig),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_millis(3000))
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based, as counted by the service).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Backoff(config) => config.delay_for_attempt(attempt.saturating_sub(1)),
        }
    }
}

// ─── WebSocket credentials ───────────────────────────────────────────────────

/// How a protected WebSocket carries its bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsAuth {
    /// `Authorization=Bearer <token>` appended to the query string.
    #[default]
    QueryParam,
    /// `Sec-WebSocket-Protocol: Bearer.<token>`.
    SubProtocol,
}

// ─── StreamConfig ────────────────────────────────────────────────────────────

/// Configuration shared by every managed stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub kind: TransportKind,
    pub base_url: String,
    pub public_path: String,
    pub protected_path: String,
    /// Consecutive errors tolerated before the stream gives up.
    pub reconnect_attempts: u32,
    pub reconnect_policy: ReconnectPolicy,
    pub ws_auth: WsAuth,
    /// Runtime for reconnect timers. Captured from the constructing context.
    pub spawner: Spawner,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Sse,
            base_url: crate::network::DEFAULT_STREAM_URL.to_string(),
            public_path: crate::network::PUBLIC_PATH.to_string(),
            protected_path: crate::network::PROTECTED_PATH.to_string(),
            reconnect_attempts: 5,
            reconnect_policy: ReconnectPolicy::default(),
            ws_auth: WsAuth::default(),
            spawner: Spawner::current(),
        }
    }
}

impl StreamConfig {
    /// Defaults for a WebSocket stream against [`crate::network::DEFAULT_WS_URL`].
    pub fn websocket() -> Self {
        Self {
            kind: TransportKind::WebSocket,
            base_url: crate::network::DEFAULT_WS_URL.to_string(),
            ..Default::default()
        }
    }

    /// `base_url` joined with the public or protected path.
    pub fn channel_url(&self, protected: bool) -> String {
        let path = if protected {
            &self.protected_path
        } else {
            &self.public_path
        };
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
