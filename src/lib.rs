//! # tradestream
//!
//! Real-time market data for a binary-options trading front end: managed
//! SSE/WebSocket streams with bounded reconnection, instrument and contract
//! price services, and chart subscriptions that share one live stream per
//! chart.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: newtypes, error types, network constants
//! 2. **Streaming**: the `Transport` seam, `StreamService<M>` (connect,
//!    reconnect, dispatch) and the one-shot `create_sse_connection` helper
//! 3. **Domains**: `MarketPriceService`, `ContractPriceService`,
//!    `ChartSubscriptions`
//! 4. **HTTP API**: `TradeHttp` for chart history and contract replay
//! 5. **High-Level Client**: `TradeStreamClient` wiring all of the above
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tradestream::prelude::*;
//!
//! let client = TradeStreamClient::builder()
//!     .stream_url("https://stream.example.com")
//!     .build()?;
//!
//! let prices = client.market_prices();
//! prices.on_price(|p: &InstrumentPrice| println!("{} {}", p.instrument_id, p.mid()));
//! prices.subscribe_to_price("R_100");
//!
//! let chart = client.charts().subscribe(ChartRequest::ticks("R_100"), |m: &ChartMessage| {
//!     println!("{}", m.msg_type());
//! });
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all domains.
pub mod shared;

/// Unified SDK error types.
pub mod error;

/// Network URL constants.
pub mod network;

// ── Layer 2: Streaming ───────────────────────────────────────────────────────

/// Transports, managed connections and the SSE helper.
pub mod stream;

// ── Layer 3: Domains ─────────────────────────────────────────────────────────

/// Domain modules (vertical slices): message types, services, state.
pub mod domain;

// ── Layer 4: HTTP API ────────────────────────────────────────────────────────

/// HTTP client and retry settings. The client itself needs the `http` feature.
pub mod http;

// ── Layer 5: High-Level Client ───────────────────────────────────────────────

/// `TradeStreamClient`: the primary entry point.
#[cfg(feature = "http")]
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::InstrumentId;

    // Domain types: market
    pub use crate::domain::market::{InstrumentPrice, MarketMessage, MarketPriceService};

    // Domain types: contract
    pub use crate::domain::contract::{
        ContractPrice, ContractPriceRequest, ContractPriceService, ContractReplay,
    };

    // Domain types: chart
    pub use crate::domain::chart::{
        Candle, ChartFeed, ChartKey, ChartMessage, ChartRequest, ChartState, ChartStyle,
        ChartSubscription, ChartSubscriptions, Tick, TickHistory,
    };

    // Streaming
    pub use crate::stream::{
        create_sse_connection, Access, ConnectionState, HandlerId, ReconnectPolicy, SseConnection,
        SseConnectionOptions, Spawner, StreamConfig, StreamService, TokenStore, Transport, WsAuth,
    };

    // Errors
    pub use crate::error::{AuthError, HttpError, SdkError, StreamError, TransportKind};

    // Network
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_STREAM_URL, DEFAULT_WS_URL};

    // HTTP client + high-level client
    pub use crate::http::{RetryConfig, RetryPolicy};
    #[cfg(feature = "http")]
    pub use crate::client::{TradeStreamClient, TradeStreamClientBuilder};
    #[cfg(feature = "http")]
    pub use crate::domain::chart::ApiChartFeed;
    #[cfg(feature = "http")]
    pub use crate::http::TradeHttp;
}
