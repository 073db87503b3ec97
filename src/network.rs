//! Network URL constants for the tradestream SDK.

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.tradestream.dev";

/// Default SSE streaming base URL.
pub const DEFAULT_STREAM_URL: &str = "https://stream.tradestream.dev";

/// Default WebSocket base URL.
pub const DEFAULT_WS_URL: &str = "wss://ws.tradestream.dev";

/// Path appended to the streaming base URL for unauthenticated streams.
pub const PUBLIC_PATH: &str = "/v1/stream/public";

/// Path appended to the streaming base URL for bearer-authenticated streams.
pub const PROTECTED_PATH: &str = "/v1/stream/protected";
