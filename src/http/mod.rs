//! HTTP layer: `TradeHttp` plus the retry settings shared with stream
//! reconnection.

#[cfg(feature = "http")]
pub mod client;
pub mod retry;

#[cfg(feature = "http")]
pub use client::TradeHttp;
pub use retry::{RetryConfig, RetryPolicy};
