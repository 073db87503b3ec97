//! Domain modules organized as vertical slices.
//!
//! - `market`: instrument prices, one stream per subscription set
//! - `contract`: contract prices keyed by request parameters, plus replays
//! - `chart`: tick/candle history and live data, shared per chart key
//!
//! Each slice keeps its message types in `mod.rs` (or `wire.rs`) and its
//! stream wrapper in `service.rs` (or `subscriptions.rs`).

pub mod chart;
pub mod contract;
pub mod market;
