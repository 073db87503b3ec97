//! Chart domain: history + live chart data with per-key stream sharing.
//!
//! - `wire.rs`: `ChartMessage` and its payloads (`msg_type` tagged)
//! - `feed.rs`: the `ChartFeed` collaborator: history fetch + live stream
//! - `subscriptions.rs`: `ChartSubscriptions`, one live stream per chart key
//! - `state.rs`: app-owned container folding messages into series

pub mod feed;
pub mod state;
pub mod subscriptions;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::InstrumentId;

pub use feed::{ChartFeed, ChartSink, LiveStream};
pub use state::ChartState;
pub use subscriptions::{ChartSubscription, ChartSubscriptions};
pub use wire::{Candle, ChartMessage, Tick, TickHistory};

#[cfg(feature = "http")]
pub use feed::ApiChartFeed;

// ─── ChartStyle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartStyle {
    Ticks,
    Candles,
}

impl ChartStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartStyle::Ticks => "ticks",
            ChartStyle::Candles => "candles",
        }
    }
}

impl fmt::Display for ChartStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ChartRequest ────────────────────────────────────────────────────────────

/// What a chart wants to display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartRequest {
    pub symbol: InstrumentId,
    pub style: ChartStyle,
    /// Candle width in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl ChartRequest {
    pub fn ticks(symbol: impl Into<InstrumentId>) -> Self {
        Self {
            symbol: symbol.into(),
            style: ChartStyle::Ticks,
            granularity: None,
            count: None,
            start: None,
            end: None,
        }
    }

    pub fn candles(symbol: impl Into<InstrumentId>, granularity: u32) -> Self {
        Self {
            style: ChartStyle::Candles,
            granularity: Some(granularity),
            ..Self::ticks(symbol)
        }
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn key(&self) -> ChartKey {
        ChartKey {
            symbol: self.symbol.clone(),
            style: self.style,
            granularity: self.granularity,
            count: self.count,
            start: self.start,
            end: self.end,
        }
    }

    /// REST query parameters for a history fetch.
    pub(crate) fn history_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("instrument_id", self.symbol.to_string())];
        let optional = [
            ("granularity", self.granularity.map(i64::from)),
            ("count", self.count.map(i64::from)),
            ("start", self.start),
            ("end", self.end),
        ];
        params.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v.to_string()))),
        );
        params
    }
}

// ─── ChartKey ────────────────────────────────────────────────────────────────

/// Identity of a chart subscription: `(symbol, style, granularity, count, start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChartKey {
    pub symbol: InstrumentId,
    pub style: ChartStyle,
    pub granularity: Option<u32>,
    pub count: Option<u32>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl fmt::Display for ChartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part<T: fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        write!(
            f,
            "{}-{}-{}-{}-{}-{}",
            self.symbol,
            self.style,
            part(&self.granularity),
            part(&self.count),
            part(&self.start),
            part(&self.end)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_covers_all_fields() {
        let a = ChartRequest::ticks("R_100");
        assert_eq!(a.key(), ChartRequest::ticks("R_100").key());
        assert_ne!(a.key(), a.clone().count(100).key());
        assert_ne!(a.key(), ChartRequest::candles("R_100", 60).key());
        assert_eq!(a.key().to_string(), "R_100-ticks----");
    }

    #[test]
    fn test_history_params() {
        let params = ChartRequest::candles("R_50", 60).count(500).end(1_700_000_000).history_params();
        assert_eq!(
            params,
            vec![
                ("instrument_id", "R_50".to_string()),
                ("granularity", "60".to_string()),
                ("count", "500".to_string()),
                ("end", "1700000000".to_string()),
            ]
        );
    }
}
