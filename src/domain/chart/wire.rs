//! Wire types for chart data (REST history and live SSE).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ChartStyle;
use crate::shared::InstrumentId;

/// One OHLC candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time, epoch seconds.
    pub epoch: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Parallel arrays of tick quotes and their times.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickHistory {
    pub prices: Vec<Decimal>,
    pub times: Vec<i64>,
}

/// One live tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub epoch: i64,
    pub quote: Decimal,
    pub symbol: InstrumentId,
}

impl Tick {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// REST response of the candles endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CandlesResponse {
    #[serde(default)]
    pub candles: Vec<Candle>,
}

/// Chart payload delivered to subscribers, tagged by `msg_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type")]
pub enum ChartMessage {
    #[serde(rename = "candles")]
    Candles { candles: Vec<Candle> },
    #[serde(rename = "history")]
    History { history: TickHistory },
    #[serde(rename = "ohlc")]
    Ohlc { ohlc: Candle },
    #[serde(rename = "tick")]
    Tick { tick: Tick },
}

impl ChartMessage {
    /// Empty history of the shape `style` expects. Sent when a fetch fails.
    pub fn empty_for(style: ChartStyle) -> Self {
        match style {
            ChartStyle::Candles => ChartMessage::Candles {
                candles: Vec::new(),
            },
            ChartStyle::Ticks => ChartMessage::History {
                history: TickHistory::default(),
            },
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            ChartMessage::Candles { .. } => "candles",
            ChartMessage::History { .. } => "history",
            ChartMessage::Ohlc { .. } => "ohlc",
            ChartMessage::Tick { .. } => "tick",
        }
    }

    /// Whether this is a history snapshot rather than a live update.
    pub fn is_history(&self) -> bool {
        matches!(self, ChartMessage::Candles { .. } | ChartMessage::History { .. })
    }
}
