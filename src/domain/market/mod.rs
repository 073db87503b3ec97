//! Market price domain: live bid/ask quotes per instrument.

pub mod service;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::InstrumentId;
use crate::stream::MessageMap;

pub use service::MarketPriceService;

// ─── InstrumentPrice ─────────────────────────────────────────────────────────

/// One quote update for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPrice {
    pub instrument_id: InstrumentId,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl InstrumentPrice {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Messages received on a market price stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data")]
pub enum MarketMessage {
    #[serde(rename = "instrument_price")]
    InstrumentPrice(InstrumentPrice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketAction {
    InstrumentPrice,
}

impl MarketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketAction::InstrumentPrice => "instrument_price",
        }
    }
}

impl MessageMap for MarketMessage {
    type Action = MarketAction;

    fn action(&self) -> MarketAction {
        match self {
            MarketMessage::InstrumentPrice(_) => MarketAction::InstrumentPrice,
        }
    }

    fn parse_action(action: &str) -> Option<MarketAction> {
        match action {
            "instrument_price" => Some(MarketAction::InstrumentPrice),
            _ => None,
        }
    }
}
