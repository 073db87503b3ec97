//! Contract price domain: live proposal prices for contract parameters.

pub mod service;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::InstrumentId;
use crate::stream::MessageMap;

pub use service::ContractPriceService;

// ─── ContractPriceRequest ────────────────────────────────────────────────────

/// Parameters of a contract to be priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPriceRequest {
    /// Contract duration, e.g. `"1h"` or `"5t"`.
    pub duration: String,
    pub instrument: InstrumentId,
    /// e.g. `"CALL"`, `"PUT"`.
    pub trade_type: String,
    pub currency: String,
    pub payout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<String>,
}

impl ContractPriceRequest {
    pub fn new(
        duration: impl Into<String>,
        instrument: impl Into<InstrumentId>,
        trade_type: impl Into<String>,
        currency: impl Into<String>,
        payout: impl Into<String>,
    ) -> Self {
        Self {
            duration: duration.into(),
            instrument: instrument.into(),
            trade_type: trade_type.into(),
            currency: currency.into(),
            payout: payout.into(),
            strike: None,
        }
    }

    pub fn with_strike(mut self, strike: impl Into<String>) -> Self {
        self.strike = Some(strike.into());
        self
    }

    /// Canonical key: a JSON array of
    /// `[duration, instrument, trade_type, payout, strike]`.
    ///
    /// `currency` is not part of the key, so two requests that differ only in
    /// currency replace each other.
    pub fn subscription_key(&self) -> String {
        contract_key(
            &self.duration,
            &self.instrument,
            &self.trade_type,
            &self.payout,
            self.strike.as_deref(),
        )
    }

    /// Query pairs for this request, in wire order.
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("duration", self.duration.clone()),
            ("instrument", self.instrument.to_string()),
            ("trade_type", self.trade_type.clone()),
            ("currency", self.currency.clone()),
            ("payout", self.payout.clone()),
        ];
        if let Some(strike) = &self.strike {
            pairs.push(("strike", strike.clone()));
        }
        pairs
    }
}

// ─── ContractPrice ───────────────────────────────────────────────────────────

/// Price update for one requested contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPrice {
    pub duration: String,
    pub instrument: InstrumentId,
    pub trade_type: String,
    #[serde(default)]
    pub currency: String,
    pub payout: String,
    #[serde(default)]
    pub strike: Option<String>,
    /// Cost of buying the contract.
    pub price: Decimal,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl ContractPrice {
    /// Key of the request this update answers.
    pub fn subscription_key(&self) -> String {
        contract_key(
            &self.duration,
            &self.instrument,
            &self.trade_type,
            &self.payout,
            self.strike.as_deref(),
        )
    }
}

/// JSON quoting keeps field boundaries intact whatever the fields contain.
fn contract_key(
    duration: &str,
    instrument: &InstrumentId,
    trade_type: &str,
    payout: &str,
    strike: Option<&str>,
) -> String {
    serde_json::json!([duration, instrument.to_string(), trade_type, payout, strike]).to_string()
}

// ─── ContractReplay ──────────────────────────────────────────────────────────

/// One spot quote of a contract's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPoint {
    pub epoch: i64,
    pub quote: Decimal,
}

/// Spot history of a settled or open contract, from the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReplay {
    pub contract_id: String,
    pub instrument: InstrumentId,
    #[serde(default)]
    pub entry_spot: Option<Decimal>,
    #[serde(default)]
    pub exit_spot: Option<Decimal>,
    #[serde(default)]
    pub ticks: Vec<ReplayPoint>,
}

impl ContractReplay {
    /// Whether the contract has an exit spot, i.e. has been settled.
    pub fn is_settled(&self) -> bool {
        self.exit_spot.is_some()
    }

    /// Spot movement from entry to exit, when both are known.
    pub fn spot_change(&self) -> Option<Decimal> {
        Some(self.exit_spot? - self.entry_spot?)
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Messages received on a contract price stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data")]
pub enum ContractMessage {
    #[serde(rename = "contract_price")]
    ContractPrice(ContractPrice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractAction {
    ContractPrice,
}

impl ContractAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractAction::ContractPrice => "contract_price",
        }
    }
}

impl MessageMap for ContractMessage {
    type Action = ContractAction;

    fn action(&self) -> ContractAction {
        match self {
            ContractMessage::ContractPrice(_) => ContractAction::ContractPrice,
        }
    }

    fn parse_action(action: &str) -> Option<ContractAction> {
        match action {
            "contract_price" => Some(ContractAction::ContractPrice),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_excludes_currency() {
        let usd = ContractPriceRequest::new("1h", "R_100", "CALL", "USD", "100");
        let eur = ContractPriceRequest {
            currency: "EUR".into(),
            ..usd.clone()
        };
        assert_eq!(usd.subscription_key(), r#"["1h","R_100","CALL","100",null]"#);
        assert_eq!(usd.subscription_key(), eur.subscription_key());
        assert_ne!(
            usd.subscription_key(),
            usd.clone().with_strike("+0.5").subscription_key()
        );
    }

    #[test]
    fn test_key_fields_cannot_bleed_into_each_other() {
        let a = ContractPriceRequest::new("1|h", "R_100", "CALL", "USD", "100");
        let b = ContractPriceRequest::new("1", "h|R_100", "CALL", "USD", "100");
        assert_ne!(a.subscription_key(), b.subscription_key());

        let empty_strike = a.clone().with_strike("");
        assert_ne!(a.subscription_key(), empty_strike.subscription_key());
    }

    #[test]
    fn test_price_key_matches_request_key() {
        let json = r#"{
            "action": "contract_price",
            "data": {
                "duration": "1h", "instrument": "R_100", "trade_type": "CALL",
                "currency": "USD", "payout": "100", "price": "52.35", "timestamp": 1
            }
        }"#;
        let ContractMessage::ContractPrice(price) = serde_json::from_str(json).unwrap();
        let request = ContractPriceRequest::new("1h", "R_100", "CALL", "USD", "100");
        assert_eq!(price.subscription_key(), request.subscription_key());
    }

    #[test]
    fn test_replay_open_contract() {
        let json = r#"{
            "contract_id": "c-1", "instrument": "R_100", "entry_spot": "100.5",
            "ticks": [{"epoch": 1, "quote": "100.5"}, {"epoch": 2, "quote": "101"}]
        }"#;
        let replay: ContractReplay = serde_json::from_str(json).unwrap();
        assert!(!replay.is_settled());
        assert_eq!(replay.spot_change(), None);
        assert_eq!(replay.ticks.len(), 2);

        let settled = ContractReplay {
            exit_spot: Some(Decimal::new(1020, 1)),
            ..replay
        };
        assert_eq!(settled.spot_change(), Some(Decimal::new(15, 1)));
    }

    #[test]
    fn test_query_pairs_strike_last() {
        let pairs = ContractPriceRequest::new("5t", "R_50", "PUT", "USD", "10")
            .with_strike("100")
            .query_pairs();
        assert_eq!(pairs.first().map(|p| p.0), Some("duration"));
        assert_eq!(pairs.last(), Some(&("strike", "100".to_string())));
    }
}
