//! `MarketPriceService`: instrument price stream driven by a subscription set.
//!
//! Every subscription change recycles the connection so the endpoint, rebuilt
//! from the current set, carries exactly the subscribed instruments. With an
//! empty set no transport is opened.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{InstrumentPrice, MarketAction, MarketMessage};
use crate::error::StreamError;
use crate::shared::InstrumentId;
use crate::stream::{
    with_query, Access, ConnectionState, EndpointBuilder, HandlerId, StreamConfig, StreamService,
    TokenStore, Transport,
};

type Subscriptions = Arc<Mutex<BTreeSet<InstrumentId>>>;

/// `?action=instrument_price&instrument_id=A&instrument_id=B`, sorted by id.
struct InstrumentEndpoint {
    subscriptions: Subscriptions,
}

impl EndpointBuilder for InstrumentEndpoint {
    fn endpoint(&self, base: &str) -> Option<String> {
        let subscriptions = self.subscriptions.lock();
        if subscriptions.is_empty() {
            return None;
        }

        let mut pairs = vec![("action", MarketAction::InstrumentPrice.as_str().to_string())];
        pairs.extend(
            subscriptions
                .iter()
                .map(|id| ("instrument_id", id.as_str().to_string())),
        );
        Some(with_query(base, &pairs))
    }
}

/// Live instrument prices.
#[derive(Clone)]
pub struct MarketPriceService {
    service: StreamService<MarketMessage>,
    subscriptions: Subscriptions,
}

impl MarketPriceService {
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>, access: Access) -> Self {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(BTreeSet::new()));
        let endpoint = InstrumentEndpoint {
            subscriptions: Arc::clone(&subscriptions),
        };
        Self {
            service: StreamService::new(config, transport, access, endpoint),
            subscriptions,
        }
    }

    pub fn public(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(config, transport, Access::Public)
    }

    pub fn protected(config: StreamConfig, transport: Arc<dyn Transport>, token: TokenStore) -> Self {
        Self::new(config, transport, Access::Protected(token))
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Add `instrument` and reconnect with the enlarged set.
    ///
    /// Subscribing to an instrument that is already in the set only makes
    /// sure the stream is connected.
    pub fn subscribe_to_price(&self, instrument: impl Into<InstrumentId>) {
        let instrument = instrument.into();
        let added = self.subscriptions.lock().insert(instrument.clone());
        if added {
            tracing::debug!("Subscribed to price: {}", instrument);
            self.service.restart();
        } else {
            self.service.connect();
        }
    }

    /// Remove `instrument`. Disconnects when nothing is left, otherwise
    /// reconnects with the reduced set. Unknown instruments are ignored.
    pub fn unsubscribe_from_price(&self, instrument: &InstrumentId) {
        let (removed, now_empty) = {
            let mut subscriptions = self.subscriptions.lock();
            let removed = subscriptions.remove(instrument);
            (removed, subscriptions.is_empty())
        };
        if !removed {
            return;
        }

        tracing::debug!("Unsubscribed from price: {}", instrument);
        if now_empty {
            self.service.disconnect();
        } else {
            self.service.restart();
        }
    }

    pub fn subscriptions(&self) -> Vec<InstrumentId> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, instrument: &InstrumentId) -> bool {
        self.subscriptions.lock().contains(instrument)
    }

    // ── Handlers ─────────────────────────────────────────────────────────

    pub fn on_price<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&InstrumentPrice) + Send + Sync + 'static,
    {
        self.service.on(MarketAction::InstrumentPrice, move |message: &MarketMessage| {
            let MarketMessage::InstrumentPrice(price) = message;
            handler(price);
        })
    }

    pub fn off_price(&self, id: HandlerId) -> bool {
        self.service.off(MarketAction::InstrumentPrice, id)
    }

    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.service.on_error(handler)
    }

    pub fn off_error(&self, id: HandlerId) -> bool {
        self.service.off_error(id)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn connect(&self) {
        self.service.connect();
    }

    pub fn disconnect(&self) {
        self.service.disconnect();
    }

    pub fn update_auth_token(&self, token: impl Into<String>) -> Result<(), crate::error::AuthError> {
        self.service.update_auth_token(token)
    }

    pub fn state(&self) -> ConnectionState {
        self.service.state()
    }

    /// The underlying managed connection.
    pub fn stream(&self) -> &StreamService<MarketMessage> {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryTransport;

    fn service() -> (MarketPriceService, MemoryTransport) {
        let transport = MemoryTransport::new();
        let config = StreamConfig {
            base_url: "https://stream.test".into(),
            ..Default::default()
        };
        (MarketPriceService::public(config, Arc::new(transport.clone())), transport)
    }

    #[tokio::test]
    async fn test_no_subscriptions_no_transport() {
        let (service, transport) = service();
        service.connect();
        assert_eq!(transport.connection_count(), 0);

        service.subscribe_to_price("R_100");
        assert_eq!(transport.connection_count(), 1);
        assert_eq!(
            transport.last_url().as_deref(),
            Some("https://stream.test/v1/stream/public?action=instrument_price&instrument_id=R_100")
        );
    }

    #[tokio::test]
    async fn test_subscription_changes_recycle_connection() {
        let (service, transport) = service();
        service.subscribe_to_price("R_50");
        service.subscribe_to_price("R_10");
        assert_eq!(transport.connection_count(), 2);
        assert_eq!(transport.close_count(0), 1);
        assert!(transport
            .last_url()
            .unwrap()
            .ends_with("instrument_id=R_10&instrument_id=R_50"));

        service.subscribe_to_price("R_10");
        assert_eq!(transport.connection_count(), 2);

        service.unsubscribe_from_price(&InstrumentId::from("R_10"));
        assert_eq!(transport.connection_count(), 3);
        assert!(transport.last_url().unwrap().ends_with("instrument_id=R_50"));

        service.unsubscribe_from_price(&InstrumentId::from("R_75"));
        assert_eq!(transport.connection_count(), 3);

        service.unsubscribe_from_price(&InstrumentId::from("R_50"));
        assert_eq!(transport.open_connections(), 0);
        assert_eq!(service.state(), ConnectionState::Disconnected);
        assert!(service.subscriptions().is_empty());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_subscribe_off_runtime_reports_error() {
        let config = StreamConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        let service = MarketPriceService::public(config, Arc::new(crate::stream::sse::SseTransport::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        service.on_error(move |e: &StreamError| sink.lock().push(e.clone()));

        service.subscribe_to_price("R_100");
        assert_eq!(*errors.lock(), vec![StreamError::NoRuntime]);
        assert_eq!(service.state(), ConnectionState::Disconnected);
        assert!(service.is_subscribed(&InstrumentId::from("R_100")));
    }

    #[tokio::test]
    async fn test_on_price_receives_quotes() {
        let (service, transport) = service();
        let prices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&prices);
        let id = service.on_price(move |p: &InstrumentPrice| sink.lock().push(p.instrument_id.clone()));

        service.subscribe_to_price("R_100");
        transport.emit_open();
        transport.emit_message(
            r#"{"action":"instrument_price","data":{"instrument_id":"R_100","bid":"1","ask":"2","timestamp":1}}"#,
        );
        assert_eq!(*prices.lock(), vec![InstrumentId::from("R_100")]);

        assert!(service.off_price(id));
        transport.emit_message(
            r#"{"action":"instrument_price","data":{"instrument_id":"R_100","bid":"1","ask":"2","timestamp":2}}"#,
        );
        assert_eq!(prices.lock().len(), 1);
    }
}
