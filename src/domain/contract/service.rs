//! `ContractPriceService`: contract price stream driven by active requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ContractAction, ContractMessage, ContractPrice, ContractPriceRequest};
use crate::error::{AuthError, StreamError};
use crate::stream::{
    with_query, Access, ConnectionState, EndpointBuilder, HandlerId, StreamConfig, StreamService,
    TokenStore, Transport,
};

type Requests = Arc<Mutex<BTreeMap<String, ContractPriceRequest>>>;

/// `?action=contract_price` followed by each request's fields, in key order.
struct ContractEndpoint {
    requests: Requests,
}

impl EndpointBuilder for ContractEndpoint {
    fn endpoint(&self, base: &str) -> Option<String> {
        let requests = self.requests.lock();
        if requests.is_empty() {
            return None;
        }

        let mut pairs = vec![("action", ContractAction::ContractPrice.as_str().to_string())];
        for request in requests.values() {
            pairs.extend(request.query_pairs());
        }
        Some(with_query(base, &pairs))
    }
}

/// Live contract prices.
#[derive(Clone)]
pub struct ContractPriceService {
    service: StreamService<ContractMessage>,
    requests: Requests,
}

impl ContractPriceService {
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>, access: Access) -> Self {
        let requests: Requests = Arc::new(Mutex::new(BTreeMap::new()));
        let endpoint = ContractEndpoint {
            requests: Arc::clone(&requests),
        };
        Self {
            service: StreamService::new(config, transport, access, endpoint),
            requests,
        }
    }

    pub fn public(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(config, transport, Access::Public)
    }

    pub fn protected(config: StreamConfig, transport: Arc<dyn Transport>, token: TokenStore) -> Self {
        Self::new(config, transport, Access::Protected(token))
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Start (or replace) pricing for `request` and reconnect.
    pub fn request_price(&self, request: ContractPriceRequest) {
        let key = request.subscription_key();
        let replaced = self.requests.lock().insert(key.clone(), request.clone());

        match replaced {
            Some(previous) if previous.currency != request.currency => {
                tracing::warn!(
                    "Contract request {} replaced: currency {} -> {}",
                    key,
                    previous.currency,
                    request.currency
                );
            }
            Some(_) => tracing::debug!("Contract request {} refreshed", key),
            None => tracing::debug!("Contract request {} added", key),
        }
        self.service.restart();
    }

    /// Stop pricing `request`. Disconnects when nothing is left.
    pub fn cancel_price(&self, request: &ContractPriceRequest) {
        let key = request.subscription_key();
        let (removed, now_empty) = {
            let mut requests = self.requests.lock();
            let removed = requests.remove(&key).is_some();
            (removed, requests.is_empty())
        };
        if !removed {
            return;
        }

        tracing::debug!("Contract request {} cancelled", key);
        if now_empty {
            self.service.disconnect();
        } else {
            self.service.restart();
        }
    }

    /// Active requests in key order.
    pub fn active_requests(&self) -> Vec<ContractPriceRequest> {
        self.requests.lock().values().cloned().collect()
    }

    // ── Handlers ─────────────────────────────────────────────────────────

    pub fn on_price<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ContractPrice) + Send + Sync + 'static,
    {
        self.service.on(ContractAction::ContractPrice, move |message: &ContractMessage| {
            let ContractMessage::ContractPrice(price) = message;
            handler(price);
        })
    }

    pub fn off_price(&self, id: HandlerId) -> bool {
        self.service.off(ContractAction::ContractPrice, id)
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

    pub fn update_auth_token(&self, token: impl Into<String>) -> Result<(), AuthError> {
        self.service.update_auth_token(token)
    }

    pub fn state(&self) -> ConnectionState {
        self.service.state()
    }

    pub fn stream(&self) -> &StreamService<ContractMessage> {
        &self.service
    }
}
