//! Message maps, handler registries, and envelope decoding.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StreamError, TransportKind};
use crate::stream::sse::extract_json;

/// Closed set of messages a stream can receive.
///
/// Implemented by an enum deserialized from the `{"action": ..., "data": ...}`
/// envelope, typically with `#[serde(tag = "action", content = "data")]`.
pub trait MessageMap: DeserializeOwned + Send + Sync + 'static {
    /// Field-less mirror of the enum, used as the handler key.
    type Action: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn action(&self) -> Self::Action;

    /// Map a wire action name to its key. `None` for actions this map does not know.
    fn parse_action(action: &str) -> Option<Self::Action>;
}

/// Identifies a registered callback so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub type MessageHandler<M> = Arc<dyn Fn(&M) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;

// ─── Registry ────────────────────────────────────────────────────────────────

/// Per-action message handlers plus the error and open handler lists.
///
/// Lookups return cloned handler lists so callers can invoke them after
/// releasing whatever lock guards the registry.
pub(crate) struct HandlerRegistry<M: MessageMap> {
    messages: HashMap<M::Action, Vec<(HandlerId, MessageHandler<M>)>>,
    errors: Vec<(HandlerId, ErrorHandler)>,
    opens: Vec<(HandlerId, OpenHandler)>,
}

impl<M: MessageMap> Default for HandlerRegistry<M> {
    fn default() -> Self {
        Self {
            messages: HashMap::new(),
            errors: Vec::new(),
            opens: Vec::new(),
        }
    }
}

impl<M: MessageMap> HandlerRegistry<M> {
    pub fn on(&mut self, action: M::Action, handler: MessageHandler<M>) -> HandlerId {
        let id = HandlerId::next();
        self.messages.entry(action).or_default().push((id, handler));
        id
    }

    pub fn off(&mut self, action: M::Action, id: HandlerId) -> bool {
        let Some(list) = self.messages.get_mut(&action) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.messages.remove(&action);
        }
        removed
    }

    pub fn on_error(&mut self, handler: ErrorHandler) -> HandlerId {
        let id = HandlerId::next();
        self.errors.push((id, handler));
        id
    }

    pub fn off_error(&mut self, id: HandlerId) -> bool {
        remove(&mut self.errors, id)
    }

    pub fn on_open(&mut self, handler: OpenHandler) -> HandlerId {
        let id = HandlerId::next();
        self.opens.push((id, handler));
        id
    }

    pub fn off_open(&mut self, id: HandlerId) -> bool {
        remove(&mut self.opens, id)
    }

    pub fn message_handlers(&self, action: M::Action) -> Vec<MessageHandler<M>> {
        self.messages
            .get(&action)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub fn error_handlers(&self) -> Vec<ErrorHandler> {
        self.errors.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn open_handlers(&self) -> Vec<OpenHandler> {
        self.opens.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn handler_count(&self, action: M::Action) -> usize {
        self.messages.get(&action).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.errors.clear();
        self.opens.clear();
    }
}

fn remove<H>(list: &mut Vec<(HandlerId, H)>, id: HandlerId) -> bool {
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// Outcome of decoding one inbound payload.
#[derive(Debug)]
pub(crate) enum Decoded<M> {
    Message(M),
    Error(StreamError),
    /// Well-formed envelope with an action this map does not handle.
    Ignored,
}

/// Decode a payload (raw JSON or SSE `data:` framed) into `M`.
pub(crate) fn decode<M: MessageMap>(payload: &str, kind: TransportKind) -> Decoded<M> {
    let json = extract_json(payload);
    let value: Value = match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(e) => {
            return Decoded::Error(StreamError::Parse {
                kind,
                detail: e.to_string(),
            })
        }
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Decoded::Error(StreamError::Protocol(error_text(error)));
    }

    let action = match value.get("action").and_then(Value::as_str) {
        Some(name) => match M::parse_action(name) {
            Some(action) => action,
            None => {
                tracing::debug!("Dropping {} message with unknown action: {}", kind, name);
                return Decoded::Ignored;
            }
        },
        None => {
            return Decoded::Error(StreamError::Parse {
                kind,
                detail: "missing \"action\" field".into(),
            })
        }
    };

    match serde_json::from_value::<M>(value) {
        Ok(message) => Decoded::Message(message),
        Err(e) => Decoded::Error(StreamError::Parse {
            kind,
            detail: format!("{:?}: {}", action, e),
        }),
    }
}

/// `"text"`, `{"error": "text"}` or `{"message": "text"}`.
fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(tag = "action", content = "data", rename_all = "snake_case")]
    enum TestMessage {
        Tick { quote: f64 },
        Heartbeat,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestAction {
        Tick,
        Heartbeat,
    }

    impl MessageMap for TestMessage {
        type Action = TestAction;

        fn action(&self) -> TestAction {
            match self {
                TestMessage::Tick { .. } => TestAction::Tick,
                TestMessage::Heartbeat => TestAction::Heartbeat,
            }
        }

        fn parse_action(action: &str) -> Option<TestAction> {
            match action {
                "tick" => Some(TestAction::Tick),
                "heartbeat" => Some(TestAction::Heartbeat),
                _ => None,
            }
        }
    }

    #[test]
    fn test_decode_framed_message() {
        let decoded = decode::<TestMessage>(
            "data: {\"action\":\"tick\",\"data\":{\"quote\":1.5}}",
            TransportKind::Sse,
        );
        assert!(matches!(decoded, Decoded::Message(TestMessage::Tick { quote }) if quote == 1.5));
    }

    #[test]
    fn test_decode_not_json_is_parse_error() {
        let decoded = decode::<TestMessage>("not json", TransportKind::Sse);
        match decoded {
            Decoded::Error(StreamError::Parse { kind, .. }) => assert_eq!(kind, TransportKind::Sse),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_envelopes() {
        for payload in [
            r#"{"error":"bad"}"#,
            r#"{"error":{"error":"bad"}}"#,
            r#"{"error":{"message":"bad"}}"#,
        ] {
            match decode::<TestMessage>(payload, TransportKind::WebSocket) {
                Decoded::Error(StreamError::Protocol(text)) => assert_eq!(text, "bad"),
                other => panic!("expected protocol error for {payload}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_unknown_action_ignored() {
        let decoded = decode::<TestMessage>(r#"{"action":"other","data":{}}"#, TransportKind::Sse);
        assert!(matches!(decoded, Decoded::Ignored));
    }

    #[test]
    fn test_decode_bad_data_is_parse_error() {
        let decoded = decode::<TestMessage>(r#"{"action":"tick","data":{"quote":"x"}}"#, TransportKind::Sse);
        assert!(matches!(decoded, Decoded::Error(StreamError::Parse { .. })));
        let decoded = decode::<TestMessage>(r#"{"data":{}}"#, TransportKind::Sse);
        assert!(matches!(decoded, Decoded::Error(StreamError::Parse { .. })));
    }

    #[test]
    fn test_registry_fan_out_in_order_and_off() {
        let mut registry = HandlerRegistry::<TestMessage>::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let first = registry.on(TestAction::Tick, Arc::new(move |_: &TestMessage| s1.lock().push(1)));
        let s2 = Arc::clone(&seen);
        registry.on(TestAction::Tick, Arc::new(move |_: &TestMessage| s2.lock().push(2)));

        let message = TestMessage::Tick { quote: 1.0 };
        for handler in registry.message_handlers(TestAction::Tick) {
            handler(&message);
        }
        assert_eq!(*seen.lock(), vec![1, 2]);

        assert!(registry.off(TestAction::Tick, first));
        assert!(!registry.off(TestAction::Tick, first));
        assert_eq!(registry.handler_count(TestAction::Tick), 1);
        assert!(registry.message_handlers(TestAction::Heartbeat).is_empty());
    }

    #[test]
    fn test_registry_clear() {
        let mut registry = HandlerRegistry::<TestMessage>::default();
        registry.on(TestAction::Heartbeat, Arc::new(|_: &TestMessage| {}));
        let id = registry.on_error(Arc::new(|_: &StreamError| {}));
        registry.on_open(Arc::new(|| {}));
        registry.clear();
        assert_eq!(registry.handler_count(TestAction::Heartbeat), 0);
        assert!(registry.error_handlers().is_empty());
        assert!(registry.open_handlers().is_empty());
        assert!(!registry.off_error(id));
    }
}
