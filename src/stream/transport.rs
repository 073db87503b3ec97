//! Transport primitive: the seam between connection management and I/O.
//!
//! A [`Transport`] opens one connection per call and reports what happens on it
//! through an [`EventSink`]. Implementations never block the caller: network I/O
//! runs on a spawned Tokio task and the returned [`TransportHandle`] is the only
//! way to write to or close that connection. Opening fails only when there is
//! nowhere to run that task.

use std::sync::Arc;

use crate::error::{StreamError, TransportKind};

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A text payload arrived (SSE `data` field or a WebSocket text frame).
    Message(String),
    /// The connection failed or was closed by the peer.
    Error(String),
}

/// Callback receiving the events of a single connection.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Everything a transport needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub kind: TransportKind,
    pub url: String,
    /// Extra request headers (SSE bearer auth lives here).
    pub headers: Vec<(String, String)>,
    /// WebSocket sub-protocols (e.g. `Bearer.<token>`).
    pub protocols: Vec<String>,
}

impl TransportRequest {
    pub fn new(kind: TransportKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            headers: Vec::new(),
            protocols: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Look up a header value (case-insensitive name match).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Opens connections. Shared between services, so implementations are `Send + Sync`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, request: TransportRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, StreamError>;
}

/// Write side and lifetime of one opened connection.
pub trait TransportHandle: Send {
    /// Write a text payload. SSE transports are read-only and reject this.
    fn send(&mut self, text: String) -> Result<(), StreamError>;

    /// Close the connection. Calling it more than once has no further effect.
    fn close(&mut self);
}
