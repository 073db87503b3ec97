//! In-process transport.
//!
//! `MemoryTransport` never touches the network. It records each request, keeps
//! the sink so callers can inject `Open`/`Message`/`Error` events, captures
//! frames written through the handle, and counts `close()` calls per
//! connection. Services and the chart layer are driven through it in tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::stream::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};

struct Connection {
    request: TransportRequest,
    sink: EventSink,
    sent: Vec<String>,
    close_calls: usize,
}

/// Transport whose connections are driven by the caller.
///
/// Clones share the same connection log.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far (closed ones included).
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Connections that have not been closed.
    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.close_calls == 0)
            .count()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.connections
            .lock()
            .iter()
            .map(|c| c.request.clone())
            .collect()
    }

    pub fn request(&self, index: usize) -> Option<TransportRequest> {
        self.connections.lock().get(index).map(|c| c.request.clone())
    }

    pub fn last_url(&self) -> Option<String> {
        self.connections.lock().last().map(|c| c.request.url.clone())
    }

    /// How many times `close()` was called on connection `index`.
    pub fn close_count(&self, index: usize) -> usize {
        self.connections.lock().get(index).map_or(0, |c| c.close_calls)
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.close_count(index) > 0
    }

    /// Frames written through connection `index`.
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.connections
            .lock()
            .get(index)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// Deliver `event` on connection `index`. Returns `false` if there is no
    /// such connection.
    pub fn emit(&self, index: usize, event: TransportEvent) -> bool {
        let sink = match self.connections.lock().get(index) {
            Some(c) => Arc::clone(&c.sink),
            None => return false,
        };
        sink(event);
        true
    }

    /// Deliver `event` on the most recently opened connection.
    pub fn emit_latest(&self, event: TransportEvent) -> bool {
        let latest = self.connection_count();
        latest > 0 && self.emit(latest - 1, event)
    }

    pub fn emit_open(&self) -> bool {
        self.emit_latest(TransportEvent::Open)
    }

    pub fn emit_message(&self, text: impl Into<String>) -> bool {
        self.emit_latest(TransportEvent::Message(text.into()))
    }

    pub fn emit_error(&self, reason: impl Into<String>) -> bool {
        self.emit_latest(TransportEvent::Error(reason.into()))
    }
}

impl Transport for MemoryTransport {
    fn open(&self, request: TransportRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, StreamError> {
        let mut connections = self.connections.lock();
        tracing::debug!("Memory transport opened connection {}: {}", connections.len(), request.url);
        connections.push(Connection {
            request,
            sink,
            sent: Vec::new(),
            close_calls: 0,
        });
        Ok(Box::new(MemoryHandle {
            index: connections.len() - 1,
            connections: Arc::clone(&self.connections),
        }))
    }
}

struct MemoryHandle {
    index: usize,
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl TransportHandle for MemoryHandle {
    fn send(&mut self, text: String) -> Result<(), StreamError> {
        let mut connections = self.connections.lock();
        match connections.get_mut(self.index) {
            Some(c) if c.close_calls == 0 => {
                c.sent.push(text);
                Ok(())
            }
            _ => Err(StreamError::SendFailed("Connection closed".into())),
        }
    }

    fn close(&mut self) {
        if let Some(c) = self.connections.lock().get_mut(self.index) {
            c.close_calls += 1;
        }
    }
}
