//! `StreamService`: one managed streaming connection.
//!
//! Owns a single transport at a time and drives it through
//! `Disconnected → Connecting → Open`:
//! - `connect()` asks the [`EndpointBuilder`] for a URL, applies credentials and
//!   opens the transport; it is a no-op while a transport exists
//! - `Open` resets the reconnect counter
//! - `Message` payloads are decoded into the service's [`MessageMap`] and fanned
//!   out to the handlers registered for that action
//! - `Error` schedules exactly one reconnect until the attempt cap is reached,
//!   then tears the connection down with `StreamError::ConnectionExhausted`
//!
//! Every opened transport gets a generation number. Events and timers from a
//! superseded generation are ignored, so a late reconnect can never revive a
//! service that was disconnected in the meantime.
//!
//! Handlers are invoked after internal locks are released; a handler may call
//! back into the service.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{AuthError, StreamError, TransportKind};
use crate::stream::access::{Access, TokenStore};
use crate::stream::endpoint::{with_query, EndpointBuilder};
use crate::stream::handlers::{decode, Decoded, HandlerId, HandlerRegistry, MessageMap};
use crate::stream::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};
use crate::stream::{ConnectionState, StreamConfig, WsAuth};

// ─── Connection state ────────────────────────────────────────────────────────

#[derive(Default)]
struct Connection {
    status: ConnectionState,
    generation: u64,
    handle: Option<Box<dyn TransportHandle>>,
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    current_url: Option<String>,
    destroyed: bool,
}

struct Inner<M: MessageMap> {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    endpoint: Box<dyn EndpointBuilder>,
    access: Access,
    handlers: Mutex<HandlerRegistry<M>>,
    conn: Mutex<Connection>,
}

// ─── Public StreamService ────────────────────────────────────────────────────

/// Managed connection for message map `M`.
///
/// Cheap to clone; clones control the same connection. The connection is
/// closed when the last clone is dropped.
pub struct StreamService<M: MessageMap> {
    inner: Arc<Inner<M>>,
}

impl<M: MessageMap> Clone for StreamService<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: MessageMap> StreamService<M> {
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        access: Access,
        endpoint: impl EndpointBuilder,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                endpoint: Box::new(endpoint),
                access,
                handlers: Mutex::new(HandlerRegistry::default()),
                conn: Mutex::new(Connection::default()),
            }),
        }
    }

    /// Service on the public channel.
    pub fn public(config: StreamConfig, transport: Arc<dyn Transport>, endpoint: impl EndpointBuilder) -> Self {
        Self::new(config, transport, Access::Public, endpoint)
    }

    /// Service on the protected channel, authenticated with `token`.
    pub fn protected(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        token: TokenStore,
        endpoint: impl EndpointBuilder,
    ) -> Self {
        Self::new(config, transport, Access::Protected(token), endpoint)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Open a transport unless one exists, a connect is in flight, the service
    /// was destroyed, or the endpoint builder has nothing to stream.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Cancel any pending reconnect, close the transport and reset the
    /// reconnect counter. Handlers stay registered.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// `disconnect()` then `connect()`, rebuilding the endpoint.
    pub fn restart(&self) {
        self.inner.disconnect();
        self.inner.connect();
    }

    /// Disconnect, drop every handler, and refuse future connects.
    pub fn destroy(&self) {
        self.inner.conn.lock().destroyed = true;
        self.inner.disconnect();
        self.inner.handlers.lock().clear();
        tracing::debug!("{} stream destroyed", self.inner.config.kind);
    }

    /// Replace the bearer token. If a transport exists it is recycled so the
    /// new token takes effect; otherwise the next `connect()` picks it up.
    pub fn update_auth_token(&self, token: impl Into<String>) -> Result<(), AuthError> {
        let Access::Protected(store) = &self.inner.access else {
            return Err(AuthError::PublicChannel);
        };
        store.set(token)?;

        let has_transport = self.inner.conn.lock().handle.is_some();
        if has_transport {
            tracing::info!("Auth token updated, reconnecting {} stream", self.inner.config.kind);
            self.restart();
        }
        Ok(())
    }

    // ── Handlers ─────────────────────────────────────────────────────────

    pub fn on<F>(&self, action: M::Action, handler: F) -> HandlerId
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on(action, Arc::new(handler))
    }

    pub fn off(&self, action: M::Action, id: HandlerId) -> bool {
        self.inner.handlers.lock().off(action, id)
    }

    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_error(Arc::new(handler))
    }

    pub fn off_error(&self, id: HandlerId) -> bool {
        self.inner.handlers.lock().off_error(id)
    }

    pub fn on_open<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_open(Arc::new(handler))
    }

    pub fn off_open(&self, id: HandlerId) -> bool {
        self.inner.handlers.lock().off_open(id)
    }

    pub fn handler_count(&self, action: M::Action) -> usize {
        self.inner.handlers.lock().handler_count(action)
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Write `{"action": action, "data": data}` to the open transport.
    ///
    /// Failures are routed to the error handlers as well as returned.
    pub fn send<T: Serialize>(&self, action: &str, data: &T) -> Result<(), StreamError> {
        #[derive(Serialize)]
        struct Envelope<'a, T> {
            action: &'a str,
            data: &'a T,
        }

        let result = serde_json::to_string(&Envelope { action, data })
            .map_err(|e| StreamError::SendFailed(e.to_string()))
            .and_then(|text| {
                let mut conn = self.inner.conn.lock();
                let open = conn.status == ConnectionState::Open;
                let sent = match conn.handle.as_mut() {
                    Some(handle) if open => handle.send(text),
                    _ => Err(StreamError::NotConnected {
                        kind: self.inner.config.kind,
                    }),
                };
                sent
            });

        if let Err(e) = &result {
            self.inner.emit_error(e.clone());
        }
        result
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.conn.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Errors since the last `Open` (or explicit disconnect).
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.conn.lock().reconnect_attempts
    }

    /// URL of the most recently opened transport.
    pub fn current_url(&self) -> Option<String> {
        self.inner.conn.lock().current_url.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.conn.lock().destroyed
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.config.kind
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }
}

// ─── Connection management ───────────────────────────────────────────────────

enum AfterError {
    Retry { attempt: u32 },
    Exhausted { attempts: u32 },
    /// The reconnect timer could not be scheduled.
    Stranded(StreamError),
}

impl<M: MessageMap> Inner<M> {
    fn connect(self: &Arc<Self>) {
        let kind = self.config.kind;
        let (request, generation) = {
            let mut conn = self.conn.lock();
            if conn.destroyed {
                tracing::debug!("Ignoring connect on destroyed {} stream", kind);
                return;
            }
            if conn.status == ConnectionState::Connecting || conn.handle.is_some() {
                return;
            }

            let base = self.config.channel_url(self.access.is_protected());
            let Some(url) = self.endpoint.endpoint(&base) else {
                tracing::debug!("Nothing to stream on {}, not connecting", base);
                return;
            };

            if let Some(timer) = conn.reconnect_timer.take() {
                timer.abort();
            }
            conn.generation += 1;
            conn.status = ConnectionState::Connecting;

            tracing::info!("Connecting {} stream: {}", kind, base);
            let request = self.build_request(url);
            conn.current_url = Some(request.url.clone());
            (request, conn.generation)
        };

        let handle = match self.transport.open(request, self.sink(generation)) {
            Ok(handle) => handle,
            Err(e) => {
                {
                    let mut conn = self.conn.lock();
                    if conn.generation == generation {
                        conn.status = ConnectionState::Disconnected;
                    }
                }
                tracing::error!("Failed to open {} stream: {}", kind, e);
                self.emit_error(e);
                return;
            }
        };

        let mut conn = self.conn.lock();
        if conn.generation == generation && !conn.destroyed {
            conn.handle = Some(handle);
        } else {
            drop(conn);
            let mut handle = handle;
            handle.close();
        }
    }

    fn build_request(&self, url: String) -> TransportRequest {
        let kind = self.config.kind;
        let Some(token) = self.access.token() else {
            return TransportRequest::new(kind, url);
        };

        match (kind, self.config.ws_auth) {
            (TransportKind::Sse, _) => {
                TransportRequest::new(kind, url).header("Authorization", format!("Bearer {}", token))
            }
            (TransportKind::WebSocket, WsAuth::QueryParam) => TransportRequest::new(
                kind,
                with_query(&url, &[("Authorization", format!("Bearer {}", token))]),
            ),
            (TransportKind::WebSocket, WsAuth::SubProtocol) => {
                TransportRequest::new(kind, url).protocol(format!("Bearer.{}", token))
            }
        }
    }

    fn sink(self: &Arc<Self>, generation: u64) -> EventSink {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: TransportEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(generation, event);
            }
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        let conn = self.conn.lock();
        conn.generation == generation && !conn.destroyed
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        if !self.is_current(generation) {
            tracing::debug!("Ignoring event from superseded {} connection", self.config.kind);
            return;
        }

        match event {
            TransportEvent::Open => self.handle_open(generation),
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Error(reason) => self.handle_error(generation, reason),
        }
    }

    fn handle_open(&self, generation: u64) {
        {
            let mut conn = self.conn.lock();
            if conn.generation != generation {
                return;
            }
            conn.status = ConnectionState::Open;
            conn.reconnect_attempts = 0;
        }
        tracing::info!("{} stream open", self.config.kind);

        let handlers = self.handlers.lock().open_handlers();
        for handler in handlers {
            handler();
        }
    }

    fn handle_message(&self, text: &str) {
        match decode::<M>(text, self.config.kind) {
            Decoded::Message(message) => {
                let handlers = self.handlers.lock().message_handlers(message.action());
                for handler in handlers {
                    handler(&message);
                }
            }
            Decoded::Error(err) => {
                tracing::warn!("{}", err);
                self.emit_error(err);
            }
            Decoded::Ignored => {}
        }
    }

    fn handle_error(self: &Arc<Self>, generation: u64, reason: String) {
        let kind = self.config.kind;
        let outcome = {
            let mut conn = self.conn.lock();
            if conn.generation != generation {
                return;
            }
            conn.status = ConnectionState::Disconnected;
            conn.reconnect_attempts += 1;
            let attempt = conn.reconnect_attempts;

            if attempt >= self.config.reconnect_attempts {
                AfterError::Exhausted { attempts: attempt }
            } else {
                let delay = self.config.reconnect_policy.delay_for(attempt);
                tracing::info!(
                    "{} stream error, reconnecting in {:?} (attempt {}/{})",
                    kind,
                    delay,
                    attempt,
                    self.config.reconnect_attempts
                );

                let weak = Arc::downgrade(self);
                if let Some(timer) = conn.reconnect_timer.take() {
                    timer.abort();
                }
                let timer = self.config.spawner.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.reconnect_now(generation);
                    }
                });
                match timer {
                    Ok(timer) => {
                        conn.reconnect_timer = Some(timer);
                        AfterError::Retry { attempt }
                    }
                    Err(e) => AfterError::Stranded(e),
                }
            }
        };

        match outcome {
            AfterError::Retry { attempt } => {
                tracing::debug!("{} transport error on attempt {}: {}", kind, attempt, reason);
                self.emit_error(StreamError::Transport { kind, reason });
            }
            AfterError::Exhausted { attempts } => {
                tracing::warn!(
                    "{} stream: max reconnection attempts reached ({}), last error: {}",
                    kind,
                    attempts,
                    reason
                );
                self.disconnect();
                self.emit_error(StreamError::ConnectionExhausted { attempts });
            }
            AfterError::Stranded(err) => {
                tracing::error!("{} stream cannot reconnect: {}", kind, err);
                self.disconnect();
                self.emit_error(StreamError::Transport { kind, reason });
                self.emit_error(err);
            }
        }
    }

    /// Timer body: replace the failed transport if nothing superseded it.
    fn reconnect_now(self: &Arc<Self>, generation: u64) {
        let stale = {
            let mut conn = self.conn.lock();
            if conn.generation != generation || conn.destroyed {
                return;
            }
            conn.reconnect_timer = None;
            conn.handle.take()
        };

        if let Some(mut handle) = stale {
            handle.close();
        }
        self.connect();
    }

    fn disconnect(&self) {
        let (handle, timer) = {
            let mut conn = self.conn.lock();
            conn.generation += 1;
            conn.status = ConnectionState::Disconnected;
            conn.reconnect_attempts = 0;
            (conn.handle.take(), conn.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(mut handle) = handle {
            tracing::info!("Disconnecting {} stream", self.config.kind);
            handle.close();
        }
    }

    fn emit_error(&self, err: StreamError) {
        let handlers = self.handlers.lock().error_handlers();
        if handlers.is_empty() {
            tracing::warn!("Unhandled {} stream error: {}", self.config.kind, err);
        }
        for handler in handlers {
            handler(&err);
        }
    }
}

impl<M: MessageMap> Drop for Inner<M> {
    fn drop(&mut self) {
        let conn = self.conn.get_mut();
        if let Some(timer) = conn.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(mut handle) = conn.handle.take() {
            handle.close();
        }
    }
}
