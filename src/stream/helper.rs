//! `create_sse_connection`: a one-shot SSE stream without a service.
//!
//! For call sites that want a single ad-hoc stream (chart feeds, one-off
//! subscriptions). The connection keeps its own attempt counter, which is reset
//! by `Open` and by every successfully parsed message. After the last retry it
//! reports `StreamError::ConnectionExhausted` and stops.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::error::{StreamError, TransportKind};
use crate::stream::endpoint::with_query;
use crate::stream::runtime::Spawner;
use crate::stream::handlers::{ErrorHandler, OpenHandler};
use crate::stream::sse::extract_json;
use crate::stream::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};
use crate::stream::StreamConfig;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

// ─── Options ─────────────────────────────────────────────────────────────────

/// Options for [`create_sse_connection`].
pub struct SseConnectionOptions<T> {
    /// Query parameters in order; repeated keys are kept.
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    on_message: Arc<dyn Fn(T) + Send + Sync>,
    on_error: Option<ErrorHandler>,
    on_open: Option<OpenHandler>,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    /// Path replacing the public/protected path.
    pub endpoint: Option<String>,
}

impl<T> SseConnectionOptions<T> {
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            headers: Vec::new(),
            on_message: Arc::new(on_message),
            on_error: None,
            on_open: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            endpoint: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds `Authorization: Bearer <token>`, which also selects the protected path.
    pub fn bearer(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn on_open<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(handler));
        self
    }

    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.endpoint = Some(path.into());
        self
    }

    fn has_authorization(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
    }

    /// Full URL for these options against `config`.
    pub fn url(&self, config: &StreamConfig) -> String {
        let base = match &self.endpoint {
            Some(path) => format!("{}{}", config.base_url.trim_end_matches('/'), path),
            None => config.channel_url(self.has_authorization()),
        };
        with_query(&base, &self.params)
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

type Deliver = Box<dyn Fn(&str) -> Result<(), serde_json::Error> + Send + Sync>;

#[derive(Default)]
struct State {
    handle: Option<Box<dyn TransportHandle>>,
    attempts: u32,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    request: TransportRequest,
    deliver: Deliver,
    on_error: Option<ErrorHandler>,
    on_open: Option<OpenHandler>,
    max_attempts: u32,
    interval: Duration,
    spawner: Spawner,
    state: Mutex<State>,
}

/// Handle to a stream opened by [`create_sse_connection`].
///
/// Dropping it has the same effect as [`SseConnection::cleanup`].
pub struct SseConnection {
    inner: Arc<Inner>,
}

/// Open an SSE stream delivering each payload, parsed as `T`, to the options'
/// message callback.
pub fn create_sse_connection<T>(
    config: &StreamConfig,
    transport: Arc<dyn Transport>,
    options: SseConnectionOptions<T>,
) -> SseConnection
where
    T: DeserializeOwned + Send + 'static,
{
    let url = options.url(config);
    let mut request = TransportRequest::new(TransportKind::Sse, url);
    request.headers = options.headers;

    let on_message = options.on_message;
    let deliver: Deliver = Box::new(move |payload: &str| {
        let message: T = serde_json::from_str(&extract_json(payload))?;
        on_message(message);
        Ok(())
    });

    let inner = Arc::new(Inner {
        transport,
        request,
        deliver,
        on_error: options.on_error,
        on_open: options.on_open,
        max_attempts: options.reconnect_attempts,
        interval: options.reconnect_interval,
        spawner: config.spawner.clone(),
        state: Mutex::new(State::default()),
    });
    inner.open();
    SseConnection { inner }
}

impl SseConnection {
    /// Stop the stream: cancel a pending retry and close the transport.
    ///
    /// Safe to call more than once; only the first call closes anything.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Retries used since the last `Open` or successful message.
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn url(&self) -> &str {
        &self.inner.request.url
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.inner.cleanup();
    }
}

impl Inner {
    fn open(self: &Arc<Self>) {
        let generation = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.generation += 1;
            state.generation
        };

        tracing::debug!("Opening SSE stream: {}", self.request.url);
        let handle = match self.transport.open(self.request.clone(), self.sink(generation)) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to open SSE stream {}: {}", self.request.url, e);
                self.emit(e);
                return;
            }
        };

        let mut state = self.state.lock();
        if state.destroyed || state.generation != generation {
            drop(state);
            let mut handle = handle;
            handle.close();
        } else {
            state.handle = Some(handle);
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

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        {
            let state = self.state.lock();
            if state.destroyed || state.generation != generation {
                return;
            }
        }

        match event {
            TransportEvent::Open => {
                self.state.lock().attempts = 0;
                if let Some(on_open) = &self.on_open {
                    on_open();
                }
            }
            TransportEvent::Message(text) => match (self.deliver)(&text) {
                Ok(()) => self.state.lock().attempts = 0,
                Err(e) => {
                    tracing::warn!("Failed to parse SSE message: {}", e);
                    self.emit(StreamError::Parse {
                        kind: TransportKind::Sse,
                        detail: e.to_string(),
                    });
                }
            },
            TransportEvent::Error(reason) => self.handle_error(generation, reason),
        }
    }

    fn handle_error(self: &Arc<Self>, generation: u64, reason: String) {
        self.emit(StreamError::Transport {
            kind: TransportKind::Sse,
            reason,
        });

        let stopped = {
            let mut state = self.state.lock();
            if state.destroyed || state.generation != generation {
                return;
            }

            if state.attempts < self.max_attempts {
                state.attempts += 1;
                tracing::info!(
                    "SSE stream error, retrying in {:?} (attempt {}/{})",
                    self.interval,
                    state.attempts,
                    self.max_attempts
                );

                let weak = Arc::downgrade(self);
                let interval = self.interval;
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                let timer = self.spawner.spawn(async move {
                    tokio::time::sleep(interval).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.retry(generation);
                    }
                });
                match timer {
                    Ok(timer) => {
                        state.timer = Some(timer);
                        None
                    }
                    Err(e) => {
                        state.generation += 1;
                        Some((e, state.handle.take()))
                    }
                }
            } else {
                state.generation += 1;
                let attempts = state.attempts;
                Some((StreamError::ConnectionExhausted { attempts }, state.handle.take()))
            }
        };

        if let Some((err, handle)) = stopped {
            tracing::warn!("SSE stream stopped: {}", err);
            if let Some(mut handle) = handle {
                handle.close();
            }
            self.emit(err);
        }
    }

    /// Timer body. Checks `destroyed` and the generation again because the
    /// timer may already be running when `cleanup()` is called.
    fn retry(self: &Arc<Self>, generation: u64) {
        let stale = {
            let mut state = self.state.lock();
            if state.destroyed || state.generation != generation {
                return;
            }
            state.timer = None;
            state.handle.take()
        };

        if let Some(mut handle) = stale {
            handle.close();
        }
        self.open();
    }

    fn cleanup(&self) {
        let (handle, timer) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.generation += 1;
            (state.handle.take(), state.timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(mut handle) = handle {
            tracing::debug!("Closing SSE stream: {}", self.request.url);
            handle.close();
        }
    }

    fn emit(&self, err: StreamError) {
        match &self.on_error {
            Some(on_error) => on_error(&err),
            None => tracing::warn!("Unhandled SSE stream error: {}", err),
        }
    }
}
