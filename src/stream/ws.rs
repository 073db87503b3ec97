//! Native WebSocket transport: `tokio-tungstenite`.
//!
//! One background task per connection:
//! - connects with a 30-second timeout, sending any sub-protocols
//! - answers protocol-level pings
//! - forwards text frames to the sink and writes queued outbound frames
//! - reports close frames, read errors and stream end as `TransportEvent::Error`
//!
//! Closing the handle drops the outbound queue; the task then sends a normal
//! close frame and exits.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::StreamError;
use crate::stream::runtime::Spawner;
use crate::stream::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};

/// Connection timeout duration for WebSocket connections
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket transport using `tokio-tungstenite`.
///
/// Connection tasks run on the runtime captured by [`WsTransport::new`].
#[derive(Debug, Clone)]
pub struct WsTransport {
    spawner: Spawner,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            spawner: Spawner::current(),
        }
    }

    pub fn with_spawner(spawner: Spawner) -> Self {
        Self { spawner }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn open(&self, request: TransportRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, StreamError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.spawner.spawn(run_connection(request, sink, out_rx))?;
        Ok(Box::new(WsHandle {
            out_tx: Some(out_tx),
        }))
    }
}

struct WsHandle {
    out_tx: Option<mpsc::UnboundedSender<String>>,
}

impl TransportHandle for WsHandle {
    fn send(&mut self, text: String) -> Result<(), StreamError> {
        match &self.out_tx {
            Some(tx) => tx
                .send(text)
                .map_err(|_| StreamError::SendFailed("Connection task has exited".into())),
            None => Err(StreamError::SendFailed("Connection closed".into())),
        }
    }

    fn close(&mut self) {
        // Dropping the sender lets the task send a close frame on its own.
        self.out_tx = None;
    }
}

async fn run_connection(
    request: TransportRequest,
    sink: EventSink,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut client_request = match request.url.as_str().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            sink(TransportEvent::Error(format!("Invalid WebSocket URL: {}", e)));
            return;
        }
    };

    if !request.protocols.is_empty() {
        match request.protocols.join(", ").parse::<HeaderValue>() {
            Ok(value) => {
                client_request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }
            Err(e) => {
                sink(TransportEvent::Error(format!("Invalid sub-protocol header: {}", e)));
                return;
            }
        }
    }

    for (name, value) in &request.headers {
        let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) else {
            tracing::warn!("Skipping invalid header: {}", name);
            continue;
        };
        client_request.headers_mut().insert(name, value);
    }

    let ws_stream = match tokio::time::timeout(CONNECTION_TIMEOUT, connect_async(client_request)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            tracing::error!("WebSocket connection failed: {}", e);
            sink(TransportEvent::Error(e.to_string()));
            return;
        }
        Err(_) => {
            tracing::error!("WebSocket connection timed out");
            sink(TransportEvent::Error("Connection timeout".into()));
            return;
        }
    };

    sink(TransportEvent::Open);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        sink(TransportEvent::Message(text_str.to_string()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .as_ref()
                            .map(|f| format!("closed: code {}, reason: {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed: no close frame".to_string());
                        tracing::info!("WebSocket {}", reason);
                        sink(TransportEvent::Error(reason));
                        return;
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        sink(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        sink(TransportEvent::Error("Stream ended".into()));
                        return;
                    }
                }
            }

            out = out_rx.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            tracing::warn!("Send failed: {}", e);
                        }
                    }
                    None => {
                        let _ = write.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return;
                    }
                }
            }
        }
    }
}
