//! Server-Sent Events: frame decoding and the `reqwest`-based transport.
//!
//! The platform `EventSource` cannot carry request headers, so the SSE transport
//! is a plain streaming GET with `Accept: text/event-stream` whose body is decoded
//! here. Only `data` fields matter to the SDK; `id`, `event`, `retry` and comment
//! lines are skipped.

use std::borrow::Cow;
use std::fmt::Display;

use futures_util::stream::{Stream, StreamExt};

#[cfg(feature = "http")]
use crate::error::StreamError;
#[cfg(feature = "http")]
use crate::stream::runtime::Spawner;
#[cfg(feature = "http")]
use crate::stream::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};

// ─── Payload extraction ──────────────────────────────────────────────────────

/// Extract the JSON body of a payload that may or may not carry SSE framing.
///
/// Accepts either raw JSON or `data: {...}` lines; multiple `data` lines are
/// joined with `\n`.
pub fn extract_json(payload: &str) -> Cow<'_, str> {
    let trimmed = payload.trim();
    if !trimmed.starts_with("data:") {
        return Cow::Borrowed(trimmed);
    }

    let joined = trimmed
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect::<Vec<_>>()
        .join("\n");
    Cow::Owned(joined)
}

// ─── Frame decoder ───────────────────────────────────────────────────────────

/// Incremental decoder turning raw body chunks into SSE event payloads.
///
/// Bytes are buffered until a full line is available so that multi-byte UTF-8
/// sequences split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: String,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if !self.has_data {
                return None;
            }
            self.has_data = false;
            return Some(std::mem::take(&mut self.data));
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
        }
        None
    }
}

/// Decode a byte stream into a stream of SSE event payloads.
///
/// The first read error is yielded as `Err` and ends the stream. An event that
/// was not terminated by a blank line before the body ended is discarded.
pub fn decode_frames<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, String>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let bytes = bytes;
        futures_util::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for data in decoder.feed(chunk.as_ref()) {
                        yield Ok(data);
                    }
                }
                Err(e) => {
                    yield Err(e.to_string());
                    break;
                }
            }
        }
    }
}

// ─── reqwest transport ───────────────────────────────────────────────────────

/// SSE transport over a streaming `reqwest` GET.
///
/// Connection tasks run on the runtime captured at construction, so `open`
/// may be called from threads outside it.
#[cfg(feature = "http")]
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    spawner: Spawner,
}

#[cfg(feature = "http")]
impl SseTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            spawner: Spawner::current(),
        }
    }

    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = spawner;
        self
    }
}

#[cfg(feature = "http")]
impl Default for SseTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
impl Transport for SseTransport {
    fn open(&self, request: TransportRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, StreamError> {
        let task = self.spawner.spawn(run_sse(self.client.clone(), request, sink))?;
        Ok(Box::new(SseHandle { task: Some(task) }))
    }
}

#[cfg(feature = "http")]
struct SseHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

#[cfg(feature = "http")]
impl TransportHandle for SseHandle {
    fn send(&mut self, _text: String) -> Result<(), StreamError> {
        Err(StreamError::SendFailed("SSE streams are read-only".into()))
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(feature = "http")]
impl Drop for SseHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "http")]
async fn run_sse(client: reqwest::Client, request: TransportRequest, sink: EventSink) {
    let mut builder = client
        .get(&request.url)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("SSE connection failed: {}", e);
            sink(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::error!("SSE endpoint returned HTTP {}", status.as_u16());
        sink(TransportEvent::Error(format!("HTTP {}", status.as_u16())));
        return;
    }

    sink(TransportEvent::Open);

    let frames = decode_frames(response.bytes_stream());
    futures_util::pin_mut!(frames);
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(data) => sink(TransportEvent::Message(data)),
            Err(reason) => {
                tracing::error!("SSE read error: {}", reason);
                sink(TransportEvent::Error(reason));
                return;
            }
        }
    }

    sink(TransportEvent::Error("Stream ended".into()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(extract_json(" {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_framed() {
        assert_eq!(extract_json("data: {\"a\":1}\n\n"), "{\"a\":1}");
        assert_eq!(extract_json("data:{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_multiline_data() {
        assert_eq!(extract_json("data: {\"a\":\ndata: 1}"), "{\"a\":\n1}");
    }

    #[test]
    fn test_decoder_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"action\":\"x\"}\n\n");
        assert_eq!(events, vec!["{\"action\":\"x\"}".to_string()]);
    }

    #[test]
    fn test_decoder_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"act").is_empty());
        assert!(decoder.feed(b"ion\":1}\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(events, vec!["{\"action\":1}".to_string()]);
    }

    #[test]
    fn test_decoder_skips_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\n\nid: 7\nevent: price\ndata: 1\ndata: 2\n\n");
        assert_eq!(events, vec!["1\n2".to_string()]);
    }

    #[test]
    fn test_decoder_split_utf8() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: é\n\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(decoder.feed(&bytes[..7]).is_empty());
        let events = decoder.feed(&bytes[7..]);
        assert_eq!(events, vec!["é".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_frames_stops_on_error() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: 1\n\n".to_vec()),
            Err("reset".to_string()),
            Ok(b"data: 2\n\n".to_vec()),
        ];
        let frames: Vec<_> = decode_frames(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(frames, vec![Ok("1".to_string()), Err("reset".to_string())]);
    }

    #[cfg(feature = "http")]
    mod loopback {
        use std::time::Duration;

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::sync::mpsc;
        use tokio::task::JoinHandle;

        use super::super::*;
        use crate::error::TransportKind;

        const EVENT_STREAM: &str = "HTTP/1.1 200 OK\r\n\
            Content-Type: text/event-stream\r\n\
            Connection: close\r\n\r\n\
            : keepalive\n\n\
            data: {\"a\":1}\n\n\
            id: 2\n\
            data: {\"b\"\n\
            data: :2}\n\n";

        /// Serve one raw response on a local port; the task yields the request head.
        async fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/v1/stream/public", listener.local_addr().unwrap());
            let server = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                String::from_utf8_lossy(&head).to_ascii_lowercase()
            });
            (url, server)
        }

        fn channel_sink() -> (EventSink, mpsc::UnboundedReceiver<TransportEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let sink: EventSink = std::sync::Arc::new(move |event: TransportEvent| {
                let _ = tx.send(event);
            });
            (sink, rx)
        }

        /// Events up to and including the first `Error`.
        async fn events_until_error(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
            let mut events = Vec::new();
            while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("transport went quiet")
            {
                let done = matches!(event, TransportEvent::Error(_));
                events.push(event);
                if done {
                    break;
                }
            }
            events
        }

        #[tokio::test]
        async fn test_frames_then_stream_end() {
            let (url, server) = serve_once(EVENT_STREAM).await;
            let (sink, mut rx) = channel_sink();
            let request = TransportRequest::new(TransportKind::Sse, url).header("Authorization", "Bearer tok");

            let _handle = SseTransport::new().open(request, sink).unwrap();
            let events = events_until_error(&mut rx).await;
            assert_eq!(
                events,
                vec![
                    TransportEvent::Open,
                    TransportEvent::Message("{\"a\":1}".into()),
                    TransportEvent::Message("{\"b\"\n:2}".into()),
                    TransportEvent::Error("Stream ended".into()),
                ]
            );

            let head = server.await.unwrap();
            assert!(head.starts_with("get /v1/stream/public "), "{head}");
            assert!(head.contains("authorization: bearer tok"), "{head}");
            assert!(head.contains("accept: text/event-stream"), "{head}");
        }

        #[tokio::test]
        async fn test_non_success_status_is_error() {
            let (url, _server) = serve_once(
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;
            let (sink, mut rx) = channel_sink();

            let _handle = SseTransport::new()
                .open(TransportRequest::new(TransportKind::Sse, url), sink)
                .unwrap();
            assert_eq!(
                events_until_error(&mut rx).await,
                vec![TransportEvent::Error("HTTP 503".into())]
            );
        }

        #[tokio::test]
        async fn test_close_stops_delivery() {
            let (url, _server) = serve_once(EVENT_STREAM).await;
            let (sink, mut rx) = channel_sink();

            let mut handle = SseTransport::new()
                .open(TransportRequest::new(TransportKind::Sse, url), sink)
                .unwrap();
            assert!(handle.send("x".into()).is_err());
            handle.close();
            handle.close();

            // The aborted task drops its sink, which closes the channel.
            let rest = tokio::time::timeout(Duration::from_secs(5), async {
                let mut rest = Vec::new();
                while let Some(event) = rx.recv().await {
                    rest.push(event);
                }
                rest
            })
            .await
            .unwrap();
            assert!(!rest.contains(&TransportEvent::Error("Stream ended".into())));
        }

        #[test]
        fn test_open_without_runtime_fails() {
            let (sink, _rx) = channel_sink();
            let result = SseTransport::new().open(TransportRequest::new(TransportKind::Sse, "http://127.0.0.1:1/"), sink);
            assert!(matches!(result, Err(StreamError::NoRuntime)));
        }

        #[test]
        fn test_open_from_plain_thread_on_captured_runtime() {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (url, _server) = rt.block_on(serve_once(EVENT_STREAM));
            let (sink, mut rx) = channel_sink();

            let transport = SseTransport::new().with_spawner(Spawner::with_handle(rt.handle().clone()));
            let _handle = transport
                .open(TransportRequest::new(TransportKind::Sse, url), sink)
                .unwrap();

            let events = rt.block_on(events_until_error(&mut rx));
            assert_eq!(events.first(), Some(&TransportEvent::Open));
            assert_eq!(events.len(), 4);
        }
    }
}
