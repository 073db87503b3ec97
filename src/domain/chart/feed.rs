//! The chart data collaborator: history fetch plus live stream.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::{ChartMessage, ChartRequest};
use crate::error::SdkError;
use crate::stream::SseConnection;

/// Receives every live chart update of one stream.
pub type ChartSink = Arc<dyn Fn(ChartMessage) + Send + Sync>;

/// An open live chart stream.
pub trait LiveStream: Send {
    /// Stop the stream. Must tolerate repeated calls.
    fn close(&mut self);
}

impl LiveStream for SseConnection {
    fn close(&mut self) {
        self.cleanup();
    }
}

/// Source of chart history and live updates.
pub trait ChartFeed: Send + Sync + 'static {
    /// Fetch the history snapshot (`candles` or `history`) for `request`.
    fn fetch_history(&self, request: &ChartRequest) -> BoxFuture<'static, Result<ChartMessage, SdkError>>;

    /// Open the live stream (`ohlc` or `tick` updates) for `request`.
    fn open_live(&self, request: &ChartRequest, sink: ChartSink) -> Box<dyn LiveStream>;
}

// ─── REST + SSE implementation ───────────────────────────────────────────────

#[cfg(feature = "http")]
pub use api::ApiChartFeed;

#[cfg(feature = "http")]
mod api {
    use std::sync::Arc;

    use futures_util::future::BoxFuture;

    use super::{ChartFeed, ChartSink, LiveStream};
    use crate::domain::chart::{ChartMessage, ChartRequest, ChartStyle};
    use crate::error::{SdkError, StreamError};
    use crate::http::TradeHttp;
    use crate::stream::{create_sse_connection, SseConnectionOptions, StreamConfig, Transport};

    /// Chart feed backed by the REST API (history) and an SSE stream (live).
    #[derive(Clone)]
    pub struct ApiChartFeed {
        http: TradeHttp,
        config: StreamConfig,
        transport: Arc<dyn Transport>,
    }

    impl ApiChartFeed {
        pub fn new(http: TradeHttp, config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
            Self {
                http,
                config,
                transport,
            }
        }

        /// Live stream options: `action=ticks|candles`, `instrument_id`, and
        /// `granularity` for candles.
        pub(crate) fn live_options(request: &ChartRequest, sink: ChartSink) -> SseConnectionOptions<ChartMessage> {
            let key = request.key();
            let mut options = SseConnectionOptions::new(move |message: ChartMessage| sink(message))
                .param("action", request.style.as_str())
                .param("instrument_id", request.symbol.as_str())
                .on_error(move |e: &StreamError| tracing::warn!("Chart stream {}: {}", key, e));
            if let (ChartStyle::Candles, Some(granularity)) = (request.style, request.granularity) {
                options = options.param("granularity", granularity.to_string());
            }
            options
        }
    }

    impl ChartFeed for ApiChartFeed {
        fn fetch_history(&self, request: &ChartRequest) -> BoxFuture<'static, Result<ChartMessage, SdkError>> {
            let http = self.http.clone();
            let request = request.clone();
            Box::pin(async move {
                let history = match request.style {
                    ChartStyle::Ticks => http.get_ticks_history(&request).await?,
                    ChartStyle::Candles => http.get_candles(&request).await?,
                };
                Ok(history)
            })
        }

        fn open_live(&self, request: &ChartRequest, sink: ChartSink) -> Box<dyn LiveStream> {
            let options = Self::live_options(request, sink);
            Box::new(create_sse_connection(&self.config, Arc::clone(&self.transport), options))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::stream::MemoryTransport;

        #[tokio::test]
        async fn test_open_live_candles_url() {
            let transport = MemoryTransport::new();
            let config = StreamConfig {
                base_url: "https://stream.test".into(),
                ..Default::default()
            };
            let feed = ApiChartFeed::new(
                TradeHttp::new("https://api.test"),
                config,
                Arc::new(transport.clone()),
            );

            let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let captured = Arc::clone(&received);
            let mut stream = feed.open_live(
                &ChartRequest::candles("R_100", 60),
                Arc::new(move |m: ChartMessage| captured.lock().push(m)),
            );

            assert_eq!(
                transport.last_url().as_deref(),
                Some("https://stream.test/v1/stream/public?action=candles&instrument_id=R_100&granularity=60")
            );

            transport.emit_message(
                r#"{"msg_type":"ohlc","ohlc":{"epoch":60,"open":"1","high":"2","low":"1","close":"2"}}"#,
            );
            assert_eq!(received.lock().len(), 1);

            stream.close();
            stream.close();
            assert_eq!(transport.close_count(0), 1);
        }
    }
}
