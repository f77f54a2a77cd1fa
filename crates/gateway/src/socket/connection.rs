//! Per-connection WebSocket loop
//!
//! Each connection owns a bounded outbound queue drained by a writer
//! task. Every query runs in its own forwarding task that turns pipeline
//! events into frames tagged with the query's message id. When the
//! connection ends, for whatever reason, all of its queries are aborted.

use super::message::{message_id, parse_inbound, Inbound, OutboundMessage};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::Instrument;
use websift_common::{
    agent::{PipelineOrchestrator, QueryEvents},
    config::ServerConfig,
    metrics,
};

#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbound_capacity: usize,
    pub slow_consumer_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_queue_capacity.max(1),
            slow_consumer_timeout: Duration::from_millis(config.slow_consumer_timeout_ms),
        }
    }
}

/// Handle to the outbound queue.
///
/// A frame that cannot be queued in time marks the client as a slow
/// consumer, which closes the connection.
#[derive(Clone)]
struct Outbound {
    tx: mpsc::Sender<String>,
    timeout: Duration,
    slow: Arc<Notify>,
}

impl Outbound {
    /// `false` once the connection can take no more frames
    async fn send(&self, message: OutboundMessage) -> bool {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode outbound frame");
                return false;
            }
        };

        match self.tx.send_timeout(text, self.timeout).await {
            Ok(()) => true,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.slow.notify_one();
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => false,
        }
    }
}

pub async fn serve(socket: WebSocket, pipeline: PipelineOrchestrator, settings: ConnectionSettings) {
    let (sink, stream) = socket.split();
    run(stream, sink, pipeline, settings).await;
}

pub(crate) async fn run<R, E, W>(
    mut incoming: R,
    sink: W,
    pipeline: PipelineOrchestrator,
    settings: ConnectionSettings,
) where
    R: Stream<Item = Result<WsMessage, E>> + Unpin + Send,
    E: Display + Send,
    W: Sink<WsMessage> + Unpin + Send + 'static,
{
    metrics::connection_opened();
    tracing::info!("WebSocket connection opened");

    let (tx, rx) = mpsc::channel(settings.outbound_capacity);
    let writer = tokio::spawn(write_frames(sink, rx));
    let slow = Arc::new(Notify::new());
    let outbound = Outbound {
        tx,
        timeout: settings.slow_consumer_timeout,
        slow: slow.clone(),
    };
    let mut queries = JoinSet::new();

    loop {
        tokio::select! {
            _ = slow.notified() => {
                tracing::warn!(
                    timeout_ms = settings.slow_consumer_timeout.as_millis() as u64,
                    "Client is not reading, closing connection"
                );
                metrics::record_slow_consumer();
                break;
            }
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(text.as_str(), &pipeline, &outbound, &mut queries).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    break;
                }
            },
            Some(_) = queries.join_next(), if !queries.is_empty() => {}
        }
    }

    let in_flight = queries.len();
    queries.abort_all();
    drop(outbound);
    writer.abort();

    metrics::connection_closed();
    tracing::info!(in_flight, "WebSocket connection closed");
}

async fn handle_frame(
    text: &str,
    pipeline: &PipelineOrchestrator,
    outbound: &Outbound,
    queries: &mut JoinSet<()>,
) {
    match parse_inbound(text) {
        Inbound::Query { content, history } => {
            let id = message_id();
            let span = tracing::info_span!("message", message_id = %id);
            let events = span.in_scope(|| pipeline.start(content, history));
            queries.spawn(forward(events, id, outbound.clone()).instrument(span));
        }
        Inbound::Ignored(kind) => {
            tracing::debug!(kind = %kind, "Ignoring frame");
        }
        Inbound::Rejected(reason) => {
            outbound.send(OutboundMessage::error(reason)).await;
        }
    }
}

/// Relay one query's events until its terminal event
async fn forward(mut events: QueryEvents, message_id: String, outbound: Outbound) {
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if !outbound.send(OutboundMessage::from_event(event, &message_id)).await {
            break;
        }
        if terminal {
            break;
        }
    }
}

async fn write_frames<W>(mut sink: W, mut rx: mpsc::Receiver<String>)
where
    W: Sink<WsMessage> + Unpin,
{
    while let Some(text) = rx.recv().await {
        if sink.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use websift_common::{
        agent::{Message, Providers},
        embeddings::MockEmbedder,
        errors::Result,
        llm::{ChatStreamer, ChunkStream, TextCompleter},
        search::{SearchClient, SearchOptions, SearchResult},
        AppConfig,
    };

    struct Sentinel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextCompleter for Sentinel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("not_needed".to_string())
        }
    }

    struct NoResults;

    #[async_trait]
    impl SearchClient for NoResults {
        async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }
    }

    struct Chunks(usize);

    #[async_trait]
    impl ChatStreamer for Chunks {
        async fn stream_chat(&self, _system: &str, _history: &[Message], _user: &str) -> Result<ChunkStream> {
            let chunks: Vec<Result<String>> = (0..self.0).map(|i| Ok(format!("chunk {} ", i))).collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn pipeline(chunks: usize) -> (PipelineOrchestrator, Arc<Sentinel>) {
        let completer = Arc::new(Sentinel {
            calls: AtomicUsize::new(0),
        });
        let providers = Providers {
            completer: completer.clone(),
            streamer: Arc::new(Chunks(chunks)),
            embedder: Arc::new(MockEmbedder::new(16)),
            search: Arc::new(NoResults),
        };
        (
            PipelineOrchestrator::new(&providers, &AppConfig::default()),
            completer,
        )
    }

    fn settings(capacity: usize, timeout_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            outbound_capacity: capacity,
            slow_consumer_timeout: Duration::from_millis(timeout_ms),
        }
    }

    type Incoming = fmpsc::UnboundedSender<std::result::Result<WsMessage, axum::Error>>;

    fn text(frame: &str) -> std::result::Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(frame.to_string().into()))
    }

    async fn next_json(out: &mut fmpsc::UnboundedReceiver<WsMessage>) -> Value {
        match out.next().await {
            Some(WsMessage::Text(t)) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn connect(
        pipeline: PipelineOrchestrator,
        settings: ConnectionSettings,
    ) -> (Incoming, fmpsc::UnboundedReceiver<WsMessage>, tokio::task::JoinHandle<()>) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let handle = tokio::spawn(run(in_rx, out_tx, pipeline, settings));
        (in_tx, out_rx, handle)
    }

    #[tokio::test]
    async fn test_empty_content_gets_error_without_pipeline() {
        let (pipeline, completer) = pipeline(1);
        let (incoming, mut out, handle) = connect(pipeline, settings(8, 1_000));

        incoming
            .unbounded_send(text(r#"{"type":"message","content":"","history":[]}"#))
            .unwrap();

        let reply = next_json(&mut out).await;
        assert_eq!(reply, serde_json::json!({"type": "error", "data": "No content provided"}));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);

        drop(incoming);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_frames_share_message_id() {
        let (pipeline, _) = pipeline(2);
        let (incoming, mut out, handle) = connect(pipeline, settings(8, 1_000));

        incoming
            .unbounded_send(text(r#"{"type":"message","content":"hi","history":[]}"#))
            .unwrap();

        let sources = next_json(&mut out).await;
        assert_eq!(sources["type"], "sources");
        assert_eq!(sources["data"], serde_json::json!([]));
        let id = sources["messageId"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 7);

        let first = next_json(&mut out).await;
        assert_eq!(first["type"], "message");
        assert_eq!(first["data"], "chunk 0 ");
        assert_eq!(first["messageId"], id.as_str());
        let second = next_json(&mut out).await;
        assert_eq!(second["data"], "chunk 1 ");

        let end = next_json(&mut out).await;
        assert_eq!(end, serde_json::json!({"type": "messageEnd", "messageId": id}));

        drop(incoming);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_message_types_are_ignored() {
        let (pipeline, completer) = pipeline(1);
        let (incoming, mut out, handle) = connect(pipeline, settings(8, 1_000));

        incoming
            .unbounded_send(text(r#"{"type":"typing","content":"x"}"#))
            .unwrap();
        incoming.unbounded_send(text("not json")).unwrap();

        let reply = next_json(&mut out).await;
        assert_eq!(reply, serde_json::json!({"type": "error", "data": "An error occurred"}));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);

        drop(incoming);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_consumer_is_disconnected() {
        let (pipeline, _) = pipeline(500);
        let (in_tx, in_rx) = fmpsc::unbounded();
        // Nobody reads this sink; it accepts one frame and then blocks
        let (out_tx, _out_rx) = fmpsc::channel::<WsMessage>(0);
        let handle = tokio::spawn(run(in_rx, out_tx, pipeline, settings(1, 50)));

        in_tx
            .unbounded_send(text(r#"{"type":"message","content":"hi","history":[]}"#))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("connection should close")
            .unwrap();
    }
}
