use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mate_core::{MessageKind, MessageSink, OutboundMessage, SinkError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to send message: {0}")]
    Send(String),
}

/// Write half of one physical connection to the Navigator. Cloned freely;
/// every clone serializes its sends through the same lock so two tasks can
/// never interleave bytes on the wire.
#[derive(Clone)]
pub struct Transport {
    writer: Arc<Mutex<WsSink>>,
}

impl Transport {
    pub async fn connect(url: &Url) -> Result<(Self, WsSource), TransportError> {
        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::ConnectTimeout(HANDSHAKE_TIMEOUT))?;
        let (stream, _response) =
            connected.map_err(|err| TransportError::Connect(err.to_string()))?;
        let (sink, source) = stream.split();
        Ok((
            Self {
                writer: Arc::new(Mutex::new(sink)),
            },
            source,
        ))
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(message).map_err(|err| TransportError::Encode(err.to_string()))?;
        debug!(event = "ws_send", kind = %message.kind, bytes = text.len());
        // The lock spans exactly one write, never a read or computation.
        let mut writer = self.writer.lock().await;
        writer
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    /// Sends a normal close frame and shuts the write half down. Failures are
    /// ignored; the socket may already be gone.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer
            .send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await;
        let _ = writer.close().await;
    }
}

/// `MessageSink` over the live transport; what the command and log pipelines
/// are handed instead of the raw connection.
#[derive(Clone)]
pub struct NavigatorSink {
    transport: Transport,
    mate_id: String,
}

impl NavigatorSink {
    pub fn new(transport: Transport, mate_id: String) -> Self {
        Self { transport, mate_id }
    }
}

#[async_trait]
impl MessageSink for NavigatorSink {
    async fn emit(&self, kind: MessageKind, data: Value) -> Result<(), SinkError> {
        let message = OutboundMessage::with_data(kind, self.mate_id.clone(), data);
        self.transport
            .send(&message)
            .await
            .map_err(|err| SinkError::Transport(err.to_string()))
    }
}

/// A failed send is logged and dropped; one lost telemetry or result message
/// is not fatal to the agent.
pub async fn emit_or_warn<S: MessageSink, T: Serialize + Sync>(
    sink: &S,
    kind: MessageKind,
    payload: &T,
) {
    if let Err(err) = sink.emit_payload(kind, payload).await {
        warn!(event = "message_send_failed", kind = %kind, error = %err);
    }
}
