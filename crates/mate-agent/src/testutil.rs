use async_trait::async_trait;
use mate_core::{MessageKind, MessageSink, SinkError};
use serde_json::Value;
use tokio::sync::Mutex;

/// Sink that records every emitted message instead of touching a socket.
pub struct RecordingSink {
    messages: Mutex<Vec<(MessageKind, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub async fn take(&self) -> Vec<(MessageKind, Value)> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn emit(&self, kind: MessageKind, data: Value) -> Result<(), SinkError> {
        self.messages.lock().await.push((kind, data));
        Ok(())
    }
}
