use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Message types the mate sends to the Navigator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Register,
    Stats,
    Heartbeat,
    Pong,
    CommandOutput,
    CommandError,
    CommandComplete,
    LogData,
    LogComplete,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Register => "register",
            MessageKind::Stats => "stats",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Pong => "pong",
            MessageKind::CommandOutput => "command_output",
            MessageKind::CommandError => "command_error",
            MessageKind::CommandComplete => "command_complete",
            MessageKind::LogData => "log_data",
            MessageKind::LogComplete => "log_complete",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound envelope. Every message to the Navigator carries the mate id;
/// `data` is omitted entirely for data-less kinds (heartbeat, pong).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub mate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(kind: MessageKind, mate_id: impl Into<String>) -> Self {
        Self {
            kind,
            mate_id: mate_id.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(kind: MessageKind, mate_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            mate_id: mate_id.into(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }
}

/// Command types the Navigator sends to the mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    CollectStats,
    ReadLog,
    ExecuteCommand,
    Shutdown,
    Unknown,
}

impl CommandKind {
    pub fn from_type(input: &str) -> Self {
        match input {
            "ping" => CommandKind::Ping,
            "collect_stats" => CommandKind::CollectStats,
            "read_log" => CommandKind::ReadLog,
            "execute_command" => CommandKind::ExecuteCommand,
            "shutdown" => CommandKind::Shutdown,
            _ => CommandKind::Unknown,
        }
    }
}

/// Inbound command envelope. `payload` and `timestamp` are defaulted so a
/// sparse command still decodes; handlers validate fields individually.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundCommand {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundCommand {
    pub fn kind(&self) -> CommandKind {
        CommandKind::from_type(&self.command_type)
    }
}

fn payload_str(payload: &Map<String, Value>, key: &str, default: &str) -> String {
    match payload.get(key).and_then(Value::as_str) {
        Some(value) => value.to_string(),
        None => default.to_string(),
    }
}

fn payload_u64(payload: &Map<String, Value>, key: &str, default: u64) -> u64 {
    match payload.get(key) {
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(default),
        None => default,
    }
}

fn payload_str_list(payload: &Map<String, Value>, key: &str) -> Vec<String> {
    match payload.get(key).and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

/// Registration data sent once per connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: String,
    pub description: String,
}

/// `execute_command` request. Absent or mistyped fields fall back to their
/// defaults; a malformed payload never fails the whole command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCommandRequest {
    pub session_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: String,
    pub timeout_secs: u64,
}

impl ExecuteCommandRequest {
    pub const DEFAULT_WORKING_DIR: &'static str = "/tmp";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            session_id: payload_str(payload, "sessionId", ""),
            command: payload_str(payload, "command", ""),
            args: payload_str_list(payload, "args"),
            working_dir: payload_str(payload, "workingDir", Self::DEFAULT_WORKING_DIR),
            timeout_secs: payload_u64(payload, "timeout", Self::DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// `read_log` request. `lines` is carried for wire compatibility but the
/// chunk size is fixed by the streaming pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLogRequest {
    pub session_id: String,
    pub path: String,
    pub mode: String,
    pub lines: u64,
}

impl ReadLogRequest {
    pub const DEFAULT_PATH: &'static str = "/var/log/syslog";
    pub const DEFAULT_MODE: &'static str = "smart";
    pub const DEFAULT_LINES: u64 = 1000;

    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            session_id: payload_str(payload, "sessionId", ""),
            path: payload_str(payload, "path", Self::DEFAULT_PATH),
            mode: payload_str(payload, "mode", Self::DEFAULT_MODE),
            lines: payload_u64(payload, "lines", Self::DEFAULT_LINES),
        }
    }
}

/// Output chunk for `command_output` and `command_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub session_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandComplete {
    pub session_id: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogChunk {
    pub session_id: String,
    pub chunk: String,
    pub progress: f64,
    pub current_line: usize,
    pub total_lines: usize,
    pub chunk_number: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogComplete {
    pub session_id: String,
    pub total_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("message serialize failed: {0}")]
    Serialize(String),
    #[error("transport send failed: {0}")]
    Transport(String),
}

/// Anything that accepts one outbound message. The execution and streaming
/// pipelines depend on this seam instead of a concrete transport.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn emit(&self, kind: MessageKind, data: Value) -> Result<(), SinkError>;

    async fn emit_payload<T: Serialize + Sync>(
        &self,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), SinkError> {
        let data =
            serde_json::to_value(payload).map_err(|err| SinkError::Serialize(err.to_string()))?;
        self.emit(kind, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_envelope_uses_wire_names_and_omits_empty_data() {
        let message = OutboundMessage::new(MessageKind::Heartbeat, "mate-01");
        let encoded = serde_json::to_value(&message).expect("encode");
        assert_eq!(encoded["type"], "heartbeat");
        assert_eq!(encoded["mate_id"], "mate-01");
        assert!(encoded.get("data").is_none());
        assert!(encoded.get("timestamp").is_some());

        let with_data = OutboundMessage::with_data(
            MessageKind::Register,
            "mate-01",
            json!({"name": "office-box", "description": "rack 3"}),
        );
        let encoded = serde_json::to_value(&with_data).expect("encode");
        assert_eq!(encoded["type"], "register");
        assert_eq!(encoded["data"]["name"], "office-box");
    }

    #[test]
    fn inbound_command_decodes_without_payload_or_timestamp() {
        let command: InboundCommand = serde_json::from_str(r#"{"type": "ping"}"#).expect("decode");
        assert_eq!(command.kind(), CommandKind::Ping);
        assert!(command.payload.is_empty());
        assert!(command.timestamp.is_none());
    }

    #[test]
    fn command_kind_maps_unrecognized_types_to_unknown() {
        assert_eq!(CommandKind::from_type("execute_command"), CommandKind::ExecuteCommand);
        assert_eq!(CommandKind::from_type("read_log"), CommandKind::ReadLog);
        assert_eq!(CommandKind::from_type("reboot"), CommandKind::Unknown);
        assert_eq!(CommandKind::from_type(""), CommandKind::Unknown);
    }

    #[test]
    fn execute_request_defaults_missing_and_mistyped_fields() {
        let payload = json!({
            "sessionId": 42,
            "command": "df",
            "args": ["-h", 7, "/var", null],
            "timeout": "soon"
        });
        let Value::Object(payload) = payload else {
            unreachable!()
        };
        let request = ExecuteCommandRequest::from_payload(&payload);
        assert_eq!(request.session_id, "");
        assert_eq!(request.command, "df");
        assert_eq!(request.args, vec!["-h".to_string(), "/var".to_string()]);
        assert_eq!(request.working_dir, "/tmp");
        assert_eq!(request.timeout_secs, 300);
    }

    #[test]
    fn execute_request_accepts_float_timeout() {
        let payload = json!({"timeout": 42.0});
        let Value::Object(payload) = payload else {
            unreachable!()
        };
        let request = ExecuteCommandRequest::from_payload(&payload);
        assert_eq!(request.timeout_secs, 42);
    }

    #[test]
    fn read_log_request_defaults() {
        let request = ReadLogRequest::from_payload(&Map::new());
        assert_eq!(request.session_id, "");
        assert_eq!(request.path, "/var/log/syslog");
        assert_eq!(request.mode, "smart");
        assert_eq!(request.lines, 1000);
    }

    #[test]
    fn command_payloads_use_camel_case_wire_names() {
        let complete = CommandComplete {
            session_id: "s-1".to_string(),
            exit_code: 127,
        };
        let encoded = serde_json::to_value(&complete).expect("encode");
        assert_eq!(encoded["sessionId"], "s-1");
        assert_eq!(encoded["exitCode"], 127);

        let chunk = LogChunk {
            session_id: "s-1".to_string(),
            chunk: "line".to_string(),
            progress: 50.0,
            current_line: 1000,
            total_lines: 2000,
            chunk_number: 1,
            total_chunks: 2,
        };
        let encoded = serde_json::to_value(&chunk).expect("encode");
        assert_eq!(encoded["currentLine"], 1000);
        assert_eq!(encoded["totalChunks"], 2);
    }
}
