use crate::transport::emit_or_warn;
use chrono::Utc;
use mate_core::{
    logfilter, ChunkPlan, LogChunk, LogComplete, LogMode, MessageKind, MessageSink, ReadLogRequest,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Spacing between chunk emissions; keeps one large transfer from saturating
/// the shared connection.
const CHUNK_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LogReadError {
    #[error("failed to read log file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Streams one log file as an ordered sequence of `log_data` chunks followed
/// by one `log_complete`. An unreadable file is an error to the caller and
/// produces no messages at all.
pub async fn handle_read_log<S: MessageSink>(
    request: ReadLogRequest,
    mate_id: &str,
    sink: &S,
) -> Result<(), LogReadError> {
    info!(event = "read_log", path = %request.path, mode = %request.mode);

    let raw = tokio::fs::read(&request.path)
        .await
        .map_err(|source| LogReadError::Read {
            path: request.path.clone(),
            source,
        })?;
    // A stray invalid byte must not fail the whole transfer.
    let content = String::from_utf8_lossy(&raw);

    let session_id = if request.session_id.is_empty() {
        // Backward-compatibility fallback for Navigators that predate
        // caller-assigned session ids.
        let generated = format!("{}-{}", mate_id, Utc::now().timestamp_millis());
        warn!(event = "session_id_missing", generated = %generated);
        generated
    } else {
        request.session_id.clone()
    };

    let lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    info!(event = "log_loaded", lines = lines.len(), session = %session_id);

    let filtered = logfilter::filter_lines(LogMode::from_mode(&request.mode), lines);
    let plan = ChunkPlan::new(filtered.len());
    let total_chunks = plan.total_chunks();

    for chunk in plan.iter() {
        emit_or_warn(
            sink,
            MessageKind::LogData,
            &LogChunk {
                session_id: session_id.clone(),
                chunk: filtered[chunk.start..chunk.end].join("\n"),
                progress: chunk.progress,
                current_line: chunk.end,
                total_lines: plan.total_lines(),
                chunk_number: chunk.number,
                total_chunks,
            },
        )
        .await;
        tokio::time::sleep(CHUNK_DELAY).await;
    }

    emit_or_warn(
        sink,
        MessageKind::LogComplete,
        &LogComplete {
            session_id: session_id.clone(),
            total_size: plan.total_lines(),
        },
    )
    .await;
    info!(
        event = "log_transfer_complete",
        session = %session_id,
        lines = plan.total_lines(),
        chunks = total_chunks,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use std::io::Write;

    fn log_request(path: &str, mode: &str, session_id: &str) -> ReadLogRequest {
        ReadLogRequest {
            session_id: session_id.to_string(),
            path: path.to_string(),
            mode: mode.to_string(),
            lines: 1000,
        }
    }

    fn write_log(lines: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        let content: Vec<String> = (0..lines).map(|n| format!("entry {n}")).collect();
        file.write_all(content.join("\n").as_bytes()).expect("write");
        file
    }

    #[tokio::test]
    async fn chunking_is_lossless_and_order_preserving() {
        let file = write_log(2500);
        let sink = RecordingSink::new();
        handle_read_log(
            log_request(&file.path().to_string_lossy(), "full", "session-9"),
            "mate-01",
            &sink,
        )
        .await
        .expect("stream");

        let messages = sink.take().await;
        assert_eq!(messages.len(), 4); // 3 chunks + complete
        let chunks: Vec<_> = messages
            .iter()
            .filter(|(kind, _)| *kind == MessageKind::LogData)
            .collect();
        assert_eq!(chunks.len(), 3);

        let mut reassembled = Vec::new();
        for (index, (_, data)) in chunks.iter().enumerate() {
            assert_eq!(data["sessionId"], "session-9");
            assert_eq!(data["chunkNumber"], index as u64 + 1);
            assert_eq!(data["totalChunks"], 3);
            assert_eq!(data["totalLines"], 2500);
            reassembled.push(data["chunk"].as_str().unwrap_or_default().to_string());
        }
        let original: Vec<String> = (0..2500).map(|n| format!("entry {n}")).collect();
        assert_eq!(reassembled.join("\n"), original.join("\n"));

        assert_eq!(chunks[2].1["currentLine"], 2500);
        assert!((chunks[2].1["progress"].as_f64().unwrap_or_default() - 100.0).abs() < 1e-9);

        let (kind, complete) = &messages[3];
        assert_eq!(*kind, MessageKind::LogComplete);
        assert_eq!(complete["totalSize"], 2500);
    }

    #[tokio::test]
    async fn errors_only_without_matches_streams_the_notice_line() {
        let file = write_log(10);
        let sink = RecordingSink::new();
        handle_read_log(
            log_request(&file.path().to_string_lossy(), "errors-only", "session-2"),
            "mate-01",
            &sink,
        )
        .await
        .expect("stream");

        let messages = sink.take().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, MessageKind::LogData);
        assert_eq!(messages[0].1["chunk"], logfilter::NO_ERRORS_NOTICE);
        assert_eq!(messages[0].1["totalLines"], 1);
        assert_eq!(messages[1].1["totalSize"], 1);
    }

    #[tokio::test]
    async fn missing_session_id_synthesizes_one_from_the_mate_id() {
        let file = write_log(3);
        let sink = RecordingSink::new();
        handle_read_log(
            log_request(&file.path().to_string_lossy(), "full", ""),
            "mate-42",
            &sink,
        )
        .await
        .expect("stream");

        let messages = sink.take().await;
        let session = messages[0].1["sessionId"].as_str().unwrap_or_default();
        assert!(session.starts_with("mate-42-"), "got: {session}");
        // Every message of the transfer carries the same generated id.
        for (_, data) in &messages {
            assert_eq!(data["sessionId"], session);
        }
    }

    #[tokio::test]
    async fn unreadable_file_fails_without_emitting_messages() {
        let sink = RecordingSink::new();
        let result = handle_read_log(
            log_request("/nonexistent/mate-test.log", "full", "session-3"),
            "mate-01",
            &sink,
        )
        .await;
        assert!(matches!(result, Err(LogReadError::Read { .. })));
        assert!(sink.take().await.is_empty());
    }
}
