//! Paced mock stream emitter.
//!
//! Turns two static texts into a sequence of SSE-style events, flushed one
//! by one with a fixed inter-chunk delay to emulate token-paced generation.

use crate::response::{ResponseSink, SinkError};
use bytes::Bytes;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Delta field carrying the reasoning text.
pub const REASONING_FIELD: &str = "reasoning_content";
/// Delta field carrying the main text.
pub const CONTENT_FIELD: &str = "content";
/// Terminal sentinel closing a non-raw stream.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Fixed pause between chunks.
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(200);

/// Emit the full mock stream: reasoning text, then content text, then the
/// completion sentinel.
///
/// Exactly one sentinel is written per completed non-raw dispatch, even when
/// both texts yielded zero chunks. Raw mode writes bare lines and no
/// sentinel. A [`SinkError::Disconnected`] from the sink aborts the
/// remaining pacing loop.
pub async fn emit_stream<S: ResponseSink>(
    sink: &mut S,
    thinking: &str,
    content: &str,
    raw_mode: bool,
    interval: Duration,
) -> Result<(), SinkError> {
    emit_field(sink, thinking, REASONING_FIELD, raw_mode, interval).await?;
    emit_field(sink, content, CONTENT_FIELD, raw_mode, interval).await?;

    if !raw_mode {
        sink.write_chunk(Bytes::from(format!("data: {DONE_SENTINEL}\n")))
            .await?;
        flush(sink).await?;
    }
    Ok(())
}

/// Emit one text as a series of chunks under the given delta field.
///
/// The text is split at newline boundaries, each piece keeping its trailing
/// newline; a text without a trailing newline still yields its last segment,
/// and an empty text yields nothing.
pub async fn emit_field<S: ResponseSink>(
    sink: &mut S,
    text: &str,
    field: &str,
    raw_mode: bool,
    interval: Duration,
) -> Result<(), SinkError> {
    for chunk in text.split_inclusive('\n') {
        let bytes = if raw_mode {
            let mut line = String::with_capacity(chunk.len() + 1);
            line.push_str(chunk);
            line.push('\n');
            Bytes::from(line)
        } else {
            Bytes::from(format!("data: {}\n", encode_delta(field, chunk)?))
        };

        sink.write_chunk(bytes).await?;
        flush(sink).await?;
        sleep(interval).await;
    }
    Ok(())
}

/// `{"choices":[{"delta":{<field>:<chunk>}}]}` serialized to a single line.
fn encode_delta(field: &str, chunk: &str) -> Result<String, SinkError> {
    let mut delta = serde_json::Map::new();
    delta.insert(field.to_string(), Value::String(chunk.to_string()));
    let event = json!({ "choices": [{ "delta": delta }] });
    let encoded = serde_json::to_string(&event)?;
    debug!(field, len = chunk.len(), "emitting mock chunk");
    Ok(encoded)
}

async fn flush<S: ResponseSink>(sink: &mut S) -> Result<(), SinkError> {
    match sink.as_flush() {
        Some(flush) => flush.flush().await,
        None => Ok(()),
    }
}
