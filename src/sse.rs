//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! Chat-completion servers answer a streaming request with a sequence of
//! `data: {json}` events separated by blank lines, terminated by `data: [DONE]`.
//! This module turns the raw byte stream into a stream of parsed chunks.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::Result;
use crate::error::Error;
use crate::observability::{STREAM_BYTES, STREAM_CHUNKS, STREAM_ERRORS};
use crate::types::ChatCompletionChunk;

const DONE_SENTINEL: &str = "[DONE]";

/// What a single SSE event turned out to hold.
#[derive(Debug)]
enum SseEvent {
    Chunk(Result<ChatCompletionChunk>),
    Done,
    Ignored,
}

/// Process a stream of bytes into a stream of chat-completion chunks.
///
/// The returned stream ends at `data: [DONE]` or when the byte stream ends,
/// whichever comes first.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<ChatCompletionChunk>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, Vec::<u8>::new(), false),
        |(mut stream, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(event) = extract_event(&mut buffer) {
                    match event {
                        SseEvent::Chunk(chunk) => {
                            if chunk.is_err() {
                                STREAM_ERRORS.click();
                            } else {
                                STREAM_CHUNKS.click();
                            }
                            return Some((chunk, (stream, buffer, false)));
                        }
                        SseEvent::Done => return None,
                        SseEvent::Ignored => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        // Carriage returns only ever end lines; JSON escapes them in strings.
                        buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A final event may arrive without its trailing blank line.
                        if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                            buffer.extend_from_slice(b"\n\n");
                            if let Some(SseEvent::Chunk(chunk)) = extract_event(&mut buffer) {
                                return Some((chunk, (stream, Vec::new(), true)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Remove one complete SSE event from the front of `buffer`.
///
/// Events are delimited by a blank line and split at the byte level, so a
/// multi-byte character cut between two reads is decoded only once whole.
/// Only `data:` lines matter; comments (`:`-prefixed keep-alives) and
/// `event:`/`id:` fields are ignored.
fn extract_event(buffer: &mut Vec<u8>) -> Option<SseEvent> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let raw: Vec<u8> = buffer.drain(..end + 2).take(end).collect();
    let event_text = match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            return Some(SseEvent::Chunk(Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            ))));
        }
    };

    let data = event_text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return Some(SseEvent::Ignored);
    }
    if data == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    let chunk = serde_json::from_str::<ChatCompletionChunk>(&data).map_err(|e| {
        Error::serialization(
            format!("Malformed SSE data '{data}': {e}"),
            Some(Box::new(e)),
        )
    });
    Some(SseEvent::Chunk(chunk))
}
