//! Stream transport decoder.
//!
//! The streaming inference endpoint emits newline-delimited lines; event
//! lines carry a `data: ` marker followed by a JSON payload. Chunks
//! arrive at arbitrary byte boundaries, so incomplete trailing bytes are
//! carried between reads and lines are only decoded once their
//! terminating newline has arrived. Lines without the marker
//! (keep-alives, comments, blanks) are ignored.
//!
//! The decoder is terminal-event aware: it ends the stream immediately
//! after yielding `done`, maps a server `error` event to
//! `ChatError::Transport`, and reports a source that runs dry without a
//! terminal event as `ChatError::Protocol`. A fired cancellation token
//! wins over a ready chunk and surfaces as `ChatError::Cancelled`.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use parlance_core::chat::EventStream;
use parlance_types::error::ChatError;
use parlance_types::protocol::StreamEvent;

const EVENT_MARKER: &str = "data: ";

/// Decode one framed line into an event.
///
/// Returns `Ok(None)` for lines without the `data: ` marker. A marker
/// line that fails to decode is a protocol error: skipping it silently
/// could swallow a terminal event and leave the consumer waiting.
fn decode_line(line: &[u8]) -> Result<Option<StreamEvent>, ChatError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line)
        .map_err(|err| ChatError::Protocol(format!("event line is not valid UTF-8: {err}")))?;
    let Some(payload) = text.strip_prefix(EVENT_MARKER) else {
        return Ok(None);
    };
    let event = serde_json::from_str(payload)
        .map_err(|err| ChatError::Protocol(format!("malformed event payload: {err}")))?;
    Ok(Some(event))
}

/// Decode a byte-chunk source into an [`EventStream`].
///
/// `source` is consumed lazily; nothing is read until the returned
/// stream is polled.
pub fn decode_event_stream<S>(source: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<Bytes, ChatError>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut carry: Vec<u8> = Vec::new();
        let mut source = std::pin::pin!(source);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(ChatError::Cancelled)),
                next = source.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => Err(err)?,
                None => break,
            };
            carry.extend_from_slice(&chunk);
            while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = carry.drain(..=pos).collect();
                match decode_line(&line[..line.len() - 1])? {
                    None => {}
                    Some(StreamEvent::Error { message }) => {
                        Err(ChatError::Transport(message))?;
                    }
                    Some(done @ StreamEvent::Done { .. }) => {
                        yield done;
                        return;
                    }
                    Some(event) => yield event,
                }
            }
        }
        // A final line may arrive without its newline when the server
        // closes the connection right after the terminal event.
        if !carry.is_empty() {
            match decode_line(&carry)? {
                Some(StreamEvent::Error { message }) => {
                    Err(ChatError::Transport(message))?;
                }
                Some(done @ StreamEvent::Done { .. }) => {
                    yield done;
                    return;
                }
                Some(event) => yield event,
                None => {}
            }
        }
        Err(ChatError::Protocol(
            "stream ended without a terminal event".to_string(),
        ))?;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, ChatError>> + Send + 'static {
        let owned: Vec<Result<Bytes, ChatError>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(owned)
    }

    async fn collect(stream: EventStream) -> Vec<Result<StreamEvent, ChatError>> {
        stream.collect().await
    }

    fn done_line() -> &'static [u8] {
        b"data: {\"type\": \"done\", \"assistant_message_id\": 7, \"full_response\": \"hi\"}\n"
    }

    #[tokio::test]
    async fn test_decodes_events_split_across_chunks() {
        let source = chunks(&[
            b"data: {\"type\": \"start\", \"session_id\": 1,",
            b" \"user_message_id\": 2}\ndata: {\"type\": \"tok",
            b"en\", \"content\": \"hi\"}\n",
            done_line(),
        ]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Start {
                session_id: 1,
                user_message_id: 2
            })
        ));
        assert!(
            matches!(&events[1], Ok(StreamEvent::Token { content }) if content == "hi")
        );
        assert!(matches!(
            events[2],
            Ok(StreamEvent::Done {
                assistant_message_id: 7,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_chunk_boundary_inside_multibyte_character() {
        // "é" is 0xC3 0xA9; split between the two bytes.
        let line = "data: {\"type\": \"token\", \"content\": \"é\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let source = chunks(&[&line[..split], &line[split..], done_line()]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert!(
            matches!(&events[0], Ok(StreamEvent::Token { content }) if content == "é")
        );
    }

    #[tokio::test]
    async fn test_ignores_lines_without_marker() {
        let source = chunks(&[b": keep-alive\n\nevent: ping\n", done_line()]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_stream_ends_after_done() {
        let mut trailing = done_line().to_vec();
        trailing.extend_from_slice(b"data: {\"type\": \"token\", \"content\": \"late\"}\n");
        let source = chunks(&[&trailing]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_terminal_event_without_trailing_newline() {
        let line = done_line();
        let source = chunks(&[&line[..line.len() - 1]]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let source = chunks(&[
            b"data: {\"type\": \"token\", \"content\": \"a\"}\r\n",
            b"data: {\"type\": \"done\", \"assistant_message_id\": 7, \"full_response\": \"a\"}\r\n",
        ]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Token { content }) if content == "a"));
        assert!(matches!(events[1], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_error_event_becomes_transport_error() {
        let source = chunks(&[
            b"data: {\"type\": \"token\", \"content\": \"a\"}\n",
            b"data: {\"type\": \"error\", \"message\": \"model overloaded\"}\n",
        ]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[1], Err(ChatError::Transport(msg)) if msg == "model overloaded")
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_protocol_error() {
        let source = chunks(&[b"data: {not json}\n"]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(ChatError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_source_exhausted_without_terminal_event() {
        let source = chunks(&[b"data: {\"type\": \"token\", \"content\": \"a\"}\n"]);
        let events = collect(decode_event_stream(source, CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::Token { .. })));
        assert!(matches!(events[1], Err(ChatError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_source() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = stream::pending::<Result<Bytes, ChatError>>();
        let mut stream = decode_event_stream(source, cancel);
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(ChatError::Cancelled))));
    }
}
