//! Frame-delimited SSE parsing.
//!
//! The splitter is byte-preserving: every emitted frame includes its
//! trailing delimiter, so concatenating the frames reproduces the input
//! stream exactly. Translation and usage extraction parse frames into
//! `(event, data)` pairs; passthrough forwards the raw frames untouched.

use bytes::{Bytes, BytesMut};

/// Locate the earliest frame delimiter (`\n\n` or `\r\n\r\n`).
/// Returns `(position, delimiter_len)`.
pub fn find_sse_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subslice(buf, b"\n\n");
    let crlf = find_subslice(buf, b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Accumulates upstream chunks and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, delimiter included.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let (pos, delim) = find_sse_delimiter(&self.buf)?;
        Some(self.buf.split_to(pos + delim).freeze())
    }

    /// Drain whatever is left after the stream ends (a final frame with
    /// no trailing delimiter).
    pub fn take_remainder(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// A parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Parse a raw frame into `(event, data)`. Returns `None` for frames
/// with no data lines (comments, bare `event:` keep-alives).
pub fn parse_frame(frame: &[u8]) -> Option<SseFrame> {
    let text = std::str::from_utf8(frame).ok()?;
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // id: and retry: fields are ignored
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Render a frame in the standard `event: …\ndata: …\n\n` shape.
/// Multi-line data is split into one `data:` line per line.
pub fn encode_frame(event: Option<&str>, data: &str) -> String {
    let mut out = String::new();
    if let Some(ev) = event {
        out.push_str("event: ");
        out.push_str(ev);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_lf() {
        assert_eq!(find_sse_delimiter(b"data: x\n\nrest"), Some((7, 2)));
        assert_eq!(find_sse_delimiter(b"data: x"), None);
    }

    #[test]
    fn test_delimiter_crlf() {
        assert_eq!(find_sse_delimiter(b"data: x\r\n\r\nrest"), Some((7, 4)));
    }

    #[test]
    fn test_delimiter_earliest_wins() {
        // LF frame before a CRLF frame
        let buf = b"a\n\nb\r\n\r\n";
        assert_eq!(find_sse_delimiter(buf), Some((1, 2)));
    }

    #[test]
    fn test_split_concat_identity() {
        let input = b"event: a\ndata: 1\n\ndata: 2\r\n\r\n: comment\n\ndata: 3";
        let mut fb = FrameBuffer::new();
        fb.push(input);

        let mut out = Vec::new();
        while let Some(frame) = fb.next_frame() {
            out.extend_from_slice(&frame);
        }
        if let Some(rest) = fb.take_remainder() {
            out.extend_from_slice(&rest);
        }
        assert_eq!(out, input);
    }

    #[test]
    fn test_frames_across_chunks() {
        let mut fb = FrameBuffer::new();
        fb.push(b"data: hel");
        assert!(fb.next_frame().is_none());
        fb.push(b"lo\n\ndata: world\n\n");

        let f1 = fb.next_frame().unwrap();
        assert_eq!(&f1[..], b"data: hello\n\n");
        let f2 = fb.next_frame().unwrap();
        assert_eq!(&f2[..], b"data: world\n\n");
        assert!(fb.next_frame().is_none());
    }

    #[test]
    fn test_parse_frame_basic() {
        let f = parse_frame(b"data: {\"x\":1}\n\n").unwrap();
        assert!(f.event.is_none());
        assert_eq!(f.data, "{\"x\":1}");
    }

    #[test]
    fn test_parse_frame_with_event() {
        let f = parse_frame(b"event: message_start\ndata: {}\n\n").unwrap();
        assert_eq!(f.event.as_deref(), Some("message_start"));
        assert_eq!(f.data, "{}");
    }

    #[test]
    fn test_parse_frame_multiline_data() {
        let f = parse_frame(b"data: line1\ndata: line2\n\n").unwrap();
        assert_eq!(f.data, "line1\nline2");
    }

    #[test]
    fn test_parse_frame_comment_only() {
        assert!(parse_frame(b": keep-alive\n\n").is_none());
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode_frame(None, "[DONE]"), "data: [DONE]\n\n");
        assert_eq!(
            encode_frame(Some("message_stop"), "{}"),
            "event: message_stop\ndata: {}\n\n"
        );
    }
}
