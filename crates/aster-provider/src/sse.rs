//! Minimal SSE line handling shared by the streaming drivers.
//!
//! Format: `event: <type>\ndata: <json>\n\n`. OpenAI-style streams only use
//! `data:` lines; Anthropic streams use both.

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Parse a single SSE line. Blank lines and comments yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

/// Buffers raw network chunks and yields complete lines.
#[derive(Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data() {
        assert!(matches!(
            parse_sse_line("event: message_start"),
            Some(SseParsed::Event(e)) if e == "message_start"
        ));
        assert!(matches!(
            parse_sse_line("data: {\"x\":1}"),
            Some(SseParsed::Data(d)) if d == "{\"x\":1}"
        ));
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(": keepalive").is_none());
    }

    #[test]
    fn line_buffer_reassembles_split_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push("data: {\"a\"").is_empty());
        let lines = buf.push(":1}\ndata: done\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: done"]);
    }
}
