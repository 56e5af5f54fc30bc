//! Incremental Server-Sent-Events parser

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event type (`message` when the stream names none)
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Line-buffering parser fed with arbitrary chunks
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed a chunk and return every event it completed
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=pos).collect();
            let line = raw.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.data.is_empty() {
                    self.event = None;
                } else {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }

        events
    }

    /// Parse a complete SSE body
    pub fn parse_all(body: &str) -> Vec<SseEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(body);
        events.extend(parser.feed("\n\n"));
        events
    }
}
