//! Server-Sent Events decoding
//!
//! Turns the raw byte chunks of an `text/event-stream` response into
//! frames. Lines are split on `\n` (a trailing `\r` is dropped), `data:`
//! lines of one frame are joined with `\n`, a blank line ends the frame and
//! lines starting with `:` are comments.

/// One dispatched SSE frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some("error")
    }
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of an incomplete line
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush a final frame that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // `id` and `retry` carry nothing the session uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}
