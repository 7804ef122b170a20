/// Accumulates raw bytes from an event stream and yields complete event blocks.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next block terminated by a blank line. Splitting on bytes keeps
    /// multi-byte characters that straddle two chunks intact.
    pub fn next_event_block(&mut self) -> Option<String> {
        let (end, separator) = find_boundary(&self.buffer)?;
        let rest = self.buffer.split_off(end + separator);
        let mut block = std::mem::replace(&mut self.buffer, rest);
        block.truncate(end);
        Some(String::from_utf8_lossy(&block).into_owned())
    }

    /// Whatever is left once the connection closes; a final event without
    /// its trailing blank line is still dispatched.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
            self.buffer.clear();
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&block).into_owned())
    }
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parses one event block. Returns `None` for blocks without data lines
/// (comments, keep-alives, retry hints).
pub fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                event = Some(value.trim().to_string());
            }
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

impl SseEvent {
    /// Explicit end-of-stream marker. Servers are not required to send one.
    pub fn is_end_sentinel(&self) -> bool {
        matches!(self.event.as_deref(), Some("done") | Some("end")) || self.data == "[DONE]"
    }
}
