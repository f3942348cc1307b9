use bytes::BytesMut;

/// Splits a streamed byte sequence into newline-delimited lines across
/// chunk boundaries.
pub(crate) struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Feeds one chunk, returns every complete line it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                let len = line.len();
                line.truncate(len - 1);
            }
            if line.is_empty() {
                continue;
            }
            if let Ok(text) = std::str::from_utf8(&line) {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream ended (a final unterminated line).
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        std::str::from_utf8(&rest)
            .ok()
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    }
}
