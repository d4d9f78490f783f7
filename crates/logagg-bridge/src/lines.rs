//! Newline framing over arbitrary chunk boundaries.

/// Longest unterminated line held back before it is cut.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Reassembles `\n`-terminated lines from a chunked byte stream.
///
/// A chunk may end mid-line (or mid UTF-8 sequence); the tail is held back
/// until the rest arrives. A trailing `\r` is stripped. Invalid UTF-8 is
/// replaced rather than rejected, since the bridge relays whatever
/// producers wrote.
///
/// An unterminated line never buffers more than `max_line` bytes: once it
/// reaches that size it is emitted as it stands and the remainder starts a
/// new line.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Feed a chunk, returning every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(self.take_pending());
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        while self.pending.len() >= self.max_line {
            let tail = self.pending.split_off(self.max_line);
            lines.push(self.take_pending());
            self.pending = tail;
        }
        lines
    }

    /// Flush an unterminated final line once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending())
        }
    }

    fn take_pending(&mut self) -> String {
        let mut raw = std::mem::take(&mut self.pending);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        String::from_utf8_lossy(&raw).into_owned()
    }
}
