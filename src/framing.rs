use crate::error::FramingError;

/// Newline framing over an unbounded byte stream
///
/// Bytes accumulate until a `\n` arrives; each complete line is handed out
/// trimmed, and the unterminated tail stays buffered for the next feed.
/// Without `max_buffer_bytes` the tail can grow without limit if the sender
/// never emits a newline.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_buffer_bytes: Option<usize>,
    overflows: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    pub fn with_limit(max_buffer_bytes: Option<usize>) -> Self {
        LineFramer {
            buffer: Vec::with_capacity(256),
            max_buffer_bytes,
            overflows: 0,
        }
    }

    /// Append a chunk and iterate the complete lines now available.
    ///
    /// The iterator is lazy: lines it does not yield stay buffered and come
    /// out of the next `feed` (or `lines`) call.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(chunk);
        Lines { framer: self }
    }

    /// Iterate buffered lines without adding input
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Enforce the optional size limit on the newline-free remainder.
    ///
    /// Call after draining; a tripped guard discards the whole buffer.
    pub fn check_overflow(&mut self) -> Result<(), FramingError> {
        let Some(limit) = self.max_buffer_bytes else {
            return Ok(());
        };
        if self.buffer.len() <= limit || self.buffer.contains(&b'\n') {
            return Ok(());
        }
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.overflows += 1;
        log::warn!(
            "Line buffer exceeded {} bytes without a newline, discarded {} bytes",
            limit,
            discarded
        );
        Err(FramingError::BufferOverflow { limit, discarded })
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&line[..newline]);
        Some(text.trim().to_string())
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_record_across_feeds() {
        let mut framer = LineFramer::new();
        let mut lines: Vec<String> = framer.feed(b"5,1,0,0,0\n").collect();
        lines.extend(framer.feed(b"2,0,1,0"));
        lines.extend(framer.feed(b",0\n"));

        assert_eq!(lines, vec!["5,1,0,0,0".to_string(), "2,0,1,0,0".to_string()]);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_partial_tail_retained() {
        let mut framer = LineFramer::new();
        let lines: Vec<String> = framer.feed(b"0,1,0,0,0\n1,0.5").collect();
        assert_eq!(lines, vec!["0,1,0,0,0"]);
        assert_eq!(framer.buffered_len(), "1,0.5".len());
    }

    #[test]
    fn test_trims_carriage_returns_and_spaces() {
        let mut framer = LineFramer::new();
        let lines: Vec<String> = framer.feed(b"  1,0,0,0,1\r\n\r\n").collect();
        assert_eq!(lines, vec!["1,0,0,0,1".to_string(), String::new()]);
    }

    #[test]
    fn test_lazy_iteration_is_restartable() {
        let mut framer = LineFramer::new();
        {
            let mut lines = framer.feed(b"a\nb\nc\n");
            assert_eq!(lines.next().as_deref(), Some("a"));
        }
        let rest: Vec<String> = framer.feed(b"d\n").collect();
        assert_eq!(rest, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_unbounded_by_default() {
        let mut framer = LineFramer::new();
        let junk = vec![b'x'; 64 * 1024];
        assert_eq!(framer.feed(&junk).count(), 0);
        assert!(framer.check_overflow().is_ok());
        assert_eq!(framer.buffered_len(), junk.len());
    }

    #[test]
    fn test_overflow_guard_discards_buffer() {
        let mut framer = LineFramer::with_limit(Some(16));
        assert_eq!(framer.feed(b"0123456789abcdefXYZ").count(), 0);

        let err = framer.check_overflow().unwrap_err();
        assert_eq!(err, FramingError::BufferOverflow { limit: 16, discarded: 19 });
        assert_eq!(framer.buffered_len(), 0);
        assert_eq!(framer.overflow_count(), 1);

        // Stream recovers on the next well-formed line
        let lines: Vec<String> = framer.feed(b"0,1,0,0,0\n").collect();
        assert_eq!(lines, vec!["0,1,0,0,0"]);
    }
}
