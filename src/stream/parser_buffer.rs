//! Spec §4.7: the cursor a parser pulls bytes through. Where CPython's
//! `tulip.parsers.ParserBuffer` is a coroutine that `yield`s to request more
//! input, this is a plain cursor over accumulated chunks; a parser
//! (`Parser` in `parsers.rs`) instead returns [`ParserOutcome::NeedMore`]
//! from its own step function when this buffer can't satisfy the request,
//! and the driver (`StreamBuffer`) simply calls it again once more bytes
//! or EOF arrive. Same contract, no generator required.

use std::collections::VecDeque;

/// An accumulating byte cursor. Bytes are appended at the tail (`feed`) and
/// consumed from the head (`take*`); unconsumed bytes persist across calls
/// so a parser can be driven by arbitrarily small chunks without losing its
/// place — the round-trip law from spec §4.7.
#[derive(Default)]
pub struct ParserBuffer {
    chunks: VecDeque<u8>,
    eof: bool,
}

impl ParserBuffer {
    pub fn new() -> ParserBuffer {
        ParserBuffer::default()
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.chunks.extend(data.iter().copied());
    }

    pub(crate) fn feed_eof(&mut self) {
        self.eof = true;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn at_eof(&self) -> bool {
        self.eof && self.chunks.is_empty()
    }

    /// Removes and returns exactly `n` bytes, or `None` if fewer than `n`
    /// are currently buffered (the parser should return `NeedMore`).
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.chunks.len() < n {
            return None;
        }
        Some(self.chunks.drain(..n).collect())
    }

    /// Removes and returns bytes up to and including the first occurrence
    /// of `delim`, or `None` if `delim` hasn't appeared yet.
    pub fn take_until(&mut self, delim: u8) -> Option<Vec<u8>> {
        let pos = self.chunks.iter().position(|&b| b == delim)?;
        Some(self.chunks.drain(..=pos).collect())
    }

    /// Returns a copy of everything buffered so far without consuming it —
    /// used by parsers that want to inspect before committing to a length
    /// (e.g. scanning for a header terminator).
    pub fn peek_all(&self) -> Vec<u8> {
        self.chunks.iter().copied().collect()
    }

    /// Drains everything currently buffered, regardless of framing. Used
    /// when a parser gives up mid-stream and wants to hand the remainder
    /// back verbatim.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.chunks.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_none_when_not_enough_buffered() {
        let mut buf = ParserBuffer::new();
        buf.feed(b"ab");
        assert_eq!(buf.take(5), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn take_consumes_from_the_head() {
        let mut buf = ParserBuffer::new();
        buf.feed(b"hello world");
        assert_eq!(buf.take(5), Some(b"hello".to_vec()));
        assert_eq!(buf.take(6), Some(b" world".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn take_until_finds_delimiter_across_feeds() {
        let mut buf = ParserBuffer::new();
        buf.feed(b"line1\nline");
        buf.feed(b"2\nrest");
        assert_eq!(buf.take_until(b'\n'), Some(b"line1\n".to_vec()));
        assert_eq!(buf.take_until(b'\n'), Some(b"line2\n".to_vec()));
        assert_eq!(buf.take_until(b'\n'), None);
        assert_eq!(buf.peek_all(), b"rest".to_vec());
    }

    #[test]
    fn at_eof_requires_both_flag_and_empty_buffer() {
        let mut buf = ParserBuffer::new();
        buf.feed(b"x");
        buf.feed_eof();
        assert!(!buf.at_eof());
        buf.take(1);
        assert!(buf.at_eof());
    }

    #[test]
    fn take_all_drains_regardless_of_framing() {
        let mut buf = ParserBuffer::new();
        buf.feed(b"no delimiter here");
        let all = buf.take_all();
        assert_eq!(all, b"no delimiter here".to_vec());
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_law_holds_for_arbitrary_splits() {
        // Spec §4.7 round-trip law: driving with arbitrarily small chunks
        // must produce the same framed output as driving with the whole
        // byte sequence at once.
        let whole = b"line1\r\nline2\r\ndata".to_vec();

        let mut one_shot = ParserBuffer::new();
        one_shot.feed(&whole);
        let mut chunked = ParserBuffer::new();
        for byte in &whole {
            chunked.feed(std::slice::from_ref(byte));
        }

        let mut one_shot_lines = Vec::new();
        while let Some(line) = one_shot.take_until(b'\n') {
            one_shot_lines.push(line);
        }
        let mut chunked_lines = Vec::new();
        while let Some(line) = chunked.take_until(b'\n') {
            chunked_lines.push(line);
        }

        assert_eq!(one_shot_lines, chunked_lines);
        assert_eq!(one_shot.peek_all(), chunked.peek_all());
        assert_eq!(one_shot.peek_all(), b"data".to_vec());
    }
}
