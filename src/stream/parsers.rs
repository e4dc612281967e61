//! Concrete parsers obeying the `Parser` contract from spec §4.7: pull
//! bytes through a [`ParserBuffer`], emit framed items into a
//! [`DataBuffer`], and decide for themselves how to react to EOF (surface
//! it verbatim, translate it into an error, or quietly finish with
//! whatever's left).

use crate::error::Error;
use crate::stream::data_buffer::DataBuffer;
use crate::stream::parser_buffer::ParserBuffer;

/// What the driver should do after one `step` call.
pub enum ParserOutcome {
    /// Keep calling `step` — more items may already be extractable from
    /// buffered bytes.
    Progress,
    /// Nothing more can be produced until new bytes (or EOF) arrive.
    NeedMore,
    /// The parser is done; the driver detaches it (spec §4.7: "parser
    /// terminates normally").
    Done,
}

/// A restartable, cooperative parser. `step` is called by the driver
/// repeatedly with fresh bytes already appended to `buf`; `on_eof` is
/// called once, at most, when the driver observes end of stream.
pub trait Parser<T> {
    fn step(&mut self, buf: &mut ParserBuffer, out: &mut DataBuffer<T>) -> ParserOutcome;

    /// Spec §4.7: "the parser may either propagate (`feed_eof`), swallow
    /// and translate (`set_exception`), or emit remaining items and exit."
    /// Default propagates.
    fn on_eof(&mut self, _buf: &mut ParserBuffer, out: &mut DataBuffer<T>) {
        out.feed_eof();
    }
}

/// Splits on `\n`, keeping the line's terminator (`\r\n` or `\n`) in the
/// emitted bytes. Lines longer than `max_line`, terminator included, are
/// reported as a parse error rather than buffered forever (spec §4.8:
/// "line too long").
pub struct LineParser {
    max_line: usize,
}

impl LineParser {
    pub fn new(max_line: usize) -> LineParser {
        LineParser { max_line }
    }
}

impl Parser<Vec<u8>> for LineParser {
    fn step(&mut self, buf: &mut ParserBuffer, out: &mut DataBuffer<Vec<u8>>) -> ParserOutcome {
        match buf.take_until(b'\n') {
            Some(line) => {
                out.feed_data(line);
                ParserOutcome::Progress
            }
            None => {
                if buf.len() > self.max_line {
                    out.set_exception(Error::Parse(format!(
                        "line exceeds {} bytes with no terminator",
                        self.max_line
                    )));
                    return ParserOutcome::Done;
                }
                ParserOutcome::NeedMore
            }
        }
    }
}

/// Emits fixed-size chunks, with the final short chunk (if any) flushed on
/// EOF rather than discarded.
pub struct ChunkParser {
    size: usize,
}

impl ChunkParser {
    pub fn new(size: usize) -> ChunkParser {
        assert!(size > 0, "chunk size must be nonzero");
        ChunkParser { size }
    }
}

impl Parser<Vec<u8>> for ChunkParser {
    fn step(&mut self, buf: &mut ParserBuffer, out: &mut DataBuffer<Vec<u8>>) -> ParserOutcome {
        match buf.take(self.size) {
            Some(chunk) => {
                out.feed_data(chunk);
                ParserOutcome::Progress
            }
            None => ParserOutcome::NeedMore,
        }
    }

    fn on_eof(&mut self, buf: &mut ParserBuffer, out: &mut DataBuffer<Vec<u8>>) {
        let remainder = buf.take_all();
        if !remainder.is_empty() {
            out.feed_data(remainder);
        }
        out.feed_eof();
    }
}

/// Minimal HTTP/1.1 framing: splits the head (terminated by `\r\n\r\n`)
/// from the body, exposing only the raw header block and leaving body
/// interpretation (content-length, chunked, …) to the caller — a framing
/// parser, not an HTTP client/server (explicitly out of scope).
pub struct Http11HeadParser {
    done: bool,
}

impl Http11HeadParser {
    pub fn new() -> Http11HeadParser {
        Http11HeadParser { done: false }
    }
}

impl Default for Http11HeadParser {
    fn default() -> Http11HeadParser {
        Http11HeadParser::new()
    }
}

impl Parser<Vec<u8>> for Http11HeadParser {
    fn step(&mut self, buf: &mut ParserBuffer, out: &mut DataBuffer<Vec<u8>>) -> ParserOutcome {
        if self.done {
            return ParserOutcome::Done;
        }
        let snapshot = buf.peek_all();
        if let Some(pos) = find_subslice(&snapshot, b"\r\n\r\n") {
            let head_len = pos + 4;
            let head = buf.take(head_len).expect("position came from current buffer contents");
            out.feed_data(head);
            self.done = true;
            return ParserOutcome::Done;
        }
        ParserOutcome::NeedMore
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
