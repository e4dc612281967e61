//! Spec §4.7's driver: routes incoming bytes either straight into a raw
//! [`ParserBuffer`] (when nothing is attached — the mode `StreamReader`
//! uses directly) or through an attached [`Parser`] into its
//! [`DataBuffer`], which is shared (`Rc<RefCell<_>>`) between the driver
//! and whoever is reading from it, since both sides append to / drain the
//! same queue.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::stream::data_buffer::DataBuffer;
use crate::stream::parser_buffer::ParserBuffer;
use crate::stream::parsers::{Parser, ParserOutcome};

struct Attachment<T> {
    parser: Box<dyn Parser<T>>,
    out: Rc<RefCell<DataBuffer<T>>>,
}

pub struct StreamBuffer<T> {
    raw: ParserBuffer,
    attached: Option<Attachment<T>>,
    event_loop: EventLoop,
    exception: Option<Error>,
}

impl<T> StreamBuffer<T> {
    pub fn new(event_loop: &EventLoop) -> StreamBuffer<T> {
        StreamBuffer {
            raw: ParserBuffer::new(),
            attached: None,
            event_loop: event_loop.clone(),
            exception: None,
        }
    }

    /// Detaches whatever parser is current (spec §4.7 step 1: "if a
    /// previous parser is attached, throw EofStream into it and drop"),
    /// attaches `parser`, and primes it eagerly with whatever raw bytes
    /// are already buffered (step 4).
    pub fn set_parser(&mut self, mut parser: Box<dyn Parser<T>>) -> Rc<RefCell<DataBuffer<T>>> {
        if let Some(mut prev) = self.attached.take() {
            prev.parser.on_eof(&mut self.raw, &mut prev.out.borrow_mut());
        }

        let out = Rc::new(RefCell::new(DataBuffer::new(&self.event_loop)));

        if let Some(err) = self.exception.take() {
            out.borrow_mut().set_exception(err);
            return out;
        }

        Self::drive(&mut parser, &mut self.raw, &mut out.borrow_mut());
        self.attached = Some(Attachment { parser, out: Rc::clone(&out) });
        out
    }

    fn drive(parser: &mut Box<dyn Parser<T>>, raw: &mut ParserBuffer, out: &mut DataBuffer<T>) {
        loop {
            match parser.step(raw, out) {
                ParserOutcome::Progress => continue,
                ParserOutcome::NeedMore | ParserOutcome::Done => break,
            }
        }
    }

    /// Driver-side `feed`: routes bytes to the attached parser if any,
    /// otherwise straight into the raw cursor for direct consumers like
    /// `StreamReader`.
    pub fn feed_data(&mut self, data: &[u8]) {
        self.raw.feed(data);
        if let Some(attachment) = &mut self.attached {
            Self::drive(&mut attachment.parser, &mut self.raw, &mut attachment.out.borrow_mut());
        }
    }

    pub fn feed_eof(&mut self) {
        self.raw.feed_eof();
        if let Some(attachment) = &mut self.attached {
            attachment.parser.on_eof(&mut self.raw, &mut attachment.out.borrow_mut());
        }
    }

    pub fn set_exception(&mut self, err: Error) {
        if let Some(attachment) = &self.attached {
            attachment.out.borrow_mut().set_exception(err.clone());
        } else {
            self.exception = Some(err);
        }
    }

    pub fn raw(&mut self) -> &mut ParserBuffer {
        &mut self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::stream::parsers::LineParser;

    /// Spec §8 scenario 3: feeding `b"line1\r\nline2\r\ndata"` in arbitrary
    /// splits into a lines-parser (limit 8) then EOF must produce
    /// `[b"line1\r\n", b"line2\r\n"]` with `b"data"` left as residue.
    #[test]
    fn line_parser_scenario_with_split_input() {
        let event_loop = EventLoop::new().unwrap();
        let mut sb: StreamBuffer<Vec<u8>> = StreamBuffer::new(&event_loop);
        let out = sb.set_parser(Box::new(LineParser::new(8)));

        for chunk in [&b"li"[..], &b"ne1\r\nli"[..], &b"ne2\r\n"[..], &b"data"[..]] {
            sb.feed_data(chunk);
        }
        sb.feed_eof();

        let mut out = out.borrow_mut();
        assert_eq!(out.try_next(), Some(b"line1\r\n".to_vec()));
        assert_eq!(out.try_next(), Some(b"line2\r\n".to_vec()));
        assert_eq!(out.try_next(), None);
        assert!(out.at_eof());
    }

    #[test]
    fn raw_bytes_accumulate_with_no_parser_attached() {
        let event_loop = EventLoop::new().unwrap();
        let mut sb: StreamBuffer<Vec<u8>> = StreamBuffer::new(&event_loop);
        sb.feed_data(b"hello");
        sb.feed_data(b" world");
        assert_eq!(sb.raw().peek_all(), b"hello world".to_vec());
    }

    #[test]
    fn switching_parsers_detaches_the_previous_one() {
        let event_loop = EventLoop::new().unwrap();
        let mut sb: StreamBuffer<Vec<u8>> = StreamBuffer::new(&event_loop);
        let first = sb.set_parser(Box::new(LineParser::new(64)));
        sb.feed_data(b"partial-no-newline");

        // Attaching a second parser throws EofStream into the first (spec
        // §4.7 step 1), which for `LineParser`'s default `on_eof` means the
        // first `DataBuffer` observes EOF with nothing framed.
        let _second = sb.set_parser(Box::new(LineParser::new(64)));
        assert!(first.borrow().at_eof());
    }

    #[test]
    fn priming_a_fresh_parser_drains_already_buffered_bytes() {
        let event_loop = EventLoop::new().unwrap();
        let mut sb: StreamBuffer<Vec<u8>> = StreamBuffer::new(&event_loop);
        sb.feed_data(b"already-buffered\n");
        let out = sb.set_parser(Box::new(LineParser::new(64)));
        assert_eq!(out.borrow_mut().try_next(), Some(b"already-buffered\n".to_vec()));
    }

    #[test]
    fn preexisting_exception_is_placed_on_a_freshly_attached_parser() {
        let event_loop = EventLoop::new().unwrap();
        let mut sb: StreamBuffer<Vec<u8>> = StreamBuffer::new(&event_loop);
        sb.set_exception(Error::Parse("already broken".into()));
        let out = sb.set_parser(Box::new(LineParser::new(64)));
        assert!(out.borrow().exception().is_some());
    }
}
