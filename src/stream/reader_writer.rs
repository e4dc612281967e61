//! C9: the high-level stream API from spec §4.8, built directly on the
//! event loop and `corral::Future` rather than on the parser layer —
//! `StreamReader` is exactly the "direct consumer" mode `StreamBuffer`
//! supports when no parser is attached.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::future::Future;

const DEFAULT_LIMIT: usize = 64 * 1024;

struct ReaderInner {
    buf: VecDeque<u8>,
    eof: bool,
    exception: Option<Error>,
    waiter: Option<Future<()>>,
    event_loop: EventLoop,
    limit: usize,
}

/// Buffers bytes fed by a transport's `data_received`/`eof_received` and
/// exposes suspend-until-ready reads (spec §4.8).
#[derive(Clone)]
pub struct StreamReader {
    inner: Rc<RefCell<ReaderInner>>,
}

impl StreamReader {
    pub fn new(event_loop: &EventLoop) -> StreamReader {
        StreamReader::with_limit(event_loop, DEFAULT_LIMIT)
    }

    pub fn with_limit(event_loop: &EventLoop, limit: usize) -> StreamReader {
        StreamReader {
            inner: Rc::new(RefCell::new(ReaderInner {
                buf: VecDeque::new(),
                eof: false,
                exception: None,
                waiter: None,
                event_loop: event_loop.clone(),
                limit,
            })),
        }
    }

    /// Called by the owning `Protocol::data_received`.
    pub fn feed_data(&self, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        inner.buf.extend(data.iter().copied());
        Self::wake(&mut inner);
    }

    /// Called by the owning `Protocol::eof_received`/`connection_lost`.
    pub fn feed_eof(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.eof = true;
        Self::wake(&mut inner);
    }

    pub fn set_exception(&self, err: Error) {
        let mut inner = self.inner.borrow_mut();
        inner.exception = Some(err);
        Self::wake(&mut inner);
    }

    pub fn at_eof(&self) -> bool {
        let inner = self.inner.borrow();
        inner.eof && inner.buf.is_empty()
    }

    fn wake(inner: &mut ReaderInner) {
        if let Some(waiter) = inner.waiter.take() {
            if !waiter.done() {
                waiter.set_result(());
            }
        }
    }

    fn wait_for_data(&self) -> Future<()> {
        let mut inner = self.inner.borrow_mut();
        let fut = inner.event_loop.create_future();
        inner.waiter = Some(fut.clone());
        fut
    }

    fn check_exception(&self) -> Result<(), Error> {
        if let Some(err) = self.inner.borrow().exception.clone() {
            return Err(err);
        }
        Ok(())
    }

    /// `n < 0` reads until EOF; `n >= 0` returns up to `n` bytes, blocking
    /// only until at least one byte is available (or EOF) rather than
    /// until exactly `n` are — matching `asyncio.StreamReader.read`.
    pub async fn read(&self, n: isize) -> Result<Vec<u8>, Error> {
        if n == 0 {
            return Ok(Vec::new());
        }
        loop {
            self.check_exception()?;
            let (has_data, eof) = {
                let inner = self.inner.borrow();
                (!inner.buf.is_empty(), inner.eof)
            };
            if has_data || eof {
                break;
            }
            self.wait_for_data().await?;
        }
        self.check_exception()?;

        let mut inner = self.inner.borrow_mut();
        if n < 0 {
            return Ok(inner.buf.drain(..).collect());
        }
        let take = (n as usize).min(inner.buf.len());
        Ok(inner.buf.drain(..take).collect())
    }

    /// Reads exactly `n` bytes or fails with `Error::Incomplete` carrying
    /// whatever was read before EOF (spec §8 boundary behaviours).
    pub async fn readexactly(&self, n: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            self.check_exception()?;
            let (available, eof) = {
                let inner = self.inner.borrow();
                (inner.buf.len(), inner.eof)
            };
            if available == 0 && eof {
                return Err(Error::Incomplete { partial: out, expected: n });
            }
            if available == 0 {
                self.wait_for_data().await?;
                continue;
            }
            let take = available.min(n - out.len());
            let mut inner = self.inner.borrow_mut();
            out.extend(inner.buf.drain(..take));
        }
        Ok(out)
    }

    /// Reads up to and including `\n`. If the limit is exceeded before a
    /// terminator appears, fails with `Error::Parse` (spec §4.8 "line too
    /// long"), discarding the oversized partial line the way
    /// `asyncio.StreamReader.readline` does.
    pub async fn readline(&self) -> Result<Vec<u8>, Error> {
        loop {
            self.check_exception()?;
            let found = {
                let inner = self.inner.borrow();
                inner.buf.iter().position(|&b| b == b'\n')
            };
            if let Some(pos) = found {
                let mut inner = self.inner.borrow_mut();
                let line: Vec<u8> = inner.buf.drain(..=pos).collect();
                return Ok(line);
            }

            let (len, limit, eof) = {
                let inner = self.inner.borrow();
                (inner.buf.len(), inner.limit, inner.eof)
            };
            if len > limit {
                let mut inner = self.inner.borrow_mut();
                inner.buf.clear();
                return Err(Error::Parse(format!("line exceeds limit of {limit} bytes")));
            }
            if eof {
                let mut inner = self.inner.borrow_mut();
                return Ok(inner.buf.drain(..).collect());
            }
            self.wait_for_data().await?;
        }
    }
}

/// Drives backpressure-aware writes: `write`/`writelines` are fire-and-
/// forget, `drain()` resolves once the underlying transport's
/// `resume_writing` fires (spec §4.8).
#[derive(Clone)]
pub struct StreamWriter {
    inner: Rc<RefCell<WriterInner>>,
}

struct WriterInner {
    write: Box<dyn Fn(Vec<u8>)>,
    write_eof: Box<dyn Fn()>,
    close: Box<dyn Fn()>,
    event_loop: EventLoop,
    drain_waiter: Option<Future<()>>,
    paused: bool,
}

impl StreamWriter {
    pub fn new(
        event_loop: &EventLoop,
        write: impl Fn(Vec<u8>) + 'static,
        write_eof: impl Fn() + 'static,
        close: impl Fn() + 'static,
    ) -> StreamWriter {
        StreamWriter {
            inner: Rc::new(RefCell::new(WriterInner {
                write: Box::new(write),
                write_eof: Box::new(write_eof),
                close: Box::new(close),
                event_loop: event_loop.clone(),
                drain_waiter: None,
                paused: false,
            })),
        }
    }

    pub fn write(&self, data: Vec<u8>) {
        (self.inner.borrow().write)(data);
    }

    pub fn writelines(&self, lines: impl IntoIterator<Item = Vec<u8>>) {
        let inner = self.inner.borrow();
        for line in lines {
            (inner.write)(line);
        }
    }

    pub fn write_eof(&self) {
        (self.inner.borrow().write_eof)();
    }

    pub fn close(&self) {
        (self.inner.borrow().close)();
    }

    /// Called by the owning `Protocol::pause_writing`.
    pub fn on_pause_writing(&self) {
        self.inner.borrow_mut().paused = true;
    }

    /// Called by the owning `Protocol::resume_writing`.
    pub fn on_resume_writing(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.paused = false;
        if let Some(waiter) = inner.drain_waiter.take() {
            if !waiter.done() {
                waiter.set_result(());
            }
        }
    }

    /// Resolves immediately if not currently paused, else once
    /// `on_resume_writing` fires.
    pub async fn drain(&self) -> Result<(), Error> {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            if !inner.paused {
                let fut = inner.event_loop.create_future();
                fut.set_result(());
                fut
            } else {
                let fut = inner.event_loop.create_future();
                inner.drain_waiter = Some(fut.clone());
                fut
            }
        };
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::cell::RefCell;

    #[test]
    fn read_returns_immediately_when_data_already_buffered() {
        let event_loop = EventLoop::new().unwrap();
        let reader = StreamReader::new(&event_loop);
        reader.feed_data(b"hello");

        let reader = reader.clone();
        let task = event_loop.spawn("read", async move { reader.read(-1).await });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, b"hello".to_vec());
    }

    #[test]
    fn read_resumes_once_bytes_arrive_on_a_later_iteration() {
        let event_loop = EventLoop::new().unwrap();
        let reader = StreamReader::new(&event_loop);

        let feeder = reader.clone();
        event_loop.call_soon(move || feeder.feed_data(b"later"));

        let reader_for_task = reader.clone();
        let task = event_loop.spawn("read", async move { reader_for_task.read(-1).await });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, b"later".to_vec());
    }

    #[test]
    fn readline_splits_on_newline_and_keeps_it() {
        let event_loop = EventLoop::new().unwrap();
        let reader = StreamReader::new(&event_loop);
        reader.feed_data(b"line1\nline2\n");

        let reader_for_task = reader.clone();
        let task = event_loop.spawn("readline", async move { reader_for_task.readline().await });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, b"line1\n".to_vec());
    }

    #[test]
    fn readexactly_raises_incomplete_on_eof_before_n_bytes() {
        let event_loop = EventLoop::new().unwrap();
        let reader = StreamReader::new(&event_loop);
        reader.feed_data(b"ab");
        reader.feed_eof();

        let reader_for_task = reader.clone();
        let task = event_loop.spawn("readexactly", async move { reader_for_task.readexactly(5).await });
        let err = event_loop.run_until_complete(&task.as_future()).unwrap_err();
        match err {
            Error::Incomplete { partial, expected } => {
                assert_eq!(partial, b"ab".to_vec());
                assert_eq!(expected, 5);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn readexactly_succeeds_when_enough_bytes_are_available() {
        let event_loop = EventLoop::new().unwrap();
        let reader = StreamReader::new(&event_loop);
        reader.feed_data(b"abcdef");

        let reader_for_task = reader.clone();
        let task = event_loop.spawn("readexactly", async move { reader_for_task.readexactly(4).await });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, b"abcd".to_vec());
    }

    #[test]
    fn stream_writer_drain_resolves_immediately_when_not_paused() {
        let event_loop = EventLoop::new().unwrap();
        let writer = StreamWriter::new(&event_loop, |_| {}, || {}, || {});
        let writer_for_task = writer.clone();
        let task = event_loop.spawn("drain", async move { writer_for_task.drain().await });
        event_loop.run_until_complete(&task.as_future()).unwrap();
    }

    #[test]
    fn stream_writer_drain_waits_for_resume_writing() {
        let event_loop = EventLoop::new().unwrap();
        let writer = StreamWriter::new(&event_loop, |_| {}, || {}, || {});
        writer.on_pause_writing();

        let resumer = writer.clone();
        event_loop.call_soon(move || resumer.on_resume_writing());

        let writer_for_task = writer.clone();
        let task = event_loop.spawn("drain", async move { writer_for_task.drain().await });
        event_loop.run_until_complete(&task.as_future()).unwrap();
    }

    #[test]
    fn stream_writer_write_forwards_to_the_sink() {
        let event_loop = EventLoop::new().unwrap();
        let written = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&written);
        let writer = StreamWriter::new(&event_loop, move |data| sink.borrow_mut().extend(data), || {}, || {});
        writer.write(b"abc".to_vec());
        writer.writelines(vec![b"d".to_vec(), b"e".to_vec()]);
        assert_eq!(*written.borrow(), b"abcde".to_vec());
    }
}
