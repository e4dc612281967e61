//! C7: pipe transports, spec §4.6. Structurally a stripped-down pair of the
//! TCP transport's two halves — one direction only, no socket-specific
//! error normalization (`ConnectionReset` et al. don't apply to a plain
//! fd), and the write side supports `write_eof` which TCP transports leave
//! to whoever owns the underlying shutdown call.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::transport::{Protocol, TransportConfig, WriteBuffer};

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

struct ReadInner<P> {
    file: File,
    fd: RawFd,
    event_loop: EventLoop,
    protocol: P,
    paused: bool,
    closing: bool,
}

/// `UnixReadPipeTransport`: a registered reader drains `read(max_size)`
/// chunks into `protocol.data_received`, signalling `eof_received` on a
/// zero-length read.
pub struct ReadPipeTransport<P: Protocol + 'static> {
    inner: Rc<RefCell<ReadInner<P>>>,
}

impl<P: Protocol + 'static> Clone for ReadPipeTransport<P> {
    fn clone(&self) -> Self {
        ReadPipeTransport {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Protocol + 'static> ReadPipeTransport<P> {
    pub fn new(event_loop: &EventLoop, fd: RawFd, protocol: P) -> io::Result<ReadPipeTransport<P>> {
        set_nonblocking(fd)?;
        let file = unsafe { File::from_raw_fd(fd) };
        let transport = ReadPipeTransport {
            inner: Rc::new(RefCell::new(ReadInner {
                file,
                fd,
                event_loop: event_loop.clone(),
                protocol,
                paused: false,
                closing: false,
            })),
        };
        let reader = transport.clone();
        event_loop.add_reader(fd, move || reader.on_readable())?;
        let made = transport.clone();
        event_loop.call_soon(move || made.inner.borrow_mut().protocol.connection_made());
        Ok(transport)
    }

    fn on_readable(&self) {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let result = {
                let mut inner = self.inner.borrow_mut();
                inner.file.read(&mut buf)
            };
            match result {
                Ok(0) => {
                    self.inner.borrow_mut().protocol.eof_received();
                    self.close();
                    return;
                }
                Ok(n) => self.inner.borrow_mut().protocol.data_received(&buf[..n]),
                Err(ref e) if Error::is_would_block(e) => return,
                Err(e) => {
                    self.inner.borrow_mut().protocol.connection_lost(Some(Error::from_io_for_transport(e)));
                    self.close();
                    return;
                }
            }
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.paused {
            return;
        }
        inner.paused = true;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_reader(fd);
    }

    pub fn resume(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.paused {
            return;
        }
        inner.paused = false;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let reader = self.clone();
        let _ = event_loop.add_reader(fd, move || reader.on_readable());
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closing {
            return;
        }
        inner.closing = true;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_reader(fd);
    }
}

struct WriteInner<P> {
    file: Option<File>,
    fd: RawFd,
    event_loop: EventLoop,
    protocol: P,
    write_buf: WriteBuffer,
    writer_registered: bool,
    closing: bool,
    config: TransportConfig,
}

/// `UnixWritePipeTransport`: parallel to the byte transport's write half,
/// plus `write_eof()` to close the write end once the buffer drains.
pub struct WritePipeTransport<P: Protocol + 'static> {
    inner: Rc<RefCell<WriteInner<P>>>,
}

impl<P: Protocol + 'static> Clone for WritePipeTransport<P> {
    fn clone(&self) -> Self {
        WritePipeTransport {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Protocol + 'static> WritePipeTransport<P> {
    pub fn new(event_loop: &EventLoop, fd: RawFd, protocol: P, config: TransportConfig) -> io::Result<WritePipeTransport<P>> {
        set_nonblocking(fd)?;
        let file = unsafe { File::from_raw_fd(fd) };
        let transport = WritePipeTransport {
            inner: Rc::new(RefCell::new(WriteInner {
                file: Some(file),
                fd,
                event_loop: event_loop.clone(),
                protocol,
                write_buf: WriteBuffer::default(),
                writer_registered: false,
                closing: false,
                config,
            })),
        };
        let made = transport.clone();
        event_loop.call_soon(move || made.inner.borrow_mut().protocol.connection_made());
        Ok(transport)
    }

    pub fn can_write_eof(&self) -> bool {
        true
    }

    pub fn write(&self, data: Vec<u8>) {
        if data.is_empty() || self.inner.borrow().closing {
            return;
        }
        let was_empty = self.inner.borrow().write_buf.is_empty();
        if was_empty {
            let result = {
                let mut inner = self.inner.borrow_mut();
                inner.file.as_mut().expect("write after write_eof").write(&data)
            };
            match result {
                Ok(n) if n == data.len() => return,
                Ok(n) => {
                    self.inner.borrow_mut().write_buf.push(data[n..].to_vec());
                    self.register_writer();
                }
                Err(ref e) if Error::is_would_block(e) => {
                    self.inner.borrow_mut().write_buf.push(data);
                    self.register_writer();
                }
                Err(e) => {
                    self.inner.borrow_mut().protocol.connection_lost(Some(Error::from_io_for_transport(e)));
                }
            }
        } else {
            self.inner.borrow_mut().write_buf.push(data);
        }

        let (len, high) = {
            let inner = self.inner.borrow();
            (inner.write_buf.len(), inner.config.high_water)
        };
        if len >= high {
            self.inner.borrow_mut().protocol.pause_writing();
        }
    }

    fn on_writable(&self) {
        let result = {
            let mut inner = self.inner.borrow_mut();
            let file = inner.file.as_mut().expect("writer callback after write_eof");
            inner.write_buf.drain_with(|chunk| file.write(chunk))
        };
        if let Err(e) = result {
            self.inner.borrow_mut().protocol.connection_lost(Some(Error::from_io_for_transport(e)));
            return;
        }
        let (empty, closing) = {
            let inner = self.inner.borrow();
            (inner.write_buf.is_empty(), inner.closing)
        };
        if empty {
            self.unregister_writer();
            if closing {
                let mut inner = self.inner.borrow_mut();
                inner.file.take();
                inner.protocol.connection_lost(None);
            }
        }
    }

    fn register_writer(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.writer_registered {
            return;
        }
        inner.writer_registered = true;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let writer = self.clone();
        let _ = event_loop.add_writer(fd, move || writer.on_writable());
    }

    fn unregister_writer(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.writer_registered {
            return;
        }
        inner.writer_registered = false;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_writer(fd);
    }

    /// Closes the write end once the buffer drains (spec §4.6), by
    /// dropping the owned `File` rather than a raw `close(2)` so nothing
    /// else can race and reuse the fd number before we're done with it.
    pub fn write_eof(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closing = true;
        if inner.write_buf.is_empty() {
            inner.file.take();
        }
    }

    pub fn abort(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.write_buf = WriteBuffer::default();
        inner.closing = true;
        inner.file.take();
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_writer(fd);
        self.inner.borrow_mut().protocol.connection_lost(None);
    }
}

impl<P> std::fmt::Debug for ReadInner<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPipeTransport").field("fd", &self.fd).finish()
    }
}

impl<P> std::fmt::Debug for WriteInner<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePipeTransport").field("fd", &self.fd).finish()
    }
}

impl<P> AsRawFd for ReadInner<P> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Future;

    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "pipe(2) failed: {}", io::Error::last_os_error());
        (fds[0], fds[1])
    }

    struct CollectProtocol {
        data: Vec<u8>,
        eof: bool,
        done: Future<()>,
    }

    impl Protocol for CollectProtocol {
        fn data_received(&mut self, data: &[u8]) {
            self.data.extend_from_slice(data);
        }
        fn eof_received(&mut self) -> bool {
            self.eof = true;
            if !self.done.done() {
                self.done.set_result(());
            }
            false
        }
    }

    struct NoopProtocol;
    impl Protocol for NoopProtocol {}

    #[test]
    fn read_pipe_transport_delivers_data_then_eof_on_close() {
        let event_loop = EventLoop::new().unwrap();
        let (read_fd, write_fd) = pipe_fds();

        let done: Future<()> = event_loop.create_future();
        let protocol = CollectProtocol { data: Vec::new(), eof: false, done: done.clone() };
        let _reader = ReadPipeTransport::new(&event_loop, read_fd, protocol).unwrap();

        let mut writer = unsafe { File::from_raw_fd(write_fd) };
        writer.write_all(b"hello").unwrap();
        drop(writer); // closes the write end, producing EOF on the read side

        event_loop.run_until_complete(&done).unwrap();
    }

    #[test]
    fn write_pipe_transport_writes_bytes_visible_on_the_other_end() {
        let event_loop = EventLoop::new().unwrap();
        let (read_fd, write_fd) = pipe_fds();

        let transport = WritePipeTransport::new(&event_loop, write_fd, NoopProtocol, TransportConfig::default()).unwrap();
        assert!(transport.can_write_eof());
        transport.write(b"payload".to_vec());
        transport.write_eof();

        // Drive the loop briefly so the writer callback (and `connection_made`)
        // actually run; there's nothing to await on the write side itself.
        let settle: Future<()> = event_loop.create_future();
        let settle_cb = settle.clone();
        event_loop.call_later(std::time::Duration::from_millis(20), move || {
            if !settle_cb.done() {
                settle_cb.set_result(());
            }
        });
        event_loop.run_until_complete(&settle).unwrap();

        let mut reader = unsafe { File::from_raw_fd(read_fd) };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload".to_vec());
    }

    #[test]
    fn abort_drops_buffered_writes_and_reports_connection_lost() {
        let event_loop = EventLoop::new().unwrap();
        let (read_fd, write_fd) = pipe_fds();
        // Keep the read end open but never drain it so writer-readiness
        // isn't required for this test; we only care that `abort` discards
        // the buffer and reports closure synchronously.
        let _reader = unsafe { File::from_raw_fd(read_fd) };

        struct LostProtocol {
            lost: Future<()>,
        }
        impl Protocol for LostProtocol {
            fn connection_lost(&mut self, _err: Option<Error>) {
                if !self.lost.done() {
                    self.lost.set_result(());
                }
            }
        }

        let lost: Future<()> = event_loop.create_future();
        let transport = WritePipeTransport::new(&event_loop, write_fd, LostProtocol { lost: lost.clone() }, TransportConfig::default()).unwrap();
        transport.write(b"buffered but never flushed".to_vec());
        transport.abort();

        event_loop.run_until_complete(&lost).unwrap();
    }
}
