//! The byte-socket transport, spec §4.5's first paragraph. Grounded on
//! `mio`'s own `TcpStream`/`TcpListener` wrappers for the nonblocking
//! socket shape, driven by `EventLoop::add_reader`/`add_writer` rather than
//! a raw `mio::Poll` registration since the loop already owns the selector.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::transport::{Protocol, TransportConfig, WriteBuffer};

/// Threshold past which repeated writes to an already-closing transport are
/// logged once, matching asyncio's own "socket.send() raised exception"
/// warn-and-drop behaviour instead of silently growing unbounded.
const CONN_LOST_WARN_THRESHOLD: u32 = 5;

struct Inner<P> {
    stream: TcpStream,
    fd: RawFd,
    event_loop: EventLoop,
    protocol: P,
    write_buf: WriteBuffer,
    writer_registered: bool,
    writer_paused: bool,
    closing: bool,
    write_eof_requested: bool,
    conn_lost: u32,
    config: TransportConfig,
}

/// A connected, nonblocking TCP byte stream paired with a user `Protocol`.
pub struct TcpTransport<P: Protocol + 'static> {
    inner: Rc<RefCell<Inner<P>>>,
}

impl<P: Protocol + 'static> Clone for TcpTransport<P> {
    fn clone(&self) -> Self {
        TcpTransport {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Protocol + 'static> TcpTransport<P> {
    /// Wraps an already-connected stream. `connection_made` fires on the
    /// next loop iteration (via `call_soon`), never synchronously, so a
    /// protocol can rely on transports never calling back into code that's
    /// still constructing them.
    pub fn new(event_loop: &EventLoop, stream: TcpStream, protocol: P, config: TransportConfig) -> io::Result<TcpTransport<P>> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();
        let transport = TcpTransport {
            inner: Rc::new(RefCell::new(Inner {
                stream,
                fd,
                event_loop: event_loop.clone(),
                protocol,
                write_buf: WriteBuffer::default(),
                writer_registered: false,
                writer_paused: false,
                closing: false,
                write_eof_requested: false,
                conn_lost: 0,
                config,
            })),
        };

        let reader = transport.clone();
        event_loop.add_reader(fd, move || reader.on_readable())?;

        let made = transport.clone();
        event_loop.call_soon(move || {
            made.inner.borrow_mut().protocol.connection_made();
        });

        Ok(transport)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.borrow().stream.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.borrow().stream.peer_addr()
    }

    fn on_readable(&self) {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let result = {
                let mut inner = self.inner.borrow_mut();
                inner.stream.read(&mut buf)
            };
            match result {
                Ok(0) => {
                    let keep_open = self.inner.borrow_mut().protocol.eof_received();
                    if !keep_open {
                        self.close();
                    }
                    return;
                }
                Ok(n) => {
                    self.inner.borrow_mut().protocol.data_received(&buf[..n]);
                }
                Err(ref e) if Error::is_would_block(e) => return,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.force_close(Some(Error::ConnectionReset));
                    return;
                }
                Err(e) => {
                    self.force_close(Some(Error::from_io_for_transport(e)));
                    return;
                }
            }
        }
    }

    fn on_writable(&self) {
        let result = {
            let mut inner = self.inner.borrow_mut();
            let stream = &mut inner.stream;
            inner.write_buf.drain_with(|chunk| stream.write(chunk))
        };
        match result {
            Ok(_) => {}
            Err(e) => {
                self.force_close(Some(Error::from_io_for_transport(e)));
                return;
            }
        }

        let (empty, closing, write_eof_requested) = {
            let inner = self.inner.borrow();
            (inner.write_buf.is_empty(), inner.closing, inner.write_eof_requested)
        };
        if empty {
            self.unregister_writer();
            if closing {
                self.call_connection_lost(None);
            } else if write_eof_requested {
                let _ = self.inner.borrow().stream.shutdown(std::net::Shutdown::Write);
            }
        }

        // spec §5: once a pause has been signalled, tell the protocol once
        // the buffer has drained back down to `low_water` (mirrors
        // `_SelectorSocketTransport._maybe_resume_protocol`).
        let should_resume = {
            let mut inner = self.inner.borrow_mut();
            if inner.writer_paused && inner.write_buf.len() <= inner.config.low_water {
                inner.writer_paused = false;
                true
            } else {
                false
            }
        };
        if should_resume {
            self.inner.borrow_mut().protocol.resume_writing();
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

    /// Spec §4.5: drop and warn past a threshold once closing; otherwise
    /// try an immediate send, buffering whatever doesn't fit.
    pub fn write(&self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let should_drop = {
            let mut inner = self.inner.borrow_mut();
            if inner.closing || inner.conn_lost > 0 {
                inner.conn_lost += 1;
                #[cfg(feature = "log")]
                if inner.conn_lost == CONN_LOST_WARN_THRESHOLD {
                    log::warn!("corral: write() called {CONN_LOST_WARN_THRESHOLD} times on a closing TcpTransport; further writes drop silently");
                }
                true
            } else {
                false
            }
        };
        if should_drop {
            return;
        }

        let was_empty = self.inner.borrow().write_buf.is_empty();
        if was_empty {
            let result = {
                let mut inner = self.inner.borrow_mut();
                inner.stream.write(&data)
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
                    self.force_close(Some(Error::from_io_for_transport(e)));
                }
            }
        } else {
            self.inner.borrow_mut().write_buf.push(data);
        }

        let should_pause = {
            let mut inner = self.inner.borrow_mut();
            if !inner.writer_paused && inner.write_buf.len() >= inner.config.high_water {
                inner.writer_paused = true;
                true
            } else {
                false
            }
        };
        if should_pause {
            self.inner.borrow_mut().protocol.pause_writing();
        }
    }

    pub fn pause_writing(&self) {
        self.unregister_writer();
    }

    pub fn resume_writing(&self) {
        if !self.inner.borrow().write_buf.is_empty() {
            self.register_writer();
        }
    }

    /// Unlike a TLS transport, a plain TCP socket supports a true
    /// half-close (`shutdown(SHUT_WR)`): the peer observes EOF on read
    /// while this side keeps reading, matching asyncio's
    /// `_SelectorSocketTransport.can_write_eof() == True`.
    pub fn can_write_eof(&self) -> bool {
        true
    }

    /// Shuts down the write half once the write buffer has drained,
    /// leaving the read side (and `data_received`) untouched.
    pub fn write_eof(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closing {
            return;
        }
        inner.write_eof_requested = true;
        if inner.write_buf.is_empty() {
            let _ = inner.stream.shutdown(std::net::Shutdown::Write);
        }
    }

    pub fn close(&self) {
        let already_closing = {
            let mut inner = self.inner.borrow_mut();
            let was = inner.closing;
            inner.closing = true;
            was
        };
        if already_closing {
            return;
        }
        let fd = self.inner.borrow().fd;
        let event_loop = self.inner.borrow().event_loop.clone();
        let _ = event_loop.remove_reader(fd);

        if self.inner.borrow().write_buf.is_empty() {
            self.call_connection_lost(None);
        }
    }

    pub fn abort(&self) {
        self.force_close(None);
    }

    fn force_close(&self, err: Option<Error>) {
        self.inner.borrow_mut().closing = true;
        let fd = self.inner.borrow().fd;
        let event_loop = self.inner.borrow().event_loop.clone();
        let _ = event_loop.remove_reader(fd);
        self.unregister_writer();
        self.inner.borrow_mut().write_buf = WriteBuffer::default();
        self.call_connection_lost(err);
    }

    fn call_connection_lost(&self, err: Option<Error>) {
        let this = self.clone();
        self.inner.borrow().event_loop.call_soon(move || {
            this.inner.borrow_mut().protocol.connection_lost(err);
            let _ = this.inner.borrow().stream.shutdown(std::net::Shutdown::Both);
        });
    }
}

/// Spec §4.11's server side: accept loop producing one `TcpTransport` per
/// connection via `protocol_factory`.
pub struct TcpServer {
    listener: TcpListener,
    fd: RawFd,
    event_loop: EventLoop,
}

impl TcpServer {
    pub fn bind(event_loop: &EventLoop, addr: SocketAddr) -> io::Result<TcpServer> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let fd = listener.as_raw_fd();
        Ok(TcpServer {
            listener,
            fd,
            event_loop: event_loop.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting; `make_protocol` is called once per inbound
    /// connection to build the `Protocol` it will be paired with.
    pub fn serve<P, F>(&self, mut make_protocol: F, config: TransportConfig) -> io::Result<()>
    where
        P: Protocol + 'static,
        F: FnMut() -> P + 'static,
    {
        let event_loop = self.event_loop.clone();
        // `TcpListener` doesn't implement `Clone`, so the listener itself
        // has to be owned by the reader closure; callers keep using
        // `TcpServer` only for `local_addr`/`stop_serving` bookkeeping.
        let listener = self.listener.try_clone()?;
        event_loop.add_reader(self.fd, move || loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let protocol = make_protocol();
                    if let Err(_e) = TcpTransport::new(&event_loop, stream, protocol, config) {
                        #[cfg(feature = "log")]
                        log::warn!("corral: failed to set up accepted connection: {_e}");
                    }
                }
                Err(ref e) if Error::is_would_block(e) => break,
                Err(_e) => {
                    #[cfg(feature = "log")]
                    log::warn!("corral: accept() failed: {_e}");
                    break;
                }
            }
        })
    }

    pub fn stop_serving(&self) -> io::Result<bool> {
        self.event_loop.remove_reader(self.fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Future;
    use std::sync::mpsc;
    use std::thread;

    /// Echoes every byte it receives and resolves `done` on `connection_lost`.
    /// `write_back` starts empty and is filled in by the test once the
    /// transport exists, since `connection_made` carries no transport handle
    /// for the protocol to capture up front.
    struct EchoProtocol {
        write_back: Rc<RefCell<Option<Rc<dyn Fn(Vec<u8>)>>>>,
        done: Future<()>,
    }

    impl Protocol for EchoProtocol {
        fn data_received(&mut self, data: &[u8]) {
            if let Some(w) = self.write_back.borrow().as_ref() {
                w(data.to_vec());
            }
        }

        fn connection_lost(&mut self, _err: Option<Error>) {
            if !self.done.done() {
                self.done.set_result(());
            }
        }
    }

    #[test]
    fn echo_round_trips_bytes_over_a_real_socket_and_reports_connection_lost() {
        let event_loop = EventLoop::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            drop(stream); // triggers EOF on the server side
            tx.send(buf).unwrap();
        });

        let (server_stream, _) = listener.accept().unwrap();
        let write_back: Rc<RefCell<Option<Rc<dyn Fn(Vec<u8>)>>>> = Rc::new(RefCell::new(None));
        let done: Future<()> = event_loop.create_future();
        let protocol = EchoProtocol {
            write_back: Rc::clone(&write_back),
            done: done.clone(),
        };
        let transport = TcpTransport::new(&event_loop, server_stream, protocol, TransportConfig::default()).unwrap();
        *write_back.borrow_mut() = Some(Rc::new({
            let transport = transport.clone();
            move |data: Vec<u8>| transport.write(data)
        }));

        event_loop.run_until_complete(&done).unwrap();
        client.join().unwrap();
        assert_eq!(rx.recv().unwrap(), *b"ping");
    }

    #[test]
    fn server_accepts_connections_and_invokes_connection_made() {
        struct RecordingProtocol {
            made: Future<()>,
        }
        impl Protocol for RecordingProtocol {
            fn connection_made(&mut self) {
                if !self.made.done() {
                    self.made.set_result(());
                }
            }
        }

        let event_loop = EventLoop::new().unwrap();
        let server = TcpServer::bind(&event_loop, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let made: Future<()> = event_loop.create_future();

        thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            thread::sleep(std::time::Duration::from_millis(200));
            drop(stream);
        });

        server
            .serve(
                {
                    let made = made.clone();
                    move || RecordingProtocol { made: made.clone() }
                },
                TransportConfig::default(),
            )
            .unwrap();

        event_loop.run_until_complete(&made).unwrap();
        assert!(server.stop_serving().unwrap());
    }

    #[test]
    fn write_eof_shuts_down_the_write_half_while_leaving_reads_open() {
        struct HalfCloseObserver {
            eof_seen: Future<()>,
        }
        impl Protocol for HalfCloseObserver {
            fn eof_received(&mut self) -> bool {
                if !self.eof_seen.done() {
                    self.eof_seen.set_result(());
                }
                true // keep the transport open for further reads/writes
            }
        }

        let event_loop = EventLoop::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_stream = TcpStream::connect(addr).unwrap();
        let (server_stream, _) = listener.accept().unwrap();

        let eof_seen: Future<()> = event_loop.create_future();
        let server_protocol = HalfCloseObserver { eof_seen: eof_seen.clone() };
        let _server = TcpTransport::new(&event_loop, server_stream, server_protocol, TransportConfig::default()).unwrap();

        let client_protocol = HalfCloseObserver { eof_seen: event_loop.create_future() };
        let client = TcpTransport::new(&event_loop, client_stream, client_protocol, TransportConfig::default()).unwrap();
        assert!(client.can_write_eof());
        client.write_eof();

        event_loop.run_until_complete(&eof_seen).unwrap();
    }
}
