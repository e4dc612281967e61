//! TLS transport, spec §4.5's second paragraph, feature-gated on `tls`.
//! Backed by `rustls`, the pure-Rust, non-OpenSSL TLS stack the ecosystem
//! reaches for where the teacher's own dependency set has nothing to say
//! about cryptography. `do_handshake_on_connect=false` from the spec maps
//! directly onto rustls's own split between I/O (`read_tls`/`write_tls`)
//! and state-machine advancement (`process_new_packets`), which is already
//! non-blocking by construction.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::future::Future;
use crate::transport::{Protocol, TransportConfig, WriteBuffer};

/// The handful of rustls operations both `ClientConnection` and
/// `ServerConnection` expose identically via `Deref<Target =
/// ConnectionCommon<_>>`; named here so `TlsTransport` doesn't need two
/// near-duplicate implementations.
pub trait TlsSession {
    fn wants_read(&self) -> bool;
    fn wants_write(&self) -> bool;
    fn is_handshaking(&self) -> bool;
    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize>;
    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize>;
    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error>;
    fn reader(&mut self) -> rustls::Reader<'_>;
    fn writer(&mut self) -> rustls::Writer<'_>;
}

macro_rules! impl_tls_session {
    ($ty:ty) => {
        impl TlsSession for $ty {
            fn wants_read(&self) -> bool {
                rustls::ConnectionCommon::wants_read(self)
            }
            fn wants_write(&self) -> bool {
                rustls::ConnectionCommon::wants_write(self)
            }
            fn is_handshaking(&self) -> bool {
                rustls::ConnectionCommon::is_handshaking(self)
            }
            fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
                rustls::ConnectionCommon::read_tls(self, rd)
            }
            fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
                rustls::ConnectionCommon::write_tls(self, wr)
            }
            fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
                rustls::ConnectionCommon::process_new_packets(self)
            }
            fn reader(&mut self) -> rustls::Reader<'_> {
                rustls::ConnectionCommon::reader(self)
            }
            fn writer(&mut self) -> rustls::Writer<'_> {
                rustls::ConnectionCommon::writer(self)
            }
        }
    };
}

impl_tls_session!(rustls::ClientConnection);
impl_tls_session!(rustls::ServerConnection);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Handshaking,
    Open,
    Closing,
}

struct Inner<C, P> {
    stream: TcpStream,
    fd: RawFd,
    event_loop: EventLoop,
    session: C,
    protocol: P,
    write_buf: WriteBuffer,
    phase: Phase,
    config: TransportConfig,
    writer_registered: bool,
    writer_paused: bool,
    /// Plaintext bytes handed to `write()` since the session last reported
    /// `wants_write() == false`. rustls doesn't expose the exact queued
    /// ciphertext size, so this is a proxy for the backlog: crossing
    /// `high_water` pauses, and the backlog draining fully (the only
    /// drained/not-drained signal `wants_write()` gives us) resumes.
    pending_write_bytes: usize,
}

/// TLS-wrapped byte transport. `C` is `rustls::ClientConnection` or
/// `rustls::ServerConnection`.
pub struct TlsTransport<C, P: Protocol + 'static> {
    inner: Rc<RefCell<Inner<C, P>>>,
}

impl<C, P: Protocol + 'static> Clone for TlsTransport<C, P> {
    fn clone(&self) -> Self {
        TlsTransport {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: TlsSession + 'static, P: Protocol + 'static> TlsTransport<C, P> {
    /// Begins the handshake and returns a `Future` that resolves once
    /// `connection_made` has fired (spec §4.5: "on success ... invoke
    /// connection_made, resolve waiter").
    pub fn handshake(
        event_loop: &EventLoop,
        stream: TcpStream,
        session: C,
        protocol: P,
        config: TransportConfig,
    ) -> io::Result<(TlsTransport<C, P>, Future<()>)> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();
        let transport = TlsTransport {
            inner: Rc::new(RefCell::new(Inner {
                stream,
                fd,
                event_loop: event_loop.clone(),
                session,
                protocol,
                write_buf: WriteBuffer::default(),
                phase: Phase::Handshaking,
                config,
                writer_registered: false,
                writer_paused: false,
                pending_write_bytes: 0,
            })),
        };
        let waiter = event_loop.create_future::<()>();
        transport.drive_handshake(waiter.clone());
        Ok((transport, waiter))
    }

    fn drive_handshake(&self, waiter: Future<()>) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            pump_tls(&mut inner.stream, &mut inner.session)
        };

        let still_handshaking = self.inner.borrow().session.is_handshaking();
        match outcome {
            Ok(()) if still_handshaking => {
                let wants_read = self.inner.borrow().session.wants_read();
                let wants_write = self.inner.borrow().session.wants_write();
                let fd = self.inner.borrow().fd;
                let event_loop = self.inner.borrow().event_loop.clone();
                if wants_read {
                    let this = self.clone();
                    let w = waiter.clone();
                    let _ = event_loop.add_reader(fd, move || this.drive_handshake(w.clone()));
                }
                if wants_write {
                    let this = self.clone();
                    let w = waiter.clone();
                    let _ = event_loop.add_writer(fd, move || this.drive_handshake(w.clone()));
                }
            }
            Ok(()) => {
                let fd = self.inner.borrow().fd;
                let event_loop = self.inner.borrow().event_loop.clone();
                let _ = event_loop.remove_reader(fd);
                let _ = event_loop.remove_writer(fd);
                self.inner.borrow_mut().phase = Phase::Open;

                let reader = self.clone();
                let _ = event_loop.add_reader(fd, move || reader.on_ready());

                self.inner.borrow_mut().protocol.connection_made();
                waiter.set_result(());
            }
            Err(err) => {
                let fd = self.inner.borrow().fd;
                let event_loop = self.inner.borrow().event_loop.clone();
                let _ = event_loop.remove_reader(fd);
                let _ = event_loop.remove_writer(fd);
                waiter.set_exception(Error::from_io_for_transport(err));
            }
        }
    }

    /// Spec §4.5's `on_ready`: one callback services both directions once
    /// the handshake is done.
    fn on_ready(&self) {
        let read_result = {
            let mut inner = self.inner.borrow_mut();
            pump_tls(&mut inner.stream, &mut inner.session)
        };
        if let Err(e) = read_result {
            if !Error::is_would_block(&e) {
                self.close();
                return;
            }
        }

        let mut plaintext = Vec::new();
        let eof = {
            let mut inner = self.inner.borrow_mut();
            let mut reader = inner.session.reader();
            let mut buf = [0u8; 16 * 1024];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break true,
                    Ok(n) => {
                        plaintext.extend_from_slice(&buf[..n]);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                    Err(_) => break false,
                }
            }
        };
        if !plaintext.is_empty() {
            self.inner.borrow_mut().protocol.data_received(&plaintext);
        }
        if eof {
            self.inner.borrow_mut().protocol.eof_received();
        }

        let has_pending_write = !self.inner.borrow().write_buf.is_empty();
        if has_pending_write {
            self.flush_writes();
        }

        let (empty, closing) = {
            let inner = self.inner.borrow();
            (inner.write_buf.is_empty(), inner.phase == Phase::Closing)
        };
        if empty && closing {
            self.call_connection_lost(None);
        }
    }

    pub fn write(&self, data: &[u8]) {
        if self.inner.borrow().phase == Phase::Closing {
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            let mut writer = inner.session.writer();
            let _ = writer.write_all(data);
        }
        self.flush_writes();

        let backlogged = self.inner.borrow().session.wants_write();
        if !backlogged {
            return;
        }
        self.register_writer();

        let should_pause = {
            let mut inner = self.inner.borrow_mut();
            inner.pending_write_bytes += data.len();
            if !inner.writer_paused && inner.pending_write_bytes >= inner.config.high_water {
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

    fn flush_writes(&self) {
        let result = {
            let mut inner = self.inner.borrow_mut();
            pump_tls(&mut inner.stream, &mut inner.session)
        };
        if let Err(e) = result {
            if !Error::is_would_block(&e) {
                self.close();
            }
        }
    }

    /// Spec §5: retried on every writable wakeup until the session's own
    /// outgoing backlog (`wants_write()`) clears, at which point a
    /// previously-signalled pause is released.
    fn on_write_ready(&self) {
        self.flush_writes();
        let backlogged = self.inner.borrow().session.wants_write();
        if backlogged {
            return;
        }
        self.unregister_writer();
        let should_resume = {
            let mut inner = self.inner.borrow_mut();
            inner.pending_write_bytes = 0;
            if inner.writer_paused {
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
        let _ = event_loop.add_writer(fd, move || writer.on_write_ready());
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

    /// TLS has no half-close analogous to `write_eof` on a plain socket
    /// (spec §4.5: "No SSL half-close").
    pub fn can_write_eof(&self) -> bool {
        false
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.phase == Phase::Closing {
            return;
        }
        inner.phase = Phase::Closing;
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_reader(fd);
        self.unregister_writer();
        self.call_connection_lost(None);
    }

    fn call_connection_lost(&self, err: Option<Error>) {
        let this = self.clone();
        self.inner.borrow().event_loop.call_soon(move || {
            this.inner.borrow_mut().protocol.connection_lost(err);
            let _ = this.inner.borrow().stream.shutdown(std::net::Shutdown::Both);
        });
    }
}

/// Pumps ciphertext in both directions once: read what's available off the
/// socket into the session, process it, then flush whatever the session
/// wants to send. `WouldBlock` on either direction is benign.
fn pump_tls<C: TlsSession>(stream: &mut TcpStream, session: &mut C) -> io::Result<()> {
    if session.wants_read() {
        match session.read_tls(stream) {
            Ok(0) => {}
            Ok(_) => {
                if let Err(err) = session.process_new_packets() {
                    return Err(io::Error::new(io::ErrorKind::Other, err));
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    while session.wants_write() {
        match session.write_tls(stream) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    struct RecordingProtocol {
        received: Future<Vec<u8>>,
        buf: Vec<u8>,
    }

    impl Protocol for RecordingProtocol {
        fn data_received(&mut self, data: &[u8]) {
            self.buf.extend_from_slice(data);
            if !self.received.done() {
                self.received.set_result(self.buf.clone());
            }
        }
    }

    fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = certified.cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
        (cert_der, key_der)
    }

    #[test]
    fn handshake_then_roundtrip_over_loopback_tcp() {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let (cert_der, key_der) = self_signed();

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .unwrap();

        let mut root_store = rustls::RootCertStore::empty();
        root_store.add(cert_der).unwrap();
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_stream = TcpStream::connect(addr).unwrap();
        let (server_stream, _) = listener.accept().unwrap();

        let event_loop = EventLoop::new().unwrap();

        let server_received: Future<Vec<u8>> = event_loop.create_future();
        let server_session = rustls::ServerConnection::new(Arc::new(server_config)).unwrap();
        let (server_transport, server_ready) = TlsTransport::handshake(
            &event_loop,
            server_stream,
            server_session,
            RecordingProtocol { received: server_received.clone(), buf: Vec::new() },
            TransportConfig::default(),
        )
        .unwrap();

        let client_received: Future<Vec<u8>> = event_loop.create_future();
        let server_name = ServerName::try_from("localhost").unwrap();
        let client_session = rustls::ClientConnection::new(Arc::new(client_config), server_name).unwrap();
        let (client_transport, client_ready) = TlsTransport::handshake(
            &event_loop,
            client_stream,
            client_session,
            RecordingProtocol { received: client_received, buf: Vec::new() },
            TransportConfig::default(),
        )
        .unwrap();

        event_loop.run_until_complete(&server_ready).unwrap();
        event_loop.run_until_complete(&client_ready).unwrap();

        assert!(!client_transport.can_write_eof());
        client_transport.write(b"hello over tls");

        let received = event_loop.run_until_complete(&server_received).unwrap();
        assert_eq!(received, b"hello over tls".to_vec());

        server_transport.close();
    }
}
