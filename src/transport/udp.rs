//! Datagram transport, spec §4.5's third paragraph. A single socket,
//! optionally connected to a fixed peer, with writes queued as
//! `(bytes, addr)` pairs rather than a flat byte buffer since datagram
//! boundaries must survive partial-write handling.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::transport::{Protocol, TransportConfig};

struct Inner<P> {
    socket: UdpSocket,
    fd: RawFd,
    event_loop: EventLoop,
    protocol: P,
    connected_peer: Option<SocketAddr>,
    write_buf: VecDeque<(Vec<u8>, Option<SocketAddr>)>,
    buffered_len: usize,
    writer_registered: bool,
    writer_paused: bool,
    closing: bool,
    config: TransportConfig,
}

pub struct UdpTransport<P: Protocol + 'static> {
    inner: Rc<RefCell<Inner<P>>>,
}

impl<P: Protocol + 'static> Clone for UdpTransport<P> {
    fn clone(&self) -> Self {
        UdpTransport {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Protocol + 'static> UdpTransport<P> {
    pub fn new(
        event_loop: &EventLoop,
        socket: UdpSocket,
        connected_peer: Option<SocketAddr>,
        protocol: P,
        config: TransportConfig,
    ) -> io::Result<UdpTransport<P>> {
        socket.set_nonblocking(true)?;
        let fd = socket.as_raw_fd();
        let transport = UdpTransport {
            inner: Rc::new(RefCell::new(Inner {
                socket,
                fd,
                event_loop: event_loop.clone(),
                protocol,
                connected_peer,
                write_buf: VecDeque::new(),
                buffered_len: 0,
                writer_registered: false,
                writer_paused: false,
                closing: false,
                config,
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
                let inner = self.inner.borrow();
                inner.socket.recv_from(&mut buf)
            };
            match result {
                Ok((n, addr)) => {
                    self.inner.borrow_mut().protocol.datagram_received(&buf[..n], addr);
                }
                Err(ref e) if Error::is_would_block(e) => return,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    if self.inner.borrow().connected_peer.is_some() {
                        self.inner.borrow_mut().protocol.connection_refused(Error::ConnectionRefused);
                    }
                    // Unconnected sockets silently drop refused datagrams
                    // per spec §4.5.
                }
                Err(_) => return,
            }
        }
    }

    fn on_writable(&self) {
        loop {
            let next = self.inner.borrow().write_buf.front().cloned();
            let Some((data, addr)) = next else { break };
            let result = {
                let inner = self.inner.borrow();
                match addr {
                    Some(addr) => inner.socket.send_to(&data, addr),
                    None => inner.socket.send(&data),
                }
            };
            match result {
                Ok(_) => {
                    let mut inner = self.inner.borrow_mut();
                    if let Some((popped, _)) = inner.write_buf.pop_front() {
                        inner.buffered_len -= popped.len();
                    }
                }
                Err(ref e) if Error::is_would_block(e) => break,
                Err(_) => {
                    let mut inner = self.inner.borrow_mut();
                    if let Some((popped, _)) = inner.write_buf.pop_front() {
                        inner.buffered_len -= popped.len();
                    }
                }
            }
        }

        let (empty, closing) = {
            let inner = self.inner.borrow();
            (inner.write_buf.is_empty(), inner.closing)
        };
        if empty {
            self.unregister_writer();
            if closing {
                self.call_connection_lost();
            }
        }

        // spec §5: tell the protocol once the queue has drained back down
        // to `low_water`, mirroring the same watermark discipline TCP uses.
        let should_resume = {
            let mut inner = self.inner.borrow_mut();
            if inner.writer_paused && inner.buffered_len <= inner.config.low_water {
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

    /// `sendto(data, addr)` from spec §4.5: `addr` is required for an
    /// unconnected socket and ignored (must match, if given) for a
    /// connected one.
    pub fn send_to(&self, data: Vec<u8>, addr: Option<SocketAddr>) {
        if self.inner.borrow().closing {
            return;
        }
        let target = self.inner.borrow().connected_peer.or(addr);
        let was_empty = self.inner.borrow().write_buf.is_empty();
        if was_empty {
            let result = {
                let inner = self.inner.borrow();
                match target {
                    Some(addr) => inner.socket.send_to(&data, addr),
                    None => inner.socket.send(&data),
                }
            };
            match result {
                Ok(_) => return,
                Err(ref e) if Error::is_would_block(e) => {}
                Err(_) => return,
            }
        }
        let mut inner = self.inner.borrow_mut();
        inner.buffered_len += data.len();
        inner.write_buf.push_back((data, target));
        let high = inner.config.high_water;
        let len = inner.buffered_len;
        let already_paused = inner.writer_paused;
        drop(inner);
        self.register_writer();
        if !already_paused && len >= high {
            self.inner.borrow_mut().writer_paused = true;
            self.inner.borrow_mut().protocol.pause_writing();
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closing {
            return;
        }
        inner.closing = true;
        let empty = inner.write_buf.is_empty();
        let fd = inner.fd;
        let event_loop = inner.event_loop.clone();
        drop(inner);
        let _ = event_loop.remove_reader(fd);
        if empty {
            self.call_connection_lost();
        }
    }

    fn call_connection_lost(&self) {
        let this = self.clone();
        self.inner.borrow().event_loop.call_soon(move || {
            this.inner.borrow_mut().protocol.connection_lost(None);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Future;

    struct EchoProtocol {
        received: Future<(Vec<u8>, SocketAddr)>,
    }

    impl Protocol for EchoProtocol {
        fn datagram_received(&mut self, data: &[u8], addr: SocketAddr) {
            if !self.received.done() {
                self.received.set_result((data.to_vec(), addr));
            }
        }
    }

    fn bind_unconnected(event_loop: &EventLoop, received: Future<(Vec<u8>, SocketAddr)>) -> UdpTransport<EchoProtocol> {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        UdpTransport::new(event_loop, socket, None, EchoProtocol { received }, TransportConfig::default()).unwrap()
    }

    #[test]
    fn send_to_an_unconnected_socket_delivers_datagram_and_source_addr() {
        let event_loop = EventLoop::new().unwrap();

        let server_received: Future<(Vec<u8>, SocketAddr)> = event_loop.create_future();
        let server = bind_unconnected(&event_loop, server_received.clone());
        let server_addr = server.inner.borrow().socket.local_addr().unwrap();

        let client_received: Future<(Vec<u8>, SocketAddr)> = event_loop.create_future();
        let client = bind_unconnected(&event_loop, client_received);
        let client_addr = client.inner.borrow().socket.local_addr().unwrap();

        client.send_to(b"ping".to_vec(), Some(server_addr));

        let (data, from) = event_loop.run_until_complete(&server_received).unwrap();
        assert_eq!(data, b"ping".to_vec());
        assert_eq!(from, client_addr);
    }

    #[test]
    fn send_to_a_connected_socket_ignores_the_stale_addr_argument() {
        let event_loop = EventLoop::new().unwrap();

        let server_received: Future<(Vec<u8>, SocketAddr)> = event_loop.create_future();
        let server = bind_unconnected(&event_loop, server_received.clone());
        let server_addr = server.inner.borrow().socket.local_addr().unwrap();

        let client_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        client_socket.connect(server_addr).unwrap();
        let client_received: Future<(Vec<u8>, SocketAddr)> = event_loop.create_future();
        let client = UdpTransport::new(
            &event_loop,
            client_socket,
            Some(server_addr),
            EchoProtocol { received: client_received },
            TransportConfig::default(),
        )
        .unwrap();

        // `addr` here is bogus; a connected socket must route to its peer
        // regardless of what's passed.
        let bogus: SocketAddr = "127.0.0.1:1".parse().unwrap();
        client.send_to(b"pong".to_vec(), Some(bogus));

        let (data, _from) = event_loop.run_until_complete(&server_received).unwrap();
        assert_eq!(data, b"pong".to_vec());
    }

    #[test]
    fn close_with_an_empty_write_buffer_delivers_connection_lost_immediately() {
        let event_loop = EventLoop::new().unwrap();
        let received: Future<(Vec<u8>, SocketAddr)> = event_loop.create_future();
        let transport = bind_unconnected(&event_loop, received);

        transport.close();

        let lost: Future<()> = event_loop.create_future();
        let lost_cb = lost.clone();
        let transport_fd = transport.inner.borrow().fd;
        event_loop.call_later(std::time::Duration::from_millis(10), move || {
            if !lost_cb.done() {
                lost_cb.set_result(());
            }
        });
        event_loop.run_until_complete(&lost).unwrap();
        // The reader was already unregistered by `close()`; a second
        // removal attempt finding nothing confirms that.
        assert!(!event_loop.remove_reader(transport_fd).unwrap());
    }
}
