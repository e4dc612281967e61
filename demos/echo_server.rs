// Run with: cargo run --example echo_server
//
// A minimal TCP echo server built directly on `corral::transport::tcp`,
// in the spirit of mio's own `examples/tcp_server.rs`: bind, accept,
// echo every byte back, and log the connection lifecycle. Runs one
// connection's `TcpTransport::new` per accepted socket directly (rather
// than going through `TcpServer::serve`) so this demo can wire each
// connection's write-back closure the same way `transport/tcp.rs`'s own
// tests do.

use std::cell::RefCell;
use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::rc::Rc;

use corral::error::Error;
use corral::event_loop::EventLoop;
use corral::transport::tcp::TcpTransport;
use corral::transport::{Protocol, TransportConfig};

struct EchoProtocol {
    peer: std::net::SocketAddr,
    write_back: Rc<RefCell<Option<Rc<dyn Fn(Vec<u8>)>>>>,
}

impl Protocol for EchoProtocol {
    fn connection_made(&mut self) {
        println!("accepted connection from {}", self.peer);
    }

    fn data_received(&mut self, data: &[u8]) {
        if let Some(write) = self.write_back.borrow().as_ref() {
            write(data.to_vec());
        }
    }

    fn connection_lost(&mut self, err: Option<Error>) {
        match err {
            Some(e) => println!("connection from {} lost: {e}", self.peer),
            None => println!("connection from {} closed", self.peer),
        }
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    println!("echo server listening on {}", listener.local_addr()?);

    let fd = listener.as_raw_fd();
    let event_loop_for_accept = event_loop.clone();
    event_loop.add_reader(fd, move || loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let write_back = Rc::new(RefCell::new(None));
                let protocol = EchoProtocol {
                    peer,
                    write_back: Rc::clone(&write_back),
                };
                match TcpTransport::new(&event_loop_for_accept, stream, protocol, TransportConfig::default()) {
                    Ok(transport) => {
                        *write_back.borrow_mut() = Some(Rc::new({
                            let transport = transport.clone();
                            move |data: Vec<u8>| transport.write(data)
                        }) as Rc<dyn Fn(Vec<u8>)>);
                    }
                    Err(e) => eprintln!("failed to set up accepted connection: {e}"),
                }
            }
            Err(ref e) if Error::is_would_block(e) => break,
            Err(e) => {
                eprintln!("accept() failed: {e}");
                break;
            }
        }
    })?;

    event_loop.run_forever()
}
