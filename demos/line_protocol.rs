// Run with: cargo run --example line_protocol
//
// A line-delimited protocol server: every accepted connection gets its
// received bytes fed through the parser layer's `LineParser`, and a
// spawned task `.await`s each framed line off the resulting `DataBuffer`
// and writes "ECHO: <line>" back, demonstrating `StreamBuffer` wired
// directly to a `TcpTransport` the way spec §8's line-protocol scenario
// does in `tests/scenarios.rs`, but over a real accepted socket instead
// of hand-fed bytes.

use std::cell::RefCell;
use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::rc::Rc;

use corral::error::Error;
use corral::event_loop::EventLoop;
use corral::stream::parsers::LineParser;
use corral::stream::stream_buffer::StreamBuffer;
use corral::transport::tcp::TcpTransport;
use corral::transport::{Protocol, TransportConfig};

const MAX_LINE: usize = 4096;

struct LineProtocol {
    buffer: Rc<RefCell<StreamBuffer<Vec<u8>>>>,
}

impl Protocol for LineProtocol {
    fn data_received(&mut self, data: &[u8]) {
        self.buffer.borrow_mut().feed_data(data);
    }

    fn eof_received(&mut self) -> bool {
        self.buffer.borrow_mut().feed_eof();
        false
    }

    fn connection_lost(&mut self, err: Option<Error>) {
        if let Some(e) = err {
            println!("line connection lost: {e}");
        }
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    println!("line-protocol server listening on {}", listener.local_addr()?);

    let fd = listener.as_raw_fd();
    let event_loop_for_accept = event_loop.clone();
    event_loop.add_reader(fd, move || loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let buffer = Rc::new(RefCell::new(StreamBuffer::new(&event_loop_for_accept)));
                let lines = buffer.borrow_mut().set_parser(Box::new(LineParser::new(MAX_LINE)));
                let protocol = LineProtocol { buffer: Rc::clone(&buffer) };
                match TcpTransport::new(&event_loop_for_accept, stream, protocol, TransportConfig::default()) {
                    Ok(transport) => {
                        let event_loop_for_task = event_loop_for_accept.clone();
                        event_loop_for_task.spawn::<(), _>("line-echo", async move {
                            loop {
                                let ready = lines.borrow_mut().wait_ready();
                                ready.await;
                                let item = lines.borrow_mut().try_next();
                                match item {
                                    Some(line) => {
                                        // `line` already carries its own terminator (`\r\n` or
                                        // `\n`), per `LineParser`'s framing.
                                        let mut reply = b"ECHO: ".to_vec();
                                        reply.extend_from_slice(&line);
                                        transport.write(reply);
                                    }
                                    None if lines.borrow().at_eof() => break,
                                    None => continue,
                                }
                            }
                            Ok(())
                        });
                    }
                    Err(e) => eprintln!("failed to set up accepted connection from {peer}: {e}"),
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
