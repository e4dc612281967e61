//! C7/C12: subprocess transport. Spawns a child with its stdio wired
//! through pipes, fans stdout/stderr into the owning protocol via
//! `ReadPipeTransport`, exposes stdin via `WritePipeTransport`, and routes
//! the exit status through a `ChildWatcher` (`child_watcher.rs`) rather
//! than polling — the loop learns about termination exactly once, from the
//! `SIGCHLD` dispatch, matching spec §4.11.

use std::cell::RefCell;
use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use std::process::{Command, Stdio};
use std::rc::Rc;

use crate::child_watcher::{ChildWatcher, ExitStatus, SigchldWatcher};
use crate::event_loop::EventLoop;
use crate::transport::pipe::{ReadPipeTransport, WritePipeTransport};
use crate::transport::{Protocol, TransportConfig};

/// What a subprocess protocol is notified about, beyond the usual
/// `Protocol` surface: which stream a chunk came from, and the final
/// status once the child has been reaped.
pub trait SubprocessProtocol {
    fn pipe_data_received(&mut self, fd: i32, data: &[u8]);
    fn pipe_connection_lost(&mut self, fd: i32) {
        let _ = fd;
    }
    fn process_exited(&mut self, status: ExitStatus);
}

struct StdoutRelay<P> {
    fd: i32,
    protocol: Rc<RefCell<P>>,
}

impl<P: SubprocessProtocol> Protocol for StdoutRelay<P> {
    fn data_received(&mut self, data: &[u8]) {
        self.protocol.borrow_mut().pipe_data_received(self.fd, data);
    }
    fn connection_lost(&mut self, _err: Option<crate::error::Error>) {
        self.protocol.borrow_mut().pipe_connection_lost(self.fd);
    }
}

/// A spawned child process plus its wired-up pipes.
pub struct SubprocessTransport {
    pid: libc::pid_t,
    stdin: Option<WritePipeTransport<StdinSink>>,
}

struct StdinSink;
impl Protocol for StdinSink {}

impl SubprocessTransport {
    /// Spawns `command`, hooking stdout/stderr into `protocol` and
    /// `process_exited` into `watcher`.
    pub fn spawn<P>(
        event_loop: &EventLoop,
        watcher: &SigchldWatcher,
        mut command: Command,
        protocol: P,
    ) -> io::Result<SubprocessTransport>
    where
        P: SubprocessProtocol + 'static,
    {
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let pid = child.id() as libc::pid_t;

        let protocol = Rc::new(RefCell::new(protocol));

        if let Some(stdout) = child.stdout.take() {
            let fd: RawFd = stdout.into_raw_fd();
            let relay = StdoutRelay { fd: 1, protocol: Rc::clone(&protocol) };
            ReadPipeTransport::new(event_loop, fd, relay)?;
        }
        if let Some(stderr) = child.stderr.take() {
            let fd: RawFd = stderr.into_raw_fd();
            let relay = StdoutRelay { fd: 2, protocol: Rc::clone(&protocol) };
            ReadPipeTransport::new(event_loop, fd, relay)?;
        }
        let stdin = match child.stdin.take() {
            Some(stdin) => {
                let fd: RawFd = stdin.into_raw_fd();
                Some(WritePipeTransport::new(event_loop, fd, StdinSink, TransportConfig::default())?)
            }
            None => None,
        };

        // Leak the `std::process::Child`: we've taken ownership of every fd
        // it held, and reaping happens through the SIGCHLD watcher instead
        // of `Child::wait`, which would otherwise race it.
        std::mem::forget(child);

        let watcher_protocol = Rc::clone(&protocol);
        watcher.add_child_handler(pid, move |status| {
            watcher_protocol.borrow_mut().process_exited(status);
        });

        Ok(SubprocessTransport { pid, stdin })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn write_stdin(&self, data: Vec<u8>) {
        if let Some(stdin) = &self.stdin {
            stdin.write(data);
        }
    }

    pub fn close_stdin(&self) {
        if let Some(stdin) = &self.stdin {
            stdin.write_eof();
        }
    }

    pub fn send_signal(&self, signum: i32) -> io::Result<()> {
        let ret = unsafe { libc::kill(self.pid, signum) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn terminate(&self) -> io::Result<()> {
        self.send_signal(libc::SIGTERM)
    }

    pub fn kill(&self) -> io::Result<()> {
        self.send_signal(libc::SIGKILL)
    }
}
