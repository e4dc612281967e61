//! C6/C7: transports and the `Protocol` interface, spec §4.5/§4.6.
//!
//! Every selector-based transport (`tcp`, `udp`, `tls`, `pipe`) shares the
//! same write-buffering and backpressure machinery; that shared piece lives
//! here as `WriteBuffer`, the way mio's per-backend selectors share nothing
//! but the `Interest`/`Events` types while each owns its own byte queue.

pub mod child;
pub mod pipe;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
pub mod udp;

use std::collections::VecDeque;

use crate::error::Error;

/// High/low watermarks controlling `pause_writing`/`resume_writing` (spec
/// §5 Backpressure, §9: implementation-defined, documented here). These
/// match Node.js's and Python 3.8+ asyncio's defaults of 64 KiB / 16 KiB.
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    pub high_water: usize,
    pub low_water: usize,
}

impl Default for TransportConfig {
    fn default() -> TransportConfig {
        TransportConfig {
            high_water: 64 * 1024,
            low_water: 16 * 1024,
        }
    }
}

/// The user-facing callback surface a transport drives. Only
/// `connection_made` and `connection_lost` are mandatory; everything else
/// has a default no-op (spec §6: "all optional except connection_made and
/// connection_lost").
pub trait Protocol {
    fn connection_made(&mut self) {}
    fn connection_lost(&mut self, _err: Option<Error>) {}

    fn data_received(&mut self, _data: &[u8]) {}
    /// Returning `true` requests half-close (keep the transport open for
    /// writing even though the peer won't send more).
    fn eof_received(&mut self) -> bool {
        false
    }

    fn datagram_received(&mut self, _data: &[u8], _addr: std::net::SocketAddr) {}
    fn connection_refused(&mut self, _err: Error) {}

    fn pause_writing(&mut self) {}
    fn resume_writing(&mut self) {}
}

/// Append-at-tail, consume-at-head byte queue shared by every stream
/// transport's write side (spec §4.5's "write buffer bytes are only ever
/// appended at the tail and consumed from the head" invariant).
#[derive(Default)]
pub(crate) struct WriteBuffer {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
}

impl WriteBuffer {
    pub(crate) fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.total
    }

    pub(crate) fn push(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        self.total += data.len();
        self.chunks.push_back(data);
    }

    /// Consumes from the head, calling `write_once` until it reports
    /// `WouldBlock`, the buffer drains, or an error occurs. Returns the
    /// number of bytes actually written.
    pub(crate) fn drain_with(
        &mut self,
        mut write_once: impl FnMut(&[u8]) -> std::io::Result<usize>,
    ) -> std::io::Result<usize> {
        let mut written = 0;
        while let Some(front) = self.chunks.front_mut() {
            match write_once(front) {
                Ok(0) => break,
                Ok(n) => {
                    written += n;
                    self.total -= n;
                    if n == front.len() {
                        self.chunks.pop_front();
                    } else {
                        front.drain(..n);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn drain_with_consumes_chunks_fully_written_in_one_call() {
        let mut buf = WriteBuffer::default();
        buf.push(b"hello".to_vec());
        buf.push(b"world".to_vec());
        assert_eq!(buf.len(), 10);

        let written = buf.drain_with(|chunk| Ok(chunk.len())).unwrap();
        assert_eq!(written, 10);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_with_handles_a_partial_write_without_losing_bytes() {
        let mut buf = WriteBuffer::default();
        buf.push(b"hello".to_vec());

        let written = buf.drain_with(|chunk| Ok(chunk.len().min(2))).unwrap();
        assert_eq!(written, 2);
        assert_eq!(buf.len(), 3);

        let written = buf.drain_with(|chunk| Ok(chunk.len())).unwrap();
        assert_eq!(written, 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_with_stops_cleanly_on_would_block() {
        let mut buf = WriteBuffer::default();
        buf.push(b"abc".to_vec());
        buf.push(b"def".to_vec());

        let mut calls = 0;
        let written = buf
            .drain_with(|chunk| {
                calls += 1;
                if calls == 1 {
                    Ok(chunk.len())
                } else {
                    Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"))
                }
            })
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn drain_with_propagates_a_real_error_and_keeps_the_remainder() {
        let mut buf = WriteBuffer::default();
        buf.push(b"abc".to_vec());

        let err = buf
            .drain_with(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke")))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn pushing_an_empty_chunk_is_a_no_op() {
        let mut buf = WriteBuffer::default();
        buf.push(Vec::new());
        assert!(buf.is_empty());
    }
}
