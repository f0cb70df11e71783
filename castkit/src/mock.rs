// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock Transports
//!
//! In-memory doubles for the network seams: a chunk-channel byte stream that
//! behaves like a socket with a short read timeout, a peer handle for the far
//! end, a scriptable dialer and a scriptable discovery scanner. Used by the
//! integration tests; kept in the library so downstream crates can test
//! against the same seams.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::context::Context;
use crate::device::Device;
use crate::discover::Scanner;
use crate::error::Error;
use crate::message::Message;
use crate::protocol::{
    decode_envelope, encode_frame, CloseHandle, Dialer, Serializer, FRAME_HEADER_SIZE,
};

/// How long a mock read blocks before reporting `WouldBlock`, mirroring the
/// socket read timeout the real dialer configures. Short, so readers release
/// the stream lock quickly in tests.
const RECV_SLICE: Duration = Duration::from_millis(20);

/// Creates a connected in-memory stream and the handle for its far end.
pub fn stream_pair() -> (MockStream, MockPeer) {
    let (to_stream, stream_incoming) = unbounded::<Vec<u8>>();
    let (stream_outgoing, from_stream) = unbounded::<Vec<u8>>();
    let closed = Arc::new(AtomicBool::new(false));
    let stream = MockStream {
        incoming: stream_incoming,
        outgoing: stream_outgoing,
        pending: Vec::new(),
        closed: Arc::clone(&closed),
    };
    let peer = MockPeer {
        to_stream,
        from_stream,
        buffer: Vec::new(),
    };
    (stream, peer)
}

/// One side of an in-memory duplex stream. Satisfies the codec's transport
/// contract: reads time out with `WouldBlock`, an orderly far-end close reads
/// as `Ok(0)`, and the close handle wakes a blocked reader out-of-band.
pub struct MockStream {
    incoming: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl MockStream {
    /// Close handle to pair with this stream in [`Serializer::new`].
    pub fn closer(&self) -> MockCloser {
        MockCloser {
            closed: Arc::clone(&self.closed),
        }
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.incoming.recv_timeout(RECV_SLICE) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::ErrorKind::WouldBlock.into());
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.outgoing
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Out-of-band shutdown flag shared with a [`MockStream`]. The stream notices
/// within one read slice.
pub struct MockCloser {
    closed: Arc<AtomicBool>,
}

impl CloseHandle for MockCloser {
    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// The far end of a [`MockStream`]: what the device under test appears to be
/// talking to. Dropping it reads as an orderly close on the stream side.
pub struct MockPeer {
    to_stream: Sender<Vec<u8>>,
    from_stream: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
}

impl MockPeer {
    /// Injects raw bytes into the stream's read side.
    pub fn push(&self, bytes: Vec<u8>) {
        // A failed send means the stream is gone; tests observe that
        // elsewhere, so it is not an error here.
        let _ = self.to_stream.send(bytes);
    }

    /// Injects one complete wire frame carrying `payload_json`.
    pub fn push_frame(
        &self,
        payload_json: &str,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let frame = encode_frame(payload_json, source_id, destination_id, namespace)?;
        self.push(frame);
        Ok(())
    }

    /// Waits for one complete frame written by the stream side and decodes
    /// it. `None` on timeout or malformed frame.
    pub fn pull_frame(&mut self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.buffer.len() >= FRAME_HEADER_SIZE {
                let mut prefix = [0u8; FRAME_HEADER_SIZE];
                prefix.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
                let len = u32::from_be_bytes(prefix) as usize;
                if self.buffer.len() >= FRAME_HEADER_SIZE + len {
                    let body: Vec<u8> = self
                        .buffer
                        .drain(..FRAME_HEADER_SIZE + len)
                        .skip(FRAME_HEADER_SIZE)
                        .collect();
                    return decode_envelope(&body).ok();
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.from_stream.recv_timeout(remaining) {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(_) => return None,
            }
        }
    }

    /// Simulates the device closing the connection: the stream's next read
    /// (after its buffered bytes drain) returns end-of-stream.
    pub fn close(self) {}
}

/// Dialer that hands out in-memory streams and surfaces each accepted peer
/// on a channel for the test to script.
pub struct MockDialer {
    accepted: Sender<MockPeer>,
}

impl MockDialer {
    pub fn new() -> (Self, Receiver<MockPeer>) {
        let (accepted, peers) = unbounded();
        (MockDialer { accepted }, peers)
    }
}

impl Dialer for MockDialer {
    fn dial(&self, _ctx: &Context, _addr: SocketAddr) -> Result<Serializer, Error> {
        let (stream, peer) = stream_pair();
        self.accepted
            .send(peer)
            .map_err(|_| Error::Connect("mock dialer has no listener".to_string()))?;
        let closer = stream.closer();
        Ok(Serializer::new(Box::new(stream), Box::new(closer)))
    }
}

/// Scanner driven by a closure, counting how often it is invoked.
pub struct MockScanner<F> {
    scan_fn: F,
    calls: AtomicUsize,
}

impl<F> MockScanner<F>
where
    F: Fn(&Context, Sender<Device>) -> Result<(), Error> + Send + Sync,
{
    pub fn new(scan_fn: F) -> Self {
        MockScanner {
            scan_fn,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `scan` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl<F> Scanner for MockScanner<F>
where
    F: Fn(&Context, Sender<Device>) -> Result<(), Error> + Send + Sync,
{
    fn scan(&self, ctx: &Context, results: Sender<Device>) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        (self.scan_fn)(ctx, results)
    }
}
