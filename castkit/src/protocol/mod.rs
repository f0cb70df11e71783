// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Codec
//!
//! Frames envelopes over a duplex byte stream: a 4-byte big-endian length
//! prefix followed by a JSON envelope carrying `source_id`, `destination_id`,
//! `namespace` and the serialized application payload as a string field.
//!
//! Concurrency contract: any number of threads may call [`Serializer::send`]
//! (the prefix+body write happens under one lock acquisition, so frames never
//! interleave), but exactly one thread — the dispatch loop — may call
//! [`Serializer::receive`]. The reader releases the stream lock between short
//! transport reads (the dialer puts a bounded read timeout on the socket) so
//! writers are never starved; cancellation unblocks a pending receive through
//! [`Serializer::close`], which shuts the transport out-of-band.

mod tls;

pub use tls::TlsDialer;

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Error;
use crate::message::{Header, Message};

/// Width of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Ceiling on a single envelope. Anything larger is a decode error.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// The JSON envelope as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    source_id: String,
    destination_id: String,
    namespace: String,
    payload: String,
}

/// The routing head of an application payload. Parsed leniently: a payload
/// without them is an untagged broadcast, not an error.
#[derive(Debug, Default, Deserialize)]
struct PayloadHead {
    #[serde(rename = "type", default)]
    typ: String,
    #[serde(rename = "requestId")]
    request_id: Option<u32>,
}

/// Duplex byte stream the codec runs over.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Out-of-band shutdown for a stream: must wake a read blocked on the other
/// side of the mutex, from any thread.
pub trait CloseHandle: Send + Sync {
    fn close(&self) -> io::Result<()>;
}

/// Opens a transport to a device address. Implemented by [`TlsDialer`] for
/// real devices and by test doubles.
pub trait Dialer: Send + Sync {
    fn dial(&self, ctx: &Context, addr: SocketAddr) -> Result<Serializer, Error>;
}

/// Builds a wire frame: length prefix plus envelope bytes.
pub fn encode_frame(
    payload_json: &str,
    source_id: &str,
    destination_id: &str,
    namespace: &str,
) -> Result<Vec<u8>, Error> {
    let envelope = Envelope {
        source_id: source_id.to_string(),
        destination_id: destination_id.to_string(),
        namespace: namespace.to_string(),
        payload: payload_json.to_string(),
    };
    let body = serde_json::to_vec(&envelope)
        .map_err(|err| Error::Decode(format!("envelope encoding: {err}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Decode(format!(
            "frame length {} exceeds maximum {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes envelope bytes (without the length prefix) into a [`Message`].
pub fn decode_envelope(body: &[u8]) -> Result<Message, Error> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|err| Error::Decode(format!("envelope decoding: {err}")))?;
    let head: PayloadHead = serde_json::from_str(&envelope.payload).unwrap_or_default();
    Ok(Message {
        header: Header {
            typ: head.typ,
            request_id: head.request_id,
            destination_id: envelope.destination_id,
            source_id: envelope.source_id,
            namespace: envelope.namespace,
        },
        payload: envelope.payload.into_bytes(),
    })
}

/// Codec over one transport connection.
pub struct Serializer {
    stream: Mutex<Box<dyn Stream>>,
    closer: Box<dyn CloseHandle>,
    closed: AtomicBool,
}

impl Serializer {
    pub fn new(stream: Box<dyn Stream>, closer: Box<dyn CloseHandle>) -> Self {
        Serializer {
            stream: Mutex::new(stream),
            closer,
            closed: AtomicBool::new(false),
        }
    }

    fn lock_stream(&self) -> MutexGuard<'_, Box<dyn Stream>> {
        self.stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marshals `payload`, wraps it in an envelope and writes the whole frame
    /// as one serialized write. Concurrent senders never interleave.
    pub fn send(
        &self,
        payload: &impl Serialize,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let payload_json = serde_json::to_string(payload)
            .map_err(|err| Error::Decode(format!("payload encoding: {err}")))?;
        let frame = encode_frame(&payload_json, source_id, destination_id, namespace)?;

        let mut stream = self.lock_stream();
        stream.write_all(&frame)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads exactly one frame and decodes it. Must only be called by the
    /// connection's single reader. Any short read, out-of-range length or
    /// malformed envelope leaves the codec unusable.
    pub fn receive(&self) -> Result<Message, Error> {
        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        self.read_full(&mut prefix)?;
        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(Error::Decode(format!("frame length {len} out of range")));
        }
        let mut body = vec![0u8; len];
        self.read_full(&mut body)?;
        decode_envelope(&body)
    }

    fn read_full(&self, buf: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            let mut stream = self.lock_stream();
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(if self.closed.load(Ordering::Acquire) {
                        Error::Closed
                    } else {
                        Error::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream closed mid-frame",
                        ))
                    });
                }
                Ok(n) => filled += n,
                Err(err)
                    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    // Read window elapsed: release the lock so writers get a turn.
                    drop(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    return Err(if self.closed.load(Ordering::Acquire) {
                        Error::Closed
                    } else {
                        Error::Transport(err)
                    });
                }
            }
        }
        Ok(())
    }

    /// Releases the transport. Outstanding receives fail promptly with
    /// [`Error::Closed`]. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closer.close().map_err(Error::Transport)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
