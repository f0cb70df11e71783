// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error Types
//!
//! One taxonomy for the whole crate: connection-fatal errors (transport and
//! decode failures) versus locally recovered ones (caller cancellation).

use std::io;

use thiserror::Error;

use crate::context::ContextError;

/// Errors surfaced by the codec, dispatcher, lifecycle and discovery layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Dial or TLS handshake failure. The lifecycle treats this as a failed
    /// attempt and retries.
    #[error("connection failed: {0}")]
    Connect(String),

    /// I/O failure on an established connection. Fatal to the connection;
    /// the lifecycle emits `Disconnected` and reconnects.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed frame or envelope. Fatal to the connection: no partial-frame
    /// recovery is attempted.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// Operation on a serializer that was explicitly closed.
    #[error("serializer closed")]
    Closed,

    /// Caller-side cancellation or deadline. Recovered locally: the pending
    /// request entry is removed and the connection is unaffected.
    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

impl Error {
    /// True when the error invalidates the current connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::Transport(_) | Error::Decode(_) | Error::Closed
        )
    }
}
