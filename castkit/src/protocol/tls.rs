// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! TLS Dialer
//!
//! Opens the secured transport to a device. Devices present self-signed
//! certificates, so certificate and hostname verification are disabled; the
//! protocol assumes a trusted local network.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use native_tls::{HandshakeError, TlsConnector};

use super::{CloseHandle, Dialer, Serializer};
use crate::context::Context;
use crate::error::Error;

/// Dials a TLS connection with a bounded connect timeout and a short socket
/// read timeout (the codec's reader uses it to yield the stream lock).
#[derive(Debug, Clone)]
pub struct TlsDialer {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TlsDialer {
    fn default() -> Self {
        TlsDialer {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(500),
        }
    }
}

struct TcpCloseHandle {
    stream: TcpStream,
}

impl CloseHandle for TcpCloseHandle {
    fn close(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl Dialer for TlsDialer {
    fn dial(&self, ctx: &Context, addr: SocketAddr) -> Result<Serializer, Error> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let timeout = match ctx.deadline() {
            Some(deadline) => self
                .connect_timeout
                .min(deadline.saturating_duration_since(std::time::Instant::now())),
            None => self.connect_timeout,
        };
        if timeout.is_zero() {
            return Err(Error::Connect(format!("dial {addr}: deadline passed")));
        }

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|err| Error::Connect(format!("dial {addr}: {err}")))?;
        let _ = tcp.set_nodelay(true);
        tcp.set_read_timeout(Some(self.read_timeout))
            .map_err(Error::Transport)?;
        let closer = TcpCloseHandle {
            stream: tcp.try_clone().map_err(Error::Transport)?,
        };

        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| Error::Connect(format!("tls setup: {err}")))?;

        // The socket read timeout can surface mid-handshake as WouldBlock;
        // drive the handshake to completion under the context.
        let mut pending = connector.connect(&addr.ip().to_string(), tcp);
        let stream = loop {
            match pending {
                Ok(stream) => break stream,
                Err(HandshakeError::WouldBlock(mid)) => {
                    if let Some(err) = ctx.err() {
                        return Err(err.into());
                    }
                    pending = mid.handshake();
                }
                Err(HandshakeError::Failure(err)) => {
                    return Err(Error::Connect(format!("tls handshake with {addr}: {err}")));
                }
            }
        };

        tracing::debug!(%addr, "transport opened");
        Ok(Serializer::new(Box::new(stream), Box::new(closer)))
    }
}
