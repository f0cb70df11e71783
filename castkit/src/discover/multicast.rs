// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Query Scanner
//!
//! Discovery through direct multicast DNS queries: each probe sends a PTR
//! question for the cast service type (with the unicast-response bit set) and
//! collects replies for a bounded window, decoding SRV/TXT/A/AAAA answers
//! into [`Device`]s. Malformed packets and incomplete answer sets are skipped,
//! never fatal; the probe loop repeats until the context ends.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::Scanner;
use crate::context::Context;
use crate::device::Device;
use crate::error::Error;

/// Service name queried, without the trailing dot.
const SERVICE_NAME: &str = "_googlecast._tcp.local";
const SERVICE_TOKEN: &str = "_googlecast";

const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;

const CLASS_IN: u16 = 1;
/// Question-class bit asking responders to reply unicast to our socket.
const UNICAST_RESPONSE: u16 = 0x8000;

const FLAG_RESPONSE: u16 = 0x8000;

/// How long each blocking read may hold the socket before the loop rechecks
/// its context.
const READ_SLICE: Duration = Duration::from_millis(500);

/// Scanner that probes with direct multicast queries.
#[derive(Debug, Clone)]
pub struct QueryScanner {
    /// Reply window per probe: devices have this long to answer.
    pub probe_timeout: Duration,
}

impl Default for QueryScanner {
    fn default() -> Self {
        QueryScanner {
            probe_timeout: Duration::from_secs(3),
        }
    }
}

impl Scanner for QueryScanner {
    fn scan(&self, ctx: &Context, results: Sender<Device>) -> Result<(), Error> {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
            Ok(socket) => socket,
            Err(err) => {
                drop(results);
                return Err(Error::Transport(err));
            }
        };
        if let Err(err) = socket.set_read_timeout(Some(READ_SLICE)) {
            drop(results);
            return Err(Error::Transport(err));
        }

        let query = build_query(SERVICE_NAME);
        let target = SocketAddr::from((MDNS_GROUP, MDNS_PORT));
        let mut buf = vec![0u8; 4096];

        while ctx.err().is_none() {
            if let Err(err) = socket.send_to(&query, target) {
                tracing::debug!(error = %err, "probe send failed");
                if ctx.sleep(self.probe_timeout).is_err() {
                    break;
                }
                continue;
            }

            let window_end = Instant::now() + self.probe_timeout;
            while ctx.err().is_none() && Instant::now() < window_end {
                match socket.recv_from(&mut buf) {
                    Ok((len, _source)) => match decode_response(&buf[..len]) {
                        Ok(Some(device)) => {
                            if ctx.send(&results, device).is_err() {
                                drop(results);
                                return match ctx.err() {
                                    Some(err) => Err(err.into()),
                                    None => Ok(()),
                                };
                            }
                        }
                        Ok(None) => {}
                        Err(reason) => {
                            tracing::debug!(%reason, "skipping mdns answer");
                        }
                    },
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "probe receive failed");
                        break;
                    }
                }
            }
        }

        drop(results);
        match ctx.err() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Builds a single-question PTR query for `service`.
fn build_query(service: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12 + service.len() + 6);
    packet.extend_from_slice(&0u16.to_be_bytes()); // transaction id
    packet.extend_from_slice(&0u16.to_be_bytes()); // flags: standard query
    packet.extend_from_slice(&1u16.to_be_bytes()); // questions
    packet.extend_from_slice(&0u16.to_be_bytes()); // answers
    packet.extend_from_slice(&0u16.to_be_bytes()); // authorities
    packet.extend_from_slice(&0u16.to_be_bytes()); // additionals
    for label in service.split('.').filter(|label| !label.is_empty()) {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&TYPE_PTR.to_be_bytes());
    packet.extend_from_slice(&(CLASS_IN | UNICAST_RESPONSE).to_be_bytes());
    packet
}

/// Minimal DNS reader over one packet, with name decompression.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        let byte = *self.buf.get(self.pos).ok_or("truncated packet")?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, String> {
        Ok(u16::from_be_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_be_bytes([
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ]))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(len).ok_or("length overflow")?;
        let bytes = self.buf.get(self.pos..end).ok_or("truncated packet")?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a possibly-compressed domain name, leaving the cursor after the
    /// name's in-place encoding (not after any pointer target).
    fn read_name(&mut self) -> Result<String, String> {
        let mut labels: Vec<String> = Vec::new();
        let mut pos = self.pos;
        let mut jumped = false;
        let mut jumps = 0;

        loop {
            let len = *self.buf.get(pos).ok_or("truncated name")? as usize;
            if len == 0 {
                pos += 1;
                break;
            }
            if len & 0xC0 == 0xC0 {
                if jumps >= 16 {
                    return Err("name compression loop".to_string());
                }
                let low = *self.buf.get(pos + 1).ok_or("truncated pointer")? as usize;
                if !jumped {
                    self.pos = pos + 2;
                    jumped = true;
                }
                pos = ((len & 0x3F) << 8) | low;
                jumps += 1;
                continue;
            }
            let start = pos + 1;
            let end = start + len;
            let label = self.buf.get(start..end).ok_or("truncated label")?;
            labels.push(String::from_utf8_lossy(label).into_owned());
            pos = end;
        }

        if !jumped {
            self.pos = pos;
        }
        Ok(labels.join("."))
    }
}

/// Decodes one reply packet. `Ok(None)` means "not a cast response";
/// `Err` means the packet looked relevant but was malformed or incomplete.
fn decode_response(packet: &[u8]) -> Result<Option<Device>, String> {
    let mut cursor = Cursor::new(packet);
    let _id = cursor.read_u16()?;
    let flags = cursor.read_u16()?;
    if flags & FLAG_RESPONSE == 0 {
        return Ok(None);
    }
    let questions = cursor.read_u16()?;
    let answers = cursor.read_u16()?;
    let authorities = cursor.read_u16()?;
    let additionals = cursor.read_u16()?;

    for _ in 0..questions {
        cursor.read_name()?;
        cursor.take(4)?;
    }

    let mut saw_service = false;
    let mut txt_records: Vec<String> = Vec::new();
    let mut port: Option<u16> = None;
    let mut v4: Option<IpAddr> = None;
    let mut v6: Option<IpAddr> = None;

    let records = answers as usize + authorities as usize + additionals as usize;
    for _ in 0..records {
        let name = cursor.read_name()?;
        let typ = cursor.read_u16()?;
        let _class = cursor.read_u16()?;
        let _ttl = cursor.read_u32()?;
        let rdata_len = cursor.read_u16()? as usize;
        let record_end = cursor
            .pos
            .checked_add(rdata_len)
            .filter(|end| *end <= packet.len())
            .ok_or("truncated record data")?;

        if name.contains(SERVICE_TOKEN) {
            saw_service = true;
        }

        match typ {
            TYPE_PTR => {
                let target = cursor.read_name()?;
                if target.contains(SERVICE_TOKEN) {
                    saw_service = true;
                }
            }
            TYPE_SRV => {
                let _priority = cursor.read_u16()?;
                let _weight = cursor.read_u16()?;
                port = Some(cursor.read_u16()?);
            }
            TYPE_TXT => {
                while cursor.pos < record_end {
                    let len = cursor.read_u8()? as usize;
                    let text = cursor.take(len.min(record_end - cursor.pos))?;
                    txt_records.push(String::from_utf8_lossy(text).into_owned());
                }
            }
            TYPE_A => {
                let octets: [u8; 4] = cursor
                    .take(4.min(rdata_len))?
                    .try_into()
                    .map_err(|_| "short A record".to_string())?;
                v4 = Some(IpAddr::from(octets));
            }
            TYPE_AAAA => {
                let octets: [u8; 16] = cursor
                    .take(16.min(rdata_len))?
                    .try_into()
                    .map_err(|_| "short AAAA record".to_string())?;
                v6 = Some(IpAddr::from(octets));
            }
            _ => {}
        }

        cursor.pos = record_end;
    }

    if !saw_service {
        return Ok(None);
    }

    // Prefer the IPv6 record, fall back to IPv4.
    let ip = v6.or(v4).ok_or("no address record")?;
    let port = port.ok_or("no srv record")?;
    let properties: HashMap<String, String> =
        super::parse_properties(txt_records.iter().map(String::as_str));

    Ok(Some(Device::new(ip, port, properties)))
}
