// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device Discovery
//!
//! Continuous network scanning with identity dedup and first/named selection.
//! A [`Scanner`] pushes every sighting onto a bounded channel — duplicates
//! included — and must close the channel before returning, even on failure or
//! cancellation. Sends block under backpressure by design: a scanner never
//! outruns a slow consumer, and a cancelled context unblocks a pending send.

pub mod mdns;
pub mod multicast;

use std::collections::{HashMap, HashSet};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::{Context, ContextError};
use crate::device::Device;
use crate::error::Error;

/// Buffer between a scanner and its consumer.
const SCAN_BUFFER: usize = 5;

/// A concrete discovery mechanism.
pub trait Scanner: Send + Sync {
    /// Repeatedly probes the network, sending one [`Device`] per sighting
    /// until `ctx` ends. Must drop `results` before returning on every path.
    /// Individual malformed advertisement records are skipped, not fatal.
    fn scan(&self, ctx: &Context, results: Sender<Device>) -> Result<(), Error>;
}

/// Splits `key=value` advertisement records into a property map. Records may
/// themselves be `|`-joined lists of pairs; entries without `=` are skipped.
pub fn parse_properties<'a>(records: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for record in records {
        for pair in record.split('|') {
            if let Some((key, value)) = pair.split_once('=') {
                properties.insert(key.to_string(), value.to_string());
            }
        }
    }
    properties
}

/// Forwards the first device seen for each distinct identity, preserving
/// arrival order. Identity-less devices are never deduplicated: each one is
/// forwarded. Closes `output` when `input` closes. Memory grows with the
/// number of distinct identities, acceptable for a bounded discovery session.
pub fn uniq(input: Receiver<Device>, output: Sender<Device>) {
    let mut seen: HashSet<String> = HashSet::new();
    for device in input.iter() {
        let id = device.id();
        if !id.is_empty() && !seen.insert(id.to_string()) {
            continue;
        }
        if output.send(device).is_err() {
            // Consumer gone; drain nothing further.
            break;
        }
    }
}

/// Scanner adapter that deduplicates an inner scanner's sightings.
pub struct Deduped<S>(pub S);

impl<S: Scanner> Scanner for Deduped<S> {
    fn scan(&self, ctx: &Context, results: Sender<Device>) -> Result<(), Error> {
        let (raw_tx, raw_rx) = bounded(SCAN_BUFFER);
        let mut outcome = Ok(());
        std::thread::scope(|scope| {
            scope.spawn(move || uniq(raw_rx, results));
            outcome = self.0.scan(ctx, raw_tx);
        });
        outcome
    }
}

/// Selection over a scanner: first sighting, or first exact name match.
pub struct Service<S> {
    pub scanner: S,
}

impl<S: Scanner> Service<S> {
    pub fn new(scanner: S) -> Self {
        Service { scanner }
    }

    /// Returns the first device the scan produces, or the context's error if
    /// it ends first. The scan is started at most once and is cancelled as
    /// soon as a device is taken; remaining scan activity winds down through
    /// its own close-on-cancel contract.
    pub fn first(&self, ctx: &Context) -> Result<Device, Error> {
        let (scan_ctx, scan_cancel) = ctx.with_cancel();
        let (tx, rx) = bounded(SCAN_BUFFER);
        let mut found = Err(Error::Cancelled(ContextError::Cancelled));

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let _ = self.scanner.scan(&scan_ctx, tx);
            });
            found = match ctx.recv(&rx) {
                Ok(Some(device)) => Ok(device),
                Ok(None) => Err(ctx.err().unwrap_or(ContextError::Cancelled).into()),
                Err(err) => Err(err.into()),
            };
            scan_cancel.cancel();
        });
        found
    }

    /// Returns the first device whose friendly name equals `name` exactly, or
    /// the context's error. The scan stream is drained continuously while
    /// waiting so upstream backpressure can never wedge the probe loop; the
    /// drain runs until the scanner closes its stream.
    pub fn named(&self, ctx: &Context, name: &str) -> Result<Device, Error> {
        let (scan_ctx, scan_cancel) = ctx.with_cancel();
        let (tx, rx) = bounded(SCAN_BUFFER);
        let (match_tx, match_rx) = bounded(1);
        let mut found = Err(Error::Cancelled(ContextError::Cancelled));

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let _ = self.scanner.scan(&scan_ctx, tx);
            });
            scope.spawn(move || {
                for device in rx.iter() {
                    if device.name() == name {
                        // Only the first match matters.
                        let _ = match_tx.try_send(device);
                    }
                }
            });
            found = match ctx.recv(&match_rx) {
                Ok(Some(device)) => Ok(device),
                Ok(None) => Err(ctx.err().unwrap_or(ContextError::Cancelled).into()),
                Err(err) => Err(err.into()),
            };
            scan_cancel.cancel();
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_properties_splits_pairs_and_pipe_lists() {
        let properties = parse_properties(["id=123|fn=Living Room", "md=Gadget", "junk"]);
        assert_eq!(properties.get("id").unwrap(), "123");
        assert_eq!(properties.get("fn").unwrap(), "Living Room");
        assert_eq!(properties.get("md").unwrap(), "Gadget");
        assert_eq!(properties.len(), 3);
    }

    #[test]
    fn parse_properties_keeps_value_equals_signs() {
        let properties = parse_properties(["k=a=b"]);
        assert_eq!(properties.get("k").unwrap(), "a=b");
    }
}
