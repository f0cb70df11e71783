// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Browse Scanner
//!
//! Discovery through a service-advertisement browser: a long-running mDNS
//! daemon resolves advertisements for the cast service type and streams them
//! back; each resolved record is decoded into a [`Device`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::thread;

use crossbeam_channel::{bounded, Sender};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use super::Scanner;
use crate::context::Context;
use crate::device::Device;
use crate::error::Error;

/// Service type advertised by cast devices.
pub const SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// Fragment every cast advertisement name must carry.
const SERVICE_TOKEN: &str = "_googlecast";

/// Scanner backed by continuous service browsing.
#[derive(Debug, Default)]
pub struct MdnsScanner;

impl MdnsScanner {
    fn decode(info: &ServiceInfo) -> Result<Device, String> {
        if !info.get_fullname().contains(SERVICE_TOKEN) {
            return Err(format!(
                "fullname '{}' does not contain '{}'",
                info.get_fullname(),
                SERVICE_TOKEN
            ));
        }

        let properties: HashMap<String, String> = info
            .get_properties()
            .iter()
            .map(|property| (property.key().to_string(), property.val_str().to_string()))
            .collect();

        let addresses = info.get_addresses();
        let ip: IpAddr = addresses
            .iter()
            .find(|addr| addr.is_ipv6())
            .or_else(|| addresses.iter().next())
            .copied()
            .ok_or_else(|| "advertisement carries no address".to_string())?;

        Ok(Device::new(ip, info.get_port(), properties))
    }
}

impl Scanner for MdnsScanner {
    fn scan(&self, ctx: &Context, results: Sender<Device>) -> Result<(), Error> {
        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => daemon,
            Err(err) => {
                drop(results);
                return Err(Error::Connect(format!("mdns daemon: {err}")));
            }
        };
        let browser = match daemon.browse(SERVICE_TYPE) {
            Ok(browser) => browser,
            Err(err) => {
                let _ = daemon.shutdown();
                drop(results);
                return Err(Error::Connect(format!("mdns browse: {err}")));
            }
        };

        // Bridge the daemon's receiver into a crossbeam channel so the scan
        // loop can select on it together with the context.
        let (bridge_tx, bridge_rx) = bounded::<ServiceEvent>(10);
        let forwarder = thread::spawn(move || {
            while let Ok(event) = browser.recv() {
                if bridge_tx.send(event).is_err() {
                    break;
                }
            }
        });

        loop {
            match ctx.recv(&bridge_rx) {
                Ok(Some(ServiceEvent::ServiceResolved(info))) => match Self::decode(&info) {
                    Ok(device) => {
                        if ctx.send(&results, device).is_err() {
                            break;
                        }
                    }
                    Err(reason) => {
                        tracing::debug!(%reason, "skipping advertisement record");
                    }
                },
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let _ = daemon.stop_browse(SERVICE_TYPE);
        let _ = daemon.shutdown();
        drop(bridge_rx);
        let _ = forwarder.join();
        drop(results);

        match ctx.err() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
