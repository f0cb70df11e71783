// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Discovered Device
//!
//! A device as seen in a service advertisement: network address plus the
//! advertised key/value properties. Immutable once constructed; the scanner
//! builds one per sighting and ownership moves down the discovery pipeline.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// A protocol-speaking device located on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub ip: IpAddr,
    pub port: u16,
    pub properties: HashMap<String, String>,
}

impl Device {
    pub fn new(ip: IpAddr, port: u16, properties: HashMap<String, String>) -> Self {
        Device {
            ip,
            port,
            properties,
        }
    }

    /// Advertised identity. Empty when the device does not advertise one;
    /// identity-less devices are never considered duplicates of one another.
    pub fn id(&self) -> &str {
        self.property("id")
    }

    /// Friendly name shown to users.
    pub fn name(&self) -> &str {
        self.property("fn")
    }

    /// Model string.
    pub fn model(&self) -> &str {
        self.property("md")
    }

    /// Advertised status text.
    pub fn status(&self) -> &str {
        self.property("rs")
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn property(&self, key: &str) -> &str {
        self.properties.get(key).map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn device_with(pairs: &[(&str, &str)]) -> Device {
        let properties = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Device::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 8009, properties)
    }

    #[test]
    fn accessors_read_advertised_properties() {
        let device = device_with(&[("id", "abc"), ("fn", "Living Room"), ("md", "Gadget")]);
        assert_eq!(device.id(), "abc");
        assert_eq!(device.name(), "Living Room");
        assert_eq!(device.model(), "Gadget");
        assert_eq!(device.status(), "");
    }

    #[test]
    fn addr_combines_ip_and_port() {
        let device = device_with(&[]);
        assert_eq!(device.addr().to_string(), "192.168.1.10:8009");
    }
}
