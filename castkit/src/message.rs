// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Protocol Messages
//!
//! The decoded form of a wire envelope: routing header plus opaque payload
//! bytes. The payload is an application-defined tagged JSON object; the codec
//! lifts its `type` and `requestId` fields into the header so the dispatcher
//! can route without re-parsing.

use serde::{Deserialize, Serialize};

/// Well-known protocol namespaces.
pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";

/// Default routing identities for a single-peer connection.
pub const DEFAULT_SENDER_ID: &str = "sender-0";
pub const DEFAULT_RECEIVER_ID: &str = "receiver-0";

/// Opaque application payload bytes (typically UTF-8 JSON).
pub type Payload = Vec<u8>;

/// Routing fields of a received envelope. `request_id` is present iff the
/// payload is a tagged request or its matching response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub typ: String,
    pub request_id: Option<u32>,
    pub destination_id: String,
    pub source_id: String,
    pub namespace: String,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

/// An application payload able to carry a request correlation id.
pub trait IdentifiablePayload {
    fn set_request_id(&mut self, id: u32);
}

/// Minimal tagged payload: a `type` plus optional `requestId`. Embed or reuse
/// for commands that need no further fields (CONNECT, PING, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadWithId {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,
}

impl PayloadWithId {
    pub fn new(typ: impl Into<String>) -> Self {
        PayloadWithId {
            typ: typ.into(),
            request_id: None,
        }
    }
}

impl IdentifiablePayload for PayloadWithId {
    fn set_request_id(&mut self, id: u32) {
        self.request_id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_omitted_until_stamped() {
        let mut payload = PayloadWithId::new("PING");
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"type":"PING"}"#
        );

        payload.set_request_id(7);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"type":"PING","requestId":7}"#
        );
    }
}
