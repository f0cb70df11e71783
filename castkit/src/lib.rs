// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Castkit Library
//!
//! Client runtime for the Cast wire protocol: framed JSON messaging over TLS,
//! request/response correlation, connection lifecycle with heartbeats, and
//! local-network device discovery.

pub mod client;
pub mod connection;
pub mod context;
pub mod device;
pub mod discover;
pub mod error;
pub mod events;
pub mod message;
pub mod mock;
pub mod protocol;
pub mod status;
pub mod streak;

pub use client::{Client, ListenerId, Response};
pub use connection::{ConnectConfig, ConnectionState, Lifecycle};
pub use context::{CancelGuard, Context, ContextError};
pub use device::Device;
pub use discover::{uniq, Deduped, Scanner, Service};
pub use error::Error;
pub use events::Event;
pub use message::{
    Header, IdentifiablePayload, Message, Payload, PayloadWithId, DEFAULT_RECEIVER_ID,
    DEFAULT_SENDER_ID, NAMESPACE_CONNECTION, NAMESPACE_HEARTBEAT, NAMESPACE_RECEIVER,
};
pub use protocol::{Dialer, Serializer, TlsDialer};
pub use status::{ApplicationSession, ReceiverStatusPayload, Status, Volume};
pub use streak::{Factor, Streak};
