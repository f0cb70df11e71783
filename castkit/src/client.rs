// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Request Dispatcher
//!
//! Demultiplexes the single incoming envelope stream into pending-request
//! fulfillment and event delivery. One dedicated worker drives
//! [`Client::dispatch`] in a loop — it is the codec's sole reader — while any
//! number of threads call [`Client::send`] and [`Client::request`].
//!
//! Pending requests are correlated by a monotonically assigned u32 that wraps
//! at the unsigned boundary; a collision after wraparound is an accepted,
//! documented limitation. Every entry additionally carries a unique token so
//! that dropping a stale [`Response`] can never evict a newer entry that
//! reused its id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::message::{IdentifiablePayload, Payload, DEFAULT_SENDER_ID};
use crate::protocol::Serializer;

struct PendingEntry {
    token: u64,
    slot: Sender<Payload>,
    /// Originating routing, kept to sanity-check the response.
    namespace: String,
    destination_id: String,
}

type PendingTable = Arc<Mutex<HashMap<u32, PendingEntry>>>;

/// Handle on a registered event listener, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    sender: Sender<Payload>,
}

#[derive(Default)]
struct ListenerTable {
    entries: HashMap<(String, String), Vec<Listener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Protocol client bound to one connection.
pub struct Client {
    serializer: Arc<Serializer>,
    source_id: String,
    next_request_id: AtomicU32,
    next_token: AtomicU64,
    next_listener_id: AtomicU64,
    pending: PendingTable,
    listeners: Mutex<ListenerTable>,
    dropped_deliveries: AtomicU64,
}

impl Client {
    pub fn new(serializer: Arc<Serializer>) -> Self {
        Client {
            serializer,
            source_id: DEFAULT_SENDER_ID.to_string(),
            next_request_id: AtomicU32::new(1),
            next_token: AtomicU64::new(0),
            next_listener_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            listeners: Mutex::new(ListenerTable::default()),
            dropped_deliveries: AtomicU64::new(0),
        }
    }

    /// Sends a fire-and-forget payload.
    pub fn send(
        &self,
        payload: &impl Serialize,
        destination_id: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        self.serializer
            .send(payload, &self.source_id, destination_id, namespace)
    }

    /// Stamps the next request id on `payload`, registers a pending entry and
    /// sends. The caller awaits the returned [`Response`] under its own
    /// context; the dispatcher imposes no timeout. Dropping the handle removes
    /// the pending entry.
    pub fn request<P>(
        &self,
        mut payload: P,
        destination_id: &str,
        namespace: &str,
    ) -> Result<Response, Error>
    where
        P: IdentifiablePayload + Serialize,
    {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        payload.set_request_id(id);

        let (slot_tx, slot_rx) = bounded(1);
        lock(&self.pending).insert(
            id,
            PendingEntry {
                token,
                slot: slot_tx,
                namespace: namespace.to_string(),
                destination_id: destination_id.to_string(),
            },
        );

        if let Err(err) = self.send(&payload, destination_id, namespace) {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        Ok(Response {
            id,
            token,
            slot: slot_rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Registers a listener for unsolicited events on `(namespace, typ)`.
    /// Delivery is `try_send`: a full or absent listener never stalls the
    /// read loop, dropped deliveries are counted.
    pub fn listen(&self, namespace: &str, typ: &str, sender: Sender<Payload>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners)
            .entries
            .entry((namespace.to_string(), typ.to_string()))
            .or_default()
            .push(Listener { id, sender });
        id
    }

    /// Removes a listener. Returns false when it was already gone.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut table = lock(&self.listeners);
        let mut removed = false;
        table.entries.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|listener| listener.id != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    /// Receives and routes one envelope. Returns an error only when the codec
    /// fails; the owning lifecycle decides whether to reconnect. Callers
    /// re-invoke in a loop until their context ends.
    pub fn dispatch(&self) -> Result<(), Error> {
        let message = self.serializer.receive()?;

        if let Some(id) = message.header.request_id {
            let entry = lock(&self.pending).remove(&id);
            if let Some(entry) = entry {
                if entry.namespace != message.header.namespace {
                    tracing::warn!(
                        request_id = id,
                        expected = %entry.namespace,
                        received = %message.header.namespace,
                        "response namespace differs from request"
                    );
                }
                if message.header.source_id != "*" && entry.destination_id != "*"
                    && entry.destination_id != message.header.source_id
                {
                    tracing::warn!(
                        request_id = id,
                        expected = %entry.destination_id,
                        received = %message.header.source_id,
                        "response sender differs from request destination"
                    );
                }
                // A message cannot be both a response and a broadcast.
                let _ = entry.slot.try_send(message.payload);
                return Ok(());
            }
        }

        let key = (
            message.header.namespace.clone(),
            message.header.typ.clone(),
        );
        let table = lock(&self.listeners);
        match table.entries.get(&key) {
            Some(listeners) => {
                for listener in listeners {
                    match listener.sender.try_send(message.payload.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                            self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                namespace = %key.0,
                                typ = %key.1,
                                "listener not ready, dropping delivery"
                            );
                        }
                    }
                }
            }
            None => {
                tracing::trace!(
                    namespace = %key.0,
                    typ = %key.1,
                    "no listener, discarding message"
                );
            }
        }
        Ok(())
    }

    /// Closes the underlying codec, failing the dispatch loop promptly.
    pub fn close(&self) -> Result<(), Error> {
        self.serializer.close()
    }

    /// Number of event deliveries dropped because a listener was not ready.
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped_deliveries.load(Ordering::Relaxed)
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Caller side of an in-flight request. Dropping it removes the pending entry
/// — removal on give-up is mandatory, so it is tied to the handle's lifetime.
pub struct Response {
    id: u32,
    token: u64,
    slot: Receiver<Payload>,
    pending: PendingTable,
}

impl Response {
    pub fn request_id(&self) -> u32 {
        self.id
    }

    /// Waits for the correlated response under the caller's context.
    /// [`Error::Closed`] means the connection was torn down before a response
    /// arrived.
    pub fn recv(&self, ctx: &Context) -> Result<Payload, Error> {
        match ctx.recv(&self.slot)? {
            Some(payload) => Ok(payload),
            None => Err(Error::Closed),
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        let mut pending = lock(&self.pending);
        // Only evict our own entry: the id may have been reused after wrap.
        if pending.get(&self.id).map(|entry| entry.token) == Some(self.token) {
            pending.remove(&self.id);
        }
    }
}
