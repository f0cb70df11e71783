// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Lifecycle
//!
//! Drives `Disconnected → Connecting → Connected → Disconnected` and owns the
//! outer reconnect loop: on losing a connection it immediately retries (each
//! attempt bounded by its own dial deadline, no backoff) until the governing
//! context ends. Per connection it runs:
//! - the dispatch loop (the codec's sole reader) on the calling thread,
//! - a close watcher that forces the transport shut when the context ends,
//! - a heartbeat worker (PING/PONG with a reply deadline),
//! - a receiver-status watcher translating `RECEIVER_STATUS` broadcasts into
//!   [`Event`]s.
//!
//! `ConnectionState` is owned here exclusively; other components observe it
//! through emitted events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::client::Client;
use crate::context::Context;
use crate::events::Event;
use crate::message::{
    PayloadWithId, DEFAULT_RECEIVER_ID, NAMESPACE_CONNECTION, NAMESPACE_HEARTBEAT,
    NAMESPACE_RECEIVER,
};
use crate::protocol::{Dialer, TlsDialer};
use crate::status::{ReceiverStatusPayload, StatusDiff, TYPE_RECEIVER_STATUS};

/// Where a connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for connect attempts and the per-connection workers.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Bound on each dial attempt.
    pub connect_timeout: Duration,
    /// Socket read window; the codec reader yields the stream lock at this pace.
    pub read_timeout: Duration,
    /// PING cadence.
    pub heartbeat_interval: Duration,
    /// Reply deadline for a PONG; a miss closes the connection.
    pub heartbeat_timeout: Duration,
    /// Capacity of each subscriber's event channel.
    pub event_buffer: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfig {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            event_buffer: 16,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns connection state and the reconnect loop for one device.
pub struct Lifecycle {
    dialer: Box<dyn Dialer>,
    config: ConnectConfig,
    state: Mutex<ConnectionState>,
    subscribers: Mutex<Vec<Sender<Event>>>,
    dropped_events: AtomicU64,
}

impl Lifecycle {
    pub fn new(dialer: Box<dyn Dialer>, config: ConnectConfig) -> Self {
        Lifecycle {
            dialer,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            subscribers: Mutex::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Lifecycle over the default TLS transport.
    pub fn with_tls(config: ConnectConfig) -> Self {
        let dialer = TlsDialer {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        };
        Lifecycle::new(Box::new(dialer), config)
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Registers an event subscriber. Events that would block on a full
    /// subscriber are dropped and counted.
    pub fn events(&self) -> Receiver<Event> {
        let (tx, rx) = bounded(self.config.event_buffer);
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Events dropped because a subscriber's channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn emit(&self, event: Event) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Connects to `addr` and keeps the connection alive until `ctx` ends,
    /// reconnecting immediately after every loss. Blocks: the dispatch loop
    /// runs on the calling thread.
    pub fn run(self: &Arc<Self>, ctx: &Context, addr: SocketAddr) {
        while ctx.err().is_none() {
            self.set_state(ConnectionState::Connecting);
            let serializer = match self.dialer.dial(ctx, addr) {
                Ok(serializer) => Arc::new(serializer),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    self.set_state(ConnectionState::Disconnected);
                    continue;
                }
            };

            let client = Arc::new(Client::new(serializer));
            let (conn_ctx, conn_cancel) = ctx.with_cancel();
            let close_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let mut workers: Vec<JoinHandle<()>> = Vec::new();

            // Close watcher: force the transport shut once the connection's
            // context ends, unblocking the dispatch loop.
            workers.push(thread::spawn({
                let client = Arc::clone(&client);
                let watch_ctx = conn_ctx.clone();
                move || {
                    let _ = watch_ctx.done().recv();
                    let _ = client.close();
                }
            }));

            if let Err(err) =
                client.send(&PayloadWithId::new("CONNECT"), DEFAULT_RECEIVER_ID, NAMESPACE_CONNECTION)
            {
                tracing::debug!(%addr, error = %err, "protocol connect failed");
                drop(conn_cancel);
                join_all(workers);
                self.set_state(ConnectionState::Disconnected);
                continue;
            }

            self.set_state(ConnectionState::Connected);
            self.emit(Event::Connected);
            tracing::info!(%addr, "connected");

            workers.push(thread::spawn({
                let client = Arc::clone(&client);
                let hb_ctx = conn_ctx.clone();
                let config = self.config.clone();
                let close_reason = Arc::clone(&close_reason);
                move || heartbeat_loop(&hb_ctx, &client, &config, &close_reason)
            }));
            workers.push(thread::spawn({
                let client = Arc::clone(&client);
                let status_ctx = conn_ctx.clone();
                let lifecycle = Arc::clone(self);
                move || status_loop(&status_ctx, &client, &lifecycle)
            }));

            // Sole reader of the codec for this connection's lifetime.
            let error = loop {
                match client.dispatch() {
                    Ok(()) => {}
                    Err(err) => break err,
                }
            };

            let reason = lock(&close_reason)
                .take()
                .unwrap_or_else(|| match ctx.err() {
                    Some(_) => "connection closed".to_string(),
                    None => error.to_string(),
                });

            drop(conn_cancel);
            join_all(workers);
            self.set_state(ConnectionState::Disconnected);
            tracing::info!(%addr, %reason, "disconnected");
            self.emit(Event::Disconnected { reason });
        }
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let _ = worker.join();
    }
}

fn heartbeat_loop(
    ctx: &Context,
    client: &Arc<Client>,
    config: &ConnectConfig,
    close_reason: &Arc<Mutex<Option<String>>>,
) {
    let (pong_tx, pong_rx) = bounded(1);
    let listener = client.listen(NAMESPACE_HEARTBEAT, "PONG", pong_tx);

    loop {
        if ctx.sleep(config.heartbeat_interval).is_err() {
            break;
        }
        // Stale replies from a previous round are not answers to this PING.
        while pong_rx.try_recv().is_ok() {}

        if client
            .send(&PayloadWithId::new("PING"), DEFAULT_RECEIVER_ID, NAMESPACE_HEARTBEAT)
            .is_err()
        {
            break;
        }

        let (reply_ctx, _reply_guard) = ctx.with_timeout(config.heartbeat_timeout);
        match reply_ctx.recv(&pong_rx) {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(crate::context::ContextError::DeadlineExceeded) if ctx.err().is_none() => {
                tracing::warn!("heartbeat reply missed, closing connection");
                *lock(close_reason) = Some("heartbeat timeout".to_string());
                let _ = client.close();
                break;
            }
            Err(_) => break,
        }
    }

    client.unlisten(listener);
}

fn status_loop(ctx: &Context, client: &Arc<Client>, lifecycle: &Arc<Lifecycle>) {
    let (status_tx, status_rx) = bounded(8);
    let listener = client.listen(NAMESPACE_RECEIVER, TYPE_RECEIVER_STATUS, status_tx);
    let mut diff = StatusDiff::new();

    loop {
        match ctx.recv(&status_rx) {
            Ok(Some(payload)) => match serde_json::from_slice::<ReceiverStatusPayload>(&payload) {
                Ok(update) => {
                    for event in diff.observe(update.status) {
                        lifecycle.emit(event);
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed receiver status");
                }
            },
            Ok(None) | Err(_) => break,
        }
    }

    client.unlisten(listener);
}
