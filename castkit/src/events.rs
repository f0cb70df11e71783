// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Lifecycle Events
//!
//! Closed sum type delivered to lifecycle subscribers. Consumers pattern-match
//! exhaustively, with an explicit default arm for variants they do not handle.

/// An observable change on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection reached the `Connected` state.
    Connected,
    /// The connection left the `Connected` state, with a human-readable cause.
    Disconnected { reason: String },
    /// An application session appeared on the device.
    AppStarted { app_id: String, display_name: String },
    /// An application session disappeared from the device.
    AppStopped { app_id: String, display_name: String },
    /// The device volume changed.
    StatusUpdated { level: f64, muted: bool },
}
