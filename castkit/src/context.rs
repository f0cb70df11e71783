// SPDX-FileCopyrightText: 2026 Castkit Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cancellation Context
//!
//! Cooperative cancellation token threaded through every blocking call in the
//! crate. A context carries an optional deadline and a `done` channel that
//! becomes ready when the context is cancelled, so it can participate in
//! `crossbeam_channel::select!` alongside data channels. Cancellation
//! propagates from parent to child, never the other way.
//!
//! The helpers [`Context::recv`], [`Context::send`] and [`Context::sleep`]
//! are the only blocking primitives the rest of the crate uses; each checks
//! cancellation and deadline at the suspension point.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use thiserror::Error;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

struct State {
    cause: Option<ContextError>,
    /// Dropping this sender closes `done`, waking every select on it.
    gate: Option<Sender<()>>,
    children: Vec<Weak<Shared>>,
}

struct Shared {
    deadline: Option<Instant>,
    state: Mutex<State>,
    done: Receiver<()>,
}

/// Cancellable, deadline-bearing context. Cheap to clone; clones share fate.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
}

/// Cancels its context when dropped or when [`CancelGuard::cancel`] is called.
pub struct CancelGuard {
    shared: Arc<Shared>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cancel_shared(shared: &Arc<Shared>, cause: ContextError) {
    let children = {
        let mut state = lock(&shared.state);
        if state.cause.is_some() {
            return;
        }
        state.cause = Some(cause);
        state.gate.take();
        std::mem::take(&mut state.children)
    };
    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_shared(&child, cause);
        }
    }
}

fn new_shared(deadline: Option<Instant>) -> Arc<Shared> {
    let (gate, done) = bounded::<()>(0);
    Arc::new(Shared {
        deadline,
        state: Mutex::new(State {
            cause: None,
            gate: Some(gate),
            children: Vec::new(),
        }),
        done,
    })
}

impl Context {
    /// Root context: never cancelled, no deadline.
    pub fn background() -> Self {
        Context {
            shared: new_shared(None),
        }
    }

    /// Derives a cancellable child. The child is cancelled when the guard is
    /// dropped, when [`CancelGuard::cancel`] is called, or when the parent is
    /// cancelled.
    pub fn with_cancel(&self) -> (Context, CancelGuard) {
        self.derive(None)
    }

    /// Derives a child whose deadline is `timeout` from now (or the parent's
    /// deadline, whichever comes first).
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelGuard) {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derives a child with an absolute deadline.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelGuard) {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelGuard) {
        let deadline = match (deadline, self.shared.deadline) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        };
        let child = new_shared(deadline);

        let parent_cause = {
            let mut state = lock(&self.shared.state);
            if state.cause.is_none() {
                state.children.push(Arc::downgrade(&child));
            }
            state.cause
        };
        if let Some(cause) = parent_cause {
            cancel_shared(&child, cause);
        }

        (
            Context {
                shared: child.clone(),
            },
            CancelGuard { shared: child },
        )
    }

    /// Channel that closes when the context is cancelled. For `select!`.
    pub fn done(&self) -> &Receiver<()> {
        &self.shared.done
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// Returns the stop cause, or `None` while the context is live. A passed
    /// deadline is observed here and latches the context cancelled.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = lock(&self.shared.state).cause {
            return Some(cause);
        }
        if let Some(deadline) = self.shared.deadline {
            if Instant::now() >= deadline {
                cancel_shared(&self.shared, ContextError::DeadlineExceeded);
                return Some(ContextError::DeadlineExceeded);
            }
        }
        None
    }

    fn cause(&self) -> ContextError {
        lock(&self.shared.state)
            .cause
            .unwrap_or(ContextError::Cancelled)
    }

    fn expire(&self) -> ContextError {
        cancel_shared(&self.shared, ContextError::DeadlineExceeded);
        self.cause()
    }

    fn remaining(&self) -> Option<Duration> {
        self.shared
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Receives from `rx`, honoring cancellation and deadline.
    ///
    /// `Ok(Some(value))` on delivery, `Ok(None)` when the channel closed,
    /// `Err` when the context stopped first.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Result<Option<T>, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        match self.remaining() {
            Some(rem) => select! {
                recv(rx) -> msg => Ok(msg.ok()),
                recv(self.done()) -> _ => Err(self.cause()),
                default(rem) => Err(self.expire()),
            },
            None => select! {
                recv(rx) -> msg => Ok(msg.ok()),
                recv(self.done()) -> _ => Err(self.cause()),
            },
        }
    }

    /// Sends into `tx`, blocking under backpressure until the context stops.
    /// A disconnected receiver counts as cancellation: the consumer is gone.
    pub fn send<T>(&self, tx: &Sender<T>, value: T) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        match self.remaining() {
            Some(rem) => select! {
                send(tx, value) -> res => res.map_err(|_| ContextError::Cancelled),
                recv(self.done()) -> _ => Err(self.cause()),
                default(rem) => Err(self.expire()),
            },
            None => select! {
                send(tx, value) -> res => res.map_err(|_| ContextError::Cancelled),
                recv(self.done()) -> _ => Err(self.cause()),
            },
        }
    }

    /// Sleeps for `duration` unless the context stops first.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        if let Some(rem) = self.remaining() {
            if rem <= duration {
                select! {
                    recv(self.done()) -> _ => return Err(self.cause()),
                    default(rem) => return Err(self.expire()),
                }
            }
        }
        select! {
            recv(self.done()) -> _ => Err(self.cause()),
            default(duration) => Ok(()),
        }
    }
}

impl CancelGuard {
    pub fn cancel(&self) {
        cancel_shared(&self.shared, ContextError::Cancelled);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        cancel_shared(&self.shared, ContextError::Cancelled);
    }
}

// INLINE_TEST_REQUIRED: Exercises private cause/gate state and parent-child wiring
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        let (_tx, rx) = bounded::<u8>(1);
        // Nothing queued: a zero-timeout child must report its deadline.
        let (child, _guard) = ctx.with_timeout(Duration::from_millis(0));
        assert_eq!(child.recv(&rx), Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn cancel_unblocks_recv() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_cancel();
        let (_tx, rx) = bounded::<u8>(1);

        let waiter = thread::spawn(move || child.recv(&rx));
        guard.cancel();
        assert_eq!(waiter.join().unwrap(), Err(ContextError::Cancelled));
    }

    #[test]
    fn cancel_unblocks_send() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_cancel();
        let (tx, rx) = bounded::<u8>(1);
        tx.send(0).unwrap(); // channel now full

        let sender = thread::spawn(move || child.send(&tx, 1));
        guard.cancel();
        assert_eq!(sender.join().unwrap(), Err(ContextError::Cancelled));
        drop(rx);
    }

    #[test]
    fn parent_cancellation_reaches_child() {
        let ctx = Context::background();
        let (parent, parent_guard) = ctx.with_cancel();
        let (child, _child_guard) = parent.with_cancel();

        assert_eq!(child.err(), None);
        parent_guard.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let ctx = Context::background();
        let (parent, parent_guard) = ctx.with_cancel();
        parent_guard.cancel();

        let (child, _guard) = parent.with_cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn deadline_latches_and_wins_over_later_cancel() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_timeout(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        guard.cancel();
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn child_inherits_tighter_parent_deadline() {
        let ctx = Context::background();
        let (parent, _pg) = ctx.with_timeout(Duration::from_millis(5));
        let (child, _cg) = parent.with_timeout(Duration::from_secs(60));
        let parent_deadline = parent.deadline().unwrap();
        assert_eq!(child.deadline(), Some(parent_deadline));
    }

    #[test]
    fn drop_of_guard_cancels() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_cancel();
        drop(guard);
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn sleep_is_interrupted_by_cancel() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_cancel();
        let sleeper = thread::spawn(move || child.sleep(Duration::from_secs(30)));
        guard.cancel();
        assert_eq!(sleeper.join().unwrap(), Err(ContextError::Cancelled));
    }
}
