//! Session-end signal channel.
//!
//! The engine thread signals exactly one [`SessionOutcome`] per session. The
//! channel holds at most one unconsumed outcome; the controller drains stale
//! outcomes before starting the next session.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tunedeck_types::SessionOutcome;

use crate::error::describe;

/// Engine side: signals the session outcome once.
pub struct OutcomeSignal {
    tx: Sender<SessionOutcome>,
    sent: bool,
}

impl OutcomeSignal {
    /// Deliver `outcome`. Later calls on the same signal are ignored.
    pub fn signal(&mut self, outcome: SessionOutcome) {
        if self.sent {
            tracing::warn!(outcome = %describe(&outcome), "session outcome already signalled");
            return;
        }
        self.sent = true;
        match self.tx.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(outcome)) => {
                tracing::warn!(outcome = %describe(&outcome), "watchdog has an unconsumed outcome; dropping");
            }
            Err(TrySendError::Disconnected(outcome)) => {
                tracing::debug!(outcome = %describe(&outcome), "watchdog gone");
            }
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }
}

/// Controller side of the signal channel.
#[derive(Clone)]
pub struct Watchdog {
    tx: Sender<SessionOutcome>,
    rx: Receiver<SessionOutcome>,
}

impl Watchdog {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// A fresh one-shot signal for the next session.
    pub fn signal(&self) -> OutcomeSignal {
        OutcomeSignal {
            tx: self.tx.clone(),
            sent: false,
        }
    }

    /// Block until a session ends.
    pub fn recv(&self) -> Option<SessionOutcome> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<SessionOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Receiver for use in `select!` loops.
    pub fn receiver(&self) -> &Receiver<SessionOutcome> {
        &self.rx
    }

    /// Consume any outcome nobody picked up. Returns how many were dropped.
    pub fn drain_stale(&self) -> usize {
        let mut dropped = 0;
        while let Ok(outcome) = self.rx.try_recv() {
            tracing::debug!(outcome = %describe(&outcome), "discarding unconsumed outcome");
            dropped += 1;
        }
        dropped
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
