//! Generation-checked session timers.
//!
//! Each timer is a tokio task sleeping for the requested delay. The task holds
//! only a `Weak` reference to its owner, so a dropped session is never kept
//! alive by a pending timer. Rescheduling or cancelling bumps the generation;
//! a callback that fires with an old generation is ignored by the owner.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Handshake or introduction deadline.
    Connect,
    /// Inactivity deadline for an established session.
    Termination,
    /// Periodic keepalive while established.
    Keepalive,
}

/// Receiver of timer callbacks.
pub trait TimerTarget: Send + Sync + 'static {
    /// Called when a timer of `kind` scheduled at `generation` expires.
    fn handle_timer(&self, kind: TimerKind, generation: u64);
}

/// One cancellable timer slot.
#[derive(Debug, Default)]
pub struct SessionTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl SessionTimer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a task is armed and has not finished.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Check a fired generation against the current one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Arm (or re-arm) the timer, replacing any pending expiry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<S: TimerTarget>(&mut self, delay: Duration, target: Weak<S>, kind: TimerKind) {
        self.abort();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(target) = target.upgrade() {
                target.handle_timer(kind, generation);
            }
        }));
    }

    /// Disarm the timer. A callback already running sees a stale generation.
    pub fn cancel(&mut self) {
        self.abort();
        self.generation = self.generation.wrapping_add(1);
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.abort();
    }
}
