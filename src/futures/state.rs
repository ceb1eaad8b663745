//! Single-assignment completion state.
//!
//! A [Completion] holds a future's state discriminant in an atomic byte and
//! its payload (failure cause or result value) in write-once cells. The
//! `PENDING -> terminal` transition is claimed with a compare-and-set into a
//! private `COMPLETING` state; only the claiming thread writes the payload and
//! then publishes the terminal state, so any reader that observes a terminal
//! state also observes its payload.
use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        OnceLock,
    },
};

use crate::error::Cause;

/// Terminal status of a future, or [FutureState::Pending] while it has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureState {
    Pending,
    Successful,
    Failed,
    Cancelled,
}

impl FutureState {
    pub fn is_done(self) -> bool {
        self != FutureState::Pending
    }
}

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const SUCCESSFUL: u8 = 2;
const FAILED: u8 = 3;
const CANCELLED: u8 = 4;

/// Atomic single-assignment state with its payload.
pub struct Completion<V> {
    state: AtomicU8,
    cause: OnceLock<Cause>,
    value: OnceLock<V>,
}

impl<V> Default for Completion<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Completion<V> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            cause: OnceLock::new(),
            value: OnceLock::new(),
        }
    }

    pub fn state(&self) -> FutureState {
        match self.state.load(Ordering::Acquire) {
            SUCCESSFUL => FutureState::Successful,
            FAILED => FutureState::Failed,
            CANCELLED => FutureState::Cancelled,
            _ => FutureState::Pending,
        }
    }

    pub fn cause(&self) -> Option<Cause> {
        match self.state() {
            FutureState::Failed => self.cause.get().cloned(),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self.state() {
            FutureState::Successful => self.value.get(),
            _ => None,
        }
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn publish(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    /// Complete successfully. Returns `false` if already claimed.
    pub fn succeed(&self, value: V) -> bool {
        if !self.claim() {
            return false;
        }
        let _ = self.value.set(value);
        self.publish(SUCCESSFUL);
        true
    }

    /// Complete with a failure cause. Returns `false` if already claimed.
    pub fn fail(&self, cause: Cause) -> bool {
        if !self.claim() {
            return false;
        }
        let _ = self.cause.set(cause);
        self.publish(FAILED);
        true
    }

    /// Cancel. Returns `false` if already claimed.
    pub fn cancel(&self) -> bool {
        if !self.claim() {
            return false;
        }
        self.publish(CANCELLED);
        true
    }
}

impl<V: fmt::Debug> fmt::Debug for Completion<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state())
            .field("cause", &self.cause())
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, FutureState};
    use crate::error::{cause, EngineError};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn first_write_wins() {
        let c = Completion::new();
        assert_eq!(c.state(), FutureState::Pending);

        assert!(c.succeed(7u32));
        assert!(!c.fail(cause(EngineError::Closed)));
        assert!(!c.cancel());
        assert!(!c.succeed(8));

        assert_eq!(c.state(), FutureState::Successful);
        assert_eq!(c.value(), Some(&7));
        assert!(c.cause().is_none());
    }

    #[test]
    fn cancelled_has_no_cause() {
        let c = Completion::<()>::new();
        assert!(c.cancel());
        assert!(!c.fail(cause(EngineError::Closed)));
        assert_eq!(c.state(), FutureState::Cancelled);
        assert!(c.cause().is_none());
        assert!(c.value().is_none());
    }

    #[test]
    fn racing_completers_have_one_winner() {
        let c = Arc::new(Completion::<usize>::new());
        let barrier = Arc::new(Barrier::new(8));

        let winners: usize = (0..8)
            .map(|i| {
                let c = c.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    c.succeed(i) as usize
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert!(c.value().is_some());
    }
}
