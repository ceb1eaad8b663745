//! Write completion as threshold views over one byte counter.
//!
//! Every session owns a single [DataFuture]: a monotonically increasing count
//! of application bytes that have been sent. A write does not get a future of
//! its own; it gets a [WriteFuture], which is nothing more than a handle to
//! the shared counter plus the absolute count the counter must reach for that
//! write to be delivered. Bumping the counter therefore resolves any number of
//! outstanding writes with one store and one broadcast, and no per-write
//! bookkeeping is kept anywhere.
//!
//! A view's state is computed on read:
//!
//! - counter `>=` threshold: successful, even if the counter later fails;
//!   the bytes were already delivered.
//! - otherwise: whatever the counter itself is, i.e. pending, failed or
//!   cancelled.
//!
//! # Example
//!
//! ```
//! use spindle::futures::{data::DataFuture, SessionFuture};
//!
//! let data = DataFuture::new(None, None);
//! let first = data.write_future(100);
//! let second = data.write_future(101);
//!
//! data.add(100);
//! assert!(first.is_successful());
//! assert!(!second.is_done());
//!
//! data.add(1);
//! assert!(second.is_successful());
//! ```
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::trace;

use super::{
    check_dead_lock, lock::FutureLock, state::Completion, ExecutorContext, FutureState,
    SessionFuture,
};
use crate::error::{Cause, FutureError};

/// Set in the counter word once the counter has failed or been cancelled.
const FROZEN: u64 = 1 << 63;

struct DataShared {
    /// Sent byte count in the low bits, [FROZEN] in the top bit.
    length: AtomicU64,
    completion: Completion<()>,
    lock: FutureLock,
    executor: Option<Arc<dyn ExecutorContext>>,
    session: Option<u64>,
}

impl DataShared {
    fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire) & !FROZEN
    }

    /// Stop counting. Must happen before the failed or cancelled state is
    /// published, so no view can move from that state to successful.
    fn freeze(&self) {
        self.length.fetch_or(FROZEN, Ordering::AcqRel);
    }

    fn view_state(&self, expected: u64) -> FutureState {
        if self.length() >= expected {
            FutureState::Successful
        } else {
            self.completion.state()
        }
    }
}

/// The shared count of bytes sent by a session.
///
/// The counter only fails or is cancelled as a whole; it never completes
/// successfully. Clones share the same counter.
#[derive(Clone)]
pub struct DataFuture {
    shared: Arc<DataShared>,
}

impl DataFuture {
    pub fn new(executor: Option<Arc<dyn ExecutorContext>>, session: Option<u64>) -> Self {
        Self {
            shared: Arc::new(DataShared {
                length: AtomicU64::new(0),
                completion: Completion::new(),
                lock: FutureLock::new(),
                executor,
                session,
            }),
        }
    }

    /// Bytes counted so far.
    pub fn length(&self) -> u64 {
        self.shared.length()
    }

    /// Count `n` more sent bytes and wake everyone waiting on a view.
    ///
    /// Once the counter has failed or been cancelled it is frozen: views that
    /// had not reached their threshold must keep reporting that outcome.
    /// Returns the counter value after the call.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.shared.length.load(Ordering::Acquire);

        loop {
            if current & FROZEN != 0 {
                trace!(
                    "session {:?}: ignoring {} sent bytes after data completion",
                    self.shared.session,
                    n
                );
                return current & !FROZEN;
            }

            let next = current.saturating_add(n).min(FROZEN - 1);
            match self.shared.length.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.shared.lock.notify_waiters();
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Fail the counter; every view below its threshold becomes failed.
    pub fn failure(&self, cause: Cause) -> bool {
        self.shared.freeze();
        let set = self.shared.completion.fail(cause);
        if set {
            self.shared.lock.notify_waiters();
        }
        set
    }

    /// A view that is done once the counter reaches `expected`.
    ///
    /// `expected` is an **absolute** cumulative byte count, not the size of
    /// one write: callers must pass the counter's projected total after their
    /// write has been sent.
    pub fn write_future(&self, expected: u64) -> WriteFuture {
        WriteFuture {
            data: self.shared.clone(),
            expected,
        }
    }

    /// The lock shared by this counter and all of its views.
    pub fn lock(&self) -> &FutureLock {
        &self.shared.lock
    }
}

impl SessionFuture<()> for DataFuture {
    fn state(&self) -> FutureState {
        self.shared.completion.state()
    }

    fn cause(&self) -> Option<Cause> {
        self.shared.completion.cause()
    }

    fn get_now(&self) -> Option<()> {
        None
    }

    fn cancel(&self, _may_interrupt: bool) -> bool {
        self.shared.freeze();
        let set = self.shared.completion.cancel();
        if set {
            self.shared.lock.notify_waiters();
        }
        set
    }

    fn wait_for(
        &self,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> Result<bool, FutureError> {
        check_dead_lock(self.shared.executor.as_deref())?;

        self.shared.lock.wait_until(
            || self.shared.completion.state().is_done(),
            timeout,
            interruptible,
        )
    }
}

impl fmt::Debug for DataFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFuture")
            .field("session", &self.shared.session)
            .field("length", &self.length())
            .field("state", &self.state())
            .finish()
    }
}

/// Completion of one write: a threshold view over a [DataFuture].
///
/// Views store no state of their own and are not tracked by the counter;
/// dropping one has no effect on anything else.
#[derive(Clone)]
pub struct WriteFuture {
    data: Arc<DataShared>,
    expected: u64,
}

impl WriteFuture {
    /// The absolute counter value this write waits for.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn session(&self) -> Option<u64> {
        self.data.session
    }
}

impl SessionFuture<()> for WriteFuture {
    fn state(&self) -> FutureState {
        self.data.view_state(self.expected)
    }

    fn cause(&self) -> Option<Cause> {
        match self.state() {
            FutureState::Failed => self.data.completion.cause(),
            _ => None,
        }
    }

    fn get_now(&self) -> Option<()> {
        self.is_successful().then_some(())
    }

    /// Views cannot be cancelled individually; cancellation belongs to the
    /// session's counter. Always returns `false`.
    fn cancel(&self, _may_interrupt: bool) -> bool {
        false
    }

    fn wait_for(
        &self,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> Result<bool, FutureError> {
        check_dead_lock(self.data.executor.as_deref())?;

        self.data.lock.wait_until(
            || self.data.view_state(self.expected).is_done(),
            timeout,
            interruptible,
        )
    }
}

impl fmt::Debug for WriteFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteFuture")
            .field("session", &self.data.session)
            .field("expected", &self.expected)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use anyhow::Result;

    use super::DataFuture;
    use crate::{
        error::{cause, EngineError},
        futures::{FutureState, SessionFuture},
    };

    #[test]
    fn views_share_the_counter() {
        let data = DataFuture::new(None, Some(1));
        let f0 = data.write_future(100);
        let f1 = data.write_future(101);

        assert_eq!(data.add(100), 100);
        assert!(f0.is_successful());
        assert!(!f1.is_done());

        data.add(1);
        assert!(f1.is_successful());
        assert_eq!(f1.get_now(), Some(()));
    }

    #[test]
    fn reached_threshold_survives_failure() {
        let data = DataFuture::new(None, None);
        let delivered = data.write_future(10);
        let undelivered = data.write_future(20);

        data.add(15);
        let c = cause(EngineError::Closed);
        assert!(data.failure(c.clone()));

        assert!(delivered.is_successful());
        assert!(delivered.cause().is_none());
        assert_eq!(undelivered.state(), FutureState::Failed);
        assert!(undelivered.cause().is_some());

        data.add(100);
        assert_eq!(data.length(), 15);
        assert!(undelivered.is_failed());
    }

    #[test]
    fn cancelled_counter_cancels_pending_views() {
        let data = DataFuture::new(None, None);
        let view = data.write_future(1);

        assert!(data.cancel(false));
        assert!(view.is_cancelled());
        assert!(view.cause().is_none());
        assert!(!view.cancel(true));
        assert!(!data.cancel(false));
    }

    #[test]
    fn settled_views_never_change_under_racing_add() {
        for _ in 0..200 {
            let data = DataFuture::new(None, None);
            let view = data.write_future(1);

            let adder = {
                let data = data.clone();
                thread::spawn(move || data.add(1))
            };

            data.failure(cause(EngineError::Closed));
            let settled = view.state();
            adder.join().unwrap();

            assert!(settled.is_done());
            assert_eq!(view.state(), settled);
            assert_eq!(data.length() >= 1, settled == FutureState::Successful);
        }
    }

    #[test]
    fn waiter_wakes_on_threshold() -> Result<()> {
        let data = DataFuture::new(None, None);
        let view = data.write_future(64);

        let t = {
            let view = view.clone();
            thread::spawn(move || view.sync())
        };

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(10));
            data.add(16);
        }

        t.join().unwrap()?;
        assert!(view.is_successful());
        assert_eq!(data.lock().waiters(), 0);

        Ok(())
    }
}
