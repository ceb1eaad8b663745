//! Single-assignment futures.
//!
//! The `futures` module holds the result types application threads use to
//! observe a session: whether it was created, opened, closed or ended, and
//! whether a given write has been delivered. Every future here moves from
//! pending to exactly one terminal state (successful, failed or cancelled) and
//! never changes again.
//!
//! The shared contract is the [SessionFuture] trait. Its implementations are:
//!
//! - [immediate::ImmediateFuture]: created already terminal.
//! - [default::DefaultFuture]: a settable promise with its own
//!   [lock::FutureLock]; session lifecycle events use these.
//! - [data::DataFuture] and [data::WriteFuture]: a shared byte counter and
//!   the threshold views over it that represent individual writes.
//!
//! # Blocking
//!
//! The `wait*`, `sync*` and `get*` methods park the calling thread. A future
//! may be tied to an [ExecutorContext], the thread responsible for
//! completing it. Blocking from inside that context fails immediately with
//! [FutureError::BlockingOperation] instead of hanging forever.
//!
//! ```
//! use spindle::futures::{default::DefaultFuture, SessionFuture};
//! use std::{thread, time::Duration};
//!
//! let fut = DefaultFuture::<u32>::new();
//! let completer = fut.clone();
//!
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_millis(50));
//!     completer.success(42);
//! });
//!
//! assert_eq!(fut.get().unwrap(), 42);
//! ```
use std::time::Duration;

use crate::error::{Cause, FutureError};

pub mod data;
pub mod default;
pub mod immediate;
pub mod lock;
pub mod state;

pub use state::FutureState;

/// The thread or pool responsible for completing a set of futures.
pub trait ExecutorContext: Send + Sync {
    /// Whether the calling thread belongs to this context.
    fn in_executor(&self) -> bool;
}

/// Refuse to block a thread that belongs to the completing executor.
pub(crate) fn check_dead_lock(executor: Option<&dyn ExecutorContext>) -> Result<(), FutureError> {
    match executor {
        Some(executor) if executor.in_executor() => Err(FutureError::BlockingOperation),
        _ => Ok(()),
    }
}

/// Read and wait access to a single-assignment result.
pub trait SessionFuture<V>: Send + Sync {
    /// Current state. Never blocks.
    fn state(&self) -> FutureState;

    /// The failure cause; `None` while pending and for successful or
    /// cancelled futures.
    fn cause(&self) -> Option<Cause>;

    /// The result if the future completed successfully, without blocking.
    fn get_now(&self) -> Option<V>;

    /// Attempt the `PENDING -> CANCELLED` transition. Returns whether this
    /// call performed it.
    fn cancel(&self, may_interrupt: bool) -> bool;

    /// Park until done or until `timeout` elapses; `None` waits forever.
    /// Returns whether the future is done.
    fn wait_for(&self, timeout: Option<Duration>, interruptible: bool)
        -> Result<bool, FutureError>;

    fn is_done(&self) -> bool {
        self.state().is_done()
    }

    fn is_successful(&self) -> bool {
        self.state() == FutureState::Successful
    }

    fn is_failed(&self) -> bool {
        self.state() == FutureState::Failed
    }

    fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Wait for completion; interruptible.
    fn wait(&self) -> Result<(), FutureError> {
        self.wait_for(None, true).map(|_| ())
    }

    /// Wait at most `timeout`; interruptible. `Ok(false)` means the time ran
    /// out with the future still pending.
    fn wait_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        self.wait_for(Some(timeout), true)
    }

    /// Wait for completion, deferring any interruption until the wait ends.
    fn wait_uninterruptibly(&self) -> Result<(), FutureError> {
        self.wait_for(None, false).map(|_| ())
    }

    fn wait_uninterruptibly_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        self.wait_for(Some(timeout), false)
    }

    /// [SessionFuture::wait], then raise the failure cause if there is one.
    fn sync(&self) -> Result<(), FutureError> {
        self.wait()?;
        self.rethrow_if_failed()
    }

    fn sync_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        let done = self.wait_timeout(timeout)?;
        self.rethrow_if_failed()?;
        Ok(done)
    }

    fn sync_uninterruptibly(&self) -> Result<(), FutureError> {
        self.wait_uninterruptibly()?;
        self.rethrow_if_failed()
    }

    fn sync_uninterruptibly_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        let done = self.wait_uninterruptibly_timeout(timeout)?;
        self.rethrow_if_failed()?;
        Ok(done)
    }

    /// Raise the recorded cause, if any. Cancellation is not a failure.
    fn rethrow_if_failed(&self) -> Result<(), FutureError> {
        match self.cause() {
            Some(cause) => Err(FutureError::Failed(cause)),
            None => Ok(()),
        }
    }

    /// Wait for completion and return the result.
    fn get(&self) -> Result<V, FutureError> {
        self.wait()?;
        self.outcome()
    }

    /// Like [SessionFuture::get] but gives up with [FutureError::Timeout].
    fn get_timeout(&self, timeout: Duration) -> Result<V, FutureError> {
        if !self.wait_timeout(timeout)? {
            return Err(FutureError::Timeout);
        }
        self.outcome()
    }

    #[doc(hidden)]
    fn outcome(&self) -> Result<V, FutureError> {
        match self.state() {
            FutureState::Cancelled => Err(FutureError::Cancelled),
            FutureState::Failed => Err(self
                .cause()
                .map_or(FutureError::Cancelled, FutureError::Failed)),
            _ => self.get_now().ok_or(FutureError::Timeout),
        }
    }
}
