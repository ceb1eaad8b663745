//! Settable, blocking futures.
//!
//! A [DefaultFuture] is both ends of a promise: the producer calls
//! [DefaultFuture::success], [DefaultFuture::failure] or
//! [SessionFuture::cancel], and consumers observe or block on the result.
//! Clones share state, so a producer can keep one handle while handing
//! others out. Session lifecycle events are [EventFuture]s, i.e.
//! `DefaultFuture<()>`.
use std::{fmt, sync::Arc, time::Duration};

use log::trace;

use super::{
    check_dead_lock, lock::FutureLock, state::Completion, ExecutorContext, FutureState,
    SessionFuture,
};
use crate::error::{Cause, FutureError};

/// A future completed by a session lifecycle event.
pub type EventFuture = DefaultFuture<()>;

struct Inner<V> {
    completion: Completion<V>,
    lock: FutureLock,
    executor: Option<Arc<dyn ExecutorContext>>,
    session: Option<u64>,
}

/// A promise with its own [FutureLock].
pub struct DefaultFuture<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for DefaultFuture<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for DefaultFuture<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> DefaultFuture<V> {
    /// A pending future not tied to any executor.
    pub fn new() -> Self {
        Self::with_context(None, None)
    }

    /// A pending future completed from `executor`, reported as belonging to
    /// `session` in diagnostics.
    pub fn with_context(executor: Option<Arc<dyn ExecutorContext>>, session: Option<u64>) -> Self {
        Self {
            inner: Arc::new(Inner {
                completion: Completion::new(),
                lock: FutureLock::new(),
                executor,
                session,
            }),
        }
    }

    /// Session this future was created for, if any.
    pub fn session(&self) -> Option<u64> {
        self.inner.session
    }

    /// Whether both handles refer to the same future.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Complete successfully with `value`. Returns `false`, and does nothing,
    /// if the future was already done.
    pub fn success(&self, value: V) -> bool {
        let set = self.inner.completion.succeed(value);
        self.completed(set, "successful")
    }

    /// Complete with `cause`. Returns `false`, and does nothing, if the future
    /// was already done.
    pub fn failure(&self, cause: Cause) -> bool {
        let set = self.inner.completion.fail(cause);
        self.completed(set, "failed")
    }

    fn completed(&self, set: bool, what: &str) -> bool {
        if set {
            trace!("future for session {:?} {}", self.inner.session, what);
            self.inner.lock.notify_waiters();
        }
        set
    }
}

impl<V: Clone + Send + Sync> SessionFuture<V> for DefaultFuture<V> {
    fn state(&self) -> FutureState {
        self.inner.completion.state()
    }

    fn cause(&self) -> Option<Cause> {
        self.inner.completion.cause()
    }

    fn get_now(&self) -> Option<V> {
        self.inner.completion.value().cloned()
    }

    fn cancel(&self, _may_interrupt: bool) -> bool {
        let set = self.inner.completion.cancel();
        self.completed(set, "cancelled")
    }

    fn wait_for(
        &self,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> Result<bool, FutureError> {
        check_dead_lock(self.inner.executor.as_deref())?;

        if self.is_done() {
            return Ok(true);
        }

        self.inner
            .lock
            .wait_until(|| self.inner.completion.state().is_done(), timeout, interruptible)
    }
}

impl<V: fmt::Debug> fmt::Debug for DefaultFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultFuture")
            .field("session", &self.inner.session)
            .field("completion", &self.inner.completion)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc::channel, Arc},
        thread,
        time::{Duration, Instant},
    };

    use anyhow::Result;

    use super::{DefaultFuture, EventFuture};
    use crate::{
        error::{cause, EngineError, FutureError},
        futures::{ExecutorContext, SessionFuture},
        interrupt,
    };

    struct ThisThread(thread::ThreadId);

    impl ExecutorContext for ThisThread {
        fn in_executor(&self) -> bool {
            thread::current().id() == self.0
        }
    }

    #[test]
    fn single_assignment() {
        let f = DefaultFuture::new();
        let c1 = cause(EngineError::Closed);

        assert!(f.failure(c1.clone()));
        assert!(!f.success(1u8));
        assert!(!f.cancel(true));
        assert!(!f.failure(cause(EngineError::Protocol("late".into()))));

        assert!(f.is_failed());
        assert!(Arc::ptr_eq(&f.cause().unwrap(), &c1));
        assert!(f.get_now().is_none());
    }

    #[test]
    fn sync_raises_cause_but_not_cancellation() {
        let failed = EventFuture::new();
        failed.failure(cause(EngineError::Closed));
        assert!(matches!(failed.sync(), Err(FutureError::Failed(_))));

        let cancelled = EventFuture::new();
        assert!(cancelled.cancel(false));
        assert!(cancelled.sync().is_ok());
        assert!(cancelled.cause().is_none());
        assert!(matches!(cancelled.get(), Err(FutureError::Cancelled)));
    }

    #[test]
    fn dead_lock_check_trips_regardless_of_state() {
        let ctx: Arc<dyn ExecutorContext> = Arc::new(ThisThread(thread::current().id()));

        let pending = EventFuture::with_context(Some(ctx.clone()), Some(1));
        assert!(matches!(
            pending.wait_timeout(Duration::ZERO),
            Err(FutureError::BlockingOperation)
        ));

        let done = EventFuture::with_context(Some(ctx), Some(1));
        done.success(());
        assert!(matches!(done.wait(), Err(FutureError::BlockingOperation)));
        assert!(matches!(
            done.wait_uninterruptibly(),
            Err(FutureError::BlockingOperation)
        ));
    }

    #[test]
    fn dead_lock_check_allows_other_threads() -> Result<()> {
        let ctx: Arc<dyn ExecutorContext> = Arc::new(ThisThread(thread::current().id()));
        let f = EventFuture::with_context(Some(ctx), None);
        f.success(());

        let f2 = f.clone();
        thread::spawn(move || f2.sync()).join().unwrap()?;

        Ok(())
    }

    #[test]
    fn timeout_accuracy() -> Result<()> {
        let f = EventFuture::new();
        let start = Instant::now();

        {
            let f = f.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(500));
                f.success(());
            });
        }

        assert!(!f.wait_timeout(Duration::from_millis(400))?);
        let first = start.elapsed();
        assert!(first >= Duration::from_millis(400));
        assert!(first < Duration::from_millis(490));
        assert!(!f.is_done());

        f.wait()?;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(f.is_successful());

        Ok(())
    }

    #[test]
    fn interrupt_aborts_wait() {
        let f = EventFuture::new();
        let (tx, rx) = channel();

        let t = {
            let f = f.clone();
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                let res = f.wait();
                (res, interrupt::is_interrupted())
            })
        };

        let target = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(100));
        target.interrupt();

        let (res, still_flagged) = t.join().unwrap();
        assert!(matches!(res, Err(FutureError::Interrupted)));
        assert!(!still_flagged);
        assert!(!f.is_done());
    }

    #[test]
    fn uninterruptible_wait_keeps_going() {
        let f = EventFuture::new();
        let (tx, rx) = channel();

        let t = {
            let f = f.clone();
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                let start = Instant::now();
                let res = f.wait_uninterruptibly_timeout(Duration::from_millis(300));
                (res, start.elapsed(), interrupt::is_interrupted())
            })
        };

        let target = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(100));
        target.interrupt();

        let (res, elapsed, still_flagged) = t.join().unwrap();
        assert!(matches!(res, Ok(false)));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(still_flagged);
    }

    #[test]
    fn get_returns_value_from_other_thread() -> Result<()> {
        let f = DefaultFuture::<String>::new();
        let producer = f.clone();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.success("done".to_owned());
        });

        assert_eq!(f.get()?, "done");
        assert!(matches!(
            DefaultFuture::<u8>::new().get_timeout(Duration::from_millis(10)),
            Err(FutureError::Timeout)
        ));

        Ok(())
    }
}
