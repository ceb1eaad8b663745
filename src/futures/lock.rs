//! The monitor shared by blocking futures.
//!
//! A [FutureLock] is a mutex/condition-variable pair. The mutex guards a
//! count of parked threads so that completing a future can skip the
//! broadcast entirely when nobody is waiting.
//!
//! Completers must publish the new state *before* calling
//! [FutureLock::notify_waiters]; waiters re-check the state under the mutex
//! after every wake-up. Together this closes the lost-wakeup window.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::trace;

use crate::{error::FutureError, interrupt};

pub(crate) struct LockShared {
    waiters: Mutex<usize>,
    cond: Condvar,
}

impl LockShared {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unconditional broadcast, used to deliver interrupts.
    pub(crate) fn wake_all(&self) {
        let _guard = self.lock();
        self.cond.notify_all();
    }
}

/// Monitor plus waiter count backing one or more blocking futures.
///
/// Cloning a `FutureLock` yields another handle to the same monitor; all
/// threshold views over one data counter share their counter's lock this
/// way.
#[derive(Clone)]
pub struct FutureLock {
    shared: Arc<LockShared>,
}

impl Default for FutureLock {
    fn default() -> Self {
        Self::new()
    }
}

impl FutureLock {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LockShared {
                waiters: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Number of threads currently parked on this lock.
    pub fn waiters(&self) -> usize {
        *self.shared.lock()
    }

    /// Wake every parked thread, if there are any.
    pub fn notify_waiters(&self) {
        let waiters = self.shared.lock();

        if *waiters > 0 {
            trace!("waking {} waiter(s)", *waiters);
            self.shared.cond.notify_all();
        }
    }

    /// Park the calling thread until `is_done` holds or `timeout` elapses.
    ///
    /// Returns whether `is_done` held on return. Running out of time is not an
    /// error: the caller sees `Ok(false)`. When `interruptible` is set, an
    /// interruption of the calling thread is reported as
    /// [FutureError::Interrupted] and the thread's flag is left clear.
    /// Otherwise the interruption is remembered, waiting continues, and the
    /// flag is set again just before returning.
    pub fn wait_until(
        &self,
        is_done: impl Fn() -> bool,
        timeout: Option<Duration>,
        interruptible: bool,
    ) -> Result<bool, FutureError> {
        let start = Instant::now();
        let mut was_interrupted = false;

        let result = {
            let _park = interrupt::park_on(&self.shared);
            let mut waiters = self.shared.lock();

            loop {
                if is_done() {
                    break Ok(true);
                }

                if interrupt::interrupted() {
                    if interruptible {
                        break Err(FutureError::Interrupted);
                    }
                    was_interrupted = true;
                }

                let remaining = match timeout {
                    None => None,
                    Some(timeout) => match timeout.checked_sub(start.elapsed()) {
                        Some(left) if !left.is_zero() => Some(left),
                        _ => break Ok(false),
                    },
                };

                *waiters += 1;
                waiters = match remaining {
                    None => self
                        .shared
                        .cond
                        .wait(waiters)
                        .unwrap_or_else(PoisonError::into_inner),
                    Some(left) => {
                        self.shared
                            .cond
                            .wait_timeout(waiters, left)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
                *waiters -= 1;
            }
        };

        if was_interrupted {
            interrupt::reassert();
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use super::FutureLock;

    #[test]
    fn no_waiters_by_default() {
        let lock = FutureLock::new();
        assert_eq!(lock.waiters(), 0);
        lock.notify_waiters();
    }

    #[test]
    fn times_out_without_error() {
        let lock = FutureLock::new();
        let now = Instant::now();

        let done = lock
            .wait_until(|| false, Some(Duration::from_millis(100)), true)
            .unwrap();

        assert!(!done);
        assert!(now.elapsed() >= Duration::from_millis(100));
        assert_eq!(lock.waiters(), 0);
    }

    #[test]
    fn notify_wakes_waiter() {
        let lock = FutureLock::new();
        let flag = Arc::new(AtomicBool::new(false));

        let t = {
            let lock = lock.clone();
            let flag = flag.clone();
            thread::spawn(move || {
                lock.wait_until(|| flag.load(Ordering::SeqCst), None, true)
                    .unwrap()
            })
        };

        while lock.waiters() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        flag.store(true, Ordering::SeqCst);
        lock.notify_waiters();

        assert!(t.join().unwrap());
        assert_eq!(lock.waiters(), 0);
    }
}
