//! Cooperative thread interruption.
//!
//! Blocking waits on futures come in two flavours: interruptible and
//! uninterruptible. Rust threads have no built-in interrupt, so this module
//! gives every thread an interrupted flag plus a handle, [Interrupter], that
//! other threads can use to set it. Setting the flag also wakes the thread if
//! it is currently parked inside a future wait, so the waiter observes the
//! interruption promptly instead of at its next timeout.
//!
//! # Example
//!
//! ```
//! use spindle::interrupt;
//!
//! let me = interrupt::current();
//! me.interrupt();
//! assert!(interrupt::is_interrupted());
//! assert!(interrupt::interrupted());
//! assert!(!interrupt::is_interrupted());
//! ```
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use crate::futures::lock::LockShared;

#[derive(Default)]
struct ThreadInterrupt {
    flag: AtomicBool,
    parked_on: Mutex<Option<Arc<LockShared>>>,
}

thread_local! {
    static CURRENT: Arc<ThreadInterrupt> = Arc::new(ThreadInterrupt::default());
}

/// A handle that can interrupt one particular thread.
///
/// Obtain one for the calling thread with [current] and hand it to whichever
/// thread should be able to interrupt it.
#[derive(Clone)]
pub struct Interrupter {
    inner: Arc<ThreadInterrupt>,
}

impl Interrupter {
    /// Set the target thread's interrupted flag and wake it if it is parked
    /// on a future.
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);

        let parked = self
            .inner
            .parked_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(lock) = parked {
            lock.wake_all();
        }
    }

    /// Whether the target thread's flag is currently set.
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Return an [Interrupter] for the calling thread.
pub fn current() -> Interrupter {
    CURRENT.with(|inner| Interrupter {
        inner: inner.clone(),
    })
}

/// Test and clear the calling thread's interrupted flag.
pub fn interrupted() -> bool {
    CURRENT.with(|inner| inner.flag.swap(false, Ordering::SeqCst))
}

/// Query the calling thread's interrupted flag without clearing it.
pub fn is_interrupted() -> bool {
    CURRENT.with(|inner| inner.flag.load(Ordering::SeqCst))
}

/// Set the calling thread's flag without waking anything.
pub(crate) fn reassert() {
    CURRENT.with(|inner| inner.flag.store(true, Ordering::SeqCst));
}

/// Records which lock the calling thread is parked on for as long as the
/// guard lives.
pub(crate) struct ParkGuard {
    inner: Arc<ThreadInterrupt>,
}

pub(crate) fn park_on(lock: &Arc<LockShared>) -> ParkGuard {
    let inner = CURRENT.with(|inner| inner.clone());

    *inner
        .parked_on
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(lock.clone());

    ParkGuard { inner }
}

impl Drop for ParkGuard {
    fn drop(&mut self) {
        *self
            .inner
            .parked_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc::channel, thread};

    use super::{current, interrupted, is_interrupted};

    #[test]
    fn flag_is_per_thread() {
        let (tx, rx) = channel();
        let (go_tx, go_rx) = channel::<()>();

        let t = thread::spawn(move || {
            tx.send(current()).unwrap();
            go_rx.recv().unwrap();
            interrupted()
        });

        let remote = rx.recv().unwrap();
        remote.interrupt();
        assert!(remote.is_interrupted());
        assert!(!is_interrupted());

        go_tx.send(()).unwrap();
        assert!(t.join().unwrap());
        assert!(!remote.is_interrupted());
    }

    #[test]
    fn interrupted_clears() {
        current().interrupt();
        assert!(interrupted());
        assert!(!interrupted());
    }
}
