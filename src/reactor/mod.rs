//! Selector loops.
//!
//! A [SelectorLoop] is one OS thread that owns an epoll instance and a run
//! queue. Sessions are pinned to a loop for their whole life: every engine
//! call and every lifecycle or data event for a session happens on its loop
//! thread. This makes the loop the [ExecutorContext] of the session's futures,
//! so blocking on one of them from the loop fails fast instead of deadlocking.
//!
//! Work is queued with [SelectorLoop::execute]; an eventfd registered with the
//! loop's epoll instance wakes the thread when it is idle.
//!
//! ```
//! use spindle::reactor::SelectorLoop;
//! use std::sync::mpsc::channel;
//!
//! let event_loop = SelectorLoop::spawn("doc-loop", 16).unwrap();
//! let (tx, rx) = channel();
//! let handle = event_loop.clone();
//! event_loop
//!     .execute(move || tx.send(handle.in_loop()).unwrap())
//!     .unwrap();
//! assert!(rx.recv().unwrap());
//! event_loop.stop();
//! event_loop.join();
//! ```
use std::{
    collections::VecDeque,
    fmt, io, mem,
    os::fd::AsFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle, ThreadId},
};

use log::{debug, trace, warn};
use slab::Slab;

use crate::{error::SessionError, futures::ExecutorContext};
use poll::{EventFd, Events, Poll};

pub mod poll;
pub mod pool;

const WAKER_TOKEN: u64 = u64::MAX;

type Job = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LoopShared {
    name: String,
    run_q: Mutex<VecDeque<Job>>,
    waker: EventFd,
    stopped: AtomicBool,
    channels: Mutex<Slab<String>>,
}

impl LoopShared {
    fn wake(&self) {
        if let Err(e) = self.waker.notify() {
            warn!("{}: failed to wake selector loop: {}", self.name, e);
        }
    }
}

/// One reactor thread with a run queue.
pub struct SelectorLoop {
    shared: Arc<LoopShared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SelectorLoop {
    /// Start a loop thread named `name`, fetching up to `max_events`
    /// readiness events per wake-up.
    pub fn spawn(name: impl Into<String>, max_events: usize) -> io::Result<Arc<Self>> {
        let name = name.into();
        let poll = Poll::new()?;
        let waker = EventFd::new()?;
        poll.add(waker.as_fd(), WAKER_TOKEN)?;

        let shared = Arc::new(LoopShared {
            name: name.clone(),
            run_q: Mutex::new(VecDeque::new()),
            waker,
            stopped: AtomicBool::new(false),
            channels: Mutex::new(Slab::new()),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(name)
                .spawn(move || run(shared, poll, Events::with_capacity(max_events)))?
        };

        Ok(Arc::new(Self {
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the calling thread is this loop's thread.
    pub fn in_loop(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Queue `job` to run on the loop thread.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Err(SessionError::LoopStopped);
        }

        lock(&self.shared.run_q).push_back(Box::new(job));
        self.shared.wake();

        Ok(())
    }

    /// Record a channel served by this loop. Returns its key.
    pub fn register(&self, description: impl Into<String>) -> usize {
        let description = description.into();
        let key = lock(&self.shared.channels).insert(description.clone());
        trace!("{}: registered channel {} ({})", self.name(), key, description);
        key
    }

    pub fn deregister(&self, key: usize) {
        let mut channels = lock(&self.shared.channels);
        if channels.contains(key) {
            let description = channels.remove(key);
            trace!(
                "{}: deregistered channel {} ({})",
                self.shared.name,
                key,
                description
            );
        }
    }

    /// Number of channels currently registered.
    pub fn channel_count(&self) -> usize {
        lock(&self.shared.channels).len()
    }

    /// Ask the loop to finish. Jobs already queued still run; new ones are
    /// refused.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            debug!("{}: stopping", self.name());
            self.shared.wake();
        }
    }

    /// Wait for the loop thread to exit. Does nothing when called from the
    /// loop thread itself or when already joined.
    pub fn join(&self) {
        if self.in_loop() {
            warn!("{}: refusing to join the loop from itself", self.name());
            return;
        }

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("{}: loop thread panicked", self.shared.name);
            }
        }
    }
}

impl ExecutorContext for SelectorLoop {
    fn in_executor(&self) -> bool {
        self.in_loop()
    }
}

impl Drop for SelectorLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for SelectorLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorLoop")
            .field("name", &self.shared.name)
            .field("channels", &self.channel_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn run(shared: Arc<LoopShared>, poll: Poll, mut events: Events) {
    debug!("{}: started", shared.name);

    loop {
        let jobs = mem::take(&mut *lock(&shared.run_q));

        if jobs.is_empty() {
            if shared.stopped.load(Ordering::Acquire) {
                break;
            }

            match poll.wait(&mut events, None) {
                Ok(tokens) => {
                    for token in tokens {
                        if token == WAKER_TOKEN {
                            shared.waker.drain();
                        }
                    }
                }
                Err(e) => {
                    warn!("{}: epoll_wait failed: {}", shared.name, e);
                    break;
                }
            }
            continue;
        }

        trace!("{}: running {} job(s)", shared.name, jobs.len());
        for job in jobs {
            job();
        }
    }

    debug!("{}: exited", shared.name);
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc::channel,
            Arc,
        },
        thread,
    };

    use anyhow::Result;

    use super::SelectorLoop;
    use crate::{error::SessionError, futures::ExecutorContext};

    #[test]
    fn runs_jobs_in_order_on_loop_thread() -> Result<()> {
        let event_loop = SelectorLoop::spawn("test-loop", 8)?;
        let (tx, rx) = channel();

        for i in 0..10 {
            let tx = tx.clone();
            let handle = event_loop.clone();
            event_loop.execute(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send((i, handle.in_executor(), name)).unwrap();
            })?;
        }

        for i in 0..10 {
            let (n, in_loop, name) = rx.recv()?;
            assert_eq!(n, i);
            assert!(in_loop);
            assert_eq!(name.as_deref(), Some("test-loop"));
        }

        assert!(!event_loop.in_executor());
        event_loop.stop();
        event_loop.join();

        Ok(())
    }

    #[test]
    fn stop_drains_queue_then_refuses() -> Result<()> {
        let event_loop = SelectorLoop::spawn("drain-loop", 8)?;
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let ran = ran.clone();
            event_loop.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })?;
        }

        event_loop.stop();
        assert!(matches!(
            event_loop.execute(|| {}),
            Err(SessionError::LoopStopped)
        ));

        event_loop.join();
        assert_eq!(ran.load(Ordering::SeqCst), 5);

        Ok(())
    }

    #[test]
    fn channel_registration() -> Result<()> {
        let event_loop = SelectorLoop::spawn("reg-loop", 8)?;

        let a = event_loop.register("a");
        let b = event_loop.register("b");
        assert_eq!(event_loop.channel_count(), 2);

        event_loop.deregister(a);
        event_loop.deregister(a);
        assert_eq!(event_loop.channel_count(), 1);

        event_loop.deregister(b);
        assert_eq!(event_loop.channel_count(), 0);

        Ok(())
    }
}
