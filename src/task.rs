//! Delegated tasks and where they run.
//!
//! Engines hand out expensive work, such as key exchange computations, as
//! [DelegatedTask]s so the session's selector loop is not stalled by it. A
//! [TaskExecutor] decides where that work runs:
//!
//! 1. [InlineExecutor] runs the task immediately on the calling thread.
//! 2. [ThreadExecutor] runs every task on its own short-lived named thread.
//!
//! Tasks from one engine may run concurrently with each other. The engine is
//! responsible for folding their results back into its state.
//!
//! # Example
//!
//! ```
//! use spindle::task::{DelegatedTask, InlineExecutor, TaskExecutor};
//! use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
//!
//! let ran = Arc::new(AtomicBool::new(false));
//! let flag = ran.clone();
//! let task = DelegatedTask::new("compute-secret", move || flag.store(true, Ordering::SeqCst));
//!
//! InlineExecutor.execute(task);
//! assert!(ran.load(Ordering::SeqCst));
//! ```
use std::{fmt, thread};

use log::{trace, warn};

/// A unit of engine work meant to run off the session thread.
pub struct DelegatedTask {
    name: &'static str,
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl DelegatedTask {
    pub fn new(name: &'static str, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            work: Box::new(work),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the task to completion on the calling thread.
    pub fn run(self) {
        trace!("running delegated task {}", self.name);
        (self.work)()
    }

    /// A task that runs `self` and then `then`.
    pub fn and_then(self, then: impl FnOnce() + Send + 'static) -> Self {
        let name = self.name;
        Self::new(name, move || {
            self.run();
            then();
        })
    }
}

impl fmt::Debug for DelegatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DelegatedTask").field(&self.name).finish()
    }
}

/// Somewhere delegated tasks can run.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: DelegatedTask);
}

/// Runs tasks on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: DelegatedTask) {
        task.run();
    }
}

/// Runs each task on a new thread.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    prefix: String,
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("spindle-task")
    }
}

impl ThreadExecutor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TaskExecutor for ThreadExecutor {
    fn execute(&self, task: DelegatedTask) {
        let name = format!("{}-{}", self.prefix, task.name());

        // Hand the task over only once the thread exists, so a failed spawn
        // still leaves it here to run inline.
        let (tx, rx) = std::sync::mpsc::sync_channel::<DelegatedTask>(1);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            if let Ok(task) = rx.recv() {
                task.run();
            }
        });

        match spawned {
            Ok(_) => {
                let _ = tx.send(task);
            }
            Err(e) => {
                warn!("could not spawn task thread ({}), running inline", e);
                task.run();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc::channel, Arc, Mutex},
        thread,
    };

    use super::{DelegatedTask, InlineExecutor, TaskExecutor, ThreadExecutor};

    #[test]
    fn and_then_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());

        let task = DelegatedTask::new("first", move || a.lock().unwrap().push(1))
            .and_then(move || b.lock().unwrap().push(2));

        assert_eq!(task.name(), "first");
        InlineExecutor.execute(task);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn thread_executor_runs_elsewhere() {
        let (tx, rx) = channel();
        let me = thread::current().id();

        ThreadExecutor::new("test").execute(DelegatedTask::new("offload", move || {
            let current = thread::current();
            tx.send((current.id(), current.name().map(str::to_owned)))
                .unwrap();
        }));

        let (id, name) = rx.recv().unwrap();
        assert_ne!(id, me);
        assert_eq!(name.as_deref(), Some("test-offload"));
    }
}
