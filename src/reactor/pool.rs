//! A lazily grown pool of selector loops.
//!
//! [LoopPool::next] balances sessions across loops by channel count: it
//! returns the loop serving the fewest channels, and starts a new loop only
//! when every existing loop is already busy and the pool is below capacity.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use log::debug;

use super::SelectorLoop;
use crate::{config::LoopPoolConfig, error::SessionError};

pub struct LoopPool {
    config: LoopPoolConfig,
    loops: Mutex<Vec<Arc<SelectorLoop>>>,
    stopped: AtomicBool,
}

impl Default for LoopPool {
    fn default() -> Self {
        Self::new(LoopPoolConfig::default())
    }
}

impl LoopPool {
    pub fn new(config: LoopPoolConfig) -> Self {
        Self {
            config,
            loops: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn loops(&self) -> std::sync::MutexGuard<'_, Vec<Arc<SelectorLoop>>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick a loop for a new channel.
    pub fn next(&self) -> Result<Arc<SelectorLoop>, SessionError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SessionError::LoopStopped);
        }

        let mut loops = self.loops();
        let least = loops.iter().min_by_key(|l| l.channel_count()).cloned();

        match least {
            Some(l) if l.channel_count() == 0 || loops.len() >= self.config.capacity.max(1) => {
                Ok(l)
            }
            _ => {
                let name = format!("{}-{}", self.config.thread_name, loops.len());
                let l = SelectorLoop::spawn(name, self.config.max_events)?;
                debug!("started {} ({} of {})", l.name(), loops.len() + 1, self.config.capacity);
                loops.push(l.clone());
                Ok(l)
            }
        }
    }

    /// Number of loops started so far.
    pub fn len(&self) -> usize {
        self.loops().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every loop and refuse further [LoopPool::next] calls.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        for l in self.loops().iter() {
            l.stop();
        }
    }

    /// Wait for every loop thread to exit.
    pub fn join(&self) {
        let loops = self.loops().clone();
        for l in loops {
            l.join();
        }
    }
}

impl Drop for LoopPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use super::LoopPool;
    use crate::{config::LoopPoolConfig, error::SessionError};

    fn pool(capacity: usize) -> LoopPool {
        LoopPool::new(LoopPoolConfig {
            capacity,
            thread_name: "pool-test".to_owned(),
            max_events: 8,
        })
    }

    #[test]
    fn reuses_idle_loop() -> Result<()> {
        let pool = pool(4);

        let a = pool.next()?;
        let b = pool.next()?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);

        pool.stop();
        pool.join();
        Ok(())
    }

    #[test]
    fn grows_lazily_up_to_capacity() -> Result<()> {
        let pool = pool(2);

        let first = pool.next()?;
        first.register("one");

        let second = pool.next()?;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.name(), "pool-test-1");
        second.register("two");
        second.register("three");

        let third = pool.next()?;
        assert!(Arc::ptr_eq(&third, &first));
        assert_eq!(pool.len(), 2);

        pool.stop();
        pool.join();
        assert!(first.is_stopped());
        assert!(matches!(pool.next(), Err(SessionError::LoopStopped)));
        Ok(())
    }
}
