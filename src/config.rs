//! Configuration.
//!
//! Plain structs with sensible defaults; nothing here reads files or the
//! environment.
use std::{num::NonZeroUsize, thread};

/// Settings for a [LoopPool](crate::reactor::pool::LoopPool).
#[derive(Clone, Debug)]
pub struct LoopPoolConfig {
    /// Most selector loops the pool will ever start.
    pub capacity: usize,
    /// Loop threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Readiness events fetched per `epoll_wait` call.
    pub max_events: usize,
}

impl Default for LoopPoolConfig {
    fn default() -> Self {
        Self {
            capacity: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            thread_name: "spindle-loop".to_owned(),
            max_events: 512,
        }
    }
}

/// Settings for a [Session](crate::session::Session).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Kick the initial handshake with an empty `wrap` as soon as the session
    /// opens. Sessions that expect the peer to speak first may turn this off.
    pub initiate_handshake: bool,
    /// Consecutive engine calls without progress before the session gives up.
    pub max_engine_rounds: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initiate_handshake: true,
            max_engine_rounds: 64,
        }
    }
}
