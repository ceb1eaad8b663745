//! Error types.
//!
//! Three families live here: [FutureError] is what blocking on a future can
//! produce, [EngineError] is what a protocol engine reports, and
//! [SessionError] is what the session driver records as a session's failure
//! cause.
use std::{io, sync::Arc};

use thiserror::Error;

/// A recorded failure cause.
///
/// Causes are reference counted so a single failure can complete many
/// futures while every observer still sees the very same error object.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Wrap any error as a [Cause].
pub fn cause<E>(err: E) -> Cause
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Errors raised while blocking on, or reading the result of, a future.
#[derive(Error, Debug, Clone)]
pub enum FutureError {
    /// The calling thread is the one responsible for completing the future;
    /// parking it would never return.
    #[error("blocking operation would deadlock: the calling thread must complete this future")]
    BlockingOperation,

    /// The waiting thread was interrupted.
    #[error("interrupted while waiting for completion")]
    Interrupted,

    /// The future was cancelled.
    #[error("future was cancelled")]
    Cancelled,

    /// A bounded `get` ran out of time.
    #[error("timed out waiting for completion")]
    Timeout,

    /// The future failed; carries the originally recorded cause.
    #[error(transparent)]
    Failed(Cause),
}

impl FutureError {
    /// The recorded failure cause, if this error carries one.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            FutureError::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Errors reported by protocol engines.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An engine result was built with a negative byte count.
    #[error("negative byte count: {0}")]
    NegativeByteCount(i64),

    /// The handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The inbound side was closed without a protocol-level close message.
    #[error("inbound closed without close notification: {incident}")]
    UncleanClose {
        /// Description of what the engine observed.
        incident: String,
    },

    /// The engine has been closed in the direction being used.
    #[error("engine closed")]
    Closed,

    /// Buffer requirements exceed what the engine advertised.
    #[error("buffer of {needed} bytes exceeds the engine maximum of {max}")]
    BufferLimit {
        /// Bytes the engine asked for.
        needed: usize,
        /// Largest buffer the engine advertised.
        max: usize,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors recorded against a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("transport failure: {0}")]
    Io(#[from] io::Error),

    /// The selector loop driving the session is no longer running.
    #[error("selector loop stopped")]
    LoopStopped,

    /// The engine made no progress for too many consecutive rounds.
    #[error("engine made no progress after {0} rounds")]
    Stalled(usize),

    /// The session has already ended.
    #[error("session closed")]
    Closed,
}
