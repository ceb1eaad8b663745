//! The protocol engine contract.
//!
//! An [Engine] is the protocol state machine a session drives: TLS-like,
//! QUIC-like, or the pass-through [plain::PlainEngine]. The session never
//! interprets protocol bytes itself. It hands outbound application data to
//! [Engine::wrap], inbound network data to [Engine::unwrap], and reacts to the
//! [EngineResult] each call returns:
//!
//! - [HandshakeStatus::NeedWrap]: call `wrap` again, even with no
//!   application data, and send what it produces.
//! - [HandshakeStatus::NeedUnwrap]: wait for more network data.
//! - [HandshakeStatus::NeedTask]: drain [Engine::delegated_task] and run the
//!   tasks off the session's thread.
//! - [HandshakeStatus::Finished]: the handshake completed during this very
//!   call. It is never reported by [Engine::handshake_status]; after seeing it
//!   the session queries the status again for the steady state.
//!
//! The initial handshake is started implicitly by the first `wrap` or
//! `unwrap`; [Engine::begin_handshake] is only for renegotiation.
//!
//! Any error from `wrap`, `unwrap` or `close_inbound` is fatal to the session:
//! it records the error as its failure cause and closes quickly.
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::{error::EngineError, task::DelegatedTask};

pub mod plain;

/// Outcome of a single `wrap`/`unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not enough input to produce anything; supply more and retry.
    BufferUnderflow,
    /// The destination buffer was too small.
    BufferOverflow,
    Ok,
    /// This direction of the engine is closed.
    Closed,
}

/// Where the engine is in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NotHandshaking,
    /// One-shot signal returned in an [EngineResult] only.
    Finished,
    NeedWrap,
    NeedUnwrap,
    NeedTask,
}

impl HandshakeStatus {
    /// Whether application data can flow.
    pub fn is_steady(self) -> bool {
        matches!(
            self,
            HandshakeStatus::NotHandshaking | HandshakeStatus::Finished
        )
    }
}

/// Immutable result of a `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    status: Status,
    handshake_status: HandshakeStatus,
    bytes_consumed: usize,
    bytes_produced: usize,
}

impl EngineResult {
    pub fn new(
        status: Status,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        Self {
            status,
            handshake_status,
            bytes_consumed,
            bytes_produced,
        }
    }

    /// Build a result from signed counts, as produced by engines that track
    /// buffer positions arithmetically. Negative counts are rejected.
    pub fn try_new(
        status: Status,
        handshake_status: HandshakeStatus,
        bytes_consumed: i64,
        bytes_produced: i64,
    ) -> Result<Self, EngineError> {
        let count = |n: i64| usize::try_from(n).map_err(|_| EngineError::NegativeByteCount(n));

        Ok(Self::new(
            status,
            handshake_status,
            count(bytes_consumed)?,
            count(bytes_produced)?,
        ))
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.handshake_status
    }

    pub fn bytes_consumed(&self) -> usize {
        self.bytes_consumed
    }

    pub fn bytes_produced(&self) -> usize {
        self.bytes_produced
    }
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status = {:?} handshake = {:?} consumed = {} produced = {}",
            self.status, self.handshake_status, self.bytes_consumed, self.bytes_produced
        )
    }
}

/// A pluggable protocol state machine.
///
/// A session calls `wrap`/`unwrap` from a single thread and never has two of
/// those calls in flight at once. Delegated tasks, however, may run on other
/// threads concurrently with each other and with the session; an engine must
/// synchronize task results into its own state before the next `wrap` or
/// `unwrap` observes them.
pub trait Engine: Send {
    /// Called once before any other method.
    fn init(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called once after the session has fully ended.
    fn cleanup(&mut self) {}

    /// Start a renegotiation. Ignored while a handshake is in progress.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Current steady handshake status; never [HandshakeStatus::Finished].
    fn handshake_status(&self) -> HandshakeStatus;

    /// The next task to run off the session thread, if any. Each task is
    /// handed out once.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Encode application data from `srcs` into `dst`.
    ///
    /// Consumed bytes are advanced off the front of `srcs`. At most
    /// `dst.capacity() - dst.len()` bytes may be produced; if that is not
    /// enough the engine reports [Status::BufferOverflow]. Handshake messages
    /// may be produced while consuming nothing.
    fn wrap(&mut self, srcs: &mut [Bytes], dst: &mut BytesMut) -> Result<EngineResult, EngineError>;

    /// Decode network data from `src` into `dst`.
    ///
    /// Consumed bytes are advanced off the front of `src`. Incomplete records
    /// are left in place with [Status::BufferUnderflow].
    fn unwrap(&mut self, src: &mut BytesMut, dst: &mut BytesMut)
        -> Result<EngineResult, EngineError>;

    fn is_outbound_done(&self) -> bool;

    /// Stop sending application data. Idempotent.
    fn close_outbound(&mut self);

    fn is_inbound_done(&self) -> bool;

    /// Stop receiving. Idempotent; fails with [EngineError::UncleanClose] if
    /// the peer never sent a protocol-level close.
    fn close_inbound(&mut self) -> Result<(), EngineError>;

    fn min_application_buffer_size(&self) -> usize;

    fn max_application_buffer_size(&self) -> usize;

    fn min_network_buffer_size(&self) -> usize;

    fn max_network_buffer_size(&self) -> usize;
}

/// Buffer sizes read from an engine once, when a session is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizes {
    pub min_application: usize,
    pub max_application: usize,
    pub min_network: usize,
    pub max_network: usize,
}

impl BufferSizes {
    pub fn of(engine: &dyn Engine) -> Self {
        Self {
            min_application: engine.min_application_buffer_size(),
            max_application: engine.max_application_buffer_size(),
            min_network: engine.min_network_buffer_size(),
            max_network: engine.max_network_buffer_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineResult, HandshakeStatus, Status};
    use crate::error::EngineError;

    #[test]
    fn negative_counts_are_rejected() {
        assert!(matches!(
            EngineResult::try_new(Status::Ok, HandshakeStatus::NotHandshaking, -1, 0),
            Err(EngineError::NegativeByteCount(-1))
        ));
        assert!(matches!(
            EngineResult::try_new(Status::Ok, HandshakeStatus::NeedWrap, 0, -5),
            Err(EngineError::NegativeByteCount(-5))
        ));

        let r = EngineResult::try_new(Status::Closed, HandshakeStatus::Finished, 3, 4).unwrap();
        assert_eq!(r.bytes_consumed(), 3);
        assert_eq!(r.bytes_produced(), 4);
        assert_eq!(r.status(), Status::Closed);
        assert_eq!(r.handshake_status(), HandshakeStatus::Finished);
    }

    #[test]
    fn steady_states() {
        assert!(HandshakeStatus::NotHandshaking.is_steady());
        assert!(HandshakeStatus::Finished.is_steady());
        assert!(!HandshakeStatus::NeedTask.is_steady());
    }
}
