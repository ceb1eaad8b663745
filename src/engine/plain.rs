//! The pass-through engine.
//!
//! [PlainEngine] never handshakes and copies bytes through unchanged. Closing
//! is purely local: there is no close message to exchange, so
//! [Engine::close_inbound] always succeeds.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Engine, EngineResult, HandshakeStatus, Status};
use crate::{error::EngineError, task::DelegatedTask};

/// Default buffer size advertised by [PlainEngine].
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug)]
pub struct PlainEngine {
    buffer_size: usize,
    outbound_done: bool,
    inbound_done: bool,
}

impl Default for PlainEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl PlainEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            outbound_done: false,
            inbound_done: false,
        }
    }
}

impl Engine for PlainEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        HandshakeStatus::NotHandshaking
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn wrap(&mut self, srcs: &mut [Bytes], dst: &mut BytesMut) -> Result<EngineResult, EngineError> {
        if self.outbound_done {
            return Ok(EngineResult::new(
                Status::Closed,
                HandshakeStatus::NotHandshaking,
                0,
                0,
            ));
        }

        let mut room = dst.capacity() - dst.len();
        let mut copied = 0;

        for src in srcs.iter_mut() {
            if room == 0 {
                break;
            }
            let n = src.len().min(room);
            dst.put_slice(&src[..n]);
            src.advance(n);
            room -= n;
            copied += n;
        }

        let pending = srcs.iter().any(|s| !s.is_empty());
        let status = if pending && copied == 0 {
            Status::BufferOverflow
        } else {
            Status::Ok
        };

        Ok(EngineResult::new(
            status,
            HandshakeStatus::NotHandshaking,
            copied,
            copied,
        ))
    }

    fn unwrap(
        &mut self,
        src: &mut BytesMut,
        dst: &mut BytesMut,
    ) -> Result<EngineResult, EngineError> {
        if self.inbound_done {
            return Ok(EngineResult::new(
                Status::Closed,
                HandshakeStatus::NotHandshaking,
                0,
                0,
            ));
        }

        if src.is_empty() {
            return Ok(EngineResult::new(
                Status::BufferUnderflow,
                HandshakeStatus::NotHandshaking,
                0,
                0,
            ));
        }

        let room = dst.capacity() - dst.len();
        if room == 0 {
            return Ok(EngineResult::new(
                Status::BufferOverflow,
                HandshakeStatus::NotHandshaking,
                0,
                0,
            ));
        }

        let n = src.len().min(room);
        dst.put_slice(&src[..n]);
        src.advance(n);

        Ok(EngineResult::new(
            Status::Ok,
            HandshakeStatus::NotHandshaking,
            n,
            n,
        ))
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }

    fn close_outbound(&mut self) {
        self.outbound_done = true;
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        self.inbound_done = true;
        Ok(())
    }

    fn min_application_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn max_application_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn min_network_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn max_network_buffer_size(&self) -> usize {
        self.buffer_size
    }
}
