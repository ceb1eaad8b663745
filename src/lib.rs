//! # `spindle`: session futures over pluggable protocol engines
//!
//! `spindle` drives network sessions through a protocol [engine] (TLS-like,
//! QUIC-like, or plain pass-through) on dedicated selector-loop threads, and
//! reports everything that happens to a session through single-assignment
//! futures.
//!
//! Each session owns a [SessionFutures](session::SessionFutures): one future
//! per lifecycle event (created, opened, closed, ending) and a shared
//! sent-bytes counter from which per-write completion futures are derived.
//! Any thread may block on these futures, except the selector loop that is
//! responsible for completing them; doing so fails immediately with
//! [FutureError::BlockingOperation](error::FutureError::BlockingOperation)
//! instead of deadlocking.
//!
//! For the future types and the wait algorithm, see the [futures] module. For
//! the engine contract, see [engine]. The [session] module ties both together.
//!
//! ## Example
//!
//! Open a pass-through session, write to it and close it:
//!
//! ```
//! use spindle::config::SessionConfig;
//! use spindle::engine::plain::PlainEngine;
//! use spindle::futures::SessionFuture;
//! use spindle::reactor::pool::LoopPool;
//! use spindle::session::{Session, Transport};
//! use spindle::task::InlineExecutor;
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct Sink;
//!
//! impl Transport for Sink {
//!     fn send(&mut self, buf: &[u8]) -> std::io::Result<()> {
//!         println!("sent {} bytes", buf.len());
//!         Ok(())
//!     }
//!
//!     fn deliver(&mut self, _data: Bytes) {}
//! }
//!
//! let pool = LoopPool::default();
//! let session = Session::open(
//!     SessionConfig::default(),
//!     Box::new(PlainEngine::default()),
//!     Box::new(Sink),
//!     &pool,
//!     Arc::new(InlineExecutor),
//! )
//! .unwrap();
//!
//! session.write("Hello, world!").sync().unwrap();
//! session.close().unwrap();
//! session.futures().end_future().sync().unwrap();
//! ```
pub mod config;
pub mod engine;
pub mod error;
pub mod futures;
pub mod interrupt;
pub mod reactor;
pub mod session;
pub mod task;
