//! The engine-driven session.
//!
//! A [Session] owns one [Engine] and one [Transport] and runs every call into
//! either of them on its [SelectorLoop]. Callers on other threads only queue
//! work ([Session::write], [Session::receive], [Session::close]) and observe
//! progress through the session's [SessionFutures].
//!
//! Any error from the engine or the transport is recorded with
//! [SessionFutures::exception] and the session is torn down on the spot: no
//! closing handshake, no retry.
use std::{
    collections::VecDeque,
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};

use super::{DataEvent, SessionEvent, SessionFutures};
use crate::{
    config::SessionConfig,
    engine::{BufferSizes, Engine, EngineResult, HandshakeStatus, Status},
    error::{cause, Cause, EngineError, SessionError},
    futures::{data::WriteFuture, ExecutorContext, SessionFuture},
    reactor::{pool::LoopPool, SelectorLoop},
    task::TaskExecutor,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The connection underneath a session.
///
/// All methods are called on the session's loop thread.
pub trait Transport: Send {
    /// Put network bytes on the wire. The whole buffer must be accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Hand decoded application data to the user.
    fn deliver(&mut self, data: Bytes);

    /// The session has ended.
    fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Handshaking,
    Open,
    Ended,
}

struct Driver {
    engine: Box<dyn Engine>,
    transport: Box<dyn Transport>,
    sizes: BufferSizes,
    phase: Phase,
    net_in: BytesMut,
    outbound: VecDeque<Bytes>,
    tasks_running: usize,
    initialized: bool,
}

/// One engine-driven connection pinned to a selector loop.
pub struct Session {
    id: u64,
    config: SessionConfig,
    futures: SessionFutures,
    event_loop: Arc<SelectorLoop>,
    tasks: Arc<dyn TaskExecutor>,
    channel: usize,
    registered: AtomicBool,
    ended: AtomicBool,
    submitted: Mutex<u64>,
    driver: Mutex<Driver>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Open a session on the least busy loop of `pool`.
    pub fn open(
        config: SessionConfig,
        engine: Box<dyn Engine>,
        transport: Box<dyn Transport>,
        pool: &LoopPool,
        tasks: Arc<dyn TaskExecutor>,
    ) -> Result<Arc<Self>, SessionError> {
        let event_loop = pool.next()?;
        Self::open_on(config, engine, transport, event_loop, tasks)
    }

    /// Open a session on a specific loop.
    ///
    /// Returns as soon as the session is queued; [SessionFutures::open_future]
    /// completes once the handshake is done.
    pub fn open_on(
        config: SessionConfig,
        engine: Box<dyn Engine>,
        transport: Box<dyn Transport>,
        event_loop: Arc<SelectorLoop>,
        tasks: Arc<dyn TaskExecutor>,
    ) -> Result<Arc<Self>, SessionError> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let sizes = BufferSizes::of(engine.as_ref());
        let channel = event_loop.register(format!("session-{id}"));
        let executor: Arc<dyn ExecutorContext> = event_loop.clone();

        let session = Arc::new(Self {
            id,
            config,
            futures: SessionFutures::new(Some(executor), Some(id)),
            event_loop,
            tasks,
            channel,
            registered: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            submitted: Mutex::new(0),
            driver: Mutex::new(Driver {
                engine,
                transport,
                sizes,
                phase: Phase::Created,
                net_in: BytesMut::new(),
                outbound: VecDeque::new(),
                tasks_running: 0,
                initialized: false,
            }),
        });

        debug!(
            "session {}: created on {} ({:?})",
            id,
            session.event_loop.name(),
            sizes
        );

        if let Err(e) = session.on_loop(|s, d| s.start(d)) {
            session.release_channel();
            return Err(e);
        }

        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn futures(&self) -> &SessionFutures {
        &self.futures
    }

    pub fn event_loop(&self) -> &Arc<SelectorLoop> {
        &self.event_loop
    }

    /// Queue `data` for sending.
    ///
    /// The returned future completes once every byte submitted so far,
    /// including `data`, has been consumed by the engine and handed to the
    /// transport. Data written before the handshake finishes is held back
    /// until the session opens.
    pub fn write(self: &Arc<Self>, data: impl Into<Bytes>) -> WriteFuture {
        let data = data.into();

        // The threshold and the queue position must agree, so both are taken
        // under the same lock.
        let mut submitted = lock(&self.submitted);
        *submitted += data.len() as u64;
        let future = self.futures.write_future(*submitted);

        let queued = self.on_loop(move |s, d| {
            d.outbound.push_back(data);
            if d.phase == Phase::Open {
                s.flush(d)?;
            }
            Ok(())
        });
        drop(submitted);

        match queued {
            // The ending event already settled every undelivered write.
            Ok(()) | Err(SessionError::Closed) => {}
            Err(e) => {
                debug!("session {}: write refused: {}", self.id, e);
                self.futures.exception(cause(e));
            }
        }

        future
    }

    /// Feed bytes received from the network.
    pub fn receive(self: &Arc<Self>, data: impl Into<Bytes>) -> Result<(), SessionError> {
        let data = data.into();
        self.on_loop(move |s, d| {
            d.net_in.extend_from_slice(&data);
            s.read(d)
        })
    }

    /// The network reached end of stream. The engine decides whether that
    /// was a clean close.
    pub fn receive_eof(self: &Arc<Self>) -> Result<(), SessionError> {
        self.on_loop(|s, d| s.shutdown(d, true))
    }

    /// Close the session cleanly.
    ///
    /// Writes not yet handed to the transport are cancelled.
    pub fn close(self: &Arc<Self>) -> Result<(), SessionError> {
        self.on_loop(|s, d| s.shutdown(d, false))
    }

    /// Start a renegotiation on an open session.
    pub fn renegotiate(self: &Arc<Self>) -> Result<(), SessionError> {
        self.on_loop(|s, d| {
            if d.phase != Phase::Open {
                return Ok(());
            }
            d.engine.begin_handshake()?;
            s.wrap_once(d)?;
            if !d.engine.handshake_status().is_steady() {
                d.phase = Phase::Handshaking;
            }
            s.read(d)
        })
    }

    /// Fail the session with an error found outside the engine, such as a
    /// broken connection.
    pub fn fail(self: &Arc<Self>, cause: Cause) -> Result<(), SessionError> {
        if self.is_ended() {
            return Err(SessionError::Closed);
        }

        let session = self.clone();
        self.event_loop.execute(move || {
            let mut driver = lock(&session.driver);
            if driver.phase != Phase::Ended {
                session.abort(&mut driver, cause);
            }
        })
    }

    /// Whether the session has ended; later calls fail with
    /// [SessionError::Closed].
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn on_loop<F>(self: &Arc<Self>, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&Arc<Session>, &mut Driver) -> Result<(), SessionError> + Send + 'static,
    {
        if self.is_ended() {
            return Err(SessionError::Closed);
        }

        let session = self.clone();
        self.event_loop.execute(move || {
            let mut driver = lock(&session.driver);
            if driver.phase == Phase::Ended {
                trace!("session {}: dropping work after end", session.id);
                return;
            }

            if let Err(e) = f(&session, &mut *driver) {
                session.abort(&mut driver, cause(e));
            }
        })
    }

    fn start(self: &Arc<Self>, d: &mut Driver) -> Result<(), SessionError> {
        self.futures.event(SessionEvent::Created);
        d.engine.init()?;
        d.initialized = true;
        d.phase = Phase::Handshaking;

        if self.config.initiate_handshake {
            let r = self.wrap_once(d)?;
            self.check_closed(d, r)?;
        }

        self.drive(d)
    }

    /// Advance the handshake as far as the engine can go without more
    /// network input.
    fn drive(self: &Arc<Self>, d: &mut Driver) -> Result<(), SessionError> {
        let mut idle = 0;

        while d.phase == Phase::Handshaking {
            let progressed = match d.engine.handshake_status() {
                HandshakeStatus::NotHandshaking => {
                    self.opened(d)?;
                    return Ok(());
                }
                HandshakeStatus::Finished => {
                    warn!(
                        "session {}: engine reported FINISHED as its status",
                        self.id
                    );
                    self.opened(d)?;
                    return Ok(());
                }
                HandshakeStatus::NeedWrap => {
                    let r = self.wrap_once(d)?;
                    self.check_closed(d, r)?;
                    r.bytes_produced() > 0 || r.handshake_status() == HandshakeStatus::Finished
                }
                HandshakeStatus::NeedUnwrap => {
                    if d.net_in.is_empty() {
                        return Ok(());
                    }
                    let r = self.unwrap_once(d)?;
                    if r.status() == Status::Closed {
                        return self.shutdown(d, true);
                    }
                    if r.status() == Status::BufferUnderflow {
                        return Ok(());
                    }
                    r.bytes_consumed() > 0
                        || r.bytes_produced() > 0
                        || r.handshake_status() == HandshakeStatus::Finished
                }
                HandshakeStatus::NeedTask => {
                    let handed = self.run_tasks(d);
                    if d.tasks_running > 0 {
                        return Ok(());
                    }
                    handed > 0
                }
            };

            if progressed {
                idle = 0;
            } else {
                idle += 1;
                if idle >= self.config.max_engine_rounds {
                    return Err(SessionError::Stalled(idle));
                }
            }
        }

        Ok(())
    }

    fn opened(self: &Arc<Self>, d: &mut Driver) -> Result<(), SessionError> {
        d.phase = Phase::Open;
        self.futures.event(SessionEvent::Opened);
        self.flush(d)
    }

    /// Hand every delegated task to the executor. The handshake resumes on
    /// the loop once the last one has run. Returns how many were handed out.
    fn run_tasks(self: &Arc<Self>, d: &mut Driver) -> usize {
        let mut handed = 0;

        while let Some(task) = d.engine.delegated_task() {
            trace!("session {}: delegating {}", self.id, task.name());
            d.tasks_running += 1;

            let session = self.clone();
            let task = task.and_then(move || {
                let resumed = session.on_loop(|s, d| {
                    d.tasks_running -= 1;
                    if d.tasks_running > 0 {
                        return Ok(());
                    }
                    s.read(d)
                });
                if let Err(e) = resumed {
                    warn!("session {}: could not resume after task: {}", session.id, e);
                }
            });

            handed += 1;
            self.tasks.execute(task);
        }

        handed
    }

    /// Unwrap everything buffered from the network.
    fn read(self: &Arc<Self>, d: &mut Driver) -> Result<(), SessionError> {
        let mut idle = 0;

        loop {
            if d.phase == Phase::Handshaking {
                self.drive(d)?;
            }
            if d.phase != Phase::Open || d.net_in.is_empty() {
                return Ok(());
            }

            let r = self.unwrap_once(d)?;
            match r.status() {
                Status::BufferUnderflow => return Ok(()),
                Status::Closed => return self.shutdown(d, true),
                Status::Ok | Status::BufferOverflow => {}
            }

            if !d.engine.handshake_status().is_steady() {
                debug!("session {}: peer started a renegotiation", self.id);
                d.phase = Phase::Handshaking;
            }

            if r.bytes_consumed() > 0 || r.bytes_produced() > 0 {
                idle = 0;
            } else {
                idle += 1;
                if idle >= self.config.max_engine_rounds {
                    return Err(SessionError::Stalled(idle));
                }
            }
        }
    }

    /// Wrap and send queued application data.
    fn flush(self: &Arc<Self>, d: &mut Driver) -> Result<(), SessionError> {
        let mut idle = 0;

        while !d.outbound.is_empty() {
            let r = self.wrap_once(d)?;
            if r.status() == Status::Closed {
                return Err(EngineError::Closed.into());
            }

            if !d.engine.handshake_status().is_steady() {
                d.phase = Phase::Handshaking;
                return self.drive(d);
            }

            if r.bytes_consumed() > 0 || r.bytes_produced() > 0 {
                idle = 0;
            } else {
                idle += 1;
                if idle >= self.config.max_engine_rounds {
                    return Err(SessionError::Stalled(idle));
                }
            }
        }

        Ok(())
    }

    /// One `wrap` call, growing the network buffer on overflow. Produced
    /// bytes go to the transport before consumed bytes are reported sent.
    fn wrap_once(&self, d: &mut Driver) -> Result<EngineResult, SessionError> {
        let mut dst = buffer(d.sizes.min_network.clamp(1, d.sizes.max_network.max(1)));

        let r = loop {
            let r = d.engine.wrap(d.outbound.make_contiguous(), &mut dst)?;
            if r.status() != Status::BufferOverflow || r.bytes_produced() > 0 {
                break r;
            }
            dst = grow(&dst, d.sizes.max_network)?;
        };
        trace!("session {}: wrap {}", self.id, r);

        if !dst.is_empty() {
            d.transport.send(&dst)?;
        }

        while d.outbound.front().is_some_and(Bytes::is_empty) {
            d.outbound.pop_front();
        }

        if r.bytes_consumed() > 0 {
            self.futures
                .data_event(DataEvent::Sent, r.bytes_consumed() as u64);
        }

        Ok(r)
    }

    /// One `unwrap` call, growing the application buffer on overflow.
    fn unwrap_once(&self, d: &mut Driver) -> Result<EngineResult, SessionError> {
        let mut dst = buffer(
            d.sizes
                .min_application
                .clamp(1, d.sizes.max_application.max(1)),
        );

        let r = loop {
            let r = d.engine.unwrap(&mut d.net_in, &mut dst)?;
            if r.status() != Status::BufferOverflow || r.bytes_produced() > 0 {
                break r;
            }
            dst = grow(&dst, d.sizes.max_application)?;
        };
        trace!("session {}: unwrap {}", self.id, r);

        if !dst.is_empty() {
            let len = dst.len() as u64;
            d.transport.deliver(dst.freeze());
            self.futures.data_event(DataEvent::Received, len);
        }

        Ok(r)
    }

    fn check_closed(&self, d: &Driver, r: EngineResult) -> Result<(), SessionError> {
        if r.status() == Status::Closed && d.phase != Phase::Open {
            return Err(EngineError::Handshake("engine closed during handshake".into()).into());
        }
        Ok(())
    }

    /// The close sequence. `by_peer` marks a close the network initiated.
    fn shutdown(self: &Arc<Self>, d: &mut Driver, by_peer: bool) -> Result<(), SessionError> {
        debug!(
            "session {}: closing ({})",
            self.id,
            if by_peer { "peer" } else { "local" }
        );

        if by_peer {
            d.engine.close_inbound()?;
        }
        d.engine.close_outbound();

        for _ in 0..self.config.max_engine_rounds {
            let r = self.wrap_once(d)?;
            if r.status() == Status::Closed || r.bytes_produced() == 0 {
                break;
            }
        }

        self.end(d);
        Ok(())
    }

    /// Fire the final events and release the engine and the transport.
    fn end(&self, d: &mut Driver) {
        d.phase = Phase::Ended;
        self.ended.store(true, Ordering::Release);
        self.futures.event(SessionEvent::Closed);

        if d.initialized {
            d.engine.cleanup();
        }
        d.transport.close();
        d.outbound.clear();
        self.release_channel();

        // A clean close before the handshake finished releases open waiters;
        // a failure is reported to them by the ending event instead.
        if self.futures.cause().is_none() && self.futures.open_future().cancel(false) {
            debug!("session {}: closed before opening", self.id);
        }

        self.futures.event(SessionEvent::Ending);
        debug!("session {}: ended", self.id);
    }

    /// Record `cause` and tear the session down without a closing exchange.
    fn abort(&self, d: &mut Driver, cause: Cause) {
        warn!("session {}: failed: {}", self.id, cause);
        self.futures.exception(cause);
        if d.phase != Phase::Ended {
            self.end(d);
        }
    }

    fn release_channel(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            self.event_loop.deregister(self.channel);
        }
    }
}

/// An empty buffer with exactly `room` bytes of capacity.
fn buffer(room: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(room);
    if buf.capacity() > room {
        // Cut off whatever the allocator added beyond `room`.
        drop(buf.split_off(room));
    }
    buf
}

/// A replacement for `buf` twice its size, never larger than `max`.
fn grow(buf: &BytesMut, max: usize) -> Result<BytesMut, EngineError> {
    let needed = buf.capacity().max(1) * 2;
    if buf.capacity() >= max {
        return Err(EngineError::BufferLimit { needed, max });
    }

    Ok(buffer(needed.min(max)))
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_channel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("event_loop", &self.event_loop.name())
            .field("cause", &self.futures.cause())
            .finish()
    }
}
