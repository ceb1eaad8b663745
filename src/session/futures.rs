//! Per-session lifecycle and write futures.
use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use super::{DataEvent, SessionEvent};
use crate::{
    error::Cause,
    futures::{
        data::{DataFuture, WriteFuture},
        default::EventFuture,
        ExecutorContext, SessionFuture,
    },
};

/// Maps a session's lifecycle events and sent bytes onto futures.
///
/// One [EventFuture] per [SessionEvent] is created up front and stays the same
/// for the life of the session. Writes are tracked by a single shared
/// [DataFuture]; [SessionFutures::write_future] hands out threshold views
/// over it that are not retained here.
///
/// The first cause passed to [SessionFutures::exception] is kept and every
/// later one discarded. From then on, lifecycle events complete their futures
/// as failed with that cause.
pub struct SessionFutures {
    events: [EventFuture; SessionEvent::COUNT],
    data: DataFuture,
    cause: OnceLock<Cause>,
    session: Option<u64>,
}

impl SessionFutures {
    /// Futures for `session`, completed from `executor`.
    pub fn new(executor: Option<Arc<dyn ExecutorContext>>, session: Option<u64>) -> Self {
        Self {
            events: std::array::from_fn(|_| EventFuture::with_context(executor.clone(), session)),
            data: DataFuture::new(executor, session),
            cause: OnceLock::new(),
            session,
        }
    }

    pub fn event_future(&self, event: SessionEvent) -> &EventFuture {
        &self.events[event.ordinal()]
    }

    pub fn create_future(&self) -> &EventFuture {
        self.event_future(SessionEvent::Created)
    }

    pub fn open_future(&self) -> &EventFuture {
        self.event_future(SessionEvent::Opened)
    }

    pub fn close_future(&self) -> &EventFuture {
        self.event_future(SessionEvent::Closed)
    }

    pub fn end_future(&self) -> &EventFuture {
        self.event_future(SessionEvent::Ending)
    }

    /// The shared sent-bytes counter.
    pub fn data_future(&self) -> &DataFuture {
        &self.data
    }

    /// A view that completes once the session has sent `expected` bytes in
    /// total.
    ///
    /// **`expected` is absolute**, not the size of a single write. Pass the
    /// cumulative byte count the session will have reached once the write in
    /// question has gone out, e.g. the running total of everything submitted
    /// so far including this write.
    pub fn write_future(&self, expected: u64) -> WriteFuture {
        self.data.write_future(expected)
    }

    /// The recorded first cause, if any.
    pub fn cause(&self) -> Option<Cause> {
        self.cause.get().cloned()
    }

    /// Record a lifecycle transition.
    pub fn event(&self, event: SessionEvent) {
        let future = self.event_future(event);

        match self.cause.get() {
            Some(cause) => {
                if event == SessionEvent::Ending {
                    for pending in [SessionEvent::Opened, SessionEvent::Closed] {
                        self.event_future(pending).failure(cause.clone());
                    }
                }

                if future.failure(cause.clone()) {
                    debug!("session {:?}: {:?} failed: {}", self.session, event, cause);
                }
            }
            None => {
                if event == SessionEvent::Ending && self.data.cancel(false) {
                    debug!(
                        "session {:?}: cancelled writes beyond {} bytes",
                        self.session,
                        self.data.length()
                    );
                }

                if future.success(()) {
                    debug!("session {:?}: {:?}", self.session, event);
                }
            }
        }
    }

    /// Record a data event. Only [DataEvent::Sent] is counted.
    pub fn data_event(&self, event: DataEvent, length: u64) {
        match event {
            DataEvent::Sent => {
                self.data.add(length);
            }
            DataEvent::Received => {}
        }
    }

    /// Record a failure. Only the first cause is kept; returns whether this
    /// call recorded it.
    pub fn exception(&self, cause: Cause) -> bool {
        if self.cause.set(cause.clone()).is_err() {
            warn!(
                "session {:?}: discarding later failure: {}",
                self.session, cause
            );
            return false;
        }

        debug!("session {:?}: failure recorded: {}", self.session, cause);
        self.data.failure(cause);
        true
    }
}
