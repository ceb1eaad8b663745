//! Sessions and their futures.
//!
//! A session is one connection driven by a protocol [Engine](crate::engine::Engine)
//! on a [SelectorLoop](crate::reactor::SelectorLoop). Its progress is exposed
//! through [SessionFutures]: one future per [SessionEvent] and a threshold
//! future per write.
pub use driver::{Session, Transport};
pub use futures::SessionFutures;

mod driver;
mod futures;

/// Lifecycle transitions of a session, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Created,
    Opened,
    Closed,
    Ending,
}

impl SessionEvent {
    pub const COUNT: usize = 4;

    pub const ALL: [SessionEvent; SessionEvent::COUNT] = [
        SessionEvent::Created,
        SessionEvent::Opened,
        SessionEvent::Closed,
        SessionEvent::Ending,
    ];

    /// Stable index of this event.
    pub fn ordinal(self) -> usize {
        self as usize
    }
}

/// Data movement reported for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataEvent {
    /// Application bytes handed to the network.
    Sent,
    /// Application bytes received; not counted.
    Received,
}
