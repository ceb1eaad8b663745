//! Futures that are created already complete.
use std::time::Duration;

use super::{state::Completion, FutureState, SessionFuture};
use crate::error::{Cause, FutureError};

/// A future that is terminal from birth; waiting on it never blocks.
pub struct ImmediateFuture<V> {
    completion: Completion<V>,
    session: Option<u64>,
}

impl<V> ImmediateFuture<V> {
    pub fn succeeded(value: V, session: Option<u64>) -> Self {
        let completion = Completion::new();
        completion.succeed(value);
        Self {
            completion,
            session,
        }
    }

    pub fn failed(cause: Cause, session: Option<u64>) -> Self {
        let completion = Completion::new();
        completion.fail(cause);
        Self {
            completion,
            session,
        }
    }

    pub fn cancelled(session: Option<u64>) -> Self {
        let completion = Completion::new();
        completion.cancel();
        Self {
            completion,
            session,
        }
    }

    pub fn session(&self) -> Option<u64> {
        self.session
    }
}

impl<V: Clone + Send + Sync> SessionFuture<V> for ImmediateFuture<V> {
    fn state(&self) -> FutureState {
        self.completion.state()
    }

    fn cause(&self) -> Option<Cause> {
        self.completion.cause()
    }

    fn get_now(&self) -> Option<V> {
        self.completion.value().cloned()
    }

    fn cancel(&self, _may_interrupt: bool) -> bool {
        false
    }

    fn wait_for(&self, _timeout: Option<Duration>, _interruptible: bool) -> Result<bool, FutureError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::ImmediateFuture;
    use crate::{
        error::{cause, EngineError, FutureError},
        futures::SessionFuture,
    };

    #[test]
    fn terminal_from_birth() {
        let ok = ImmediateFuture::succeeded(3u16, None);
        assert!(ok.is_successful());
        assert!(!ok.cancel(true));
        assert_eq!(ok.get().unwrap(), 3);

        let failed = ImmediateFuture::<()>::failed(cause(EngineError::Closed), Some(9));
        assert!(failed.is_failed());
        assert_eq!(failed.session(), Some(9));
        assert!(matches!(failed.sync(), Err(FutureError::Failed(_))));

        let cancelled = ImmediateFuture::<()>::cancelled(None);
        assert!(cancelled.is_cancelled());
        assert!(cancelled.cause().is_none());
        assert!(matches!(cancelled.get(), Err(FutureError::Cancelled)));
    }
}
