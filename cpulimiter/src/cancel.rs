//! The single cooperative cancellation edge the controller loop watches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A write-once, clone-able cancellation flag.
///
/// Cheap to clone and share with a signal-handling thread: the handler only
/// ever calls [`CancelToken::cancel`], the controller loop only ever calls
/// [`CancelToken::is_cancelled`]. No other synchronization is required.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Raises the cancellation edge. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
