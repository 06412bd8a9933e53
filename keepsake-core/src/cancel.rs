//! Request cancellation handle

use crate::{KeepsakeError, KeepsakeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A clone-able cancellation handle shared by a request and its workers.
///
/// Every suspension point in the search core (index calls, channel sends,
/// queue waits) observes the handle and returns promptly once it fires.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the handle. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the handle has fired, for use with `?` at
    /// suspension points.
    pub fn err_if_cancelled(&self) -> KeepsakeResult<()> {
        if self.is_cancelled() {
            Err(KeepsakeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_across_clones() {
        let cancel = Cancel::new();
        let worker_view = cancel.clone();
        assert!(worker_view.err_if_cancelled().is_ok());
        cancel.cancel();
        assert!(worker_view.is_cancelled());
        assert!(matches!(
            worker_view.err_if_cancelled(),
            Err(KeepsakeError::Cancelled)
        ));
    }
}
