//! Cooperative cancellation shared between a caller and a running operation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Cloneable cancellation token.
///
/// The caller keeps one clone and calls [`TaskControl::cancel`]; the worker
/// polls [`TaskControl::ensure_not_cancelled`] at its checkpoints.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    cancel_requested: Arc<AtomicBool>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation before reusing the token
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
    }

    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_visible_through_clones() {
        let control = TaskControl::new();
        let worker = control.clone();
        assert!(worker.ensure_not_cancelled().is_ok());

        control.cancel();
        assert!(worker.is_cancelled());
        assert!(matches!(
            worker.ensure_not_cancelled(),
            Err(EngineError::Cancelled)
        ));

        control.reset();
        assert!(!worker.is_cancelled());
    }
}
