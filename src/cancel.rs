use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CompressError, Result};

/// Cooperative cancellation flag shared between a session and the executor
/// it is driving. Executors poll it at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once `cancel` has been called on any clone.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CompressError::Cancelled)
        } else {
            Ok(())
        }
    }
}
