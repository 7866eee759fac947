//! Cooperative cancellation for page loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PdfDeskError, Result};

/// Shared flag checked between page iterations.
///
/// Clones observe the same flag, so a caller can hand one clone to a worker
/// and keep another to abort it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Cancelled` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PdfDeskError::Cancelled)
        } else {
            Ok(())
        }
    }
}
