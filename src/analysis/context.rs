// Tue Jan 13 2026 - Alex

use crate::analysis::error::{AnalysisError, AnalysisResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type ProgressCallback = dyn Fn(usize, usize) + Send + Sync;

/// Cancellation token and progress sink handed to long-running passes.
/// Passes call `checkpoint` between per-function work units.
#[derive(Clone, Default)]
pub struct AnalysisContext {
    cancelled: Arc<AtomicBool>,
    progress: Option<Arc<ProgressCallback>>,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancelled = token;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn report(&self, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }

    pub fn checkpoint(&self) -> AnalysisResult<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("cancelled", &self.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_and_cancellation() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let ctx = AnalysisContext::new().with_progress(move |done, _| {
            sink.store(done, Ordering::SeqCst);
        });

        ctx.report(7, 10);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert!(ctx.checkpoint().is_ok());

        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.checkpoint(), Err(AnalysisError::Cancelled)));
    }
}
