//! Cooperative cancellation for the staged pipelines.
//!
//! The recognition pipeline checks the token between stages (A..J in
//! dependency order); cancellation inside a stage is best-effort. The
//! token also carries an optional wall-clock deadline so a stuck photo
//! cannot hold the caller forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ScanError;

/// Shared cancellation handle. Clone freely; all clones observe the
/// same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A token that fires once `timeout` has elapsed, in addition to
    /// explicit cancellation.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A view of this token that additionally expires after `timeout`.
    /// Shares the cancellation flag; the tighter deadline wins.
    pub fn limited(&self, timeout: Duration) -> Self {
        let limit = Instant::now() + timeout;
        Self {
            cancelled: self.cancelled.clone(),
            deadline: Some(self.deadline.map_or(limit, |d| d.min(limit))),
        }
    }

    /// Request cancellation. Takes effect at the next stage boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Stage-boundary check: returns `Cancelled` naming the stage that
    /// was about to run.
    pub fn checkpoint(&self, stage: &'static str) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled(stage))
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_passes_until_cancelled() {
        let token = CancelToken::new();
        assert!(token.checkpoint("staves").is_ok());
        token.cancel();
        assert!(matches!(
            token.checkpoint("noteheads"),
            Err(ScanError::Cancelled("noteheads"))
        ));
    }

    #[test]
    fn expired_deadline_cancels() {
        let token = CancelToken::with_timeout(Duration::from_secs(0));
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
