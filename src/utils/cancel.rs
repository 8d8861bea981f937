use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::AnalysisError;

/// Shared cancellation flag with an optional deadline
///
/// Cloning shares the flag, so one handle can cancel work running on the
/// training pool.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that trips once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Error out if the token has tripped; `stage` names where work stopped
    pub fn check(&self, stage: &str) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            return Err(AnalysisError::Cancelled(format!("stopped during {}", stage)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check("fold 1").is_ok());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let worker = token.clone();
        token.cancel();
        assert!(worker.is_cancelled());
        assert!(matches!(worker.check("fold 2"), Err(AnalysisError::Cancelled(_))));
    }

    #[test]
    fn test_zero_timeout_trips_immediately() {
        let token = CancellationToken::with_timeout(Duration::from_secs(0));
        assert!(token.is_cancelled());
    }
}
