use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts transport failures. Once `max_errors` is reached the processor
/// reports itself unhealthy and intake stops. Zero disables the limit.
#[derive(Debug)]
pub struct StopPolicy {
    max_errors: usize,
    errors: AtomicUsize,
}

impl StopPolicy {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            errors: AtomicUsize::new(0),
        }
    }

    /// Returns whether the policy is still healthy after this error.
    pub fn record_error(&self, operation: &'static str, err: &anyhow::Error) -> bool {
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            event = "transport.error",
            operation,
            errors,
            max_errors = self.max_errors,
            error = %format!("{err:#}"),
        );
        let healthy = self.is_healthy();
        if !healthy && errors == self.max_errors {
            tracing::error!(
                event = "transport.stopped",
                errors,
                "transport error limit reached, intake stopped"
            );
        }
        healthy
    }

    pub fn reset(&self) {
        self.errors.store(0, Ordering::SeqCst);
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.max_errors == 0 || self.errors() < self.max_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn becomes_unhealthy_at_limit_and_recovers_on_reset() {
        let policy = StopPolicy::new(2);
        let err = anyhow::anyhow!("connection reset");
        assert!(policy.record_error("acknowledge", &err));
        assert!(!policy.record_error("delete", &err));
        assert!(!policy.is_healthy());
        policy.reset();
        assert!(policy.is_healthy());
    }

    #[test]
    fn zero_limit_never_stops() {
        let policy = StopPolicy::new(0);
        let err = anyhow::anyhow!("boom");
        for _ in 0..5 {
            assert!(policy.record_error("reply", &err));
        }
    }
}
