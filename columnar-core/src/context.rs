//! Per-pipeline task state: resolved options, cancellation and deadline.

use columnar_model::{EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::config::ExecutionOptions;

/// Cooperative cancellation flag shared between a pipeline and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    options: ExecutionOptions,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    /// The timeout, if any, starts counting now.
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            options,
            cancellation: CancellationToken::new(),
            deadline: options.timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Batch-boundary check. In-flight kernels are never interrupted; the
    /// pipeline stops at the next call instead.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            warn!("Pipeline cancelled at batch boundary");
            return Err(EngineError::Cancelled);
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.options.timeout) {
            if Instant::now() >= deadline {
                warn!("Pipeline exceeded its {:?} timeout", timeout);
                return Err(EngineError::Timeout(timeout));
            }
        }
        Ok(())
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancellation_is_observed() {
        let ctx = TaskContext::default();
        assert!(ctx.checkpoint().is_ok());
        let token = ctx.cancellation().clone();
        token.cancel();
        assert_eq!(ctx.checkpoint(), Err(EngineError::Cancelled));
    }

    #[test]
    fn expired_deadline_times_out() {
        let ctx = TaskContext::new(ExecutionOptions {
            timeout: Some(Duration::ZERO),
            ..ExecutionOptions::default()
        });
        assert_eq!(ctx.checkpoint(), Err(EngineError::Timeout(Duration::ZERO)));
    }
}
