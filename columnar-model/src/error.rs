use gpu_memory_manager::MemoryError;
use std::time::Duration;
use thiserror::Error;

/// Error taxonomy shared by every layer of the engine.
///
/// Classification:
/// - [`EngineError::TypeMismatch`]: a resolved type contract was violated; a
///   programming error, never retried
/// - [`EngineError::ArithmeticOverflow`], [`EngineError::DivideByZero`],
///   [`EngineError::DecimalPrecisionOverflow`]: data-dependent, raised only
///   in strict mode (permissive mode produces null instead)
/// - [`EngineError::OutOfMemory`]: raised after spill and retry were
///   exhausted; retryable at a higher level
/// - [`EngineError::DeviceFault`]: accelerator failure, fatal to the task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// No kernel and no host fallback exists for an operator/type combination.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("decimal precision overflow: {0}")]
    DecimalPrecisionOverflow(String),

    #[error("out of device memory: requested {requested} bytes, {available} of {budget} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
        budget: usize,
    },

    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Failure reported by an external batch source (file, network, ...).
    #[error("source error: {0}")]
    Source(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Fatal errors abort the current task and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::TypeMismatch(_) | EngineError::DeviceFault(_) | EngineError::Internal(_)
        )
    }

    /// Whether the caller may retry the whole task, e.g. with a smaller batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::OutOfMemory { .. })
    }

    /// Errors whose occurrence depends on the data rather than the plan.
    pub fn is_data_dependent(&self) -> bool {
        matches!(
            self,
            EngineError::ArithmeticOverflow(_)
                | EngineError::DivideByZero
                | EngineError::DecimalPrecisionOverflow(_)
        )
    }
}

impl From<MemoryError> for EngineError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::OutOfMemory {
                requested,
                available,
                budget,
            } => EngineError::OutOfMemory {
                requested,
                available,
                budget,
            },
            MemoryError::DeviceFault(msg) => EngineError::DeviceFault(msg),
            MemoryError::InvalidRequest(msg) => EngineError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_errors_map_one_to_one() {
        let oom: EngineError = MemoryError::OutOfMemory {
            requested: 10,
            available: 2,
            budget: 8,
        }
        .into();
        assert!(oom.is_retryable());
        assert!(!oom.is_fatal());

        let fault: EngineError = MemoryError::DeviceFault("launch failed".into()).into();
        assert_eq!(fault, EngineError::DeviceFault("launch failed".into()));
        assert!(fault.is_fatal());
    }

    #[test]
    fn classification() {
        assert!(EngineError::TypeMismatch("x".into()).is_fatal());
        assert!(EngineError::DivideByZero.is_data_dependent());
        assert!(!EngineError::UnsupportedOperation("x".into()).is_retryable());
    }
}
