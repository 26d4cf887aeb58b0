use thiserror::Error;

/// Failures raised by the device memory layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The request could not be satisfied even after spilling.
    #[error("out of device memory: requested {requested} bytes, {available} of {budget} bytes available")]
    OutOfMemory {
        requested: usize,
        available: usize,
        budget: usize,
    },

    /// The accelerator (or its driver) reported a failure.
    #[error("device fault: {0}")]
    DeviceFault(String),

    /// Out-of-range copy, unknown arena and similar caller bugs.
    #[error("invalid memory request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
