//! Device memory management for the columnar engine.
//!
//! The pool reserves large arenas from a [`DeviceBackend`] and sub-divides
//! them into fixed size classes. Column data lives in [`DeviceBuffer`]s,
//! which the pool may spill to host memory under pressure and transparently
//! copy back in on the next access.

pub mod buffer;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod device;
pub mod error;
pub mod pool;
pub mod slab_allocator;
pub mod transfer_queue;

pub use buffer::{DeviceBuffer, PinGuard};
#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;
pub use device::{ArenaId, DeviceBackend, SimulatedDevice};
pub use error::{MemoryError, Result};
pub use pool::{DeviceBlock, DevicePool, PoolConfig, PoolStats, Spillable};
pub use slab_allocator::SlabAllocator;
pub use transfer_queue::{TransferDirection, TransferQueue};
