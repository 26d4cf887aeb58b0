//! Vectorized columnar kernels for the GPU columnar engine.
//!
//! Kernels are plain functions over [`Column`]s, registered in a
//! [`KernelRegistry`] keyed by operator kind and operand type classes. The
//! [`DeviceLauncher`] runs them against device-resident inputs, and
//! [`Program`] evaluates the fusable expression subset in a single pass.
//!
//! [`Column`]: columnar_model::Column

pub mod aggregate;
pub mod arithmetic;
pub mod cast;
pub mod codegen;
pub mod compare;
pub mod filter;
pub mod kernel_io;
pub mod launch;
pub mod logical;
pub mod registry;
pub mod sort;
pub mod window;

pub use aggregate::{aggregate, Accumulator, AggFunc};
pub use arithmetic::ArithOp;
pub use codegen::{Instr, Program};
pub use compare::CmpOp;
pub use filter::{filter, filter_batch, selection_indices};
pub use launch::{compute_launch_params, DeviceLauncher};
pub use registry::{KernelArgs, KernelEntry, KernelImpl, KernelKey, KernelRegistry, OpKind};
pub use sort::{sort_batch, sort_indices, SortOptions};
pub use window::{evaluate_window, WindowArgs, WindowFunc};
