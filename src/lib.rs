//! GPU-offloaded columnar expression engine.
//!
//! Facade over the workspace crates: the value model, device memory,
//! kernels, Arrow/Parquet interop and the pipeline core.
//!
//! ```no_run
//! use gpu_columnar_engine::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = ColumnarEngine::new(EngineConfig::default())?;
//! let batch = Batch::from_columns([
//!     ("a", Column::int64(vec![Some(1), Some(2), None])),
//!     ("b", Column::int64(vec![Some(10), Some(20), Some(30)])),
//! ])?;
//! let sum = engine.evaluate(&col("a").add(col("b")), &batch)?;
//! # let _ = sum;
//! # Ok(())
//! # }
//! ```

pub use arrow_interop as interop;
pub use columnar_model as model;
pub use gpu_columnar_core as core;
pub use gpu_kernels as kernels;
pub use gpu_memory_manager as memory;

pub use gpu_columnar_core::{
    collect, collect_batch, execute_partitions, reduce, AggregateMode, AggregateStrategy,
    CancellationToken, ColumnarEngine, EngineConfig, ExecutionOptions, Expr, HostFallbackPolicy,
    PipelineBuilder, TaskContext,
};
pub use columnar_model::{Batch, Column, Datum, EngineError, LogicalType, Scalar, ScalarValue};

pub mod prelude {
    pub use crate::{
        AggregateMode, Batch, Column, ColumnarEngine, Datum, EngineConfig, EngineError, Expr,
        LogicalType, ScalarValue,
    };
    pub use gpu_columnar_core::expr::*;
    pub use gpu_kernels::SortOptions;
}
