//! Columnar value model for the GPU columnar engine.
//!
//! Logical types, validity bitmaps, host- or device-backed columns, scalars
//! with a cached dual representation, batches, decimal and calendar helpers,
//! and the cast resolver.

pub mod batch;
pub mod bitmap;
pub mod cast;
pub mod column;
pub mod datum;
pub mod decimal;
pub mod error;
pub mod options;
pub mod scalar;
pub mod source;
pub mod temporal;
pub mod types;
pub mod value;

pub use batch::Batch;
pub use bitmap::{combine_validity, Bitmap};
pub use cast::{
    can_cast, common_supertype, resolve_cast, CastFusion, CastOptions, CastPlan, OverflowPolicy,
    RoundingPolicy,
};
pub use column::{Column, ColumnData, ColumnRef, FixedStorage, NativeType};
pub use datum::Datum;
pub use error::{EngineError, Result};
pub use options::{DecimalOverflowPolicy, NumericOptions};
pub use scalar::Scalar;
pub use source::{BatchSource, MemorySource};
pub use types::{Field, LogicalType, Schema, SchemaRef, TypeClass};
pub use value::ScalarValue;
