//! Arrow and Parquet adapters for the columnar engine.
//!
//! The engine core defines no storage format. This crate turns Arrow
//! `RecordBatch`es and Parquet files into engine [`Batch`]es and back.
//!
//! # Type mapping
//!
//! ```text
//! int8/int16/int32/uint8/uint16 -> int32      float32/float64 -> float64
//! int64/uint32/uint64           -> int64      timestamp(*)    -> timestamp (us)
//! decimal128(p, s>=0)           -> decimal    utf8/large_utf8 -> utf8
//! list / struct / map           -> nested logical types
//! ```
//!
//! [`Batch`]: columnar_model::Batch

pub mod parquet_source;
pub mod record_batch_convert;
pub mod schema_utils;

pub use parquet_source::{read_parquet, write_parquet, ParquetSource};
pub use record_batch_convert::{
    array_to_column, batch_to_record_batch, column_to_array, record_batch_to_batch,
};
pub use schema_utils::{arrow_type_from_logical, logical_type_from_arrow, schema_to_arrow, SchemaExt};
