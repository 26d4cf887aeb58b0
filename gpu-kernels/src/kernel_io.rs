//! Shared input/output plumbing for elementwise kernels.
//!
//! Inputs of length 1 broadcast against longer inputs, which is how scalar
//! operands reach kernels. Outputs are placed like the inputs: if any input
//! is device-backed the output stays in device memory.

use columnar_model::{
    Bitmap, Column, EngineError, LogicalType, NativeType, NumericOptions, Result, ScalarValue,
};
use gpu_memory_manager::DevicePool;
use std::sync::Arc;

/// Row count of an elementwise result over `inputs`.
pub fn output_len(inputs: &[&Column]) -> Result<usize> {
    let mut len = None;
    for c in inputs {
        if c.len() == 1 {
            continue;
        }
        match len {
            None => len = Some(c.len()),
            Some(n) if n == c.len() => {}
            Some(n) => {
                return Err(EngineError::InvalidArgument(format!(
                    "kernel inputs have {} and {} rows",
                    n,
                    c.len()
                )))
            }
        }
    }
    Ok(len.unwrap_or(if inputs.is_empty() { 0 } else { 1 }))
}

/// Physical row of a possibly broadcast input.
#[inline]
pub fn row(column: &Column, i: usize) -> usize {
    if column.len() == 1 {
        0
    } else {
        i
    }
}

/// Decoded fixed-width input with broadcast-aware accessors.
pub struct NativeInput<'a, T> {
    column: &'a Column,
    values: Vec<T>,
}

impl<'a, T: NativeType> NativeInput<'a, T> {
    pub fn new(column: &'a Column) -> Result<Self> {
        Ok(Self {
            column,
            values: column.native_values::<T>()?,
        })
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<T> {
        let r = row(self.column, i);
        if self.column.is_valid(r) {
            Some(self.values[r])
        } else {
            None
        }
    }
}

pub fn device_pool(inputs: &[&Column]) -> Option<Arc<DevicePool>> {
    inputs
        .iter()
        .find_map(|c| c.device_buffer().map(|b| Arc::clone(b.pool())))
}

/// Place fixed-width output bytes next to the inputs.
pub fn place_output(
    inputs: &[&Column],
    data_type: LogicalType,
    validity: Option<Bitmap>,
    bytes: Vec<u8>,
) -> Result<Column> {
    match device_pool(inputs) {
        Some(pool) => Column::from_kernel_output(&pool, data_type, validity, &bytes),
        None => {
            let width = data_type.byte_width().unwrap_or(1);
            Column::try_new(
                data_type,
                bytes.len() / width,
                validity,
                columnar_model::ColumnData::Fixed(columnar_model::FixedStorage::Host(bytes)),
            )
        }
    }
}

/// Move a host-built result next to the inputs when it is fixed-width.
pub fn place_column(inputs: &[&Column], column: Column) -> Result<Column> {
    match device_pool(inputs) {
        Some(pool) if column.data_type().is_fixed_width() && !column.is_device_backed() => {
            let bytes = column.fixed_bytes()?.into_owned();
            Column::from_kernel_output(
                &pool,
                column.data_type().clone(),
                column.validity().cloned(),
                &bytes,
            )
        }
        _ => Ok(column),
    }
}

/// Build a column from boxed values and place it next to the inputs.
pub fn place_values(inputs: &[&Column], data_type: LogicalType, values: &[ScalarValue]) -> Result<Column> {
    place_column(inputs, Column::from_scalars(data_type, values)?)
}

/// Collects typed results row by row.
pub struct NativeBuilder<T> {
    values: Vec<T>,
    validity: Bitmap,
}

impl<T: NativeType + Default> NativeBuilder<T> {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            values: Vec::with_capacity(len),
            validity: Bitmap::new_null(0),
        }
    }

    #[inline]
    pub fn push(&mut self, value: Option<T>) {
        self.validity.push(value.is_some());
        self.values.push(value.unwrap_or_default());
    }

    pub fn finish(self, inputs: &[&Column], data_type: LogicalType) -> Result<Column> {
        let bytes = columnar_model::column::encode_natives(&self.values);
        place_output(inputs, data_type, Some(self.validity), bytes)
    }
}

/// Apply the strict/permissive policy to a data-dependent error.
///
/// Division by zero follows `strict_arithmetic` for every type; overflow
/// follows the policy for the result type.
pub fn resolve<T>(options: &NumericOptions, output: &LogicalType, err: EngineError) -> Result<Option<T>> {
    match err {
        EngineError::DivideByZero if options.strict_arithmetic => Err(err),
        EngineError::DivideByZero => Ok(None),
        err if err.is_data_dependent() => options.handle(output, err),
        err => Err(err),
    }
}
