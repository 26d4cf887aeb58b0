//! Conversion between Arrow `RecordBatch` and engine [`Batch`]es.

use anyhow::{bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Decimal128Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{
    Array, ArrayRef, ArrowPrimitiveType, BinaryArray, BooleanArray, Date32Array,
    Decimal128Array, Float64Array, Int32Array, Int64Array, ListArray, MapArray, RecordBatch,
    RecordBatchOptions, StringArray, StructArray, TimestampMicrosecondArray,
};
use arrow_buffer::{Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_schema::{DataType, TimeUnit};
use columnar_model::{Batch, Bitmap, Column, ColumnData, LogicalType, NativeType, Schema};
use std::sync::Arc;

use crate::schema_utils::{
    field_to_arrow, fields_to_arrow, logical_type_from_arrow, map_entries_field, schema_to_arrow,
    SchemaExt,
};

// ---------------------------------------------------------------------------
// Arrow → Batch
// ---------------------------------------------------------------------------

/// Convert an Arrow `RecordBatch` into a host-resident [`Batch`].
///
/// Narrow integer and float types are widened; timestamps are normalized to
/// microseconds. Null bitmaps are carried over unchanged.
pub fn record_batch_to_batch(batch: &RecordBatch) -> Result<Batch> {
    let schema = Arc::new(batch.schema().to_logical()?);
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (field, col) in batch.schema().fields().iter().zip(batch.columns()) {
        let column = array_to_column(col.as_ref())
            .with_context(|| format!("Converting column '{}'", field.name()))?;
        columns.push(Arc::new(column));
    }

    if columns.is_empty() {
        return Ok(Batch::empty_with_rows(batch.num_rows()));
    }
    Ok(Batch::try_new(schema, columns)?)
}

fn validity_of(array: &dyn Array) -> Option<Bitmap> {
    array.nulls().map(|n| Bitmap::from_bools(n.iter()))
}

fn primitive<T, N>(array: &dyn Array, data_type: LogicalType, f: impl Fn(T::Native) -> N) -> Result<Column>
where
    T: ArrowPrimitiveType,
    N: NativeType + Default,
{
    let values: Vec<N> = array
        .as_primitive::<T>()
        .iter()
        .map(|v| v.map(&f).unwrap_or_default())
        .collect();
    Ok(Column::from_native_parts(data_type, &values, validity_of(array))?)
}

fn timestamps<T: ArrowPrimitiveType<Native = i64>>(array: &dyn Array, to_micros: impl Fn(i64) -> Option<i64>) -> Result<Column> {
    let values = array
        .as_primitive::<T>()
        .iter()
        .map(|v| match v {
            Some(v) => to_micros(v).context("Timestamp out of microsecond range"),
            None => Ok(0),
        })
        .collect::<Result<Vec<i64>>>()?;
    Ok(Column::from_native_parts(
        LogicalType::Timestamp,
        &values,
        validity_of(array),
    )?)
}

/// Rebase offsets onto a zero-based slice of the child array.
fn rebase(offsets: &[i32], child: &ArrayRef) -> Result<(Vec<i32>, Column)> {
    let base = offsets.first().copied().unwrap_or(0);
    let end = offsets.last().copied().unwrap_or(0);
    let child = array_to_column(child.slice(base as usize, (end - base) as usize).as_ref())?;
    Ok((offsets.iter().map(|o| o - base).collect(), child))
}

/// Convert one Arrow array into a host column.
pub fn array_to_column(array: &dyn Array) -> Result<Column> {
    let data_type = logical_type_from_arrow(array.data_type())?;
    let len = array.len();

    let column = match array.data_type() {
        DataType::Boolean => primitive_bool(array)?,
        DataType::Int8 => primitive::<Int8Type, i32>(array, data_type, |x| x as i32)?,
        DataType::Int16 => primitive::<Int16Type, i32>(array, data_type, |x| x as i32)?,
        DataType::Int32 => primitive::<Int32Type, i32>(array, data_type, |x| x)?,
        DataType::UInt8 => primitive::<UInt8Type, i32>(array, data_type, |x| x as i32)?,
        DataType::UInt16 => primitive::<UInt16Type, i32>(array, data_type, |x| x as i32)?,
        DataType::Int64 => primitive::<Int64Type, i64>(array, data_type, |x| x)?,
        DataType::UInt32 => primitive::<UInt32Type, i64>(array, data_type, |x| x as i64)?,
        DataType::UInt64 => {
            let a = array.as_primitive::<UInt64Type>();
            if let Some(v) = a.iter().flatten().find(|v| *v > i64::MAX as u64) {
                bail!("UInt64 value {} does not fit int64", v);
            }
            primitive::<UInt64Type, i64>(array, data_type, |x| x as i64)?
        }
        DataType::Float32 => primitive::<Float32Type, f64>(array, data_type, |x| x as f64)?,
        DataType::Float64 => primitive::<Float64Type, f64>(array, data_type, |x| x)?,
        DataType::Decimal128(_, _) => primitive::<Decimal128Type, i128>(array, data_type, |x| x)?,
        DataType::Date32 => primitive::<Date32Type, i32>(array, data_type, |x| x)?,
        DataType::Timestamp(unit, _) => match unit {
            TimeUnit::Second => timestamps::<TimestampSecondType>(array, |v| v.checked_mul(1_000_000))?,
            TimeUnit::Millisecond => {
                timestamps::<TimestampMillisecondType>(array, |v| v.checked_mul(1_000))?
            }
            TimeUnit::Microsecond => timestamps::<TimestampMicrosecondType>(array, Some)?,
            TimeUnit::Nanosecond => {
                timestamps::<TimestampNanosecondType>(array, |v| Some(v.div_euclid(1_000)))?
            }
        },
        DataType::Utf8 => Column::try_utf8(array.as_string::<i32>().iter().collect())?,
        DataType::LargeUtf8 => Column::try_utf8(array.as_string::<i64>().iter().collect())
            .context("LargeUtf8 column exceeds the 2 GiB offset range")?,
        DataType::Binary => Column::try_binary(array.as_binary::<i32>().iter().collect())?,
        DataType::LargeBinary => Column::try_binary(array.as_binary::<i64>().iter().collect())
            .context("LargeBinary column exceeds the 2 GiB offset range")?,
        DataType::List(_) => {
            let list = array.as_list::<i32>();
            let (offsets, child) = rebase(list.value_offsets(), list.values())?;
            Column::try_new(
                data_type,
                len,
                validity_of(array),
                ColumnData::List {
                    offsets,
                    child: Arc::new(child),
                },
            )?
        }
        DataType::Map(_, _) => {
            let map = array.as_map();
            let entries = map.entries();
            let (offsets, keys) = rebase(map.value_offsets(), entries.column(0))?;
            let (_, values) = rebase(map.value_offsets(), entries.column(1))?;
            let entry_type = match &data_type {
                LogicalType::Map { key, value } => LogicalType::map_entries(key, value),
                other => bail!("Expected map type, got {}", other),
            };
            let entry_rows = keys.len();
            let entries = Column::try_new(
                entry_type,
                entry_rows,
                None,
                ColumnData::Struct {
                    children: vec![Arc::new(keys), Arc::new(values)],
                },
            )?;
            Column::try_new(
                data_type,
                len,
                validity_of(array),
                ColumnData::List {
                    offsets,
                    child: Arc::new(entries),
                },
            )?
        }
        DataType::Struct(_) => {
            let children = array
                .as_struct()
                .columns()
                .iter()
                .map(|c| array_to_column(c.as_ref()).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            Column::try_new(
                data_type,
                len,
                validity_of(array),
                ColumnData::Struct { children },
            )?
        }
        other => bail!("Unsupported column type for conversion: {:?}", other),
    };
    Ok(column)
}

fn primitive_bool(array: &dyn Array) -> Result<Column> {
    let values: Vec<bool> = array
        .as_boolean()
        .iter()
        .map(|v| v.unwrap_or_default())
        .collect();
    Ok(Column::from_native_parts(
        LogicalType::Boolean,
        &values,
        validity_of(array),
    )?)
}

// ---------------------------------------------------------------------------
// Batch → Arrow
// ---------------------------------------------------------------------------

/// Build an Arrow `RecordBatch` from a batch. Device-resident columns are
/// downloaded first.
pub fn batch_to_record_batch(batch: &Batch) -> Result<RecordBatch> {
    let host = batch.to_host()?;
    let schema = Arc::new(schema_to_arrow(host.schema()));
    let columns = host
        .columns()
        .iter()
        .map(|c| column_to_array(c))
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::try_new_with_options(
        schema,
        columns,
        &RecordBatchOptions::new().with_row_count(Some(host.num_rows())),
    )
    .context("Building RecordBatch from columns")
}

fn offsets_buffer(offsets: &[i32]) -> OffsetBuffer<i32> {
    OffsetBuffer::new(ScalarBuffer::from(offsets.to_vec()))
}

/// Convert one host column into an Arrow array.
pub fn column_to_array(column: &Column) -> Result<ArrayRef> {
    let nulls = column
        .validity()
        .map(|v| NullBuffer::from(v.iter().collect::<Vec<bool>>()));

    let array: ArrayRef = match (column.data_type(), column.data()) {
        (LogicalType::Boolean, _) => {
            let values = column.native_values::<bool>()?;
            Arc::new(BooleanArray::from(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| column.is_valid(i).then_some(v))
                    .collect::<Vec<_>>(),
            ))
        }
        (LogicalType::Int32, _) => Arc::new(Int32Array::new(
            ScalarBuffer::from(column.native_values::<i32>()?),
            nulls,
        )),
        (LogicalType::Int64, _) => Arc::new(Int64Array::new(
            ScalarBuffer::from(column.native_values::<i64>()?),
            nulls,
        )),
        (LogicalType::Float64, _) => Arc::new(Float64Array::new(
            ScalarBuffer::from(column.native_values::<f64>()?),
            nulls,
        )),
        (LogicalType::Date32, _) => Arc::new(Date32Array::new(
            ScalarBuffer::from(column.native_values::<i32>()?),
            nulls,
        )),
        (LogicalType::Timestamp, _) => Arc::new(TimestampMicrosecondArray::new(
            ScalarBuffer::from(column.native_values::<i64>()?),
            nulls,
        )),
        (LogicalType::Decimal { precision, scale }, _) => Arc::new(
            Decimal128Array::new(ScalarBuffer::from(column.native_values::<i128>()?), nulls)
                .with_precision_and_scale(*precision, *scale as i8)?,
        ),
        (LogicalType::Utf8, ColumnData::Varlen { offsets, values }) => Arc::new(
            StringArray::try_new(offsets_buffer(offsets), Buffer::from_vec(values.clone()), nulls)?,
        ),
        (LogicalType::Binary, ColumnData::Varlen { offsets, values }) => Arc::new(
            BinaryArray::try_new(offsets_buffer(offsets), Buffer::from_vec(values.clone()), nulls)?,
        ),
        (LogicalType::List(item), ColumnData::List { offsets, child }) => Arc::new(ListArray::try_new(
            Arc::new(field_to_arrow(item)),
            offsets_buffer(offsets),
            column_to_array(child)?,
            nulls,
        )?),
        (LogicalType::Map { key, value }, ColumnData::List { offsets, child }) => {
            let entries = column_to_array(child)?;
            Arc::new(MapArray::try_new(
                Arc::new(map_entries_field(key, value)),
                offsets_buffer(offsets),
                entries.as_struct().clone(),
                nulls,
                false,
            )?)
        }
        (LogicalType::Struct(fields), ColumnData::Struct { children }) => {
            let arrays = children
                .iter()
                .map(|c| column_to_array(c))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(StructArray::try_new(fields_to_arrow(fields), arrays, nulls)?)
        }
        (t, _) => bail!("Column of {} has an unexpected layout", t),
    };
    Ok(array)
}

/// Logical schema of a converted record batch.
pub fn logical_schema(batch: &RecordBatch) -> Result<Schema> {
    batch.schema().to_logical()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float32Array, Int16Array};
    use arrow_schema::{Field, Schema as ArrowSchema};
    use columnar_model::ScalarValue;

    fn make_batch() -> RecordBatch {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("a", DataType::Int16, true),
            Field::new("b", DataType::Float32, false),
            Field::new("s", DataType::Utf8, true),
        ]));
        let a = Arc::new(Int16Array::from(vec![Some(1), None, Some(3)]));
        let b = Arc::new(Float32Array::from(vec![1.5, 2.5, 3.5]));
        let s = Arc::new(StringArray::from(vec![Some("x"), Some("yy"), None]));
        RecordBatch::try_new(schema, vec![a, b, s]).unwrap()
    }

    #[test]
    fn narrow_types_widen() {
        let batch = record_batch_to_batch(&make_batch()).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.column(0).unwrap().data_type(), &LogicalType::Int32);
        assert_eq!(batch.column(1).unwrap().data_type(), &LogicalType::Float64);
        assert_eq!(batch.column(0).unwrap().value(1).unwrap(), ScalarValue::Null);
        assert_eq!(batch.column(2).unwrap().value(1).unwrap(), ScalarValue::Utf8("yy".into()));
    }

    #[test]
    fn round_trip_preserves_values() {
        let batch = record_batch_to_batch(&make_batch()).unwrap();
        let arrow = batch_to_record_batch(&batch).unwrap();
        assert_eq!(arrow.schema().field(0).data_type(), &DataType::Int32);
        let back = record_batch_to_batch(&arrow).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn nested_round_trip() {
        let list_type = LogicalType::list(LogicalType::Int64);
        let map_type = LogicalType::Map {
            key: Box::new(LogicalType::Utf8),
            value: Box::new(LogicalType::Int64),
        };
        let entry = |k: &str, v: i64| ScalarValue::Struct(vec![k.into(), v.into()]);
        let batch = Batch::from_columns([
            (
                "l",
                Column::from_scalars(
                    list_type,
                    &[
                        ScalarValue::List(vec![1i64.into(), ScalarValue::Null]),
                        ScalarValue::Null,
                        ScalarValue::List(vec![]),
                    ],
                )
                .unwrap(),
            ),
            (
                "m",
                Column::from_scalars(
                    map_type,
                    &[
                        ScalarValue::List(vec![entry("a", 1)]),
                        ScalarValue::List(vec![entry("b", 2), entry("c", 3)]),
                        ScalarValue::Null,
                    ],
                )
                .unwrap(),
            ),
        ])
        .unwrap();
        let arrow = batch_to_record_batch(&batch).unwrap();
        let back = record_batch_to_batch(&arrow).unwrap();
        assert_eq!(back, batch);

        // Sliced arrow arrays rebase their offsets.
        let sliced = record_batch_to_batch(&arrow.slice(1, 2)).unwrap();
        assert_eq!(sliced, batch.slice(1, 2).unwrap());
    }

    #[test]
    fn decimals_and_timestamps() {
        let batch = Batch::from_columns([
            ("d", Column::decimal(10, 2, vec![Some(1235), None]).unwrap()),
            ("t", Column::timestamp(vec![Some(1_500_000), Some(-1)])),
        ])
        .unwrap();
        let arrow = batch_to_record_batch(&batch).unwrap();
        assert_eq!(arrow.schema().field(0).data_type(), &DataType::Decimal128(10, 2));
        assert_eq!(record_batch_to_batch(&arrow).unwrap(), batch);
    }
}
