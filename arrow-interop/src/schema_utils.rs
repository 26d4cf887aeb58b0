use anyhow::{bail, Result};
use arrow_schema::{DataType, Field as ArrowField, Fields, Schema as ArrowSchema, TimeUnit};
use columnar_model::{Field, LogicalType, Schema};
use std::sync::Arc;

/// Map an Arrow type onto the engine's logical types. Narrow integers widen
/// to `int32`, `float32` widens to `float64`, every timestamp unit becomes
/// microseconds.
pub fn logical_type_from_arrow(data_type: &DataType) -> Result<LogicalType> {
    Ok(match data_type {
        DataType::Boolean => LogicalType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
            LogicalType::Int32
        }
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => LogicalType::Int64,
        DataType::Float32 | DataType::Float64 => LogicalType::Float64,
        DataType::Decimal128(p, s) => {
            if *s < 0 {
                bail!("Negative decimal scale {} is not supported", s);
            }
            LogicalType::decimal(*p, *s as u8)?
        }
        DataType::Date32 => LogicalType::Date32,
        DataType::Timestamp(_, _) => LogicalType::Timestamp,
        DataType::Utf8 | DataType::LargeUtf8 => LogicalType::Utf8,
        DataType::Binary | DataType::LargeBinary => LogicalType::Binary,
        DataType::List(item) => LogicalType::List(Box::new(field_from_arrow(item)?)),
        DataType::Struct(fields) => LogicalType::Struct(
            fields
                .iter()
                .map(|f| field_from_arrow(f))
                .collect::<Result<Vec<_>>>()?,
        ),
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => LogicalType::Map {
                key: Box::new(logical_type_from_arrow(kv[0].data_type())?),
                value: Box::new(logical_type_from_arrow(kv[1].data_type())?),
            },
            other => bail!("Malformed map entries type {:?}", other),
        },
        other => bail!("Unsupported Arrow type {:?}", other),
    })
}

/// Canonical Arrow type for a logical type.
pub fn arrow_type_from_logical(data_type: &LogicalType) -> DataType {
    match data_type {
        LogicalType::Boolean => DataType::Boolean,
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale as i8),
        LogicalType::Date32 => DataType::Date32,
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        LogicalType::Utf8 => DataType::Utf8,
        LogicalType::Binary => DataType::Binary,
        LogicalType::List(item) => DataType::List(Arc::new(field_to_arrow(item))),
        LogicalType::Struct(fields) => DataType::Struct(fields_to_arrow(fields)),
        LogicalType::Map { key, value } => {
            DataType::Map(Arc::new(map_entries_field(key, value)), false)
        }
    }
}

pub(crate) fn map_entries_field(key: &LogicalType, value: &LogicalType) -> ArrowField {
    ArrowField::new(
        "entries",
        DataType::Struct(Fields::from(vec![
            ArrowField::new("key", arrow_type_from_logical(key), false),
            ArrowField::new("value", arrow_type_from_logical(value), true),
        ])),
        false,
    )
}

pub fn field_from_arrow(field: &ArrowField) -> Result<Field> {
    Ok(Field::new(
        field.name().clone(),
        logical_type_from_arrow(field.data_type())?,
        field.is_nullable(),
    ))
}

pub fn field_to_arrow(field: &Field) -> ArrowField {
    ArrowField::new(
        field.name.clone(),
        arrow_type_from_logical(&field.data_type),
        field.nullable,
    )
}

pub(crate) fn fields_to_arrow(fields: &[Field]) -> Fields {
    Fields::from(fields.iter().map(field_to_arrow).collect::<Vec<_>>())
}

pub fn schema_to_arrow(schema: &Schema) -> ArrowSchema {
    ArrowSchema::new(fields_to_arrow(schema.fields()))
}

pub trait SchemaExt {
    fn to_logical(&self) -> Result<Schema>;
    fn project_by_name(&self, names: &[&str]) -> Result<ArrowSchema>;
    fn row_byte_width(&self) -> usize;
    /// Every column is fixed-width and can live in device memory.
    fn is_device_compatible(&self) -> bool;
}

impl SchemaExt for ArrowSchema {
    fn to_logical(&self) -> Result<Schema> {
        let fields = self
            .fields()
            .iter()
            .map(|f| field_from_arrow(f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }

    fn project_by_name(&self, names: &[&str]) -> Result<ArrowSchema> {
        let fields = names
            .iter()
            .map(|n| {
                self.field_with_name(n)
                    .map(|f| f.clone())
                    .map_err(|_| anyhow::anyhow!("Column '{}' not found", n))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ArrowSchema::new(fields))
    }

    fn row_byte_width(&self) -> usize {
        self.fields()
            .iter()
            .map(|f| {
                logical_type_from_arrow(f.data_type())
                    .ok()
                    .and_then(|t| t.byte_width())
                    .unwrap_or(8)
            })
            .sum()
    }

    fn is_device_compatible(&self) -> bool {
        self.fields().iter().all(|f| {
            logical_type_from_arrow(f.data_type()).is_ok_and(|t| t.is_fixed_width())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_by_name() {
        let schema = ArrowSchema::new(vec![
            ArrowField::new("a", DataType::Int64, false),
            ArrowField::new("b", DataType::Float64, false),
        ]);
        let proj = schema.project_by_name(&["a"]).unwrap();
        assert_eq!(proj.fields().len(), 1);
        assert!(schema.project_by_name(&["zz"]).is_err());
    }

    #[test]
    fn test_row_byte_width() {
        let schema = ArrowSchema::new(vec![
            ArrowField::new("a", DataType::Int64, false),   // 8
            ArrowField::new("b", DataType::Float32, false), // widened to 8
            ArrowField::new("c", DataType::Date32, false),  // 4
        ]);
        assert_eq!(schema.row_byte_width(), 20);
        assert!(schema.is_device_compatible());
    }

    #[test]
    fn nested_types_round_trip() {
        let t = LogicalType::Map {
            key: Box::new(LogicalType::Utf8),
            value: Box::new(LogicalType::list(LogicalType::decimal(12, 3).unwrap())),
        };
        let arrow = arrow_type_from_logical(&t);
        assert_eq!(logical_type_from_arrow(&arrow).unwrap(), t);

        let schema = ArrowSchema::new(vec![ArrowField::new("m", arrow, true)]);
        assert!(!schema.is_device_compatible());
        assert_eq!(schema.to_logical().unwrap().fields()[0].data_type, t);
    }

    #[test]
    fn widening_and_unsupported() {
        assert_eq!(logical_type_from_arrow(&DataType::UInt16).unwrap(), LogicalType::Int32);
        assert_eq!(
            logical_type_from_arrow(&DataType::Timestamp(TimeUnit::Second, None)).unwrap(),
            LogicalType::Timestamp
        );
        assert!(logical_type_from_arrow(&DataType::Float16).is_err());
        assert!(logical_type_from_arrow(&DataType::Decimal128(5, -1)).is_err());
    }
}
