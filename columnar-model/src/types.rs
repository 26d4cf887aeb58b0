//! Logical types and schemas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::decimal::MAX_PRECISION;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    Int32,
    Int64,
    Float64,
    /// Unscaled 128-bit integer with `scale` fractional digits.
    Decimal { precision: u8, scale: u8 },
    /// Days since the Unix epoch.
    Date32,
    /// Microseconds since the Unix epoch.
    Timestamp,
    Utf8,
    Binary,
    List(Box<Field>),
    Struct(Vec<Field>),
    /// Stored as a list of `struct<key, value>` entries.
    Map {
        key: Box<LogicalType>,
        value: Box<LogicalType>,
    },
}

/// Parameter-free type tag used to key kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeClass {
    Boolean,
    Int32,
    Int64,
    Float64,
    Decimal,
    Date32,
    Timestamp,
    Utf8,
    Binary,
    List,
    Struct,
    Map,
}

impl TypeClass {
    pub const ALL: [TypeClass; 12] = [
        TypeClass::Boolean,
        TypeClass::Int32,
        TypeClass::Int64,
        TypeClass::Float64,
        TypeClass::Decimal,
        TypeClass::Date32,
        TypeClass::Timestamp,
        TypeClass::Utf8,
        TypeClass::Binary,
        TypeClass::List,
        TypeClass::Struct,
        TypeClass::Map,
    ];

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeClass::Int32 | TypeClass::Int64 | TypeClass::Float64 | TypeClass::Decimal
        )
    }

    /// A representative concrete type, used when enumerating kernels.
    pub fn example_type(self) -> LogicalType {
        match self {
            TypeClass::Boolean => LogicalType::Boolean,
            TypeClass::Int32 => LogicalType::Int32,
            TypeClass::Int64 => LogicalType::Int64,
            TypeClass::Float64 => LogicalType::Float64,
            TypeClass::Decimal => LogicalType::Decimal {
                precision: 10,
                scale: 2,
            },
            TypeClass::Date32 => LogicalType::Date32,
            TypeClass::Timestamp => LogicalType::Timestamp,
            TypeClass::Utf8 => LogicalType::Utf8,
            TypeClass::Binary => LogicalType::Binary,
            TypeClass::List => LogicalType::List(Box::new(Field::new("item", LogicalType::Int64, true))),
            TypeClass::Struct => {
                LogicalType::Struct(vec![Field::new("f0", LogicalType::Int64, true)])
            }
            TypeClass::Map => LogicalType::Map {
                key: Box::new(LogicalType::Utf8),
                value: Box::new(LogicalType::Int64),
            },
        }
    }
}

impl LogicalType {
    /// Validated decimal constructor.
    pub fn decimal(precision: u8, scale: u8) -> Result<Self> {
        if precision == 0 || precision > MAX_PRECISION || scale > precision {
            return Err(EngineError::InvalidArgument(format!(
                "invalid decimal({}, {})",
                precision, scale
            )));
        }
        Ok(LogicalType::Decimal { precision, scale })
    }

    pub fn list(item: LogicalType) -> Self {
        LogicalType::List(Box::new(Field::new("item", item, true)))
    }

    pub fn class(&self) -> TypeClass {
        match self {
            LogicalType::Boolean => TypeClass::Boolean,
            LogicalType::Int32 => TypeClass::Int32,
            LogicalType::Int64 => TypeClass::Int64,
            LogicalType::Float64 => TypeClass::Float64,
            LogicalType::Decimal { .. } => TypeClass::Decimal,
            LogicalType::Date32 => TypeClass::Date32,
            LogicalType::Timestamp => TypeClass::Timestamp,
            LogicalType::Utf8 => TypeClass::Utf8,
            LogicalType::Binary => TypeClass::Binary,
            LogicalType::List(_) => TypeClass::List,
            LogicalType::Struct(_) => TypeClass::Struct,
            LogicalType::Map { .. } => TypeClass::Map,
        }
    }

    /// Bytes per value for fixed-width types.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            LogicalType::Boolean => Some(1),
            LogicalType::Int32 | LogicalType::Date32 => Some(4),
            LogicalType::Int64 | LogicalType::Float64 | LogicalType::Timestamp => Some(8),
            LogicalType::Decimal { .. } => Some(16),
            _ => None,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.byte_width().is_some()
    }

    pub fn is_numeric(&self) -> bool {
        self.class().is_numeric()
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, LogicalType::Int32 | LogicalType::Int64)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, LogicalType::Date32 | LogicalType::Timestamp)
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            LogicalType::List(_) | LogicalType::Struct(_) | LogicalType::Map { .. }
        )
    }

    /// Precision and scale for decimals, or the decimal equivalent of an
    /// integer type.
    pub fn decimal_params(&self) -> Option<(u8, u8)> {
        match self {
            LogicalType::Decimal { precision, scale } => Some((*precision, *scale)),
            LogicalType::Int32 => Some((10, 0)),
            LogicalType::Int64 => Some((19, 0)),
            _ => None,
        }
    }

    /// Entry struct of a map type.
    pub fn map_entries(key: &LogicalType, value: &LogicalType) -> LogicalType {
        LogicalType::Struct(vec![
            Field::new("key", key.clone(), false),
            Field::new("value", value.clone(), true),
        ])
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Boolean => f.write_str("boolean"),
            LogicalType::Int32 => f.write_str("int32"),
            LogicalType::Int64 => f.write_str("int64"),
            LogicalType::Float64 => f.write_str("float64"),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "decimal({}, {})", precision, scale)
            }
            LogicalType::Date32 => f.write_str("date32"),
            LogicalType::Timestamp => f.write_str("timestamp"),
            LogicalType::Utf8 => f.write_str("utf8"),
            LogicalType::Binary => f.write_str("binary"),
            LogicalType::List(item) => write!(f, "list<{}>", item.data_type),
            LogicalType::Struct(fields) => {
                f.write_str("struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                f.write_str(">")
            }
            LogicalType::Map { key, value } => write!(f, "map<{}, {}>", key, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: LogicalType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

pub type SchemaRef = Arc<Schema>;

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| EngineError::InvalidArgument(format!("column '{}' not found", name)))
    }

    pub fn project(&self, indices: &[usize]) -> Result<Schema> {
        let fields = indices
            .iter()
            .map(|&i| {
                self.fields.get(i).cloned().ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "column index {} out of range for {} columns",
                        i,
                        self.fields.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_bounds() {
        assert!(LogicalType::decimal(38, 10).is_ok());
        assert!(LogicalType::decimal(39, 0).is_err());
        assert!(LogicalType::decimal(5, 6).is_err());
        assert!(LogicalType::decimal(0, 0).is_err());
    }

    #[test]
    fn widths_and_classes() {
        assert_eq!(LogicalType::Int32.byte_width(), Some(4));
        assert_eq!(LogicalType::decimal(10, 2).unwrap().byte_width(), Some(16));
        assert_eq!(LogicalType::Utf8.byte_width(), None);
        assert_eq!(LogicalType::list(LogicalType::Int32).class(), TypeClass::List);
        for class in TypeClass::ALL {
            assert_eq!(class.example_type().class(), class);
        }
    }

    #[test]
    fn display() {
        let t = LogicalType::Map {
            key: Box::new(LogicalType::Utf8),
            value: Box::new(LogicalType::list(LogicalType::Int64)),
        };
        assert_eq!(t.to_string(), "map<utf8, list<int64>>");
    }

    #[test]
    fn schema_lookup() {
        let schema = Schema::new(vec![
            Field::new("a", LogicalType::Int64, true),
            Field::new("b", LogicalType::Utf8, false),
        ]);
        assert_eq!(schema.index_of("b").unwrap(), 1);
        assert!(schema.index_of("c").is_err());
        assert_eq!(schema.project(&[1]).unwrap().fields()[0].name, "b");
    }
}
