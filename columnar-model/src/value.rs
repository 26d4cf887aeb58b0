use std::hash::{Hash, Hasher};

use crate::decimal;
use crate::temporal;
use crate::types::LogicalType;

/// A single boxed value. Decimals are unscaled; their scale comes from the
/// type the value is interpreted under.
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Decimal(i128),
    Date32(i32),
    Timestamp(i64),
    Utf8(String),
    Binary(Vec<u8>),
    /// Also used for maps, as a list of `Struct([key, value])` entries.
    List(Vec<ScalarValue>),
    Struct(Vec<ScalarValue>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Whether this value can be stored in a column of `data_type`.
    pub fn conforms_to(&self, data_type: &LogicalType) -> bool {
        match (self, data_type) {
            (ScalarValue::Null, _) => true,
            (ScalarValue::Boolean(_), LogicalType::Boolean)
            | (ScalarValue::Int32(_), LogicalType::Int32)
            | (ScalarValue::Int64(_), LogicalType::Int64)
            | (ScalarValue::Float64(_), LogicalType::Float64)
            | (ScalarValue::Date32(_), LogicalType::Date32)
            | (ScalarValue::Timestamp(_), LogicalType::Timestamp)
            | (ScalarValue::Utf8(_), LogicalType::Utf8)
            | (ScalarValue::Binary(_), LogicalType::Binary) => true,
            (ScalarValue::Decimal(v), LogicalType::Decimal { precision, .. }) => {
                decimal::fits_precision(*v, *precision)
            }
            (ScalarValue::List(items), LogicalType::List(field)) => {
                items.iter().all(|v| v.conforms_to(&field.data_type))
            }
            (ScalarValue::List(entries), LogicalType::Map { key, value }) => {
                let entry_type = LogicalType::map_entries(key, value);
                entries
                    .iter()
                    .all(|e| !e.is_null() && e.conforms_to(&entry_type))
            }
            (ScalarValue::Struct(items), LogicalType::Struct(fields)) => {
                items.len() == fields.len()
                    && items
                        .iter()
                        .zip(fields)
                        .all(|(v, f)| v.conforms_to(&f.data_type))
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of integer, date and timestamp values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int32(v) | ScalarValue::Date32(v) => Some(*v as i64),
            ScalarValue::Int64(v) | ScalarValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<i128> {
        match self {
            ScalarValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable rendering under `data_type`.
    pub fn render(&self, data_type: &LogicalType) -> String {
        match (self, data_type) {
            (ScalarValue::Null, _) => "null".to_string(),
            (ScalarValue::Boolean(b), _) => b.to_string(),
            (ScalarValue::Int32(v), _) => v.to_string(),
            (ScalarValue::Int64(v), _) => v.to_string(),
            (ScalarValue::Float64(v), _) => v.to_string(),
            (ScalarValue::Decimal(v), LogicalType::Decimal { scale, .. }) => {
                decimal::format(*v, *scale)
            }
            (ScalarValue::Decimal(v), _) => v.to_string(),
            (ScalarValue::Date32(d), _) => temporal::format_date(*d),
            (ScalarValue::Timestamp(t), _) => temporal::format_timestamp(*t),
            (ScalarValue::Utf8(s), _) => s.clone(),
            (ScalarValue::Binary(b), _) => b.iter().map(|x| format!("{:02x}", x)).collect(),
            (ScalarValue::List(items), t) => {
                let item_type = match t {
                    LogicalType::List(f) => f.data_type.clone(),
                    LogicalType::Map { key, value } => LogicalType::map_entries(key, value),
                    other => other.clone(),
                };
                let parts: Vec<String> = items.iter().map(|v| v.render(&item_type)).collect();
                format!("[{}]", parts.join(", "))
            }
            (ScalarValue::Struct(items), t) => {
                let parts: Vec<String> = match t {
                    LogicalType::Struct(fields) => items
                        .iter()
                        .zip(fields)
                        .map(|(v, f)| format!("{}: {}", f.name, v.render(&f.data_type)))
                        .collect(),
                    other => items.iter().map(|v| v.render(other)).collect(),
                };
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Bit-exact equality: floats compare by bit pattern, so `NaN == NaN` when
/// the payloads match and `0.0 != -0.0`.
impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int32(a), Int32(b)) | (Date32(a), Date32(b)) => a == b,
            (Int64(a), Int64(b)) | (Timestamp(a), Timestamp(b)) => a == b,
            (Float64(a), Float64(b)) => a.to_bits() == b.to_bits(),
            (Decimal(a), Decimal(b)) => a == b,
            (Utf8(a), Utf8(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (List(a), List(b)) | (Struct(a), Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Boolean(v) => v.hash(state),
            ScalarValue::Int32(v) | ScalarValue::Date32(v) => v.hash(state),
            ScalarValue::Int64(v) | ScalarValue::Timestamp(v) => v.hash(state),
            ScalarValue::Float64(v) => v.to_bits().hash(state),
            ScalarValue::Decimal(v) => v.hash(state),
            ScalarValue::Utf8(v) => v.hash(state),
            ScalarValue::Binary(v) => v.hash(state),
            ScalarValue::List(v) | ScalarValue::Struct(v) => v.hash(state),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Utf8(v)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ScalarValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(ScalarValue::Float64(f64::NAN), ScalarValue::Float64(f64::NAN));
        assert_ne!(ScalarValue::Float64(0.0), ScalarValue::Float64(-0.0));
    }

    #[test]
    fn conformance() {
        let dec = LogicalType::decimal(4, 2).unwrap();
        assert!(ScalarValue::Decimal(9999).conforms_to(&dec));
        assert!(!ScalarValue::Decimal(10000).conforms_to(&dec));
        assert!(ScalarValue::Null.conforms_to(&LogicalType::Utf8));
        assert!(!ScalarValue::Int32(1).conforms_to(&LogicalType::Int64));

        let st = LogicalType::Struct(vec![
            Field::new("a", LogicalType::Int64, true),
            Field::new("b", LogicalType::Utf8, true),
        ]);
        assert!(ScalarValue::Struct(vec![1i64.into(), "x".into()]).conforms_to(&st));
        assert!(!ScalarValue::Struct(vec![1i64.into()]).conforms_to(&st));
    }

    #[test]
    fn render_values() {
        let dec = LogicalType::decimal(10, 2).unwrap();
        assert_eq!(ScalarValue::Decimal(1235).render(&dec), "12.35");
        let list = LogicalType::list(LogicalType::Int32);
        let v = ScalarValue::List(vec![1i32.into(), ScalarValue::Null]);
        assert_eq!(v.render(&list), "[1, null]");
        assert_eq!(ScalarValue::from(None::<i64>), ScalarValue::Null);
    }
}
