//! Comparison kernels. Output is Boolean, null where either side is null.
//!
//! Floats compare with IEEE semantics: NaN is unordered, so every operator
//! except `NotEq` yields false against it.

use columnar_model::{Column, ColumnData, EngineError, LogicalType, NativeType, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::kernel_io::{output_len, row, NativeBuilder, NativeInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "<>",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }

    /// Truth value for a (possibly unordered) comparison outcome.
    #[inline]
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            None => self == CmpOp::NotEq,
            Some(o) => match self {
                CmpOp::Eq => o == Ordering::Equal,
                CmpOp::NotEq => o != Ordering::Equal,
                CmpOp::Lt => o == Ordering::Less,
                CmpOp::LtEq => o != Ordering::Greater,
                CmpOp::Gt => o == Ordering::Greater,
                CmpOp::GtEq => o != Ordering::Less,
            },
        }
    }

    /// `a op b` is `b op.flip() a`.
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
            other => other,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn native<T: NativeType + PartialOrd>(op: CmpOp, left: &Column, right: &Column) -> Result<Column> {
    let n = output_len(&[left, right])?;
    let a = NativeInput::<T>::new(left)?;
    let b = NativeInput::<T>::new(right)?;
    let mut out = NativeBuilder::<bool>::with_capacity(n);
    for i in 0..n {
        out.push(match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => Some(op.holds(x.partial_cmp(&y))),
            _ => None,
        });
    }
    out.finish(&[left, right], LogicalType::Boolean)
}

fn varlen_at(column: &Column, i: usize) -> Option<&[u8]> {
    let r = row(column, i);
    if !column.is_valid(r) {
        return None;
    }
    match column.data() {
        ColumnData::Varlen { offsets, values } => {
            Some(&values[offsets[r] as usize..offsets[r + 1] as usize])
        }
        _ => None,
    }
}

fn varlen(op: CmpOp, left: &Column, right: &Column) -> Result<Column> {
    let n = output_len(&[left, right])?;
    let mut out = NativeBuilder::<bool>::with_capacity(n);
    for i in 0..n {
        out.push(match (varlen_at(left, i), varlen_at(right, i)) {
            (Some(x), Some(y)) => Some(op.holds(Some(x.cmp(y)))),
            _ => None,
        });
    }
    out.finish(&[left, right], LogicalType::Boolean)
}

pub fn compare(op: CmpOp, left: &Column, right: &Column) -> Result<Column> {
    use LogicalType as T;
    match (left.data_type(), right.data_type()) {
        (T::Boolean, T::Boolean) => native::<bool>(op, left, right),
        (T::Int32, T::Int32) | (T::Date32, T::Date32) => native::<i32>(op, left, right),
        (T::Int64, T::Int64) | (T::Timestamp, T::Timestamp) => native::<i64>(op, left, right),
        (T::Float64, T::Float64) => native::<f64>(op, left, right),
        (T::Decimal { scale: s1, .. }, T::Decimal { scale: s2, .. }) if s1 == s2 => {
            native::<i128>(op, left, right)
        }
        (T::Utf8, T::Utf8) | (T::Binary, T::Binary) => varlen(op, left, right),
        (l, r) => Err(EngineError::TypeMismatch(format!(
            "cannot compare {} {} {}",
            l, op, r
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::ScalarValue;

    fn bools(c: &Column) -> Vec<ScalarValue> {
        c.values().unwrap()
    }

    #[test]
    fn ints_with_nulls() {
        let a = Column::int64(vec![Some(1), Some(5), None]);
        let b = Column::int64(vec![Some(3), Some(5), Some(1)]);
        let out = compare(CmpOp::LtEq, &a, &b).unwrap();
        assert_eq!(
            bools(&out),
            vec![ScalarValue::Boolean(true), ScalarValue::Boolean(true), ScalarValue::Null]
        );
    }

    #[test]
    fn nan_is_unordered() {
        let a = Column::float64(vec![Some(f64::NAN), Some(f64::NAN)]);
        let b = Column::float64(vec![Some(f64::NAN), Some(1.0)]);
        for op in [CmpOp::Eq, CmpOp::Lt, CmpOp::LtEq, CmpOp::Gt, CmpOp::GtEq] {
            let out = compare(op, &a, &b).unwrap();
            assert_eq!(out.native_values::<bool>().unwrap(), vec![false, false], "{}", op);
        }
        let out = compare(CmpOp::NotEq, &a, &b).unwrap();
        assert_eq!(out.native_values::<bool>().unwrap(), vec![true, true]);
    }

    #[test]
    fn strings_against_broadcast_literal() {
        let a = Column::utf8(vec![Some("apple"), Some("pear"), None]);
        let lit = Column::utf8(vec![Some("banana")]);
        let out = compare(CmpOp::Gt, &a, &lit).unwrap();
        assert_eq!(
            bools(&out),
            vec![ScalarValue::Boolean(false), ScalarValue::Boolean(true), ScalarValue::Null]
        );
    }

    #[test]
    fn mixed_types_rejected() {
        let a = Column::int32(vec![Some(1)]);
        let b = Column::int64(vec![Some(1)]);
        assert!(matches!(compare(CmpOp::Eq, &a, &b), Err(EngineError::TypeMismatch(_))));
        assert_eq!(CmpOp::Lt.flip(), CmpOp::Gt);
    }
}
