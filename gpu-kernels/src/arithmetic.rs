//! Arithmetic kernels.
//!
//! Integer arithmetic is checked; overflow and division by zero go through
//! the caller's [`NumericOptions`]. Decimal operands may differ in scale,
//! the output type (from the planner) fixes the result precision and scale.

use columnar_model::{
    decimal, Column, EngineError, LogicalType, NativeType, NumericOptions, Result, ScalarValue,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kernel_io::{output_len, resolve, NativeBuilder, NativeInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Element arithmetic that reports data-dependent failures as errors.
pub trait CheckedArith: NativeType + Default {
    fn checked(op: ArithOp, a: Self, b: Self) -> Result<Self>;
    fn checked_negate(a: Self) -> Result<Self>;
}

macro_rules! checked_int {
    ($t:ty) => {
        impl CheckedArith for $t {
            fn checked(op: ArithOp, a: Self, b: Self) -> Result<Self> {
                if b == 0 && matches!(op, ArithOp::Div | ArithOp::Rem) {
                    return Err(EngineError::DivideByZero);
                }
                let result = match op {
                    ArithOp::Add => a.checked_add(b),
                    ArithOp::Sub => a.checked_sub(b),
                    ArithOp::Mul => a.checked_mul(b),
                    ArithOp::Div => a.checked_div(b),
                    ArithOp::Rem => a.checked_rem(b),
                };
                result.ok_or_else(|| {
                    EngineError::ArithmeticOverflow(format!(
                        "{} {} {} overflows {}",
                        a,
                        op,
                        b,
                        stringify!($t)
                    ))
                })
            }

            fn checked_negate(a: Self) -> Result<Self> {
                a.checked_neg().ok_or_else(|| {
                    EngineError::ArithmeticOverflow(format!("-({}) overflows {}", a, stringify!($t)))
                })
            }
        }
    };
}

checked_int!(i32);
checked_int!(i64);

impl CheckedArith for f64 {
    fn checked(op: ArithOp, a: Self, b: Self) -> Result<Self> {
        Ok(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div if b == 0.0 => return Err(EngineError::DivideByZero),
            ArithOp::Div => a / b,
            ArithOp::Rem if b == 0.0 => return Err(EngineError::DivideByZero),
            ArithOp::Rem => a % b,
        })
    }

    fn checked_negate(a: Self) -> Result<Self> {
        Ok(-a)
    }
}

/// Result type of `left op right` for already-coerced operand types.
pub fn result_type(op: ArithOp, left: &LogicalType, right: &LogicalType) -> Result<LogicalType> {
    match (left, right) {
        (
            LogicalType::Decimal {
                precision: p1,
                scale: s1,
            },
            LogicalType::Decimal {
                precision: p2,
                scale: s2,
            },
        ) => {
            let (p, s) = match op {
                ArithOp::Add | ArithOp::Sub => decimal::add_result_type(*p1, *s1, *p2, *s2),
                ArithOp::Mul => decimal::mul_result_type(*p1, *s1, *p2, *s2)?,
                ArithOp::Div => decimal::div_result_type(*p1, *s1, *p2, *s2),
                ArithOp::Rem => decimal::rem_result_type(*p1, *s1, *p2, *s2),
            };
            LogicalType::decimal(p, s)
        }
        (l, r) if l == r && matches!(l, LogicalType::Int32 | LogicalType::Int64 | LogicalType::Float64) => {
            Ok(l.clone())
        }
        (l, r) => Err(EngineError::TypeMismatch(format!(
            "no arithmetic {} between {} and {}",
            op, l, r
        ))),
    }
}

fn native<T: CheckedArith>(
    op: ArithOp,
    left: &Column,
    right: &Column,
    output: &LogicalType,
    options: &NumericOptions,
) -> Result<Column> {
    let n = output_len(&[left, right])?;
    let a = NativeInput::<T>::new(left)?;
    let b = NativeInput::<T>::new(right)?;
    let mut out = NativeBuilder::<T>::with_capacity(n);
    for i in 0..n {
        let value = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => match T::checked(op, x, y) {
                Ok(v) => Some(v),
                Err(e) => resolve(options, output, e)?,
            },
            _ => None,
        };
        out.push(value);
    }
    out.finish(&[left, right], output.clone())
}

fn decimal_element(
    op: ArithOp,
    a: i128,
    (s1, s2): (u8, u8),
    b: i128,
    (p, s): (u8, u8),
) -> Result<i128> {
    if b == 0 && matches!(op, ArithOp::Div | ArithOp::Rem) {
        return Err(EngineError::DivideByZero);
    }
    let result = match op {
        ArithOp::Add => decimal::checked_add(a, s1, b, s2, p, s),
        ArithOp::Sub => decimal::checked_sub(a, s1, b, s2, p, s),
        ArithOp::Mul => decimal::checked_mul(a, b, p),
        ArithOp::Div => decimal::checked_div(a, s1, b, s2, p, s),
        ArithOp::Rem => decimal::checked_rem(a, s1, b, s2, p, s),
    };
    result.ok_or_else(|| {
        EngineError::DecimalPrecisionOverflow(format!(
            "{} {} {} does not fit decimal({}, {})",
            decimal::format(a, s1),
            op,
            decimal::format(b, s2),
            p,
            s
        ))
    })
}

fn decimal_binary(
    op: ArithOp,
    left: &Column,
    right: &Column,
    output: &LogicalType,
    options: &NumericOptions,
) -> Result<Column> {
    let scales = (
        left.data_type().decimal_params().map_or(0, |(_, s)| s),
        right.data_type().decimal_params().map_or(0, |(_, s)| s),
    );
    let target = output.decimal_params().ok_or_else(|| {
        EngineError::TypeMismatch(format!("decimal arithmetic cannot produce {}", output))
    })?;
    let n = output_len(&[left, right])?;
    let a = NativeInput::<i128>::new(left)?;
    let b = NativeInput::<i128>::new(right)?;
    let mut out = NativeBuilder::<i128>::with_capacity(n);
    for i in 0..n {
        let value = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => match decimal_element(op, x, scales, y, target) {
                Ok(v) => Some(v),
                Err(e) => resolve(options, output, e)?,
            },
            _ => None,
        };
        out.push(value);
    }
    out.finish(&[left, right], output.clone())
}

/// `left op right` with null propagation.
pub fn binary(
    op: ArithOp,
    left: &Column,
    right: &Column,
    output: &LogicalType,
    options: &NumericOptions,
) -> Result<Column> {
    match (left.data_type(), right.data_type()) {
        (LogicalType::Int32, LogicalType::Int32) => native::<i32>(op, left, right, output, options),
        (LogicalType::Int64, LogicalType::Int64) => native::<i64>(op, left, right, output, options),
        (LogicalType::Float64, LogicalType::Float64) => {
            native::<f64>(op, left, right, output, options)
        }
        (LogicalType::Decimal { .. }, LogicalType::Decimal { .. }) => {
            decimal_binary(op, left, right, output, options)
        }
        (l, r) => Err(EngineError::TypeMismatch(format!(
            "arithmetic {} between {} and {}",
            op, l, r
        ))),
    }
}

fn negate_native<T: CheckedArith>(column: &Column, options: &NumericOptions) -> Result<Column> {
    let input = NativeInput::<T>::new(column)?;
    let mut out = NativeBuilder::<T>::with_capacity(column.len());
    for i in 0..column.len() {
        let value = match input.get(i) {
            Some(x) => match T::checked_negate(x) {
                Ok(v) => Some(v),
                Err(e) => resolve(options, column.data_type(), e)?,
            },
            None => None,
        };
        out.push(value);
    }
    out.finish(&[column], column.data_type().clone())
}

pub fn negate(column: &Column, options: &NumericOptions) -> Result<Column> {
    match column.data_type() {
        LogicalType::Int32 => negate_native::<i32>(column, options),
        LogicalType::Int64 => negate_native::<i64>(column, options),
        LogicalType::Float64 => negate_native::<f64>(column, options),
        LogicalType::Decimal { .. } => {
            let input = NativeInput::<i128>::new(column)?;
            let mut out = NativeBuilder::<i128>::with_capacity(column.len());
            for i in 0..column.len() {
                out.push(input.get(i).map(|v| -v));
            }
            out.finish(&[column], column.data_type().clone())
        }
        other => Err(EngineError::TypeMismatch(format!("cannot negate {}", other))),
    }
}

/// Single-value arithmetic for fused programs. Null operands yield null;
/// data-dependent failures are returned for the caller to resolve.
pub fn arith_scalar(op: ArithOp, a: &ScalarValue, b: &ScalarValue) -> Result<ScalarValue> {
    use ScalarValue as V;
    match (a, b) {
        (V::Null, _) | (_, V::Null) => Ok(V::Null),
        (V::Int32(x), V::Int32(y)) => i32::checked(op, *x, *y).map(V::Int32),
        (V::Int64(x), V::Int64(y)) => i64::checked(op, *x, *y).map(V::Int64),
        (V::Float64(x), V::Float64(y)) => f64::checked(op, *x, *y).map(V::Float64),
        (x, y) => Err(EngineError::TypeMismatch(format!(
            "fused arithmetic {} between {:?} and {:?}",
            op, x, y
        ))),
    }
}

pub fn negate_scalar(a: &ScalarValue) -> Result<ScalarValue> {
    use ScalarValue as V;
    match a {
        V::Null => Ok(V::Null),
        V::Int32(x) => i32::checked_negate(*x).map(V::Int32),
        V::Int64(x) => i64::checked_negate(*x).map(V::Int64),
        V::Float64(x) => Ok(V::Float64(-x)),
        other => Err(EngineError::TypeMismatch(format!("fused negate of {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissive() -> NumericOptions {
        NumericOptions::permissive()
    }

    #[test]
    fn add_propagates_nulls() {
        let a = Column::int64(vec![Some(1), None, Some(4)]);
        let b = Column::int64(vec![Some(2), Some(3), None]);
        let out = binary(ArithOp::Add, &a, &b, &LogicalType::Int64, &permissive()).unwrap();
        assert_eq!(
            out.values().unwrap(),
            vec![ScalarValue::Int64(3), ScalarValue::Null, ScalarValue::Null]
        );
    }

    #[test]
    fn overflow_strict_vs_permissive() {
        let a = Column::int32(vec![Some(i32::MAX), Some(1)]);
        let b = Column::int32(vec![Some(1), Some(1)]);
        let out = binary(ArithOp::Add, &a, &b, &LogicalType::Int32, &permissive()).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Null, ScalarValue::Int32(2)]);
        let err = binary(ArithOp::Add, &a, &b, &LogicalType::Int32, &NumericOptions::strict()).unwrap_err();
        assert!(matches!(err, EngineError::ArithmeticOverflow(_)));
    }

    #[test]
    fn divide_by_zero() {
        let a = Column::int64(vec![Some(10), Some(7)]);
        let b = Column::int64(vec![Some(0), Some(2)]);
        let out = binary(ArithOp::Div, &a, &b, &LogicalType::Int64, &permissive()).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Null, ScalarValue::Int64(3)]);
        let err = binary(ArithOp::Rem, &a, &b, &LogicalType::Int64, &NumericOptions::strict()).unwrap_err();
        assert_eq!(err, EngineError::DivideByZero);
    }

    #[test]
    fn broadcast_scalar_operand() {
        let a = Column::float64(vec![Some(1.5), Some(2.5), None]);
        let two = Column::float64(vec![Some(2.0)]);
        let out = binary(ArithOp::Mul, &a, &two, &LogicalType::Float64, &permissive()).unwrap();
        assert_eq!(
            out.values().unwrap(),
            vec![ScalarValue::Float64(3.0), ScalarValue::Float64(5.0), ScalarValue::Null]
        );
    }

    #[test]
    fn decimal_scale_rules() {
        let l = LogicalType::decimal(10, 2).unwrap();
        let r = LogicalType::decimal(5, 3).unwrap();
        let mul = result_type(ArithOp::Mul, &l, &r).unwrap();
        assert_eq!(mul.decimal_params(), Some((16, 5)));
        let same = result_type(ArithOp::Add, &l, &l).unwrap();
        assert_eq!(same.decimal_params().map(|(_, s)| s), Some(2));

        // 1.50 * 2.125 = 3.18750
        let a = Column::decimal(10, 2, vec![Some(150), None]).unwrap();
        let b = Column::decimal(5, 3, vec![Some(2125), Some(1)]).unwrap();
        let out = binary(ArithOp::Mul, &a, &b, &mul, &permissive()).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Decimal(318750), ScalarValue::Null]);
    }

    #[test]
    fn decimal_overflow_policy() {
        let t = LogicalType::decimal(3, 0).unwrap();
        let a = Column::decimal(3, 0, vec![Some(999)]).unwrap();
        let b = Column::decimal(3, 0, vec![Some(1)]).unwrap();
        let out = binary(ArithOp::Add, &a, &b, &t, &permissive()).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Null]);
        let err = binary(ArithOp::Add, &a, &b, &t, &NumericOptions::strict()).unwrap_err();
        assert!(matches!(err, EngineError::DecimalPrecisionOverflow(_)));
    }

    #[test]
    fn negation() {
        let out = negate(&Column::int32(vec![Some(i32::MIN), Some(5)]), &permissive()).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Null, ScalarValue::Int32(-5)]);
        assert_eq!(negate_scalar(&ScalarValue::Float64(1.0)).unwrap(), ScalarValue::Float64(-1.0));
        assert!(arith_scalar(ArithOp::Add, &1i32.into(), &ScalarValue::Int64(1)).is_err());
    }
}
