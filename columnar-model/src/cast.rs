//! Cast resolution.
//!
//! [`resolve_cast`] turns a `(from, to)` pair plus caller-chosen
//! [`CastOptions`] into a [`CastPlan`] or `UnsupportedOperation`. A plan
//! records the overflow and rounding behaviour, whether the cast runs as a
//! single pass or through an intermediate type, and whether casting back
//! restores every value.
//!
//! Supported pairs (`=` lossless, `~` may overflow or round):
//!
//! | from \ to  | bool | i32 | i64 | f64 | dec | date | ts | utf8 | bin |
//! |------------|------|-----|-----|-----|-----|------|----|------|-----|
//! | bool       | =    | =   | =   | =   | ~   |      |    | =    | via |
//! | i32        | ~    | =   | =   | =   | ~   |      |    | =    | via |
//! | i64        | ~    | ~   | =   | ~   | ~   |      |    | =    | via |
//! | f64        | ~    | ~   | ~   | =   | ~   |      |    | ~    | via |
//! | dec        | ~    | ~   | ~   | ~   | ~   |      |    | =    | via |
//! | date       |      |     |     |     |     | =    | ~  | =    | via |
//! | ts         |      |     |     |     |     | ~    | =  | =    | via |
//! | utf8       | ~    | ~   | ~   | ~   | ~   | ~    | ~  | =    | =   |
//! | bin        | via  | via | via | via | via | via  | via| ~    | =   |
//!
//! `via` pairs go through `utf8`. Lists cast element-wise and structs
//! field-wise when the children resolve.

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::decimal;
use crate::error::{EngineError, Result};
use crate::temporal::{self, MICROS_PER_DAY};
use crate::types::{Field, LogicalType};
use crate::value::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Raise `ArithmeticOverflow` / `DecimalPrecisionOverflow`.
    #[default]
    Fail,
    /// Produce null for the offending row.
    Null,
    /// Clamp to the nearest representable value.
    Saturate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundingPolicy {
    /// No digits are dropped.
    Exact,
    /// Half away from zero (decimal scale reduction, float to decimal).
    HalfUp,
    /// Fraction discarded (float or decimal to integer).
    TowardZero,
    /// Toward negative infinity (timestamp to date).
    Floor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CastFusion {
    /// One kernel pass from source to target.
    SinglePass,
    /// Materialize this type between two passes.
    Intermediate(LogicalType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CastOptions {
    pub overflow: OverflowPolicy,
}

impl CastOptions {
    pub fn new(overflow: OverflowPolicy) -> Self {
        Self { overflow }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastPlan {
    pub from: LogicalType,
    pub to: LogicalType,
    pub overflow: OverflowPolicy,
    pub rounding: RoundingPolicy,
    pub fusion: CastFusion,
    /// Casting the result back to `from` yields the original value.
    pub lossless: bool,
    /// The two legs of an intermediate cast.
    legs: Vec<CastPlan>,
    /// Element plan for lists, one plan per field for structs.
    children: Vec<CastPlan>,
}

/// Resolve how to cast `from` into `to`.
pub fn resolve_cast(from: &LogicalType, to: &LogicalType, options: CastOptions) -> Result<CastPlan> {
    if let Some(plan) = resolve_direct(from, to, options)? {
        return Ok(plan);
    }
    let via = LogicalType::Utf8;
    let bridged = match (from, to) {
        (LogicalType::Binary, t) | (t, LogicalType::Binary) if !t.is_nested() => true,
        _ => false,
    };
    if bridged {
        let first = resolve_direct(from, &via, options)?;
        let second = resolve_direct(&via, to, options)?;
        if let (Some(first), Some(second)) = (first, second) {
            return Ok(CastPlan {
                from: from.clone(),
                to: to.clone(),
                overflow: options.overflow,
                rounding: second.rounding,
                fusion: CastFusion::Intermediate(via),
                lossless: first.lossless && second.lossless,
                legs: vec![first, second],
                children: Vec::new(),
            });
        }
    }
    Err(EngineError::UnsupportedOperation(format!(
        "cast from {} to {}",
        from, to
    )))
}

/// Whether `resolve_cast` accepts the pair at all.
pub fn can_cast(from: &LogicalType, to: &LogicalType) -> bool {
    resolve_cast(from, to, CastOptions::default()).is_ok()
}

fn resolve_direct(
    from: &LogicalType,
    to: &LogicalType,
    options: CastOptions,
) -> Result<Option<CastPlan>> {
    use LogicalType as T;

    let single = |rounding: RoundingPolicy, lossless: bool| {
        Some(CastPlan {
            from: from.clone(),
            to: to.clone(),
            overflow: options.overflow,
            rounding,
            fusion: CastFusion::SinglePass,
            lossless,
            legs: Vec::new(),
            children: Vec::new(),
        })
    };
    if from == to {
        return Ok(single(RoundingPolicy::Exact, true));
    }
    let plan = match (from, to) {
        (T::Boolean, T::Int32 | T::Int64 | T::Float64) => single(RoundingPolicy::Exact, true),
        (T::Boolean, T::Decimal { precision, scale }) => {
            single(RoundingPolicy::Exact, precision > scale)
        }
        (T::Int32 | T::Int64 | T::Float64 | T::Decimal { .. }, T::Boolean) => {
            single(RoundingPolicy::Exact, false)
        }
        (T::Int32, T::Int64 | T::Float64) => single(RoundingPolicy::Exact, true),
        (T::Int64, T::Int32) => single(RoundingPolicy::Exact, false),
        (T::Int64, T::Float64) => single(RoundingPolicy::Exact, false),
        (T::Float64, T::Int32 | T::Int64) => single(RoundingPolicy::TowardZero, false),
        (T::Int32 | T::Int64, T::Decimal { precision, scale }) => {
            let (int_precision, _) = from.decimal_params().unwrap_or((19, 0));
            single(RoundingPolicy::Exact, precision - scale >= int_precision)
        }
        (T::Decimal { scale, .. }, T::Int32 | T::Int64) => {
            let rounding = if *scale > 0 {
                RoundingPolicy::TowardZero
            } else {
                RoundingPolicy::Exact
            };
            single(rounding, false)
        }
        (T::Decimal { .. }, T::Float64) => single(RoundingPolicy::Exact, false),
        (T::Float64, T::Decimal { .. }) => single(RoundingPolicy::HalfUp, false),
        (
            T::Decimal {
                precision: p1,
                scale: s1,
            },
            T::Decimal {
                precision: p2,
                scale: s2,
            },
        ) => {
            let rounding = if s2 < s1 {
                RoundingPolicy::HalfUp
            } else {
                RoundingPolicy::Exact
            };
            single(rounding, s2 >= s1 && p2 - s2 >= p1 - s1)
        }
        // Dates beyond roughly +-292k years overflow the microsecond range.
        (T::Date32, T::Timestamp) => single(RoundingPolicy::Exact, false),
        (T::Timestamp, T::Date32) => single(RoundingPolicy::Floor, false),
        (T::Float64, T::Utf8) => single(RoundingPolicy::Exact, false),
        (
            T::Boolean | T::Int32 | T::Int64 | T::Decimal { .. } | T::Date32 | T::Timestamp,
            T::Utf8,
        ) => single(RoundingPolicy::Exact, true),
        (T::Utf8, T::Decimal { .. }) => single(RoundingPolicy::HalfUp, false),
        (
            T::Utf8,
            T::Boolean | T::Int32 | T::Int64 | T::Float64 | T::Date32 | T::Timestamp,
        ) => single(RoundingPolicy::Exact, false),
        (T::Utf8, T::Binary) => single(RoundingPolicy::Exact, true),
        (T::Binary, T::Utf8) => single(RoundingPolicy::Exact, false),
        (T::List(a), T::List(b)) => {
            let element = resolve_cast(&a.data_type, &b.data_type, options)?;
            let lossless = element.lossless;
            single(RoundingPolicy::Exact, lossless).map(|mut plan| {
                plan.rounding = element.rounding;
                plan.children = vec![element];
                plan
            })
        }
        (T::Struct(a), T::Struct(b)) if a.len() == b.len() => {
            let children = a
                .iter()
                .zip(b)
                .map(|(x, y)| resolve_cast(&x.data_type, &y.data_type, options))
                .collect::<Result<Vec<_>>>()?;
            let lossless = children.iter().all(|c| c.lossless);
            single(RoundingPolicy::Exact, lossless).map(|mut plan| {
                plan.children = children;
                plan
            })
        }
        _ => None,
    };
    Ok(plan)
}

impl CastPlan {
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Fixed-width single-pass casts run as device kernels.
    pub fn is_device_capable(&self) -> bool {
        self.fusion == CastFusion::SinglePass
            && self.from.is_fixed_width()
            && self.to.is_fixed_width()
    }

    /// The same plan under a different overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        for leg in &mut self.legs {
            leg.overflow = overflow;
        }
        self.children = self
            .children
            .into_iter()
            .map(|c| c.with_overflow(overflow))
            .collect();
        self
    }

    /// Cast one value. Nulls stay null.
    pub fn apply_value(&self, value: &ScalarValue) -> Result<ScalarValue> {
        if value.is_null() || self.is_identity() {
            return Ok(value.clone());
        }
        if !self.legs.is_empty() {
            return self
                .legs
                .iter()
                .try_fold(value.clone(), |v, leg| leg.apply_value(&v));
        }
        self.convert(value)
    }

    /// Cast a whole column on the host.
    pub fn apply_column(&self, column: &Column) -> Result<Column> {
        if self.is_identity() {
            return column.slice(0, column.len());
        }
        let values = column
            .values()?
            .iter()
            .map(|v| self.apply_value(v))
            .collect::<Result<Vec<_>>>()?;
        Column::from_scalars(self.to.clone(), &values)
    }

    fn overflow(&self, value: &ScalarValue, saturated: Option<ScalarValue>) -> Result<ScalarValue> {
        match self.overflow {
            OverflowPolicy::Fail => {
                let msg = format!(
                    "{} does not fit {}",
                    value.render(&self.from),
                    self.to
                );
                Err(match self.to {
                    LogicalType::Decimal { .. } => EngineError::DecimalPrecisionOverflow(msg),
                    _ => EngineError::ArithmeticOverflow(msg),
                })
            }
            OverflowPolicy::Null => Ok(ScalarValue::Null),
            OverflowPolicy::Saturate => Ok(saturated.unwrap_or(ScalarValue::Null)),
        }
    }

    fn invalid(&self, value: &ScalarValue) -> Result<ScalarValue> {
        match self.overflow {
            OverflowPolicy::Fail => Err(EngineError::InvalidArgument(format!(
                "cannot cast '{}' to {}",
                value.render(&self.from),
                self.to
            ))),
            OverflowPolicy::Null | OverflowPolicy::Saturate => Ok(ScalarValue::Null),
        }
    }

    fn convert(&self, value: &ScalarValue) -> Result<ScalarValue> {
        use LogicalType as T;
        use ScalarValue as V;

        match &self.to {
            T::Boolean => match value {
                V::Int32(_) | V::Int64(_) => Ok(V::Boolean(value.as_i64() != Some(0))),
                V::Float64(f) => Ok(V::Boolean(*f != 0.0)),
                V::Decimal(d) => Ok(V::Boolean(*d != 0)),
                V::Utf8(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => Ok(V::Boolean(true)),
                    "false" | "f" | "0" | "no" => Ok(V::Boolean(false)),
                    _ => self.invalid(value),
                },
                _ => self.unsupported(),
            },
            T::Int32 | T::Int64 => {
                let (min, max) = if self.to == T::Int32 {
                    (i32::MIN as i128, i32::MAX as i128)
                } else {
                    (i64::MIN as i128, i64::MAX as i128)
                };
                let wide: i128 = match value {
                    V::Boolean(b) => *b as i128,
                    V::Int32(_) | V::Int64(_) => value.as_i64().unwrap_or(0) as i128,
                    V::Float64(f) => {
                        if f.is_nan() {
                            return self.overflow(value, Some(self.int_value(0)));
                        }
                        let t = f.trunc();
                        if t < min as f64 || t > max as f64 {
                            let clamp = if t < 0.0 { min } else { max };
                            return self.overflow(value, Some(self.int_value(clamp)));
                        }
                        t as i128
                    }
                    V::Decimal(d) => {
                        let scale = self.from.decimal_params().map_or(0, |(_, s)| s);
                        d / decimal::pow10(scale)
                    }
                    V::Utf8(s) => match s.trim().parse::<i128>() {
                        Ok(v) => v,
                        Err(_) => return self.invalid(value),
                    },
                    _ => return self.unsupported(),
                };
                if wide < min || wide > max {
                    let clamp = if wide < 0 { min } else { max };
                    return self.overflow(value, Some(self.int_value(clamp)));
                }
                Ok(self.int_value(wide))
            }
            T::Float64 => match value {
                V::Boolean(b) => Ok(V::Float64(if *b { 1.0 } else { 0.0 })),
                V::Int32(_) | V::Int64(_) => Ok(V::Float64(value.as_i64().unwrap_or(0) as f64)),
                V::Decimal(d) => {
                    let scale = self.from.decimal_params().map_or(0, |(_, s)| s);
                    Ok(V::Float64(decimal::to_f64(*d, scale)))
                }
                V::Utf8(s) => match s.trim().parse::<f64>() {
                    Ok(f) => Ok(V::Float64(f)),
                    Err(_) => self.invalid(value),
                },
                _ => self.unsupported(),
            },
            T::Decimal { precision, scale } => {
                let (p, s) = (*precision, *scale);
                let saturated = |negative: bool| {
                    let m = decimal::max_for_precision(p);
                    Some(V::Decimal(if negative { -m } else { m }))
                };
                let unscaled = match value {
                    V::Boolean(b) => Some(*b as i128 * decimal::pow10(s)),
                    V::Int32(_) | V::Int64(_) => {
                        (value.as_i64().unwrap_or(0) as i128).checked_mul(decimal::pow10(s))
                    }
                    V::Float64(f) => {
                        if f.is_nan() {
                            return self.overflow(value, None);
                        }
                        decimal::from_f64(*f, p, s)
                    }
                    V::Decimal(d) => {
                        let from_scale = self.from.decimal_params().map_or(0, |(_, s)| s);
                        decimal::rescale(*d, from_scale, s)
                    }
                    V::Utf8(text) => match decimal::parse(text) {
                        Ok((v, natural)) => decimal::rescale(v, natural, s),
                        Err(EngineError::DecimalPrecisionOverflow(_)) => None,
                        Err(_) => return self.invalid(value),
                    },
                    _ => return self.unsupported(),
                };
                match unscaled.filter(|v| decimal::fits_precision(*v, p)) {
                    Some(v) => Ok(V::Decimal(v)),
                    None => {
                        let negative = match value {
                            V::Float64(f) => *f < 0.0,
                            V::Decimal(d) => *d < 0,
                            V::Utf8(t) => t.trim_start().starts_with('-'),
                            other => other.as_i64().is_some_and(|v| v < 0),
                        };
                        self.overflow(value, saturated(negative))
                    }
                }
            }
            T::Date32 => match value {
                V::Timestamp(ts) => {
                    Ok(V::Date32(ts.div_euclid(MICROS_PER_DAY) as i32))
                }
                V::Utf8(s) => match temporal::parse_date(s)
                    .or_else(|_| temporal::parse_timestamp(s).map(|t| t.div_euclid(MICROS_PER_DAY) as i32))
                {
                    Ok(d) => Ok(V::Date32(d)),
                    Err(_) => self.invalid(value),
                },
                _ => self.unsupported(),
            },
            T::Timestamp => match value {
                V::Date32(d) => match i64::from(*d).checked_mul(MICROS_PER_DAY) {
                    Some(ts) => Ok(V::Timestamp(ts)),
                    None => {
                        let edge = if *d < 0 { i64::MIN } else { i64::MAX };
                        self.overflow(value, Some(V::Timestamp(edge)))
                    }
                },
                V::Utf8(s) => match temporal::parse_timestamp(s) {
                    Ok(t) => Ok(V::Timestamp(t)),
                    Err(_) => self.invalid(value),
                },
                _ => self.unsupported(),
            },
            T::Utf8 => match value {
                V::Binary(bytes) => match String::from_utf8(bytes.clone()) {
                    Ok(s) => Ok(V::Utf8(s)),
                    Err(_) => self.invalid(value),
                },
                V::Float64(f) => Ok(V::Utf8(format_float(*f))),
                other => Ok(V::Utf8(other.render(&self.from))),
            },
            T::Binary => match value {
                V::Utf8(s) => Ok(V::Binary(s.as_bytes().to_vec())),
                _ => self.unsupported(),
            },
            T::List(_) => match value {
                V::List(items) => {
                    let element = self.children.first().ok_or_else(|| {
                        EngineError::Internal("list cast without element plan".into())
                    })?;
                    items
                        .iter()
                        .map(|v| element.apply_value(v))
                        .collect::<Result<Vec<_>>>()
                        .map(V::List)
                }
                _ => self.unsupported(),
            },
            T::Struct(_) => match value {
                V::Struct(items) => items
                    .iter()
                    .zip(&self.children)
                    .map(|(v, plan)| plan.apply_value(v))
                    .collect::<Result<Vec<_>>>()
                    .map(V::Struct),
                _ => self.unsupported(),
            },
            T::Map { .. } => self.unsupported(),
        }
    }

    fn int_value(&self, v: i128) -> ScalarValue {
        if self.to == LogicalType::Int32 {
            ScalarValue::Int32(v as i32)
        } else {
            ScalarValue::Int64(v as i64)
        }
    }

    fn unsupported(&self) -> Result<ScalarValue> {
        Err(EngineError::TypeMismatch(format!(
            "value does not match cast source type {}",
            self.from
        )))
    }
}

/// Shortest text that parses back to the same float.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Wider type both operands can be cast to without losing values, used for
/// implicit coercion of binary operators.
pub fn common_supertype(a: &LogicalType, b: &LogicalType) -> Option<LogicalType> {
    use LogicalType as T;

    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (T::Int32, T::Int64) | (T::Int64, T::Int32) => Some(T::Int64),
        (T::Int32 | T::Int64, T::Float64) | (T::Float64, T::Int32 | T::Int64) => Some(T::Float64),
        (T::Decimal { .. }, T::Float64) | (T::Float64, T::Decimal { .. }) => Some(T::Float64),
        (T::Decimal { .. }, T::Int32 | T::Int64) | (T::Int32 | T::Int64, T::Decimal { .. })
        | (T::Decimal { .. }, T::Decimal { .. }) => {
            let (p1, s1) = a.decimal_params()?;
            let (p2, s2) = b.decimal_params()?;
            let scale = s1.max(s2);
            let integral = (p1 - s1).max(p2 - s2);
            let precision = (integral + scale).min(decimal::MAX_PRECISION);
            T::decimal(precision, scale.min(precision)).ok()
        }
        (T::Date32, T::Timestamp) | (T::Timestamp, T::Date32) => Some(T::Timestamp),
        (T::Utf8, T::Binary) | (T::Binary, T::Utf8) => Some(T::Binary),
        (T::List(x), T::List(y)) => {
            let item = common_supertype(&x.data_type, &y.data_type)?;
            Some(T::List(Box::new(Field::new(
                x.name.clone(),
                item,
                x.nullable || y.nullable,
            ))))
        }
        _ => None,
    }
}
