//! Grouped aggregate accumulators with mergeable partial states.
//!
//! Each accumulator keeps one state per group id. `state()` exports the
//! partial states as columns and `merge_state()` folds such columns back in,
//! which is how partial and final aggregation stages are connected:
//!
//! ```text
//! func        partial state columns
//! count       [count: int64]
//! sum(int)    [sum: int64, overflowed: bool]
//! sum(float)  [sum: float64]
//! sum(dec)    [sum: decimal, overflowed: bool]
//! min / max   [value: input type]
//! avg(num)    [sum: float64, count: int64]
//! avg(dec)    [sum: decimal(38, s), count: int64, overflowed: bool]
//! ```
//!
//! Sums that overflow in permissive mode finish as null; in strict mode the
//! update fails.

use columnar_model::{
    decimal, Column, EngineError, LogicalType, NumericOptions, Result, ScalarValue,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::kernel_io::{resolve, NativeInput};
use crate::registry::OpKind;
use crate::sort::compare_values;

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggFunc {
    Sum,
    /// Non-null input rows.
    Count,
    /// All rows; takes no input column.
    CountStar,
    Min,
    Max,
    /// Internally stored as (sum, count); finalised to sum/count.
    Avg,
}

/// Extra integral digits granted to a decimal sum.
const SUM_DECIMAL_GROWTH: u8 = 10;
/// Extra fractional digits granted to a decimal average.
const AVG_DECIMAL_SCALE_GROWTH: u8 = 4;

impl AggFunc {
    pub const ALL: [AggFunc; 6] = [
        AggFunc::Sum,
        AggFunc::Count,
        AggFunc::CountStar,
        AggFunc::Min,
        AggFunc::Max,
        AggFunc::Avg,
    ];

    pub fn op_kind(self) -> OpKind {
        match self {
            AggFunc::Sum => OpKind::Sum,
            AggFunc::Count => OpKind::Count,
            AggFunc::CountStar => OpKind::CountStar,
            AggFunc::Min => OpKind::Min,
            AggFunc::Max => OpKind::Max,
            AggFunc::Avg => OpKind::Avg,
        }
    }

    /// Commutative and associative: splitting the input and merging partial
    /// states gives the same result as one pass.
    pub fn is_exactly_mergeable(self) -> bool {
        !matches!(self, AggFunc::Avg)
    }

    pub fn result_type(self, input: &LogicalType) -> Result<LogicalType> {
        use LogicalType as T;
        let unsupported = || {
            EngineError::UnsupportedOperation(format!("{} over {}", self.op_kind(), input))
        };
        match self {
            AggFunc::Count | AggFunc::CountStar => Ok(T::Int64),
            AggFunc::Sum => match input {
                T::Int32 | T::Int64 => Ok(T::Int64),
                T::Float64 => Ok(T::Float64),
                T::Decimal { precision, scale } => T::decimal(
                    precision
                        .saturating_add(SUM_DECIMAL_GROWTH)
                        .min(decimal::MAX_PRECISION),
                    *scale,
                ),
                _ => Err(unsupported()),
            },
            AggFunc::Avg => match input {
                T::Int32 | T::Int64 | T::Float64 => Ok(T::Float64),
                T::Decimal { precision, scale } => {
                    let p = precision
                        .saturating_add(AVG_DECIMAL_SCALE_GROWTH)
                        .min(decimal::MAX_PRECISION);
                    T::decimal(p, (scale + AVG_DECIMAL_SCALE_GROWTH).min(p))
                }
                _ => Err(unsupported()),
            },
            AggFunc::Min | AggFunc::Max => {
                if input.is_nested() {
                    Err(unsupported())
                } else {
                    Ok(input.clone())
                }
            }
        }
    }

    /// Types of the partial state columns for `input`.
    pub fn state_types(self, input: &LogicalType) -> Result<Vec<LogicalType>> {
        use LogicalType as T;
        let output = self.result_type(input)?;
        Ok(match (self, input) {
            (AggFunc::Count | AggFunc::CountStar, _) => vec![T::Int64],
            (AggFunc::Sum, T::Float64) => vec![T::Float64],
            (AggFunc::Sum, _) => vec![output, T::Boolean],
            (AggFunc::Min | AggFunc::Max, _) => vec![output],
            (AggFunc::Avg, T::Decimal { scale, .. }) => vec![
                T::decimal(decimal::MAX_PRECISION, *scale)?,
                T::Int64,
                T::Boolean,
            ],
            (AggFunc::Avg, _) => vec![T::Float64, T::Int64],
        })
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.op_kind(), f)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AggState {
    Count(i64),
    Int { sum: Option<i64>, overflowed: bool },
    Float(Option<f64>),
    Decimal { sum: Option<i128>, overflowed: bool },
    Extreme(Option<ScalarValue>),
    Avg { sum: f64, count: i64 },
    AvgDecimal { sum: i128, count: i64, overflowed: bool },
}

/// One state per group for a single aggregate function.
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggFunc,
    input_type: LogicalType,
    output_type: LogicalType,
    options: NumericOptions,
    groups: Vec<AggState>,
}

fn overflow_error(output: &LogicalType) -> EngineError {
    match output {
        LogicalType::Decimal { precision, scale } => EngineError::DecimalPrecisionOverflow(format!(
            "sum does not fit decimal({}, {})",
            precision, scale
        )),
        other => EngineError::ArithmeticOverflow(format!("sum overflows {}", other)),
    }
}

impl Accumulator {
    pub fn try_new(func: AggFunc, input_type: &LogicalType, options: NumericOptions) -> Result<Self> {
        Ok(Self {
            func,
            input_type: input_type.clone(),
            output_type: func.result_type(input_type)?,
            options,
            groups: Vec::new(),
        })
    }

    pub fn func(&self) -> AggFunc {
        self.func
    }

    pub fn output_type(&self) -> &LogicalType {
        &self.output_type
    }

    pub fn state_types(&self) -> Result<Vec<LogicalType>> {
        self.func.state_types(&self.input_type)
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    fn initial_state(&self) -> AggState {
        match (self.func, &self.input_type) {
            (AggFunc::Count | AggFunc::CountStar, _) => AggState::Count(0),
            (AggFunc::Sum, LogicalType::Float64) => AggState::Float(None),
            (AggFunc::Sum, LogicalType::Decimal { .. }) => AggState::Decimal {
                sum: None,
                overflowed: false,
            },
            (AggFunc::Sum, _) => AggState::Int {
                sum: None,
                overflowed: false,
            },
            (AggFunc::Min | AggFunc::Max, _) => AggState::Extreme(None),
            (AggFunc::Avg, LogicalType::Decimal { .. }) => AggState::AvgDecimal {
                sum: 0,
                count: 0,
                overflowed: false,
            },
            (AggFunc::Avg, _) => AggState::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Grow to at least `n` groups.
    pub fn resize(&mut self, n: usize) {
        if n > self.groups.len() {
            let init = self.initial_state();
            self.groups.resize(n, init);
        }
    }

    fn prepare(&mut self, rows: usize, group_ids: &[usize]) -> Result<()> {
        if rows != group_ids.len() {
            return Err(EngineError::InvalidArgument(format!(
                "{} group ids for {} input rows",
                group_ids.len(),
                rows
            )));
        }
        if let Some(max) = group_ids.iter().max() {
            self.resize(max + 1);
        }
        Ok(())
    }

    /// Fold `values[i]` into group `group_ids[i]`. `values` is `None` only
    /// for `count(*)`.
    pub fn update(&mut self, values: Option<&Column>, group_ids: &[usize]) -> Result<()> {
        let values = match values {
            Some(v) => v,
            None if self.func == AggFunc::CountStar => {
                if let Some(max) = group_ids.iter().max() {
                    self.resize(max + 1);
                }
                for &g in group_ids {
                    if let AggState::Count(c) = &mut self.groups[g] {
                        *c += 1;
                    }
                }
                return Ok(());
            }
            None => {
                return Err(EngineError::InvalidArgument(format!(
                    "{} requires an input column",
                    self.func
                )))
            }
        };
        if values.data_type() != &self.input_type {
            return Err(EngineError::TypeMismatch(format!(
                "{} accumulator over {} fed {}",
                self.func,
                self.input_type,
                values.data_type()
            )));
        }
        self.prepare(values.len(), group_ids)?;

        match self.func {
            AggFunc::Count | AggFunc::CountStar => {
                let all = self.func == AggFunc::CountStar;
                for (i, &g) in group_ids.iter().enumerate() {
                    if let AggState::Count(c) = &mut self.groups[g] {
                        if all || values.is_valid(i) {
                            *c += 1;
                        }
                    }
                }
                Ok(())
            }
            AggFunc::Sum | AggFunc::Avg => match self.input_type {
                LogicalType::Int32 => {
                    let input = NativeInput::<i32>::new(values)?;
                    self.fold_rows(group_ids, |i| input.get(i).map(|v| ScalarValue::Int64(v as i64)))
                }
                LogicalType::Int64 => {
                    let input = NativeInput::<i64>::new(values)?;
                    self.fold_rows(group_ids, |i| input.get(i).map(ScalarValue::Int64))
                }
                LogicalType::Float64 => {
                    let input = NativeInput::<f64>::new(values)?;
                    self.fold_rows(group_ids, |i| input.get(i).map(ScalarValue::Float64))
                }
                LogicalType::Decimal { .. } => {
                    let input = NativeInput::<i128>::new(values)?;
                    self.fold_rows(group_ids, |i| input.get(i).map(ScalarValue::Decimal))
                }
                _ => Err(EngineError::UnsupportedOperation(format!(
                    "{} over {}",
                    self.func, self.input_type
                ))),
            },
            AggFunc::Min | AggFunc::Max => {
                let decoded = values.values()?;
                self.fold_rows(group_ids, |i| Some(decoded[i].clone()).filter(|v| !v.is_null()))
            }
        }
    }

    fn fold_rows(
        &mut self,
        group_ids: &[usize],
        value: impl Fn(usize) -> Option<ScalarValue>,
    ) -> Result<()> {
        for (i, &g) in group_ids.iter().enumerate() {
            if let Some(v) = value(i) {
                self.fold(g, &v)?;
            }
        }
        Ok(())
    }

    /// Fold one non-null input value into group `g`.
    fn fold(&mut self, g: usize, value: &ScalarValue) -> Result<()> {
        let (func, options) = (self.func, self.options);
        let output = &self.output_type;
        match (&mut self.groups[g], value) {
            (AggState::Int { sum, overflowed }, ScalarValue::Int64(v)) => {
                add_int(sum, overflowed, *v, &options, output)
            }
            (AggState::Float(sum), ScalarValue::Float64(v)) => {
                *sum = Some(sum.unwrap_or(0.0) + v);
                Ok(())
            }
            (AggState::Decimal { sum, overflowed }, ScalarValue::Decimal(v)) => {
                let precision = output.decimal_params().map_or(decimal::MAX_PRECISION, |(p, _)| p);
                add_decimal(sum, overflowed, *v, precision, &options, output)
            }
            (AggState::Extreme(current), v) => {
                let replace = match current {
                    None => true,
                    Some(c) => {
                        let o = compare_values(v, c);
                        (func == AggFunc::Min && o == Ordering::Less)
                            || (func == AggFunc::Max && o == Ordering::Greater)
                    }
                };
                if replace {
                    *current = Some(v.clone());
                }
                Ok(())
            }
            (AggState::Avg { sum, count }, v) => {
                *sum += match v {
                    ScalarValue::Int64(x) => *x as f64,
                    ScalarValue::Float64(x) => *x,
                    _ => 0.0,
                };
                *count += 1;
                Ok(())
            }
            (AggState::AvgDecimal { sum, count, overflowed }, ScalarValue::Decimal(v)) => {
                *count += 1;
                let mut partial = Some(*sum);
                add_decimal(&mut partial, overflowed, *v, decimal::MAX_PRECISION, &options, output)?;
                *sum = partial.unwrap_or(0);
                Ok(())
            }
            (state, v) => Err(EngineError::Internal(format!(
                "cannot fold {:?} into {:?}",
                v, state
            ))),
        }
    }

    /// Partial states, one row per group.
    pub fn state(&self) -> Result<Vec<Column>> {
        let types = self.state_types()?;
        let mut rows: Vec<Vec<ScalarValue>> = vec![Vec::with_capacity(self.groups.len()); types.len()];
        for state in &self.groups {
            let values: Vec<ScalarValue> = match state {
                AggState::Count(c) => vec![ScalarValue::Int64(*c)],
                AggState::Int { sum, overflowed } => {
                    vec![sum.map(ScalarValue::Int64).into(), ScalarValue::Boolean(*overflowed)]
                }
                AggState::Float(sum) => vec![sum.map(ScalarValue::Float64).into()],
                AggState::Decimal { sum, overflowed } => vec![
                    sum.map_or(ScalarValue::Null, ScalarValue::Decimal),
                    ScalarValue::Boolean(*overflowed),
                ],
                AggState::Extreme(v) => vec![v.clone().unwrap_or(ScalarValue::Null)],
                AggState::Avg { sum, count } => {
                    vec![ScalarValue::Float64(*sum), ScalarValue::Int64(*count)]
                }
                AggState::AvgDecimal { sum, count, overflowed } => vec![
                    ScalarValue::Decimal(*sum),
                    ScalarValue::Int64(*count),
                    ScalarValue::Boolean(*overflowed),
                ],
            };
            for (column, value) in rows.iter_mut().zip(values) {
                column.push(value);
            }
        }
        types
            .into_iter()
            .zip(rows)
            .map(|(t, values)| Column::from_scalars(t, &values))
            .collect()
    }

    /// Fold exported partial states into groups `group_ids`.
    pub fn merge_state(&mut self, states: &[&Column], group_ids: &[usize]) -> Result<()> {
        let types = self.state_types()?;
        if states.len() != types.len() {
            return Err(EngineError::InvalidArgument(format!(
                "{} expects {} state columns, got {}",
                self.func,
                types.len(),
                states.len()
            )));
        }
        let rows = states.first().map_or(0, |c| c.len());
        self.prepare(rows, group_ids)?;
        let decoded = states
            .iter()
            .map(|c| c.values())
            .collect::<Result<Vec<_>>>()?;
        let options = self.options;
        let output = self.output_type.clone();
        let sum_precision = output.decimal_params().map_or(decimal::MAX_PRECISION, |(p, _)| p);

        for (i, &g) in group_ids.iter().enumerate() {
            let col = |k: usize| &decoded[k][i];
            let flag = |k: usize| col(k).as_bool().unwrap_or(false);
            if let AggState::Extreme(_) = self.groups[g] {
                if !col(0).is_null() {
                    self.fold(g, col(0))?;
                }
                continue;
            }
            match &mut self.groups[g] {
                AggState::Count(c) => *c += col(0).as_i64().unwrap_or(0),
                AggState::Int { sum, overflowed } => {
                    *overflowed |= flag(1);
                    if let Some(v) = col(0).as_i64() {
                        add_int(sum, overflowed, v, &options, &output)?;
                    }
                }
                AggState::Float(sum) => {
                    if let Some(v) = col(0).as_f64() {
                        *sum = Some(sum.unwrap_or(0.0) + v);
                    }
                }
                AggState::Decimal { sum, overflowed } => {
                    *overflowed |= flag(1);
                    if let Some(v) = col(0).as_decimal() {
                        add_decimal(sum, overflowed, v, sum_precision, &options, &output)?;
                    }
                }
                AggState::Extreme(_) => {}
                AggState::Avg { sum, count } => {
                    *sum += col(0).as_f64().unwrap_or(0.0);
                    *count += col(1).as_i64().unwrap_or(0);
                }
                AggState::AvgDecimal { sum, count, overflowed } => {
                    *overflowed |= flag(2);
                    *count += col(1).as_i64().unwrap_or(0);
                    let mut partial = Some(*sum);
                    add_decimal(
                        &mut partial,
                        overflowed,
                        col(0).as_decimal().unwrap_or(0),
                        decimal::MAX_PRECISION,
                        &options,
                        &output,
                    )?;
                    *sum = partial.unwrap_or(0);
                }
            }
        }
        Ok(())
    }

    /// Final values, one row per group.
    pub fn evaluate(&self) -> Result<Column> {
        let values = self
            .groups
            .iter()
            .map(|s| self.finish(s))
            .collect::<Result<Vec<_>>>()?;
        Column::from_scalars(self.output_type.clone(), &values)
    }

    fn finish(&self, state: &AggState) -> Result<ScalarValue> {
        Ok(match state {
            AggState::Count(c) => ScalarValue::Int64(*c),
            AggState::Int { sum, overflowed } => match sum {
                Some(v) if !overflowed => ScalarValue::Int64(*v),
                _ => ScalarValue::Null,
            },
            AggState::Float(sum) => sum.map_or(ScalarValue::Null, ScalarValue::Float64),
            AggState::Decimal { sum, overflowed } => match sum {
                Some(v) if !overflowed => ScalarValue::Decimal(*v),
                _ => ScalarValue::Null,
            },
            AggState::Extreme(v) => v.clone().unwrap_or(ScalarValue::Null),
            AggState::Avg { sum, count } => {
                if *count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Float64(sum / *count as f64)
                }
            }
            AggState::AvgDecimal { sum, count, overflowed } => {
                if *count == 0 || *overflowed {
                    return Ok(ScalarValue::Null);
                }
                let (_, s_in) = self.input_type.decimal_params().unwrap_or((0, 0));
                let (p, s) = self.output_type.decimal_params().unwrap_or((decimal::MAX_PRECISION, 0));
                match decimal::checked_div(*sum, s_in, *count as i128, 0, p, s) {
                    Some(v) => ScalarValue::Decimal(v),
                    None => {
                        let resolved: Option<i128> =
                            resolve(&self.options, &self.output_type, overflow_error(&self.output_type))?;
                        resolved.map_or(ScalarValue::Null, ScalarValue::Decimal)
                    }
                }
            }
        })
    }
}

fn add_int(
    sum: &mut Option<i64>,
    overflowed: &mut bool,
    v: i64,
    options: &NumericOptions,
    output: &LogicalType,
) -> Result<()> {
    if *overflowed {
        return Ok(());
    }
    match sum.unwrap_or(0).checked_add(v) {
        Some(s) => *sum = Some(s),
        None => {
            resolve::<i64>(options, output, overflow_error(output))?;
            *overflowed = true;
        }
    }
    Ok(())
}

fn add_decimal(
    sum: &mut Option<i128>,
    overflowed: &mut bool,
    v: i128,
    precision: u8,
    options: &NumericOptions,
    output: &LogicalType,
) -> Result<()> {
    if *overflowed {
        return Ok(());
    }
    match sum
        .unwrap_or(0)
        .checked_add(v)
        .filter(|s| decimal::fits_precision(*s, precision))
    {
        Some(s) => *sum = Some(s),
        None => {
            resolve::<i128>(options, output, overflow_error(output))?;
            *overflowed = true;
        }
    }
    Ok(())
}

/// Whole-input reduction of one column (or of `rows` rows for `count(*)`).
pub fn aggregate(
    func: AggFunc,
    input: Option<&Column>,
    rows: usize,
    input_type: &LogicalType,
    options: NumericOptions,
) -> Result<ScalarValue> {
    let mut acc = Accumulator::try_new(func, input_type, options)?;
    acc.resize(1);
    let rows = input.map_or(rows, |c| c.len());
    acc.update(input, &vec![0; rows])?;
    acc.evaluate()?.value(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(func: AggFunc, col: &Column) -> ScalarValue {
        aggregate(func, Some(col), 0, col.data_type(), NumericOptions::permissive()).unwrap()
    }

    #[test]
    fn result_types() {
        let dec = LogicalType::decimal(10, 2).unwrap();
        assert_eq!(AggFunc::Sum.result_type(&LogicalType::Int32).unwrap(), LogicalType::Int64);
        assert_eq!(AggFunc::Sum.result_type(&dec).unwrap().decimal_params(), Some((20, 2)));
        assert_eq!(AggFunc::Avg.result_type(&dec).unwrap().decimal_params(), Some((14, 6)));
        assert_eq!(AggFunc::Min.result_type(&LogicalType::Utf8).unwrap(), LogicalType::Utf8);
        assert!(AggFunc::Sum.result_type(&LogicalType::Utf8).is_err());
        assert!(AggFunc::Max.result_type(&LogicalType::list(LogicalType::Int32)).is_err());
    }

    #[test]
    fn basic_reductions_skip_nulls() {
        let col = Column::int32(vec![Some(3), None, Some(-1), Some(7)]);
        assert_eq!(run(AggFunc::Sum, &col), ScalarValue::Int64(9));
        assert_eq!(run(AggFunc::Count, &col), ScalarValue::Int64(3));
        assert_eq!(run(AggFunc::Min, &col), ScalarValue::Int32(-1));
        assert_eq!(run(AggFunc::Max, &col), ScalarValue::Int32(7));
        assert_eq!(run(AggFunc::Avg, &col), ScalarValue::Float64(3.0));
        let star = aggregate(AggFunc::CountStar, None, 4, &LogicalType::Int64, NumericOptions::default());
        assert_eq!(star.unwrap(), ScalarValue::Int64(4));
    }

    #[test]
    fn empty_input() {
        let col = Column::int64(vec![None, None]);
        assert_eq!(run(AggFunc::Sum, &col), ScalarValue::Null);
        assert_eq!(run(AggFunc::Count, &col), ScalarValue::Int64(0));
        assert_eq!(run(AggFunc::Avg, &col), ScalarValue::Null);
    }

    #[test]
    fn sum_overflow_policy() {
        let col = Column::int64(vec![Some(i64::MAX), Some(1)]);
        assert_eq!(run(AggFunc::Sum, &col), ScalarValue::Null);
        let err = aggregate(AggFunc::Sum, Some(&col), 0, &LogicalType::Int64, NumericOptions::strict());
        assert!(matches!(err, Err(EngineError::ArithmeticOverflow(_))));
    }

    #[test]
    fn decimal_average_rounds_half_up() {
        // (1.00 + 2.00 + 2.00) / 3 = 1.666667
        let col = Column::decimal(10, 2, vec![Some(100), Some(200), Some(200)]).unwrap();
        assert_eq!(run(AggFunc::Avg, &col), ScalarValue::Decimal(1_666_667));
        assert_eq!(run(AggFunc::Sum, &col), ScalarValue::Decimal(500));
    }

    #[test]
    fn grouped_partial_then_merge() {
        let values = Column::int64(vec![Some(1), Some(2), Some(3), Some(4), None]);
        let groups = [0, 1, 0, 1, 1];
        let mut whole = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::default()).unwrap();
        whole.update(Some(&values), &groups).unwrap();

        let mut left = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::default()).unwrap();
        left.update(Some(&values.slice(0, 2).unwrap()), &groups[..2]).unwrap();
        let mut right = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::default()).unwrap();
        right.update(Some(&values.slice(2, 3).unwrap()), &groups[2..]).unwrap();

        let mut merged = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::default()).unwrap();
        for part in [&left, &right] {
            let state = part.state().unwrap();
            let refs: Vec<&Column> = state.iter().collect();
            let ids: Vec<usize> = (0..part.num_groups()).collect();
            merged.merge_state(&refs, &ids).unwrap();
        }
        assert_eq!(merged.evaluate().unwrap(), whole.evaluate().unwrap());
        assert_eq!(
            whole.evaluate().unwrap().values().unwrap(),
            vec![ScalarValue::Int64(4), ScalarValue::Int64(6)]
        );
    }

    #[test]
    fn overflow_flag_survives_merge() {
        let mut a = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::permissive()).unwrap();
        a.update(Some(&Column::int64(vec![Some(i64::MAX), Some(1)])), &[0, 0]).unwrap();
        let state = a.state().unwrap();
        let mut b = Accumulator::try_new(AggFunc::Sum, &LogicalType::Int64, NumericOptions::permissive()).unwrap();
        b.merge_state(&[&state[0], &state[1]], &[0]).unwrap();
        b.update(Some(&Column::int64(vec![Some(-5)])), &[0]).unwrap();
        assert_eq!(b.evaluate().unwrap().value(0).unwrap(), ScalarValue::Null);
    }

    #[test]
    fn min_max_strings() {
        let col = Column::utf8(vec![Some("pear"), None, Some("apple")]);
        assert_eq!(run(AggFunc::Min, &col), ScalarValue::Utf8("apple".into()));
        assert_eq!(run(AggFunc::Max, &col), ScalarValue::Utf8("pear".into()));
    }
}
