//! Window functions over partitioned, ordered rows.
//!
//! Partitions are formed from the partition keys in order of first
//! appearance; rows inside a partition are ordered stably by the order keys.
//! Rows with equal order keys are peers. Aggregates are running totals up to
//! and including the current row's peers when an ordering is given, and
//! whole-partition totals otherwise. Output rows keep the input order.

use columnar_model::{Column, EngineError, LogicalType, NumericOptions, Result, ScalarValue};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::aggregate::{Accumulator, AggFunc};
use crate::registry::OpKind;
use crate::sort::{compare_with_options, SortOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    Aggregate(AggFunc),
}

impl WindowFunc {
    pub fn op_kind(self) -> OpKind {
        match self {
            WindowFunc::RowNumber => OpKind::RowNumber,
            WindowFunc::Rank => OpKind::Rank,
            WindowFunc::DenseRank => OpKind::DenseRank,
            WindowFunc::Lag => OpKind::Lag,
            WindowFunc::Lead => OpKind::Lead,
            WindowFunc::Aggregate(f) => f.op_kind(),
        }
    }

    /// Whether the function reads a value column.
    pub fn takes_input(self) -> bool {
        !matches!(
            self,
            WindowFunc::RowNumber
                | WindowFunc::Rank
                | WindowFunc::DenseRank
                | WindowFunc::Aggregate(AggFunc::CountStar)
        )
    }

    pub fn result_type(self, input: Option<&LogicalType>) -> Result<LogicalType> {
        match (self, input) {
            (WindowFunc::RowNumber | WindowFunc::Rank | WindowFunc::DenseRank, _) => {
                Ok(LogicalType::Int64)
            }
            (WindowFunc::Aggregate(AggFunc::CountStar), _) => Ok(LogicalType::Int64),
            (WindowFunc::Lag | WindowFunc::Lead, Some(t)) => Ok(t.clone()),
            (WindowFunc::Aggregate(f), Some(t)) => f.result_type(t),
            (f, None) => Err(EngineError::InvalidArgument(format!(
                "window function {} needs an input",
                f
            ))),
        }
    }
}

impl fmt::Display for WindowFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.op_kind(), f)
    }
}

pub struct WindowArgs<'a> {
    /// Value column for lag/lead and aggregates.
    pub input: Option<&'a Column>,
    pub partition_by: &'a [&'a Column],
    pub order_by: &'a [(&'a Column, SortOptions)],
    /// Row distance for lag/lead.
    pub offset: usize,
    /// Lag/lead value when the offset row does not exist (null if unset).
    pub default: Option<&'a ScalarValue>,
    pub options: NumericOptions,
}

/// Row indices per partition, partitions in order of first appearance.
pub fn partition_rows(partition_by: &[&Column], rows: usize) -> Result<Vec<Vec<usize>>> {
    if partition_by.is_empty() {
        return Ok(vec![(0..rows).collect()]);
    }
    let keys = partition_by
        .iter()
        .map(|c| c.values())
        .collect::<Result<Vec<_>>>()?;
    let mut index: FxHashMap<Vec<ScalarValue>, usize> = FxHashMap::default();
    let mut partitions: Vec<Vec<usize>> = Vec::new();
    for row in 0..rows {
        let key: Vec<ScalarValue> = keys.iter().map(|k| k[row].clone()).collect();
        let slot = *index.entry(key).or_insert_with(|| {
            partitions.push(Vec::new());
            partitions.len() - 1
        });
        partitions[slot].push(row);
    }
    Ok(partitions)
}

pub fn evaluate_window(func: WindowFunc, args: &WindowArgs<'_>) -> Result<Column> {
    let rows = args
        .input
        .map(|c| c.len())
        .or_else(|| args.partition_by.first().map(|c| c.len()))
        .or_else(|| args.order_by.first().map(|(c, _)| c.len()))
        .unwrap_or(0);
    let lengths_agree = args.partition_by.iter().all(|c| c.len() == rows)
        && args.order_by.iter().all(|(c, _)| c.len() == rows);
    if !lengths_agree {
        return Err(EngineError::InvalidArgument(
            "window inputs have different row counts".into(),
        ));
    }
    if func.takes_input() && args.input.is_none() {
        return Err(EngineError::InvalidArgument(format!("{} needs an input column", func)));
    }
    let output_type = func.result_type(args.input.map(|c| c.data_type()))?;

    let order_values = args
        .order_by
        .iter()
        .map(|(c, o)| c.values().map(|v| (v, *o)))
        .collect::<Result<Vec<_>>>()?;
    let cmp_rows = |a: usize, b: usize| {
        order_values
            .iter()
            .map(|(vals, opts)| compare_with_options(&vals[a], &vals[b], *opts))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    };
    let input_values = match (func, args.input) {
        (WindowFunc::Lag | WindowFunc::Lead, Some(c)) => Some(c.values()?),
        _ => None,
    };

    let mut out = vec![ScalarValue::Null; rows];
    for mut partition in partition_rows(args.partition_by, rows)? {
        partition.sort_by(|&a, &b| cmp_rows(a, b));
        // Peer groups as [start, end) positions into `partition`.
        let mut peers = Vec::new();
        let mut start = 0;
        for pos in 1..=partition.len() {
            if pos == partition.len() || cmp_rows(partition[start], partition[pos]).is_ne() {
                peers.push((start, pos));
                start = pos;
            }
        }

        match func {
            WindowFunc::RowNumber => {
                for (pos, &row) in partition.iter().enumerate() {
                    out[row] = ScalarValue::Int64(pos as i64 + 1);
                }
            }
            WindowFunc::Rank | WindowFunc::DenseRank => {
                for (dense, &(from, to)) in peers.iter().enumerate() {
                    let rank = if func == WindowFunc::Rank { from + 1 } else { dense + 1 };
                    for &row in &partition[from..to] {
                        out[row] = ScalarValue::Int64(rank as i64);
                    }
                }
            }
            WindowFunc::Lag | WindowFunc::Lead => {
                let values = input_values.as_deref().unwrap_or_default();
                let fallback = args.default.cloned().unwrap_or(ScalarValue::Null);
                for (pos, &row) in partition.iter().enumerate() {
                    let source = if func == WindowFunc::Lag {
                        pos.checked_sub(args.offset)
                    } else {
                        pos.checked_add(args.offset).filter(|&p| p < partition.len())
                    };
                    out[row] = match source {
                        Some(p) => values[partition[p]].clone(),
                        None => fallback.clone(),
                    };
                }
            }
            WindowFunc::Aggregate(agg) => {
                let input_type = args.input.map_or(LogicalType::Int64, |c| c.data_type().clone());
                let mut acc = Accumulator::try_new(agg, &input_type, args.options)?;
                acc.resize(1);
                let running = !args.order_by.is_empty();
                let frames: Vec<(usize, usize)> = if running {
                    peers.clone()
                } else {
                    vec![(0, partition.len())]
                };
                for (from, to) in frames {
                    let frame_rows = &partition[from..to];
                    let taken = args.input.map(|c| c.take(frame_rows)).transpose()?;
                    acc.update(taken.as_ref(), &vec![0; frame_rows.len()])?;
                    let value = acc.evaluate()?.value(0)?;
                    let assign = if running { frame_rows } else { &partition[..] };
                    for &row in assign {
                        out[row] = value.clone();
                    }
                }
            }
        }
    }
    Column::from_scalars(output_type, &out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(c: &Column) -> Vec<Option<i64>> {
        c.values().unwrap().iter().map(|v| v.as_i64()).collect()
    }

    fn args<'a>(
        input: Option<&'a Column>,
        partition_by: &'a [&'a Column],
        order_by: &'a [(&'a Column, SortOptions)],
    ) -> WindowArgs<'a> {
        WindowArgs {
            input,
            partition_by,
            order_by,
            offset: 1,
            default: None,
            options: NumericOptions::default(),
        }
    }

    #[test]
    fn ranking_functions() {
        let part = Column::utf8(vec![Some("a"), Some("b"), Some("a"), Some("a"), Some("b")]);
        let score = Column::int32(vec![Some(10), Some(5), Some(20), Some(10), Some(7)]);
        let p = [&part];
        let o = [(&score, SortOptions::asc())];
        let rn = evaluate_window(WindowFunc::RowNumber, &args(None, &p, &o)).unwrap();
        assert_eq!(ints(&rn), vec![Some(1), Some(1), Some(3), Some(2), Some(2)]);
        let rank = evaluate_window(WindowFunc::Rank, &args(None, &p, &o)).unwrap();
        assert_eq!(ints(&rank), vec![Some(1), Some(1), Some(3), Some(1), Some(2)]);
        let dense = evaluate_window(WindowFunc::DenseRank, &args(None, &p, &o)).unwrap();
        assert_eq!(ints(&dense), vec![Some(1), Some(1), Some(2), Some(1), Some(2)]);
    }

    #[test]
    fn lag_and_lead_with_default() {
        let v = Column::int64(vec![Some(1), Some(2), Some(3)]);
        let o = [(&v, SortOptions::asc())];
        let lag = evaluate_window(WindowFunc::Lag, &args(Some(&v), &[], &o)).unwrap();
        assert_eq!(ints(&lag), vec![None, Some(1), Some(2)]);
        let zero = ScalarValue::Int64(0);
        let mut a = args(Some(&v), &[], &o);
        a.default = Some(&zero);
        a.offset = 2;
        let lead = evaluate_window(WindowFunc::Lead, &a).unwrap();
        assert_eq!(ints(&lead), vec![Some(3), Some(0), Some(0)]);
    }

    #[test]
    fn running_sum_includes_peers() {
        let v = Column::int64(vec![Some(1), Some(2), Some(2), Some(5)]);
        let o = [(&v, SortOptions::asc())];
        let sum = evaluate_window(WindowFunc::Aggregate(AggFunc::Sum), &args(Some(&v), &[], &o)).unwrap();
        assert_eq!(ints(&sum), vec![Some(1), Some(5), Some(5), Some(10)]);
        let whole = evaluate_window(WindowFunc::Aggregate(AggFunc::Sum), &args(Some(&v), &[], &[])).unwrap();
        assert_eq!(ints(&whole), vec![Some(10); 4]);
    }

    #[test]
    fn count_star_per_partition() {
        let part = Column::int32(vec![Some(1), None, Some(1), None, None]);
        let p = [&part];
        let out = evaluate_window(WindowFunc::Aggregate(AggFunc::CountStar), &args(None, &p, &[])).unwrap();
        assert_eq!(ints(&out), vec![Some(2), Some(3), Some(2), Some(3), Some(3)]);
        assert!(evaluate_window(WindowFunc::Lag, &args(None, &p, &[])).is_err());
    }
}
