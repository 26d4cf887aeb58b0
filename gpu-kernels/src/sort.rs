//! Sort kernels.
//!
//! A single key of 64 bits or less is sorted with an LSB radix sort (256-way,
//! 1 byte per pass, 8 passes for a 64-bit key) over an order-preserving
//! unsigned encoding. Everything else uses a stable comparator sort. Both
//! paths are stable, so equal keys keep their input order.

use columnar_model::{Batch, Column, EngineError, LogicalType, Result, ScalarValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::trace;

/// Number of radix bits processed per pass.
pub const RADIX_BITS: u32 = 8;
/// Number of buckets per pass.
pub const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
/// Number of passes needed for a 64-bit key.
pub const RADIX_PASSES: u32 = 64 / RADIX_BITS;

const SIGN: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortOptions {
    pub descending: bool,
    /// Nulls sort before every value (regardless of direction).
    pub nulls_first: bool,
}

impl SortOptions {
    pub fn asc() -> Self {
        Self::default()
    }

    pub fn desc() -> Self {
        Self {
            descending: true,
            nulls_first: false,
        }
    }
}

/// Total order over non-null values of one type. NaN sorts above every
/// other float, and lists and structs compare lexicographically.
pub fn compare_values(a: &ScalarValue, b: &ScalarValue) -> Ordering {
    use ScalarValue as V;
    match (a, b) {
        (V::Null, V::Null) => Ordering::Equal,
        (V::Null, _) => Ordering::Less,
        (_, V::Null) => Ordering::Greater,
        (V::Boolean(x), V::Boolean(y)) => x.cmp(y),
        (V::Int32(x), V::Int32(y)) | (V::Date32(x), V::Date32(y)) => x.cmp(y),
        (V::Int64(x), V::Int64(y)) | (V::Timestamp(x), V::Timestamp(y)) => x.cmp(y),
        (V::Float64(x), V::Float64(y)) => x.total_cmp(y),
        (V::Decimal(x), V::Decimal(y)) => x.cmp(y),
        (V::Utf8(x), V::Utf8(y)) => x.cmp(y),
        (V::Binary(x), V::Binary(y)) => x.cmp(y),
        (V::List(x), V::List(y)) | (V::Struct(x), V::Struct(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}

/// Compare with null placement and direction applied.
pub fn compare_with_options(a: &ScalarValue, b: &ScalarValue, options: SortOptions) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if options.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if options.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => {
            let o = compare_values(a, b);
            if options.descending {
                o.reverse()
            } else {
                o
            }
        }
    }
}

fn encode_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN != 0 {
        !bits
    } else {
        bits | SIGN
    }
}

/// Order-preserving unsigned keys for columns of at most 64 bits.
fn radix_keys(column: &Column) -> Result<Option<Vec<u64>>> {
    let keys = match column.data_type() {
        LogicalType::Boolean => column
            .native_values::<bool>()?
            .into_iter()
            .map(u64::from)
            .collect(),
        LogicalType::Int32 | LogicalType::Date32 => column
            .native_values::<i32>()?
            .into_iter()
            .map(|v| (v as i64 as u64) ^ SIGN)
            .collect(),
        LogicalType::Int64 | LogicalType::Timestamp => column
            .native_values::<i64>()?
            .into_iter()
            .map(|v| (v as u64) ^ SIGN)
            .collect(),
        LogicalType::Float64 => column
            .native_values::<f64>()?
            .into_iter()
            .map(encode_f64)
            .collect(),
        _ => return Ok(None),
    };
    Ok(Some(keys))
}

/// Stable LSB radix sort; returns the permutation of `keys`. Passes in
/// which every key lands in one bucket are skipped.
pub fn radix_sort_indices(keys: &[u64]) -> Vec<usize> {
    let n = keys.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut scratch = vec![0usize; n];
    for pass in 0..RADIX_PASSES {
        let shift = pass * RADIX_BITS;
        let bucket = |i: usize| ((keys[i] >> shift) as usize) & (RADIX_BUCKETS - 1);

        let mut histogram = [0usize; RADIX_BUCKETS];
        for &i in &order {
            histogram[bucket(i)] += 1;
        }
        if histogram.iter().any(|&c| c == n) {
            continue;
        }
        let mut offset = 0;
        for slot in histogram.iter_mut() {
            let count = *slot;
            *slot = offset;
            offset += count;
        }
        for &i in &order {
            let b = bucket(i);
            scratch[histogram[b]] = i;
            histogram[b] += 1;
        }
        std::mem::swap(&mut order, &mut scratch);
    }
    order
}

fn radix_path(column: &Column, keys: Vec<u64>, options: SortOptions) -> Vec<usize> {
    let (valid, nulls): (Vec<usize>, Vec<usize>) = (0..column.len()).partition(|&i| column.is_valid(i));
    let valid_keys: Vec<u64> = valid
        .iter()
        .map(|&i| if options.descending { !keys[i] } else { keys[i] })
        .collect();
    let sorted = radix_sort_indices(&valid_keys).into_iter().map(|j| valid[j]);
    if options.nulls_first {
        nulls.into_iter().chain(sorted).collect()
    } else {
        sorted.chain(nulls).collect()
    }
}

/// Permutation that sorts rows by `keys`, the first key most significant.
pub fn sort_indices(keys: &[(&Column, SortOptions)]) -> Result<Vec<usize>> {
    let len = match keys.first() {
        Some((c, _)) => c.len(),
        None => return Err(EngineError::InvalidArgument("sort needs at least one key".into())),
    };
    if let Some((c, _)) = keys.iter().find(|(c, _)| c.len() != len) {
        return Err(EngineError::InvalidArgument(format!(
            "sort keys have {} and {} rows",
            len,
            c.len()
        )));
    }

    if let [(column, options)] = keys {
        if let Some(encoded) = radix_keys(column)? {
            trace!("Radix sorting {} rows", len);
            return Ok(radix_path(column, encoded, *options));
        }
    }

    let values = keys
        .iter()
        .map(|(c, _)| c.values())
        .collect::<Result<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| {
        keys.iter()
            .zip(&values)
            .map(|((_, opts), vals)| compare_with_options(&vals[a], &vals[b], *opts))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    Ok(order)
}

/// Sort a batch by `(column index, options)` keys.
pub fn sort_batch(batch: &Batch, keys: &[(usize, SortOptions)]) -> Result<Batch> {
    let columns = keys
        .iter()
        .map(|&(i, o)| batch.column(i).map(|c| (c.as_ref(), o)))
        .collect::<Result<Vec<_>>>()?;
    batch.take(&sort_indices(&columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radix_passes() {
        assert_eq!(RADIX_PASSES, 8, "8 passes x 8 bits = 64-bit key");
        assert_eq!(radix_sort_indices(&[3, 1 << 40, 0, 1]), vec![2, 3, 0, 1]);
    }

    #[test]
    fn radix_matches_comparator() {
        let data = vec![Some(5i64), Some(-3), None, Some(i64::MIN), Some(5), Some(0), Some(i64::MAX)];
        let col = Column::int64(data.clone());
        let order = sort_indices(&[(&col, SortOptions::asc())]).unwrap();
        assert_eq!(order, vec![3, 1, 5, 0, 4, 6, 2]);
        let desc = sort_indices(&[(&col, SortOptions { descending: true, nulls_first: true })]).unwrap();
        assert_eq!(desc, vec![2, 6, 0, 4, 5, 1, 3]);
    }

    #[test]
    fn floats_total_order() {
        let col = Column::float64(vec![Some(1.5), Some(f64::NAN), Some(-0.0), Some(-2.0), Some(f64::NEG_INFINITY)]);
        let order = sort_indices(&[(&col, SortOptions::asc())]).unwrap();
        assert_eq!(order, vec![4, 3, 2, 0, 1]);
    }

    #[test]
    fn multi_key_stable() {
        let a = Column::utf8(vec![Some("b"), Some("a"), Some("b"), None]);
        let b = Column::int32(vec![Some(2), Some(9), Some(1), Some(0)]);
        let order = sort_indices(&[(&a, SortOptions::asc()), (&b, SortOptions::desc())]).unwrap();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn sort_batch_by_decimal() {
        let batch = Batch::from_columns([
            ("d", Column::decimal(10, 2, vec![Some(300), Some(-100), Some(200)]).unwrap()),
            ("i", Column::int32(vec![Some(0), Some(1), Some(2)])),
        ])
        .unwrap();
        let out = sort_batch(&batch, &[(0, SortOptions::asc())]).unwrap();
        assert_eq!(out.column(1).unwrap().native_values::<i32>().unwrap(), vec![1, 2, 0]);
        assert!(sort_indices(&[]).is_err());
    }
}
