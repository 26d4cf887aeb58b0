//! Boolean connectives with Kleene three-valued logic, and null tests.

use columnar_model::{Column, EngineError, LogicalType, Result};

use crate::kernel_io::{output_len, place_output, row, NativeBuilder, NativeInput};

fn expect_boolean(column: &Column) -> Result<()> {
    if column.data_type() != &LogicalType::Boolean {
        return Err(EngineError::TypeMismatch(format!(
            "expected boolean operand, got {}",
            column.data_type()
        )));
    }
    Ok(())
}

fn kleene(
    left: &Column,
    right: &Column,
    f: impl Fn(Option<bool>, Option<bool>) -> Option<bool>,
) -> Result<Column> {
    expect_boolean(left)?;
    expect_boolean(right)?;
    let n = output_len(&[left, right])?;
    let a = NativeInput::<bool>::new(left)?;
    let b = NativeInput::<bool>::new(right)?;
    let mut out = NativeBuilder::<bool>::with_capacity(n);
    for i in 0..n {
        out.push(f(a.get(i), b.get(i)));
    }
    out.finish(&[left, right], LogicalType::Boolean)
}

/// `false AND null` is false; `true AND null` is null.
pub fn and_kleene(left: &Column, right: &Column) -> Result<Column> {
    kleene(left, right, |a, b| match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    })
}

/// `true OR null` is true; `false OR null` is null.
pub fn or_kleene(left: &Column, right: &Column) -> Result<Column> {
    kleene(left, right, |a, b| match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    })
}

pub fn not(column: &Column) -> Result<Column> {
    expect_boolean(column)?;
    let input = NativeInput::<bool>::new(column)?;
    let mut out = NativeBuilder::<bool>::with_capacity(column.len());
    for i in 0..column.len() {
        out.push(input.get(i).map(|v| !v));
    }
    out.finish(&[column], LogicalType::Boolean)
}

fn null_test(column: &Column, want_null: bool) -> Result<Column> {
    let bytes = (0..column.len())
        .map(|i| (column.is_null(row(column, i)) == want_null) as u8)
        .collect();
    place_output(&[column], LogicalType::Boolean, None, bytes)
}

/// Never null.
pub fn is_null(column: &Column) -> Result<Column> {
    null_test(column, true)
}

/// Never null.
pub fn is_not_null(column: &Column) -> Result<Column> {
    null_test(column, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::ScalarValue;

    fn tri() -> (Column, Column) {
        // Every combination of {true, false, null} x {true, false, null}.
        let l = [Some(true), Some(true), Some(true), Some(false), Some(false), Some(false), None, None, None];
        let r = [Some(true), Some(false), None, Some(true), Some(false), None, Some(true), Some(false), None];
        (Column::boolean(l.to_vec()), Column::boolean(r.to_vec()))
    }

    fn decode(c: &Column) -> Vec<Option<bool>> {
        c.values().unwrap().iter().map(|v| v.as_bool()).collect()
    }

    #[test]
    fn and_truth_table() {
        let (l, r) = tri();
        assert_eq!(
            decode(&and_kleene(&l, &r).unwrap()),
            vec![Some(true), Some(false), None, Some(false), Some(false), Some(false), None, Some(false), None]
        );
    }

    #[test]
    fn or_truth_table() {
        let (l, r) = tri();
        assert_eq!(
            decode(&or_kleene(&l, &r).unwrap()),
            vec![Some(true), Some(true), Some(true), Some(true), Some(false), None, Some(true), None, None]
        );
    }

    #[test]
    fn not_and_null_tests() {
        let c = Column::boolean(vec![Some(true), None, Some(false)]);
        assert_eq!(decode(&not(&c).unwrap()), vec![Some(false), None, Some(true)]);
        let s = Column::utf8(vec![None, Some("x")]);
        let nulls = is_null(&s).unwrap();
        assert_eq!(nulls.null_count(), 0);
        assert_eq!(nulls.values().unwrap(), vec![ScalarValue::Boolean(true), ScalarValue::Boolean(false)]);
        assert_eq!(is_not_null(&s).unwrap().native_values::<bool>().unwrap(), vec![false, true]);
        assert!(not(&Column::int32(vec![Some(1)])).is_err());
    }
}
