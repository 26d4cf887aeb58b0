//! Filter compaction: keep rows whose predicate is true (null counts as false).

use columnar_model::{Batch, Column, EngineError, LogicalType, Result};

use crate::kernel_io::NativeInput;

/// Row indices selected by a Boolean mask.
pub fn selection_indices(mask: &Column) -> Result<Vec<usize>> {
    if mask.data_type() != &LogicalType::Boolean {
        return Err(EngineError::TypeMismatch(format!(
            "filter predicate must be boolean, got {}",
            mask.data_type()
        )));
    }
    let input = NativeInput::<bool>::new(mask)?;
    Ok((0..mask.len())
        .filter(|&i| input.get(i) == Some(true))
        .collect())
}

pub fn filter(column: &Column, mask: &Column) -> Result<Column> {
    check_len(column.len(), mask.len())?;
    column.take(&selection_indices(mask)?)
}

/// Compacts every column of `batch`. A mask selecting every row returns the
/// batch unchanged.
pub fn filter_batch(batch: &Batch, mask: &Column) -> Result<Batch> {
    check_len(batch.num_rows(), mask.len())?;
    let indices = selection_indices(mask)?;
    if indices.len() == batch.num_rows() {
        return Ok(batch.clone());
    }
    batch.take(&indices)
}

fn check_len(rows: usize, mask: usize) -> Result<()> {
    if rows != mask {
        return Err(EngineError::InvalidArgument(format!(
            "filter mask has {} rows, input has {}",
            mask, rows
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::ScalarValue;

    #[test]
    fn null_predicate_drops_row() {
        let mask = Column::boolean(vec![Some(true), None, Some(false), Some(true)]);
        assert_eq!(selection_indices(&mask).unwrap(), vec![0, 3]);
        let col = Column::utf8(vec![Some("a"), Some("b"), Some("c"), None]);
        let out = filter(&col, &mask).unwrap();
        assert_eq!(out.values().unwrap(), vec![ScalarValue::Utf8("a".into()), ScalarValue::Null]);
    }

    #[test]
    fn batch_compaction() {
        let batch = Batch::from_columns([
            ("a", Column::int64(vec![Some(1), Some(2), Some(3)])),
            ("b", Column::float64(vec![Some(0.5), None, Some(1.5)])),
        ])
        .unwrap();
        let out = filter_batch(&batch, &Column::boolean(vec![Some(false), Some(true), Some(true)])).unwrap();
        assert_eq!(out.num_rows(), 2);
        assert_eq!(
            out.rows().unwrap(),
            vec![
                vec![ScalarValue::Int64(2), ScalarValue::Null],
                vec![ScalarValue::Int64(3), ScalarValue::Float64(1.5)],
            ]
        );
        let all = filter_batch(&batch, &Column::boolean(vec![Some(true); 3])).unwrap();
        assert_eq!(all, batch);
    }

    #[test]
    fn mask_must_match() {
        let col = Column::int32(vec![Some(1), Some(2)]);
        assert!(filter(&col, &Column::boolean(vec![Some(true)])).is_err());
        assert!(selection_indices(&col).is_err());
    }
}
