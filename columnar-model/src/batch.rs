//! Batches: named columns sharing one row count.

use gpu_memory_manager::DevicePool;
use std::sync::Arc;

use crate::column::{Column, ColumnRef};
use crate::error::{EngineError, Result};
use crate::types::{Field, Schema, SchemaRef};
use crate::value::ScalarValue;

/// Immutable once built; every transform yields a new batch.
#[derive(Debug, Clone)]
pub struct Batch {
    schema: SchemaRef,
    columns: Vec<ColumnRef>,
    num_rows: usize,
}

impl Batch {
    pub fn try_new(schema: SchemaRef, columns: Vec<ColumnRef>) -> Result<Self> {
        if schema.len() != columns.len() {
            return Err(EngineError::InvalidArgument(format!(
                "schema has {} fields but {} columns were given",
                schema.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map_or(0, |c| c.len());
        for (field, column) in schema.fields().iter().zip(&columns) {
            if column.len() != num_rows {
                return Err(EngineError::InvalidArgument(format!(
                    "column '{}' has {} rows, expected {}",
                    field.name,
                    column.len(),
                    num_rows
                )));
            }
            if column.data_type() != &field.data_type {
                return Err(EngineError::TypeMismatch(format!(
                    "column '{}' is {}, schema declares {}",
                    field.name,
                    column.data_type(),
                    field.data_type
                )));
            }
            if !field.nullable && column.null_count() > 0 {
                return Err(EngineError::InvalidArgument(format!(
                    "non-nullable column '{}' contains nulls",
                    field.name
                )));
            }
        }
        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Batch with an explicit row count and no columns (e.g. `count(*)` input).
    pub fn empty_with_rows(num_rows: usize) -> Self {
        Self {
            schema: Arc::new(Schema::empty()),
            columns: Vec::new(),
            num_rows,
        }
    }

    /// Nullable fields named after the given columns.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut fields = Vec::new();
        let mut cols = Vec::new();
        for (name, column) in columns {
            fields.push(Field::new(name, column.data_type().clone(), true));
            cols.push(Arc::new(column));
        }
        Self::try_new(Arc::new(Schema::new(fields)), cols)
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> Result<&ColumnRef> {
        self.columns.get(i).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "column index {} out of range ({} columns)",
                i,
                self.columns.len()
            ))
        })
    }

    pub fn column_by_name(&self, name: &str) -> Result<&ColumnRef> {
        self.column(self.schema.index_of(name)?)
    }

    pub fn project(&self, indices: &[usize]) -> Result<Batch> {
        let columns = indices
            .iter()
            .map(|&i| self.column(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            schema: Arc::new(self.schema.project(indices)?),
            columns,
            num_rows: self.num_rows,
        })
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<Batch> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.slice(offset, len).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: len,
        })
    }

    pub fn take(&self, indices: &[usize]) -> Result<Batch> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.take(indices).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: indices.len(),
        })
    }

    pub fn concat(schema: SchemaRef, batches: &[Batch]) -> Result<Batch> {
        if batches.is_empty() {
            let columns = schema
                .fields()
                .iter()
                .map(|f| Column::new_null(f.data_type.clone(), 0).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            return Batch::try_new(schema, columns);
        }
        let columns = (0..schema.len())
            .map(|i| {
                let parts: Vec<&Column> = batches.iter().map(|b| b.columns[i].as_ref()).collect();
                Column::concat(&parts).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        Batch::try_new(schema, columns)
    }

    pub fn to_device(&self, pool: &Arc<DevicePool>) -> Result<Batch> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.to_device(pool))
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: self.num_rows,
        })
    }

    pub fn to_host(&self) -> Result<Batch> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.to_host())
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: self.num_rows,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(|c| c.byte_size()).sum()
    }

    /// Row-major values, mainly for tests and display.
    pub fn rows(&self) -> Result<Vec<Vec<ScalarValue>>> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.values())
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.num_rows)
            .map(|r| columns.iter().map(|c| c[r].clone()).collect())
            .collect())
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
            && self.num_rows == other.num_rows
            && self.columns.iter().zip(&other.columns).all(|(a, b)| a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalType;

    fn sample() -> Batch {
        Batch::from_columns([
            ("a", Column::int64(vec![Some(1), None, Some(4)])),
            ("b", Column::utf8(vec![Some("x"), Some("y"), None])),
        ])
        .unwrap()
    }

    #[test]
    fn row_counts_must_match() {
        let err = Batch::from_columns([
            ("a", Column::int64(vec![Some(1)])),
            ("b", Column::int64(vec![Some(1), Some(2)])),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn schema_types_are_checked() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", LogicalType::Int32, true)]));
        let err = Batch::try_new(schema, vec![Arc::new(Column::int64(vec![Some(1)]))]).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch(_)));

        let schema = Arc::new(Schema::new(vec![Field::new("a", LogicalType::Int64, false)]));
        assert!(Batch::try_new(schema, vec![Arc::new(Column::int64(vec![None]))]).is_err());
    }

    #[test]
    fn project_slice_take() {
        let b = sample();
        let p = b.project(&[1]).unwrap();
        assert_eq!(p.schema().field(0).unwrap().name, "b");
        let s = b.slice(1, 2).unwrap();
        assert_eq!(s.num_rows(), 2);
        assert_eq!(s.rows().unwrap()[0], vec![ScalarValue::Null, "y".into()]);
        let t = b.take(&[2, 2]).unwrap();
        assert_eq!(t.rows().unwrap()[1], vec![4i64.into(), ScalarValue::Null]);
    }

    #[test]
    fn concat_batches() {
        let b = sample();
        let c = Batch::concat(Arc::clone(b.schema()), &[b.clone(), b.slice(0, 1).unwrap()]).unwrap();
        assert_eq!(c.num_rows(), 4);
        let empty = Batch::concat(Arc::clone(b.schema()), &[]).unwrap();
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 2);
    }
}
