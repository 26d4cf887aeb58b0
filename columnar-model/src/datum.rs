use std::sync::Arc;

use crate::column::{Column, ColumnRef};
use crate::error::Result;
use crate::scalar::Scalar;
use crate::types::LogicalType;

/// Result of evaluating an expression: a full column or a single scalar.
#[derive(Debug, Clone)]
pub enum Datum {
    Column(ColumnRef),
    Scalar(Arc<Scalar>),
}

impl Datum {
    pub fn data_type(&self) -> &LogicalType {
        match self {
            Datum::Column(c) => c.data_type(),
            Datum::Scalar(s) => s.data_type(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Datum::Scalar(_))
    }

    /// Column view; scalars are broadcast to `len` host rows.
    pub fn into_column(self, len: usize) -> Result<ColumnRef> {
        match self {
            Datum::Column(c) => Ok(c),
            Datum::Scalar(s) => Ok(Arc::new(s.to_column(len)?)),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Datum::Column(c) => Some(c),
            Datum::Scalar(_) => None,
        }
    }
}

impl From<Column> for Datum {
    fn from(c: Column) -> Self {
        Datum::Column(Arc::new(c))
    }
}

impl From<ColumnRef> for Datum {
    fn from(c: ColumnRef) -> Self {
        Datum::Column(c)
    }
}

impl From<Scalar> for Datum {
    fn from(s: Scalar) -> Self {
        Datum::Scalar(Arc::new(s))
    }
}
