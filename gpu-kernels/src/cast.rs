//! Cast kernel driven by a resolved [`CastPlan`].

use columnar_model::{CastPlan, Column, EngineError, Result};

use crate::kernel_io::place_column;

/// Cast `column` to `plan.to`. Fixed-width results stay next to their input.
pub fn cast(column: &Column, plan: &CastPlan) -> Result<Column> {
    if column.data_type() != &plan.from {
        return Err(EngineError::TypeMismatch(format!(
            "cast plan expects {}, got {}",
            plan.from,
            column.data_type()
        )));
    }
    place_column(&[column], plan.apply_column(column)?)
}
