//! Pipeline sinks.
//!
//! One pipeline runs per task on its own worker thread. Pipelines never
//! share batches; the device pool is the only state they have in common.

use columnar_model::{Batch, EngineError, Result, Scalar};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::operators::{BoxedOperator, Operator};

/// Materializing sink: pull every batch, then close the pipeline.
pub fn collect(op: &mut dyn Operator) -> Result<Vec<Batch>> {
    let start = Instant::now();
    let mut batches = Vec::new();
    let result = loop {
        match op.next() {
            Ok(Some(batch)) => batches.push(batch),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    op.close();
    result?;
    debug!(
        "Collected {} batches ({} rows) from {} in {:?}",
        batches.len(),
        batches.iter().map(Batch::num_rows).sum::<usize>(),
        op.name(),
        start.elapsed()
    );
    Ok(batches)
}

/// Collect into one batch with the pipeline's schema.
pub fn collect_batch(op: &mut dyn Operator) -> Result<Batch> {
    let schema = op.schema().clone();
    let batches = collect(op)?;
    Batch::concat(schema, &batches)
}

/// Whole-stream reduction: the pipeline must produce one row of one column.
pub fn reduce(op: &mut dyn Operator) -> Result<Scalar> {
    let batch = collect_batch(op)?;
    if batch.num_rows() != 1 || batch.num_columns() != 1 {
        return Err(EngineError::InvalidArgument(format!(
            "reduction produced {} rows x {} columns, expected a single value",
            batch.num_rows(),
            batch.num_columns()
        )));
    }
    let column = batch.column(0)?;
    Scalar::new(column.data_type().clone(), column.value(0)?)
}

/// Run each pipeline to completion on a blocking worker thread. Results come
/// back in input order; the first failure is returned.
pub async fn execute_partitions(pipelines: Vec<BoxedOperator>) -> Result<Vec<Vec<Batch>>> {
    let count = pipelines.len();
    info!("Executing {} partitions", count);
    let mut tasks = JoinSet::new();
    for (i, mut op) in pipelines.into_iter().enumerate() {
        tasks.spawn_blocking(move || (i, collect(op.as_mut())));
    }

    let mut results: Vec<Option<Vec<Batch>>> = vec![None; count];
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, Ok(batches))) => results[i] = Some(batches),
            Ok((i, Err(e))) => {
                warn!("Partition {} failed: {}", i, e);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(EngineError::Internal(format!("partition task failed: {}", e)));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(results.into_iter().map(Option::unwrap_or_default).collect())
}
