use std::collections::VecDeque;

use crate::batch::Batch;
use crate::error::{EngineError, Result};
use crate::types::SchemaRef;

/// Stream of input batches with a schema known before the first pull.
///
/// Adapters for files or network formats implement this trait; the engine
/// never sees their formats.
pub trait BatchSource: Send {
    fn schema(&self) -> SchemaRef;

    /// `Ok(None)` marks end of stream.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Total rows if known up front, used for aggregate strategy selection.
    fn estimated_rows(&self) -> Option<usize> {
        None
    }
}

/// Batches held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: SchemaRef,
    batches: VecDeque<Batch>,
}

impl MemorySource {
    pub fn new(schema: SchemaRef, batches: Vec<Batch>) -> Result<Self> {
        if let Some(b) = batches.iter().find(|b| b.schema() != &schema) {
            return Err(EngineError::TypeMismatch(format!(
                "batch schema {:?} differs from source schema",
                b.schema().fields()
            )));
        }
        Ok(Self {
            schema,
            batches: batches.into(),
        })
    }

    /// Re-chunk one batch into slices of at most `rows` rows.
    pub fn chunked(batch: &Batch, rows: usize) -> Result<Self> {
        let rows = rows.max(1);
        let mut batches = Vec::new();
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = rows.min(batch.num_rows() - offset);
            batches.push(batch.slice(offset, len)?);
            offset += len;
        }
        Self::new(std::sync::Arc::clone(batch.schema()), batches)
    }
}

impl BatchSource for MemorySource {
    fn schema(&self) -> SchemaRef {
        std::sync::Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        Ok(self.batches.pop_front())
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(self.batches.iter().map(Batch::num_rows).sum())
    }
}
