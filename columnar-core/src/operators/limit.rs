use columnar_model::{Batch, Result, SchemaRef};

use super::{BoxedOperator, Stage};
use crate::context::TaskContext;

/// Skips `skip` rows, then passes at most `fetch` rows. Stops pulling from
/// its input once `fetch` rows were produced.
pub struct LimitExec {
    input: BoxedOperator,
    schema: SchemaRef,
    skip: usize,
    fetch: Option<usize>,
    produced: usize,
}

impl LimitExec {
    pub fn new(input: BoxedOperator, skip: usize, fetch: Option<usize>) -> Self {
        let schema = input.schema().clone();
        Self {
            input,
            schema,
            skip,
            fetch,
            produced: 0,
        }
    }
}

impl Stage for LimitExec {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, _ctx: &TaskContext) -> Result<Option<Batch>> {
        loop {
            let remaining = match self.fetch {
                Some(fetch) if self.produced >= fetch => return Ok(None),
                Some(fetch) => fetch - self.produced,
                None => usize::MAX,
            };
            let Some(mut batch) = self.input.next()? else {
                return Ok(None);
            };
            if self.skip > 0 {
                let skipped = self.skip.min(batch.num_rows());
                self.skip -= skipped;
                batch = batch.slice(skipped, batch.num_rows() - skipped)?;
            }
            if batch.num_rows() == 0 {
                continue;
            }
            if batch.num_rows() > remaining {
                batch = batch.slice(0, remaining)?;
            }
            self.produced += batch.num_rows();
            return Ok(Some(batch));
        }
    }

    fn release(&mut self) {
        self.input.close();
    }

    fn estimated_rows(&self) -> Option<usize> {
        let input = self.input.estimated_rows().map(|n| n.saturating_sub(self.skip));
        match (input, self.fetch) {
            (Some(n), Some(f)) => Some(n.min(f)),
            (Some(n), None) => Some(n),
            (None, f) => f,
        }
    }
}
