//! Pull-based batch operators.
//!
//! Every operator is an [`OperatorNode`] wrapping a [`Stage`]. The node owns
//! the lifecycle shared by all operators:
//!
//! ```text
//! Idle -> Running -> Draining | Exhausted -> Closed
//! ```
//!
//! - cancellation and timeout are checked before every pull
//! - the first error is latched; later pulls return it again and never
//!   produce batches
//! - `release` runs exactly once, on explicit close, on error, or on drop
//!
//! Stages only implement the data path.

mod aggregate;
mod filter;
mod limit;
mod project;
mod scan;
mod sort;
mod window;

pub use aggregate::{AggregateExec, AggregateLayout, AggregateMode, AggregateStrategy};
pub use filter::FilterExec;
pub use limit::LimitExec;
pub use project::ProjectExec;
pub use scan::ScanExec;
pub use sort::SortExec;
pub use window::WindowExec;

use columnar_model::{Batch, EngineError, Result, SchemaRef};
use std::fmt;
use tracing::debug;

use crate::context::TaskContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorState {
    Idle,
    Running,
    /// A blocking operator has consumed its input and is emitting results.
    Draining,
    Exhausted,
    Closed,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorState::Idle => "idle",
            OperatorState::Running => "running",
            OperatorState::Draining => "draining",
            OperatorState::Exhausted => "exhausted",
            OperatorState::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub trait Operator: Send {
    fn name(&self) -> &'static str;

    fn schema(&self) -> &SchemaRef;

    /// Next batch, or `Ok(None)` at end of stream.
    fn next(&mut self) -> Result<Option<Batch>>;

    /// Release owned buffers and close the input. Idempotent.
    fn close(&mut self);

    fn state(&self) -> OperatorState;

    /// Rows this operator will produce, if known before execution.
    fn estimated_rows(&self) -> Option<usize> {
        None
    }
}

pub type BoxedOperator = Box<dyn Operator>;

/// The data path of one operator.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn schema(&self) -> &SchemaRef;

    fn poll(&mut self, ctx: &TaskContext) -> Result<Option<Batch>>;

    /// Drop buffered state and close inputs.
    fn release(&mut self);

    /// Whether the stage has finished consuming input and is only emitting.
    fn draining(&self) -> bool {
        false
    }

    fn estimated_rows(&self) -> Option<usize> {
        None
    }
}

pub struct OperatorNode<S: Stage> {
    stage: S,
    ctx: TaskContext,
    state: OperatorState,
    error: Option<EngineError>,
}

impl<S: Stage + 'static> OperatorNode<S> {
    pub fn new(stage: S, ctx: TaskContext) -> Self {
        Self {
            stage,
            ctx,
            state: OperatorState::Idle,
            error: None,
        }
    }

    pub fn boxed(stage: S, ctx: TaskContext) -> BoxedOperator {
        Box::new(Self::new(stage, ctx))
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    fn transition(&mut self, to: OperatorState) {
        if self.state != to {
            debug!("Operator {}: {} -> {}", self.stage.name(), self.state, to);
            self.state = to;
        }
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        debug!("Operator {} failed: {}", self.stage.name(), error);
        self.error = Some(error.clone());
        self.close_inner();
        error
    }

    fn close_inner(&mut self) {
        if self.state != OperatorState::Closed {
            self.stage.release();
            self.transition(OperatorState::Closed);
        }
    }
}

impl<S: Stage + 'static> Operator for OperatorNode<S> {
    fn name(&self) -> &'static str {
        self.stage.name()
    }

    fn schema(&self) -> &SchemaRef {
        self.stage.schema()
    }

    fn next(&mut self) -> Result<Option<Batch>> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        match self.state {
            OperatorState::Closed => {
                return Err(EngineError::InvalidArgument(format!(
                    "operator {} polled after close",
                    self.stage.name()
                )))
            }
            OperatorState::Exhausted => return Ok(None),
            OperatorState::Idle => self.transition(OperatorState::Running),
            OperatorState::Running | OperatorState::Draining => {}
        }

        if let Err(e) = self.ctx.checkpoint() {
            return Err(self.fail(e));
        }
        match self.stage.poll(&self.ctx) {
            Ok(Some(batch)) => {
                if self.stage.draining() {
                    self.transition(OperatorState::Draining);
                }
                Ok(Some(batch))
            }
            Ok(None) => {
                self.transition(OperatorState::Exhausted);
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn close(&mut self) {
        self.close_inner();
    }

    fn state(&self) -> OperatorState {
        self.state
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.stage.estimated_rows()
    }
}

impl<S: Stage> Drop for OperatorNode<S> {
    fn drop(&mut self) {
        if self.state != OperatorState::Closed {
            self.stage.release();
        }
    }
}

/// Emits a materialized result in chunks of at most `batch_size` rows.
#[derive(Debug, Default)]
struct Chunker {
    result: Option<Batch>,
    offset: usize,
}

impl Chunker {
    fn load(&mut self, batch: Batch) {
        self.result = Some(batch);
        self.offset = 0;
    }

    fn is_loaded(&self) -> bool {
        self.result.is_some()
    }

    fn next_chunk(&mut self, batch_size: usize) -> Result<Option<Batch>> {
        let Some(result) = &self.result else {
            return Ok(None);
        };
        if self.offset >= result.num_rows() {
            return Ok(None);
        }
        let len = batch_size.max(1).min(result.num_rows() - self.offset);
        let chunk = result.slice(self.offset, len)?;
        self.offset += len;
        Ok(Some(chunk))
    }

    fn clear(&mut self) {
        self.result = None;
    }
}

/// Pull every remaining batch from `input`.
fn drain(input: &mut BoxedOperator) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    while let Some(batch) = input.next()? {
        batches.push(batch);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnar_model::{Column, Schema};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        schema: SchemaRef,
        remaining: usize,
        fail_at: Option<usize>,
        releases: Arc<AtomicUsize>,
    }

    impl Stage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn schema(&self) -> &SchemaRef {
            &self.schema
        }

        fn poll(&mut self, _ctx: &TaskContext) -> Result<Option<Batch>> {
            if self.fail_at == Some(self.remaining) {
                return Err(EngineError::ArithmeticOverflow("boom".into()));
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Batch::from_columns([("x", Column::int32(vec![Some(1)]))])?))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn node(remaining: usize, fail_at: Option<usize>) -> (OperatorNode<Counting>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let stage = Counting {
            schema: Arc::new(Schema::empty()),
            remaining,
            fail_at,
            releases: Arc::clone(&releases),
        };
        (OperatorNode::new(stage, TaskContext::default()), releases)
    }

    #[test]
    fn lifecycle_releases_once() {
        let (mut op, releases) = node(2, None);
        assert_eq!(op.state(), OperatorState::Idle);
        assert!(op.next().unwrap().is_some());
        assert_eq!(op.state(), OperatorState::Running);
        assert!(op.next().unwrap().is_some());
        assert!(op.next().unwrap().is_none());
        assert_eq!(op.state(), OperatorState::Exhausted);
        assert!(op.next().unwrap().is_none());
        op.close();
        op.close();
        assert_eq!(op.state(), OperatorState::Closed);
        assert!(op.next().is_err());
        drop(op);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_is_latched() {
        let (mut op, releases) = node(3, Some(2));
        assert!(op.next().unwrap().is_some());
        let err = op.next().unwrap_err();
        assert!(matches!(err, EngineError::ArithmeticOverflow(_)));
        assert_eq!(op.next().unwrap_err(), err);
        assert_eq!(op.state(), OperatorState::Closed);
        drop(op);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_without_close_releases() {
        let (mut op, releases) = node(5, None);
        assert!(op.next().unwrap().is_some());
        drop(op);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_stops_pulling() {
        let (mut op, releases) = node(5, None);
        assert!(op.next().unwrap().is_some());
        op.ctx.cancellation().cancel();
        assert_eq!(op.next().unwrap_err(), EngineError::Cancelled);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(op.stage().remaining, 4);
    }
}
