//! Device kernel launcher.
//!
//! Stages host inputs into device memory (counted as transfers), pins every
//! input buffer for the duration of the launch so it cannot be spilled, runs
//! the kernel body and leaves fixed-width results device-resident. The
//! simulated accelerator computes on the host over mapped device memory;
//! results are never downloaded unless a host consumer asks for them.

use columnar_model::{Column, ColumnRef, EngineError, Result};
use gpu_memory_manager::{DevicePool, PinGuard};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Threads per block for elementwise kernels.
pub const BLOCK_SIZE: u32 = 256;

/// Compute an appropriate `(grid, block)` size for `n_rows`.
pub fn compute_launch_params(n_rows: usize) -> (u32, u32) {
    let rows = u32::try_from(n_rows).unwrap_or(u32::MAX);
    (rows.div_ceil(BLOCK_SIZE).max(1), BLOCK_SIZE)
}

pub struct DeviceLauncher {
    pool: Arc<DevicePool>,
    launches: AtomicU64,
    pending_faults: AtomicUsize,
}

impl DeviceLauncher {
    pub fn new(pool: Arc<DevicePool>) -> Self {
        Self {
            pool,
            launches: AtomicU64::new(0),
            pending_faults: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    /// Kernel launches issued so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Make the next `count` launches fail with a device fault.
    pub fn fail_next_launches(&self, count: usize) {
        warn!("DeviceLauncher: injecting {} launch faults", count);
        self.pending_faults.fetch_add(count, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Upload a host-resident fixed-width column. Other layouts are returned
    /// unchanged.
    pub fn stage(&self, column: &ColumnRef) -> Result<ColumnRef> {
        if column.data_type().is_fixed_width() && !column.is_device_backed() {
            column.to_device(&self.pool)
        } else {
            Ok(Arc::clone(column))
        }
    }

    /// Run `kernel` over `inputs` on the device.
    pub fn launch<F>(&self, name: &str, inputs: &[ColumnRef], kernel: F) -> Result<ColumnRef>
    where
        F: FnOnce(&[&Column]) -> Result<Column>,
    {
        let staged = inputs
            .iter()
            .map(|c| self.stage(c))
            .collect::<Result<Vec<_>>>()?;
        let _pins: Vec<PinGuard> = staged
            .iter()
            .filter_map(|c| c.device_buffer())
            .map(|b| b.pin().map_err(EngineError::from))
            .collect::<Result<Vec<_>>>()?;

        let rows = staged.iter().map(|c| c.len()).max().unwrap_or(0);
        let (grid, block) = compute_launch_params(rows);
        if self.take_fault() {
            warn!("Kernel {} failed to launch", name);
            return Err(EngineError::DeviceFault(format!("launch of kernel {} failed", name)));
        }
        self.launches.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Launching kernel {}: rows={} grid={} block={}",
            name, rows, grid, block
        );

        let refs: Vec<&Column> = staged.iter().map(|c| c.as_ref()).collect();
        let output = kernel(&refs)?;
        if output.data_type().is_fixed_width() && !output.is_device_backed() {
            let bytes = output.fixed_bytes()?.into_owned();
            return Ok(Arc::new(Column::from_kernel_output(
                &self.pool,
                output.data_type().clone(),
                output.validity().cloned(),
                &bytes,
            )?));
        }
        Ok(Arc::new(output))
    }
}

impl std::fmt::Debug for DeviceLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLauncher")
            .field("launches", &self.launches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arithmetic::{binary, ArithOp};
    use columnar_model::{LogicalType, NumericOptions, ScalarValue};
    use gpu_memory_manager::PoolConfig;

    fn launcher() -> DeviceLauncher {
        DeviceLauncher::new(DevicePool::simulated(PoolConfig {
            budget_bytes: 1 << 20,
            arena_bytes: 64 << 10,
            ..PoolConfig::default()
        }))
    }

    #[test]
    fn launch_params() {
        let (g, b) = compute_launch_params(1_000_000);
        assert_eq!(b, 256);
        assert_eq!(g, 3907);
        assert_eq!(compute_launch_params(0), (1, 256));
    }

    #[test]
    fn output_stays_on_device() {
        let l = launcher();
        let a: ColumnRef = Arc::new(Column::int64(vec![Some(1), Some(2), None]));
        let b: ColumnRef = Arc::new(Column::int64(vec![Some(10)]));
        let out = l
            .launch("add", &[a, b], |cols| {
                binary(ArithOp::Add, cols[0], cols[1], &LogicalType::Int64, &NumericOptions::default())
            })
            .unwrap();
        assert!(out.is_device_backed());
        assert_eq!(l.launches(), 1);
        let stats = l.pool().stats();
        assert_eq!(stats.host_to_device_copies, 2);
        assert_eq!(stats.device_to_host_copies, 0);
        assert_eq!(out.value(1).unwrap(), ScalarValue::Int64(12));
        assert!(out.is_null(2));
    }

    #[test]
    fn injected_fault_fails_launch_once() {
        let l = launcher();
        let a: ColumnRef = Arc::new(Column::int32(vec![Some(1)]));
        l.fail_next_launches(1);
        let err = l.launch("noop", &[Arc::clone(&a)], |cols| cols[0].slice(0, 1)).unwrap_err();
        assert!(matches!(err, EngineError::DeviceFault(_)));
        assert!(l.launch("noop", &[a], |cols| cols[0].slice(0, 1)).is_ok());
    }
}
