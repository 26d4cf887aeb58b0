//! Accelerator backends.
//!
//! A backend only knows how to reserve whole arenas and copy bytes in and
//! out of them. Sub-allocation, accounting and spill live in the pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

/// Backend-assigned identifier of a reserved arena.
pub type ArenaId = u64;

pub trait DeviceBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Total bytes the backend is willing to hand out as arenas.
    fn capacity(&self) -> usize;

    /// Bytes currently reserved as arenas.
    fn reserved(&self) -> usize;

    fn reserve_arena(&self, bytes: usize) -> Result<ArenaId>;

    fn release_arena(&self, arena: ArenaId);

    /// Host -> device copy into `arena` at `offset`.
    fn write(&self, arena: ArenaId, offset: usize, src: &[u8]) -> Result<()>;

    /// Device -> host copy from `arena` at `offset`.
    fn read(&self, arena: ArenaId, offset: usize, dst: &mut [u8]) -> Result<()>;
}

/// In-process stand-in for an accelerator.
///
/// Arenas are plain host allocations. Faults can be injected so that the
/// device-failure paths of the engine are testable without hardware.
pub struct SimulatedDevice {
    capacity: usize,
    next_arena: AtomicU64,
    pending_faults: AtomicUsize,
    state: Mutex<SimulatedState>,
}

#[derive(Default)]
struct SimulatedState {
    arenas: HashMap<ArenaId, Arc<Mutex<Vec<u8>>>>,
    reserved: usize,
}

impl SimulatedDevice {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_arena: AtomicU64::new(1),
            pending_faults: AtomicUsize::new(0),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Make the next `count` copy operations fail with a device fault.
    pub fn inject_faults(&self, count: usize) {
        warn!("SimulatedDevice: injecting {} device faults", count);
        self.pending_faults.fetch_add(count, Ordering::SeqCst);
    }

    pub fn arena_count(&self) -> usize {
        self.state.lock().arenas.len()
    }

    fn take_fault(&self) -> Result<()> {
        let fired = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fired {
            return Err(MemoryError::DeviceFault(
                "simulated device copy failed".to_string(),
            ));
        }
        Ok(())
    }

    fn arena(&self, arena: ArenaId) -> Result<Arc<Mutex<Vec<u8>>>> {
        self.state
            .lock()
            .arenas
            .get(&arena)
            .cloned()
            .ok_or_else(|| MemoryError::InvalidRequest(format!("unknown arena {}", arena)))
    }
}

impl fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved())
            .finish()
    }
}

fn check_range(len: usize, offset: usize, count: usize) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(MemoryError::InvalidRequest(format!(
            "copy of {} bytes at offset {} exceeds arena of {} bytes",
            count, offset, len
        ))),
    }
}

impl DeviceBackend for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserved(&self) -> usize {
        self.state.lock().reserved
    }

    fn reserve_arena(&self, bytes: usize) -> Result<ArenaId> {
        let mut state = self.state.lock();
        let available = self.capacity.saturating_sub(state.reserved);
        if bytes > available {
            return Err(MemoryError::OutOfMemory {
                requested: bytes,
                available,
                budget: self.capacity,
            });
        }
        let id = self.next_arena.fetch_add(1, Ordering::Relaxed);
        state.arenas.insert(id, Arc::new(Mutex::new(vec![0u8; bytes])));
        state.reserved += bytes;
        debug!("SimulatedDevice: reserved arena {} ({} bytes)", id, bytes);
        Ok(id)
    }

    fn release_arena(&self, arena: ArenaId) {
        let mut state = self.state.lock();
        if let Some(buf) = state.arenas.remove(&arena) {
            state.reserved -= buf.lock().len();
            debug!("SimulatedDevice: released arena {}", arena);
        }
    }

    fn write(&self, arena: ArenaId, offset: usize, src: &[u8]) -> Result<()> {
        self.take_fault()?;
        let arena = self.arena(arena)?;
        let mut bytes = arena.lock();
        check_range(bytes.len(), offset, src.len())?;
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn read(&self, arena: ArenaId, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.take_fault()?;
        let arena = self.arena(arena)?;
        let bytes = arena.lock();
        check_range(bytes.len(), offset, dst.len())?;
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_capacity() {
        let dev = SimulatedDevice::new(1024);
        let a = dev.reserve_arena(1000).unwrap();
        assert!(matches!(
            dev.reserve_arena(100),
            Err(MemoryError::OutOfMemory { .. })
        ));
        dev.release_arena(a);
        assert_eq!(dev.reserved(), 0);
        assert!(dev.reserve_arena(100).is_ok());
    }

    #[test]
    fn write_then_read() {
        let dev = SimulatedDevice::new(1024);
        let a = dev.reserve_arena(64).unwrap();
        dev.write(a, 8, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 3];
        dev.read(a, 8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
        assert!(dev.write(a, 62, &[0; 4]).is_err());
    }

    #[test]
    fn injected_fault_fires_once() {
        let dev = SimulatedDevice::new(1024);
        let a = dev.reserve_arena(16).unwrap();
        dev.inject_faults(1);
        assert!(matches!(
            dev.write(a, 0, &[1]),
            Err(MemoryError::DeviceFault(_))
        ));
        assert!(dev.write(a, 0, &[1]).is_ok());
    }
}
