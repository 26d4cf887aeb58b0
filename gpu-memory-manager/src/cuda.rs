use cudarc::driver::{CudaDevice, CudaSlice};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::device::{ArenaId, DeviceBackend};
use crate::error::{MemoryError, Result};

/// CUDA device backend. Arenas are plain `cuMemAlloc` regions.
pub struct CudaBackend {
    device: Arc<CudaDevice>,
    capacity: usize,
    next_arena: AtomicU64,
    arenas: Mutex<HashMap<ArenaId, CudaSlice<u8>>>,
    reserved: Mutex<usize>,
}

fn fault(e: impl fmt::Display) -> MemoryError {
    MemoryError::DeviceFault(e.to_string())
}

impl CudaBackend {
    pub fn new(ordinal: usize, capacity: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal).map_err(fault)?;
        info!("CUDA backend on device {} ({} bytes)", ordinal, capacity);
        Ok(Self {
            device,
            capacity,
            next_arena: AtomicU64::new(1),
            arenas: Mutex::new(HashMap::new()),
            reserved: Mutex::new(0),
        })
    }
}

impl fmt::Debug for CudaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaBackend")
            .field("ordinal", &self.device.ordinal())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DeviceBackend for CudaBackend {
    fn name(&self) -> &str {
        "cuda"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserved(&self) -> usize {
        *self.reserved.lock()
    }

    fn reserve_arena(&self, bytes: usize) -> Result<ArenaId> {
        let mut reserved = self.reserved.lock();
        let available = self.capacity.saturating_sub(*reserved);
        if bytes > available {
            return Err(MemoryError::OutOfMemory {
                requested: bytes,
                available,
                budget: self.capacity,
            });
        }
        let slice = self.device.alloc_zeros::<u8>(bytes).map_err(fault)?;
        let id = self.next_arena.fetch_add(1, Ordering::Relaxed);
        self.arenas.lock().insert(id, slice);
        *reserved += bytes;
        debug!("CUDA: reserved arena {} ({} bytes)", id, bytes);
        Ok(id)
    }

    fn release_arena(&self, arena: ArenaId) {
        if let Some(slice) = self.arenas.lock().remove(&arena) {
            *self.reserved.lock() -= slice.len();
        }
    }

    fn write(&self, arena: ArenaId, offset: usize, src: &[u8]) -> Result<()> {
        let mut arenas = self.arenas.lock();
        let slice = arenas
            .get_mut(&arena)
            .ok_or_else(|| MemoryError::InvalidRequest(format!("unknown arena {}", arena)))?;
        if offset + src.len() > slice.len() {
            return Err(MemoryError::InvalidRequest(format!(
                "copy of {} bytes at offset {} exceeds arena",
                src.len(),
                offset
            )));
        }
        let mut view = slice.slice_mut(offset..offset + src.len());
        self.device
            .htod_sync_copy_into(src, &mut view)
            .map_err(fault)
    }

    fn read(&self, arena: ArenaId, offset: usize, dst: &mut [u8]) -> Result<()> {
        let arenas = self.arenas.lock();
        let slice = arenas
            .get(&arena)
            .ok_or_else(|| MemoryError::InvalidRequest(format!("unknown arena {}", arena)))?;
        if offset + dst.len() > slice.len() {
            return Err(MemoryError::InvalidRequest(format!(
                "copy of {} bytes at offset {} exceeds arena",
                dst.len(),
                offset
            )));
        }
        let view = slice.slice(offset..offset + dst.len());
        self.device.dtoh_sync_copy_into(&view, dst).map_err(fault)
    }
}
