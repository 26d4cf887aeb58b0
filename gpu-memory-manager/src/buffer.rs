use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::error::{MemoryError, Result};
use crate::pool::{DeviceBlock, DevicePool, Spillable};

enum Residency {
    Device(DeviceBlock),
    /// Spilled; contents live on host until the next device access.
    Host(Vec<u8>),
}

struct BufferSlot {
    id: u64,
    pool: Arc<DevicePool>,
    len: usize,
    residency: Mutex<Residency>,
    pins: AtomicUsize,
}

/// Immutable, reference-counted column storage in device memory.
///
/// Clones share the same storage. The pool may spill an unpinned buffer to
/// host at any time; every read path copies it back first.
#[derive(Clone)]
pub struct DeviceBuffer {
    slot: Arc<BufferSlot>,
}

/// Keeps a buffer resident on device while held.
pub struct PinGuard {
    slot: Arc<BufferSlot>,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.slot.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DeviceBuffer {
    /// Host -> device upload. Counted as a transfer.
    pub fn upload(pool: &Arc<DevicePool>, bytes: &[u8]) -> Result<Self> {
        let mut block = pool.allocate(bytes.len())?;
        block.upload(0, bytes)?;
        Ok(Self::register(pool, block))
    }

    /// Wrap the output of a device kernel. Not counted as a host transfer.
    pub fn from_kernel(pool: &Arc<DevicePool>, bytes: &[u8]) -> Result<Self> {
        let mut block = pool.allocate(bytes.len())?;
        block.write(0, bytes)?;
        Ok(Self::register(pool, block))
    }

    fn register(pool: &Arc<DevicePool>, block: DeviceBlock) -> Self {
        let slot = Arc::new(BufferSlot {
            id: pool.next_buffer_id(),
            pool: Arc::clone(pool),
            len: block.len(),
            residency: Mutex::new(Residency::Device(block)),
            pins: AtomicUsize::new(0),
        });
        slot.register();
        trace!("DeviceBuffer {} created ({} bytes)", slot.id, slot.len);
        Self { slot }
    }

    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn len(&self) -> usize {
        self.slot.len
    }

    pub fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.slot.pool
    }

    pub fn is_resident(&self) -> bool {
        matches!(*self.slot.residency.lock(), Residency::Device(_))
    }

    pub fn is_pinned(&self) -> bool {
        self.slot.pins.load(Ordering::Acquire) > 0
    }

    /// Bring the buffer back to device memory if it was spilled, and pin it.
    pub fn pin(&self) -> Result<PinGuard> {
        let mut residency = self.slot.residency.lock();
        if let Residency::Host(bytes) = &*residency {
            debug!("Rematerializing spilled buffer {}", self.slot.id);
            let mut block = self.slot.pool.allocate(bytes.len())?;
            block.upload(0, bytes)?;
            *residency = Residency::Device(block);
            self.slot.pool.note_rematerialization();
            self.slot.register();
        }
        self.slot.pins.fetch_add(1, Ordering::AcqRel);
        drop(residency);
        self.slot.pool.touch(self.slot.id);
        Ok(PinGuard {
            slot: Arc::clone(&self.slot),
        })
    }

    pub fn ensure_resident(&self) -> Result<()> {
        self.pin().map(drop)
    }

    /// Device -> host download. Counted as a transfer.
    pub fn download(&self) -> Result<Vec<u8>> {
        let _pin = self.pin()?;
        let residency = self.slot.residency.lock();
        match &*residency {
            Residency::Device(block) => {
                let mut out = vec![0u8; self.slot.len];
                block.download(0, &mut out)?;
                Ok(out)
            }
            Residency::Host(bytes) => Ok(bytes.clone()),
        }
    }

    /// Contents as seen by a device kernel. Not counted as a host transfer.
    pub fn kernel_bytes(&self) -> Result<Vec<u8>> {
        let _pin = self.pin()?;
        let residency = self.slot.residency.lock();
        match &*residency {
            Residency::Device(block) => block.read_all(),
            Residency::Host(bytes) => Ok(bytes.clone()),
        }
    }

    /// Read `dst.len()` bytes starting at `offset`.
    pub fn read_range(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let residency = self.slot.residency.lock();
        match &*residency {
            Residency::Device(block) => block.read(offset, dst),
            Residency::Host(bytes) => {
                let end = offset
                    .checked_add(dst.len())
                    .filter(|&end| end <= bytes.len())
                    .ok_or_else(|| {
                        MemoryError::InvalidRequest(format!(
                            "read of {} bytes at {} outside buffer of {} bytes",
                            dst.len(),
                            offset,
                            bytes.len()
                        ))
                    })?;
                dst.copy_from_slice(&bytes[offset..end]);
                Ok(())
            }
        }
    }

    /// Spill to host now. Returns the device bytes freed (0 if pinned).
    pub fn spill(&self) -> Result<usize> {
        self.slot.spill()
    }
}

impl BufferSlot {
    fn register(self: &Arc<Self>) {
        let strong: Arc<dyn Spillable> = Arc::clone(self) as Arc<dyn Spillable>;
        let weak: Weak<dyn Spillable> = Arc::downgrade(&strong);
        drop(strong);
        self.pool.register_spillable(self.id, weak);
    }
}

impl Spillable for BufferSlot {
    fn spill(&self) -> Result<usize> {
        let Some(mut residency) = self.residency.try_lock() else {
            return Ok(0);
        };
        // Pins are taken under the residency lock, so this check is stable.
        if self.pins.load(Ordering::Acquire) > 0 {
            return Ok(0);
        }
        let (host, freed) = match &*residency {
            Residency::Device(block) => {
                let mut host = vec![0u8; self.len];
                block.download(0, &mut host)?;
                (host, block.capacity())
            }
            Residency::Host(_) => return Ok(0),
        };
        let old = std::mem::replace(&mut *residency, Residency::Host(host));
        drop(residency);
        drop(old);
        self.pool.unregister(self.id);
        self.pool.note_spill(freed);
        debug!("Spilled buffer {} ({} bytes) to host", self.id, freed);
        Ok(freed)
    }

    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

impl Drop for BufferSlot {
    fn drop(&mut self) {
        self.pool.unregister(self.id);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.slot.id)
            .field("len", &self.slot.len)
            .field("resident", &self.is_resident())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    fn pool(budget: usize) -> Arc<DevicePool> {
        DevicePool::simulated(PoolConfig {
            budget_bytes: budget,
            arena_bytes: 4 << 10,
            size_classes: vec![1 << 10],
            spill_enabled: true,
            transfer_streams: 2,
        })
    }

    #[test]
    fn upload_download() {
        let pool = pool(16 << 10);
        let buf = DeviceBuffer::upload(&pool, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.download().unwrap(), vec![1, 2, 3, 4]);
        let mut two = [0u8; 2];
        buf.read_range(1, &mut two).unwrap();
        assert_eq!(two, [2, 3]);
        let stats = pool.stats();
        assert_eq!(stats.host_to_device_copies, 1);
        assert_eq!(stats.device_to_host_copies, 1);
    }

    #[test]
    fn kernel_output_is_not_a_transfer() {
        let pool = pool(16 << 10);
        let buf = DeviceBuffer::from_kernel(&pool, &[5; 8]).unwrap();
        assert_eq!(buf.kernel_bytes().unwrap(), vec![5; 8]);
        assert_eq!(pool.stats().host_to_device_copies, 0);
        assert_eq!(pool.stats().device_to_host_copies, 0);
    }

    #[test]
    fn pressure_spills_lru_and_rematerializes() {
        let pool = pool(2 << 10);
        let first = DeviceBuffer::upload(&pool, &[1u8; 600]).unwrap();
        let second = DeviceBuffer::upload(&pool, &[2u8; 600]).unwrap();
        // Budget holds two slabs; the third allocation must spill `first`.
        let third = DeviceBuffer::upload(&pool, &[3u8; 600]).unwrap();
        assert!(!first.is_resident());
        assert!(second.is_resident());
        assert!(third.is_resident());
        assert_eq!(pool.stats().spills, 1);

        // Reading `first` brings it back, spilling `second`.
        assert_eq!(first.download().unwrap(), vec![1u8; 600]);
        assert!(first.is_resident());
        assert!(!second.is_resident());
        assert_eq!(pool.stats().rematerializations, 1);
        assert_eq!(second.download().unwrap(), vec![2u8; 600]);
    }

    #[test]
    fn pinned_buffers_are_never_spilled() {
        let pool = pool(2 << 10);
        let a = DeviceBuffer::upload(&pool, &[1u8; 600]).unwrap();
        let b = DeviceBuffer::upload(&pool, &[2u8; 600]).unwrap();
        let _ga = a.pin().unwrap();
        let _gb = b.pin().unwrap();
        let err = DeviceBuffer::upload(&pool, &[3u8; 600]).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }));
        assert!(a.is_resident() && b.is_resident());
    }

    #[test]
    fn dropping_buffer_frees_and_unregisters() {
        let pool = pool(16 << 10);
        let buf = DeviceBuffer::upload(&pool, &[0u8; 100]).unwrap();
        let shared = buf.clone();
        drop(buf);
        assert_eq!(pool.spillable_count(), 1);
        drop(shared);
        assert_eq!(pool.spillable_count(), 0);
        assert_eq!(pool.stats().in_use_bytes, 0);
    }

    #[test]
    fn device_fault_surfaces() {
        let device = Arc::new(crate::device::SimulatedDevice::new(1 << 20));
        let pool = DevicePool::new(
            device.clone(),
            PoolConfig {
                arena_bytes: 4 << 10,
                ..PoolConfig::default()
            },
        );
        let buf = DeviceBuffer::upload(&pool, &[1, 2, 3]).unwrap();
        device.inject_faults(1);
        assert!(matches!(buf.download(), Err(MemoryError::DeviceFault(_))));
        assert_eq!(buf.download().unwrap(), vec![1, 2, 3]);
    }
}
