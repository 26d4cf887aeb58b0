use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::device::{ArenaId, DeviceBackend};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

/// Host <-> device copy engine.
///
/// Bounds the number of copies in flight to the number of transfer streams
/// and keeps per-direction byte counters. Callers must not hold the pool
/// lock while transferring.
pub struct TransferQueue {
    backend: Arc<dyn DeviceBackend>,
    in_flight: Mutex<usize>,
    slot_freed: Condvar,
    num_streams: usize,
    h2d_bytes: AtomicU64,
    d2h_bytes: AtomicU64,
    h2d_count: AtomicU64,
    d2h_count: AtomicU64,
}

struct StreamPermit<'a> {
    queue: &'a TransferQueue,
}

impl Drop for StreamPermit<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.queue.in_flight.lock();
        *in_flight -= 1;
        self.queue.slot_freed.notify_one();
    }
}

impl TransferQueue {
    pub fn new(backend: Arc<dyn DeviceBackend>, num_streams: usize) -> Self {
        Self {
            backend,
            in_flight: Mutex::new(0),
            slot_freed: Condvar::new(),
            num_streams: num_streams.max(1),
            h2d_bytes: AtomicU64::new(0),
            d2h_bytes: AtomicU64::new(0),
            h2d_count: AtomicU64::new(0),
            d2h_count: AtomicU64::new(0),
        }
    }

    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    fn acquire(&self) -> StreamPermit<'_> {
        let mut in_flight = self.in_flight.lock();
        while *in_flight >= self.num_streams {
            self.slot_freed.wait(&mut in_flight);
        }
        *in_flight += 1;
        StreamPermit { queue: self }
    }

    /// Copy `src` into device memory at `arena`/`offset`.
    pub fn copy_to_device(&self, arena: ArenaId, offset: usize, src: &[u8]) -> Result<()> {
        let _permit = self.acquire();
        debug!("HtoD transfer: {} bytes into arena {}", src.len(), arena);
        self.backend.write(arena, offset, src)?;
        self.h2d_bytes.fetch_add(src.len() as u64, Ordering::Relaxed);
        self.h2d_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy device memory at `arena`/`offset` into `dst`.
    pub fn copy_to_host(&self, arena: ArenaId, offset: usize, dst: &mut [u8]) -> Result<()> {
        let _permit = self.acquire();
        debug!("DtoH transfer: {} bytes from arena {}", dst.len(), arena);
        self.backend.read(arena, offset, dst)?;
        self.d2h_bytes.fetch_add(dst.len() as u64, Ordering::Relaxed);
        self.d2h_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn bytes(&self, direction: TransferDirection) -> u64 {
        match direction {
            TransferDirection::HostToDevice => self.h2d_bytes.load(Ordering::Relaxed),
            TransferDirection::DeviceToHost => self.d2h_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn count(&self, direction: TransferDirection) -> u64 {
        match direction {
            TransferDirection::HostToDevice => self.h2d_count.load(Ordering::Relaxed),
            TransferDirection::DeviceToHost => self.d2h_count.load(Ordering::Relaxed),
        }
    }

    /// Wait for all transfers to complete.
    pub fn synchronize(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.slot_freed.wait(&mut in_flight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDevice;

    #[test]
    fn test_transfer_queue() {
        let device: Arc<dyn DeviceBackend> = Arc::new(SimulatedDevice::new(4096));
        let arena = device.reserve_arena(64).unwrap();
        let queue = TransferQueue::new(Arc::clone(&device), 4);
        assert_eq!(queue.num_streams(), 4);

        queue.copy_to_device(arena, 0, &[9u8; 16]).unwrap();
        let mut out = [0u8; 16];
        queue.copy_to_host(arena, 0, &mut out).unwrap();
        queue.synchronize();

        assert_eq!(out, [9u8; 16]);
        assert_eq!(queue.bytes(TransferDirection::HostToDevice), 16);
        assert_eq!(queue.count(TransferDirection::DeviceToHost), 1);
    }

    #[test]
    fn concurrent_transfers_are_bounded() {
        let device: Arc<dyn DeviceBackend> = Arc::new(SimulatedDevice::new(1 << 16));
        let arena = device.reserve_arena(1 << 12).unwrap();
        let queue = Arc::new(TransferQueue::new(device, 1));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.copy_to_device(arena, i * 8, &[i as u8; 8]))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(queue.count(TransferDirection::HostToDevice), 8);
    }
}
