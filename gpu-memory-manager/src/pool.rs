use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::device::{ArenaId, DeviceBackend, SimulatedDevice};
use crate::error::{MemoryError, Result};
use crate::slab_allocator::SlabAllocator;
use crate::transfer_queue::{TransferDirection, TransferQueue};

/// Dedicated (oversized) allocations are rounded up to this alignment.
const DEDICATED_ALIGN: usize = 256;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on bytes handed out as blocks.
    pub budget_bytes: usize,
    /// Size of each arena reserved for a slab class.
    pub arena_bytes: usize,
    pub size_classes: Vec<usize>,
    /// Spill LRU idle buffers to host before reporting out-of-memory.
    pub spill_enabled: bool,
    /// Maximum concurrent host <-> device copies.
    pub transfer_streams: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 1 << 30,
            arena_bytes: 64 << 20,
            size_classes: vec![1 << 10, 16 << 10, 256 << 10, 4 << 20],
            spill_enabled: true,
            transfer_streams: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use_bytes: usize,
    pub peak_bytes: usize,
    pub reserved_bytes: usize,
    pub allocations: u64,
    pub frees: u64,
    pub spills: u64,
    pub spilled_bytes: u64,
    pub rematerializations: u64,
    pub oom_count: u64,
    pub host_to_device_bytes: u64,
    pub device_to_host_bytes: u64,
    pub host_to_device_copies: u64,
    pub device_to_host_copies: u64,
}

/// Something the pool can evict to host memory under pressure.
pub trait Spillable: Send + Sync {
    /// Move device contents to host; returns the number of device bytes freed.
    /// Returning `Ok(0)` means the target was busy and should be skipped.
    fn spill(&self) -> Result<usize>;

    fn is_pinned(&self) -> bool;
}

struct PoolState {
    slabs: SlabAllocator,
    in_use: usize,
    peak: usize,
    allocations: u64,
    frees: u64,
    oom_count: u64,
    clock: u64,
    /// access tick -> buffer id, oldest first.
    lru: BTreeMap<u64, u64>,
    spillable: HashMap<u64, (u64, Weak<dyn Spillable>)>,
}

/// Process-wide device memory pool.
///
/// All allocation, free and spill decisions take the internal lock briefly;
/// byte copies always happen outside it.
pub struct DevicePool {
    backend: Arc<dyn DeviceBackend>,
    transfers: TransferQueue,
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_buffer_id: AtomicU64,
    spills: AtomicU64,
    spilled_bytes: AtomicU64,
    rematerializations: AtomicU64,
}

impl DevicePool {
    pub fn new(backend: Arc<dyn DeviceBackend>, config: PoolConfig) -> Arc<Self> {
        info!("Initializing device pool on '{}' backend", backend.name());
        info!("  Budget: {} bytes", config.budget_bytes);
        info!("  Slab sizes: {:?}", config.size_classes);
        info!("  Spill enabled: {}", config.spill_enabled);

        let slabs = SlabAllocator::new(&config.size_classes, config.arena_bytes);
        let transfers = TransferQueue::new(Arc::clone(&backend), config.transfer_streams);

        Arc::new(Self {
            backend,
            transfers,
            state: Mutex::new(PoolState {
                slabs,
                in_use: 0,
                peak: 0,
                allocations: 0,
                frees: 0,
                oom_count: 0,
                clock: 0,
                lru: BTreeMap::new(),
                spillable: HashMap::new(),
            }),
            config,
            next_buffer_id: AtomicU64::new(1),
            spills: AtomicU64::new(0),
            spilled_bytes: AtomicU64::new(0),
            rematerializations: AtomicU64::new(0),
        })
    }

    /// Pool backed by a [`SimulatedDevice`] large enough that the budget,
    /// not the device, is the binding limit.
    pub fn simulated(config: PoolConfig) -> Arc<Self> {
        let slack = config.arena_bytes.saturating_mul(config.size_classes.len().max(1));
        let capacity = config.budget_bytes.saturating_add(slack);
        Self::new(Arc::new(SimulatedDevice::new(capacity)), config)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    pub fn transfers(&self) -> &TransferQueue {
        &self.transfers
    }

    pub fn budget(&self) -> usize {
        self.config.budget_bytes
    }

    pub fn available(&self) -> usize {
        self.config
            .budget_bytes
            .saturating_sub(self.state.lock().in_use)
    }

    /// Bytes actually charged against the budget for a request of `bytes`.
    /// Saturates at `usize::MAX`, which no budget can satisfy.
    pub fn charge_for(&self, bytes: usize) -> usize {
        let state = self.state.lock();
        match state.slabs.find_slab_class(bytes) {
            Some(class) => state.slabs.class_size(class),
            None => bytes
                .max(1)
                .checked_next_multiple_of(DEDICATED_ALIGN)
                .unwrap_or(usize::MAX),
        }
    }

    /// Allocate a device block of at least `bytes`.
    ///
    /// On pressure, least-recently-used idle buffers are spilled to host and
    /// the allocation retried; `OutOfMemory` is returned only once nothing
    /// else can be spilled.
    pub fn allocate(self: &Arc<Self>, bytes: usize) -> Result<DeviceBlock> {
        let charge = self.charge_for(bytes);
        if charge > self.config.budget_bytes {
            warn!(
                "Allocation of {} bytes exceeds the device budget of {} bytes",
                bytes, self.config.budget_bytes
            );
            return Err(self.out_of_memory(bytes));
        }

        let mut skipped = HashSet::new();
        loop {
            match self.try_allocate(charge) {
                Ok((arena, offset, class)) => {
                    return Ok(DeviceBlock {
                        pool: Arc::clone(self),
                        arena,
                        offset,
                        len: bytes,
                        charge,
                        class,
                    });
                }
                Err(MemoryError::OutOfMemory { .. }) => {
                    if self.config.spill_enabled && self.spill_one(&mut skipped) {
                        debug!("Retrying allocation of {} bytes after spill", bytes);
                        continue;
                    }
                    warn!("Device out of memory allocating {} bytes", bytes);
                    return Err(self.out_of_memory(bytes));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn out_of_memory(&self, requested: usize) -> MemoryError {
        let mut state = self.state.lock();
        state.oom_count += 1;
        MemoryError::OutOfMemory {
            requested,
            available: self.config.budget_bytes.saturating_sub(state.in_use),
            budget: self.config.budget_bytes,
        }
    }

    fn try_allocate(&self, charge: usize) -> Result<(ArenaId, usize, Option<usize>)> {
        let mut state = self.state.lock();
        if state.in_use.saturating_add(charge) > self.config.budget_bytes {
            return Err(MemoryError::OutOfMemory {
                requested: charge,
                available: self.config.budget_bytes - state.in_use,
                budget: self.config.budget_bytes,
            });
        }

        let placed = match state.slabs.find_slab_class(charge) {
            Some(class) => {
                let slot = match state.slabs.take(class) {
                    Some(slot) => slot,
                    None => {
                        let len = state.slabs.arena_len_for(class);
                        let arena = self.reserve_arena(&mut state, len)?;
                        debug!("Allocating new arena for class {} ({} bytes)", class, len);
                        state.slabs.add_arena(class, arena, len);
                        state.slabs.take(class).ok_or_else(|| {
                            MemoryError::InvalidRequest(format!(
                                "fresh arena for class {} holds no slab",
                                class
                            ))
                        })?
                    }
                };
                (slot.0, slot.1, Some(class))
            }
            None => {
                let arena = self.reserve_arena(&mut state, charge)?;
                debug!("Dedicated arena {} for {} bytes", arena, charge);
                (arena, 0, None)
            }
        };

        state.in_use += charge;
        state.peak = state.peak.max(state.in_use);
        state.allocations += 1;
        Ok(placed)
    }

    fn reserve_arena(&self, state: &mut PoolState, len: usize) -> Result<ArenaId> {
        match self.backend.reserve_arena(len) {
            Err(MemoryError::OutOfMemory { .. }) => {
                for arena in state.slabs.trim() {
                    self.backend.release_arena(arena);
                }
                self.backend.reserve_arena(len)
            }
            other => other,
        }
    }

    fn release(&self, arena: ArenaId, offset: usize, class: Option<usize>, charge: usize) {
        let mut state = self.state.lock();
        state.in_use -= charge;
        state.frees += 1;
        match class {
            Some(class) => state.slabs.free(class, arena, offset),
            None => self.backend.release_arena(arena),
        }
    }

    /// Return idle arenas to the backend.
    pub fn trim(&self) -> usize {
        let mut state = self.state.lock();
        let idle = state.slabs.trim();
        for &arena in &idle {
            self.backend.release_arena(arena);
        }
        idle.len()
    }

    pub fn next_buffer_id(&self) -> u64 {
        self.next_buffer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_spillable(&self, id: u64, target: Weak<dyn Spillable>) {
        let mut state = self.state.lock();
        state.clock += 1;
        let tick = state.clock;
        if let Some((old, _)) = state.spillable.insert(id, (tick, target)) {
            state.lru.remove(&old);
        }
        state.lru.insert(tick, id);
    }

    /// Mark `id` as most recently used.
    pub fn touch(&self, id: u64) {
        let mut state = self.state.lock();
        state.clock += 1;
        let tick = state.clock;
        let old = match state.spillable.get_mut(&id) {
            Some(entry) => std::mem::replace(&mut entry.0, tick),
            None => return,
        };
        state.lru.remove(&old);
        state.lru.insert(tick, id);
    }

    pub fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some((tick, _)) = state.spillable.remove(&id) {
            state.lru.remove(&tick);
        }
    }

    pub fn spillable_count(&self) -> usize {
        self.state.lock().spillable.len()
    }

    /// Spill the least-recently-used idle buffer not in `skipped`.
    fn spill_one(&self, skipped: &mut HashSet<u64>) -> bool {
        let candidates: Vec<(u64, Weak<dyn Spillable>)> = {
            let state = self.state.lock();
            state
                .lru
                .values()
                .filter(|id| !skipped.contains(*id))
                .filter_map(|id| state.spillable.get(id).map(|(_, w)| (*id, w.clone())))
                .collect()
        };

        for (id, weak) in candidates {
            skipped.insert(id);
            let Some(target) = weak.upgrade() else {
                continue;
            };
            if target.is_pinned() {
                continue;
            }
            match target.spill() {
                Ok(freed) if freed > 0 => return true,
                Ok(_) => {}
                Err(e) => warn!("Spill of buffer {} failed: {}", id, e),
            }
        }
        false
    }

    /// Spill idle buffers until at least `target_bytes` were freed or no
    /// candidate remains. Returns the bytes freed.
    pub fn spill_idle(&self, target_bytes: usize) -> usize {
        let before = self.spilled_bytes.load(Ordering::Relaxed);
        let mut skipped = HashSet::new();
        while (self.spilled_bytes.load(Ordering::Relaxed) - before) < target_bytes as u64 {
            if !self.spill_one(&mut skipped) {
                break;
            }
        }
        (self.spilled_bytes.load(Ordering::Relaxed) - before) as usize
    }

    pub(crate) fn note_spill(&self, bytes: usize) {
        self.spills.fetch_add(1, Ordering::Relaxed);
        self.spilled_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn note_rematerialization(&self) {
        self.rematerializations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            in_use_bytes: state.in_use,
            peak_bytes: state.peak,
            reserved_bytes: self.backend.reserved(),
            allocations: state.allocations,
            frees: state.frees,
            spills: self.spills.load(Ordering::Relaxed),
            spilled_bytes: self.spilled_bytes.load(Ordering::Relaxed),
            rematerializations: self.rematerializations.load(Ordering::Relaxed),
            oom_count: state.oom_count,
            host_to_device_bytes: self.transfers.bytes(TransferDirection::HostToDevice),
            device_to_host_bytes: self.transfers.bytes(TransferDirection::DeviceToHost),
            host_to_device_copies: self.transfers.count(TransferDirection::HostToDevice),
            device_to_host_copies: self.transfers.count(TransferDirection::DeviceToHost),
        }
    }
}

impl fmt::Debug for DevicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePool")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for DevicePool {
    fn drop(&mut self) {
        info!("Shutting down device pool");
        let state = self.state.get_mut();
        for class in 0..state.slabs.class_count() {
            debug!("  Class {}: {} pooled slabs", class, state.slabs.pooled_slabs(class));
        }
        for arena in state.slabs.trim() {
            self.backend.release_arena(arena);
        }
    }
}

/// An owned, size-tagged region of device memory.
///
/// Blocks are never shared: [`DeviceBlock::try_clone`] copies into a fresh
/// allocation. Dropping a block returns it to the pool immediately.
pub struct DeviceBlock {
    pool: Arc<DevicePool>,
    arena: ArenaId,
    offset: usize,
    len: usize,
    charge: usize,
    class: Option<usize>,
}

impl DeviceBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes charged against the pool budget.
    pub fn capacity(&self) -> usize {
        self.charge
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    fn check(&self, offset: usize, count: usize) -> Result<()> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(MemoryError::InvalidRequest(format!(
                "access of {} bytes at {} outside block of {} bytes",
                count, offset, self.len
            ))),
        }
    }

    /// Kernel-side write (no host transfer accounting).
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        self.pool
            .backend
            .write(self.arena, self.offset + offset, src)
    }

    /// Kernel-side read (no host transfer accounting).
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        self.pool.backend.read(self.arena, self.offset + offset, dst)
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.len];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// Host -> device copy through the transfer queue.
    pub fn upload(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        self.pool
            .transfers
            .copy_to_device(self.arena, self.offset + offset, src)
    }

    /// Device -> host copy through the transfer queue.
    pub fn download(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        self.pool
            .transfers
            .copy_to_host(self.arena, self.offset + offset, dst)
    }

    /// Copy-on-share: a new block with the same contents.
    pub fn try_clone(&self) -> Result<DeviceBlock> {
        let bytes = self.read_all()?;
        let mut copy = self.pool.allocate(self.len)?;
        copy.write(0, &bytes)?;
        Ok(copy)
    }
}

impl fmt::Debug for DeviceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBlock")
            .field("arena", &self.arena)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("charge", &self.charge)
            .finish()
    }
}

impl Drop for DeviceBlock {
    fn drop(&mut self) {
        self.pool
            .release(self.arena, self.offset, self.class, self.charge);
    }
}
