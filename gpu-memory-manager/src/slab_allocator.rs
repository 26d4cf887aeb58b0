use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::device::ArenaId;

/// Size-class bookkeeping for device arenas.
///
/// Manages memory in fixed-size slabs carved out of large arenas to bound
/// fragmentation. The allocator never talks to the device itself: the pool
/// reserves arenas and hands them in through [`SlabAllocator::add_arena`].
pub struct SlabAllocator {
    arena_bytes: usize,
    slab_classes: Vec<SlabClass>,
}

struct SlabClass {
    size: usize,
    free_slabs: VecDeque<(ArenaId, usize)>,
    carving: Option<Carve>,
    /// Live slab count per arena owned by this class.
    arenas: HashMap<ArenaId, usize>,
}

struct Carve {
    arena: ArenaId,
    next: usize,
    end: usize,
}

impl SlabAllocator {
    pub fn new(slab_sizes: &[usize], arena_bytes: usize) -> Self {
        let mut sizes = slab_sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();
        debug!("SlabAllocator: classes {:?}, arena {} bytes", sizes, arena_bytes);

        let slab_classes = sizes
            .into_iter()
            .filter(|&size| size > 0)
            .map(|size| SlabClass {
                size,
                free_slabs: VecDeque::new(),
                carving: None,
                arenas: HashMap::new(),
            })
            .collect();

        Self {
            arena_bytes,
            slab_classes,
        }
    }

    /// Smallest slab class that fits `size`, or `None` for oversized requests.
    pub fn find_slab_class(&self, size: usize) -> Option<usize> {
        self.slab_classes.iter().position(|c| c.size >= size)
    }

    pub fn class_size(&self, class: usize) -> usize {
        self.slab_classes[class].size
    }

    pub fn class_count(&self) -> usize {
        self.slab_classes.len()
    }

    /// Bytes to reserve when class `class` needs a fresh arena.
    pub fn arena_len_for(&self, class: usize) -> usize {
        let size = self.slab_classes[class].size;
        let slabs = (self.arena_bytes / size).max(1);
        slabs * size
    }

    /// Pop a pooled slab or carve one from the class's current arena.
    pub fn take(&mut self, class: usize) -> Option<(ArenaId, usize)> {
        let slab_class = &mut self.slab_classes[class];
        let slot = match slab_class.free_slabs.pop_front() {
            Some(slot) => {
                debug!("Reusing slab from class {} (size {})", class, slab_class.size);
                slot
            }
            None => {
                let carve = slab_class.carving.as_mut()?;
                if carve.next + slab_class.size > carve.end {
                    slab_class.carving = None;
                    return None;
                }
                let slot = (carve.arena, carve.next);
                carve.next += slab_class.size;
                slot
            }
        };
        *slab_class.arenas.entry(slot.0).or_insert(0) += 1;
        Some(slot)
    }

    /// Register a freshly reserved arena as the carving target of `class`.
    pub fn add_arena(&mut self, class: usize, arena: ArenaId, len: usize) {
        let slab_class = &mut self.slab_classes[class];
        slab_class.arenas.entry(arena).or_insert(0);
        slab_class.carving = Some(Carve {
            arena,
            next: 0,
            end: len,
        });
    }

    /// Return a slab to its class pool.
    pub fn free(&mut self, class: usize, arena: ArenaId, offset: usize) {
        let slab_class = &mut self.slab_classes[class];
        if let Some(live) = slab_class.arenas.get_mut(&arena) {
            *live = live.saturating_sub(1);
        }
        debug!("Returning slab to pool (class {})", class);
        slab_class.free_slabs.push_back((arena, offset));
    }

    /// Detach every arena with no live slabs and return their ids so the
    /// caller can release them to the backend.
    pub fn trim(&mut self) -> Vec<ArenaId> {
        let mut released = Vec::new();
        for slab_class in &mut self.slab_classes {
            let idle: Vec<ArenaId> = slab_class
                .arenas
                .iter()
                .filter(|(_, live)| **live == 0)
                .map(|(&arena, _)| arena)
                .collect();
            if idle.is_empty() {
                continue;
            }
            slab_class
                .free_slabs
                .retain(|(arena, _)| !idle.contains(arena));
            if matches!(&slab_class.carving, Some(c) if idle.contains(&c.arena)) {
                slab_class.carving = None;
            }
            for arena in &idle {
                slab_class.arenas.remove(arena);
            }
            released.extend(idle);
        }
        released
    }

    pub fn pooled_slabs(&self, class: usize) -> usize {
        self.slab_classes[class].free_slabs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_class_selection() {
        let alloc = SlabAllocator::new(&[4096, 1024, 16384], 1 << 20);
        assert_eq!(alloc.find_slab_class(500), Some(0));
        assert_eq!(alloc.find_slab_class(2000), Some(1));
        assert_eq!(alloc.find_slab_class(10000), Some(2));
        assert_eq!(alloc.find_slab_class(20000), None);
    }

    #[test]
    fn carves_then_reuses() {
        let mut alloc = SlabAllocator::new(&[1024], 2048);
        assert!(alloc.take(0).is_none());
        alloc.add_arena(0, 7, alloc.arena_len_for(0));
        assert_eq!(alloc.take(0), Some((7, 0)));
        assert_eq!(alloc.take(0), Some((7, 1024)));
        assert_eq!(alloc.take(0), None);
        alloc.free(0, 7, 0);
        assert_eq!(alloc.take(0), Some((7, 0)));
    }

    #[test]
    fn trim_releases_idle_arenas_only() {
        let mut alloc = SlabAllocator::new(&[1024], 1024);
        alloc.add_arena(0, 1, 1024);
        let a = alloc.take(0).unwrap();
        alloc.add_arena(0, 2, 1024);
        let _b = alloc.take(0).unwrap();
        alloc.free(0, a.0, a.1);
        assert_eq!(alloc.trim(), vec![1]);
        assert_eq!(alloc.pooled_slabs(0), 0);
    }
}
