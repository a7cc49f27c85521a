//! Cross-thread heap statistics registry
//!
//! Stores are single-threaded, but a process usually runs one local store per
//! worker thread. Each thread claims a slot in a global registry the first time
//! it creates a store. A store charges every allocation, collection and its
//! final release to the slot of the thread that created it, even after it has
//! been sent to another thread. Anything (a monitoring thread, a shutdown
//! hook) can sum the slots.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              MemoryStatsRegistry (global)               │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐             │
//! │  │ Slot 0 (Thread A)│  │ Slot 1 (Thread B)│  ...        │
//! │  │ thread_id        │  │ thread_id        │             │
//! │  │ heap_bytes       │  │ heap_bytes       │             │
//! │  │ peak_heap_bytes  │  │ peak_heap_bytes  │             │
//! │  │ collections      │  │ collections      │             │
//! │  └──────────────────┘  └──────────────────┘             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Updates are relaxed atomic operations on the thread's own slot; reads
//! iterate every slot and are only meant for diagnostics.

use std::cell::Cell;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of threads tracked
const MAX_THREADS: usize = 64;

/// Heap statistics for one thread
#[derive(Debug)]
pub struct MemorySlot {
    /// Thread ID (0 = slot is free)
    pub thread_id: AtomicU64,
    /// Bytes held by all stores on this thread
    pub heap_bytes: AtomicU64,
    /// High-water mark of `heap_bytes`
    pub peak_heap_bytes: AtomicU64,
    /// Collections run by stores on this thread
    pub collections: AtomicU64,
}

impl MemorySlot {
    const fn new() -> Self {
        Self {
            thread_id: AtomicU64::new(0),
            heap_bytes: AtomicU64::new(0),
            peak_heap_bytes: AtomicU64::new(0),
            collections: AtomicU64::new(0),
        }
    }
}

/// Global registry of per-thread heap statistics
pub struct MemoryStatsRegistry {
    slots: Box<[MemorySlot]>,
    /// Threads that couldn't get a slot
    pub overflow_count: AtomicU64,
}

impl MemoryStatsRegistry {
    fn new(capacity: usize) -> Self {
        let slots: Vec<MemorySlot> = (0..capacity).map(|_| MemorySlot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Claim a slot for the current thread
    ///
    /// Returns None if the registry is full.
    pub fn register(&self) -> Option<usize> {
        let thread_id = current_thread_id();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .thread_id
                .compare_exchange(0, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(idx);
            }
        }
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Add allocated bytes to a slot and raise its peak
    #[inline]
    pub fn record_alloc(&self, slot_idx: usize, bytes: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            let now = slot.heap_bytes.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
            slot.peak_heap_bytes.fetch_max(now, Ordering::Relaxed);
        }
    }

    /// Subtract freed bytes from a slot, saturating at zero
    #[inline]
    pub fn record_free(&self, slot_idx: usize, bytes: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            let _ = slot
                .heap_bytes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.saturating_sub(bytes as u64))
                });
        }
    }

    #[inline]
    pub fn record_collection(&self, slot_idx: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.collections.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sum the statistics of every registered thread
    pub fn aggregate_stats(&self) -> AggregateMemoryStats {
        let mut stats = AggregateMemoryStats {
            active_threads: 0,
            total_heap_bytes: 0,
            total_peak_heap_bytes: 0,
            total_collections: 0,
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
        };
        for slot in self.slots.iter() {
            if slot.thread_id.load(Ordering::Acquire) > 0 {
                stats.active_threads += 1;
                stats.total_heap_bytes += slot.heap_bytes.load(Ordering::Relaxed);
                stats.total_peak_heap_bytes += slot.peak_heap_bytes.load(Ordering::Relaxed);
                stats.total_collections += slot.collections.load(Ordering::Relaxed);
            }
        }
        stats
    }

    /// Bytes currently charged to one slot
    pub fn heap_bytes(&self, slot_idx: usize) -> u64 {
        self.slots
            .get(slot_idx)
            .map_or(0, |slot| slot.heap_bytes.load(Ordering::Relaxed))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Heap statistics summed over all threads
#[derive(Debug, Clone, Copy)]
pub struct AggregateMemoryStats {
    pub active_threads: usize,
    pub total_heap_bytes: u64,
    pub total_peak_heap_bytes: u64,
    pub total_collections: u64,
    pub overflow_count: u64,
}

/// Starts at 1 because 0 marks a free slot
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THIS_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    static SLOT_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

fn current_thread_id() -> u64 {
    THIS_THREAD_ID.with(|&id| id)
}

static MEMORY_REGISTRY: OnceLock<MemoryStatsRegistry> = OnceLock::new();

/// The process-wide registry
pub fn memory_registry() -> &'static MemoryStatsRegistry {
    MEMORY_REGISTRY.get_or_init(|| MemoryStatsRegistry::new(MAX_THREADS))
}

/// Slot of the current thread, registering on first use
pub fn get_or_register_slot() -> Option<usize> {
    SLOT_INDEX.with(|cell| {
        if let Some(idx) = cell.get() {
            Some(idx)
        } else {
            let idx = memory_registry().register();
            cell.set(idx);
            idx
        }
    })
}

pub(crate) fn record_alloc(slot: Option<usize>, bytes: usize) {
    if let Some(idx) = slot {
        memory_registry().record_alloc(idx, bytes);
    }
}

pub(crate) fn record_free(slot: Option<usize>, bytes: usize) {
    if let Some(idx) = slot {
        memory_registry().record_free(idx, bytes);
    }
}

pub(crate) fn record_collection(slot: Option<usize>, freed_bytes: usize) {
    if let Some(idx) = slot {
        let registry = memory_registry();
        registry.record_free(idx, freed_bytes);
        registry.record_collection(idx);
    }
}
