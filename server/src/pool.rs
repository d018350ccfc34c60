//! Slab object pool with stable, pool-qualified ids.
//!
//! Slots are committed one bitmap word (64 slots) at a time, doubling the
//! committed range on demand until `max_capacity`. Committed chunks never
//! move, so lookups do not need to coordinate with growth. A set bit in
//! the free bitmap marks a free slot.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_INITIAL_CAPACITY: usize = 512;

const SLOTS_PER_WORD: usize = u64::BITS as usize;

static NEXT_POOL_INDEX: AtomicU32 = AtomicU32::new(1);

/// Pool index in the upper 32 bits, slot index in the lower 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn new(pool_index: u32, slot: u32) -> Self {
        Self((u64::from(pool_index) << 32) | u64::from(slot))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn pool_index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn slot(self) -> u32 {
        self.0 as u32
    }
}

type Chunk<T> = Box<[Mutex<Option<Arc<T>>>]>;

pub struct ObjectPool<T> {
    index: u32,
    max_capacity: usize,
    chunks: Box<[OnceLock<Chunk<T>>]>,
    free_bits: Box<[AtomicU64]>,
    committed_words: AtomicUsize,
    live: AtomicUsize,
    growth: Mutex<()>,
}

impl<T> ObjectPool<T> {
    pub fn new(max_capacity: usize) -> Self {
        Self::with_initial_capacity(DEFAULT_INITIAL_CAPACITY, max_capacity)
    }

    pub fn with_initial_capacity(initial_capacity: usize, max_capacity: usize) -> Self {
        let words = max_capacity.div_ceil(SLOTS_PER_WORD);
        let pool = Self {
            index: NEXT_POOL_INDEX.fetch_add(1, Ordering::Relaxed),
            max_capacity,
            chunks: (0..words).map(|_| OnceLock::new()).collect(),
            free_bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            committed_words: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            growth: Mutex::new(()),
        };
        pool.commit_words(initial_capacity.min(max_capacity).div_ceil(SLOTS_PER_WORD));
        pool
    }

    pub fn pool_index(&self) -> u32 {
        self.index
    }

    /// Live objects.
    pub fn size(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Slots currently backed by memory.
    pub fn capacity(&self) -> usize {
        (self.committed_words.load(Ordering::Acquire) * SLOTS_PER_WORD).min(self.max_capacity)
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Stores `value` in the first free slot, growing if needed.
    ///
    /// Returns `None` once `max_capacity` objects are live.
    pub fn new_object(&self, value: T) -> Option<ObjectId> {
        let value = Arc::new(value);
        loop {
            let committed = self.committed_words.load(Ordering::Acquire);
            for word_index in 0..committed {
                if let Some(slot) = self.claim_free_bit(word_index) {
                    if let Some(cell) = self.slot_cell(slot) {
                        *cell.lock() = Some(value);
                        self.live.fetch_add(1, Ordering::AcqRel);
                        return Some(ObjectId::new(self.index, slot as u32));
                    }
                }
            }

            if !self.grow(committed) {
                return None;
            }
        }
    }

    /// Drops the object and releases its slot.
    ///
    /// Returns false for ids of other pools, out of range slots and
    /// slots that are already free.
    pub fn free_object(&self, id: ObjectId) -> bool {
        let Some(cell) = self.cell_of(id) else {
            return false;
        };

        let Some(object) = cell.lock().take() else {
            return false;
        };

        let slot = id.slot() as usize;
        self.free_bits[slot / SLOTS_PER_WORD]
            .fetch_or(1u64 << (slot % SLOTS_PER_WORD), Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
        drop(object);
        true
    }

    pub fn find_object(&self, id: ObjectId) -> Option<Arc<T>> {
        self.cell_of(id)?.lock().clone()
    }

    fn cell_of(&self, id: ObjectId) -> Option<&Mutex<Option<Arc<T>>>> {
        if id.pool_index() != self.index {
            return None;
        }
        self.slot_cell(id.slot() as usize)
    }

    fn slot_cell(&self, slot: usize) -> Option<&Mutex<Option<Arc<T>>>> {
        if slot >= self.max_capacity {
            return None;
        }
        let chunk = self.chunks.get(slot / SLOTS_PER_WORD)?.get()?;
        chunk.get(slot % SLOTS_PER_WORD)
    }

    fn claim_free_bit(&self, word_index: usize) -> Option<usize> {
        let word = &self.free_bits[word_index];
        let mut bits = word.load(Ordering::Acquire);
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            match word.compare_exchange_weak(
                bits,
                bits & !(1u64 << bit),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(word_index * SLOTS_PER_WORD + bit),
                Err(current) => bits = current,
            }
        }
        None
    }

    fn grow(&self, seen_words: usize) -> bool {
        let _guard = self.growth.lock();
        let committed = self.committed_words.load(Ordering::Acquire);
        if committed != seen_words {
            return true;
        }

        let total_words = self.free_bits.len();
        if committed >= total_words {
            return false;
        }
        self.commit_words((committed * 2).clamp(1, total_words));
        true
    }

    fn commit_words(&self, target_words: usize) {
        let committed = self.committed_words.load(Ordering::Acquire);
        for word_index in committed..target_words {
            self.chunks[word_index].get_or_init(|| {
                (0..SLOTS_PER_WORD).map(|_| Mutex::new(None)).collect()
            });

            let slots_in_word = (self.max_capacity - word_index * SLOTS_PER_WORD).min(SLOTS_PER_WORD);
            let mask = if slots_in_word == SLOTS_PER_WORD {
                u64::MAX
            } else {
                (1u64 << slots_in_word) - 1
            };
            self.free_bits[word_index].store(mask, Ordering::Release);
        }
        if target_words > committed {
            self.committed_words.store(target_words, Ordering::Release);
        }
    }
}

impl<T> ObjectPool<T> {
    /// Allocates an object owned by the returned handle.
    pub fn new_scoped(self: &Arc<Self>, value: T) -> Option<PoolHandle<T>> {
        let id = self.new_object(value)?;
        let object = self.find_object(id)?;
        Some(PoolHandle {
            pool: Arc::clone(self),
            id,
            object,
        })
    }
}

/// Owns one pool slot and frees it on drop.
pub struct PoolHandle<T> {
    pool: Arc<ObjectPool<T>>,
    id: ObjectId,
    object: Arc<T>,
}

impl<T> PoolHandle<T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn object(&self) -> &Arc<T> {
        &self.object
    }
}

impl<T> Deref for PoolHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        self.pool.free_object(self.id);
    }
}
