//! Shared broadcast payloads.
//!
//! A payload meant for many connections is encoded once, stored as the
//! active entry of its tag and written to every socket from the same
//! allocation. Superseded entries stay queued until no write can still
//! be reading them: either their reference count drops to zero or their
//! lifetime runs out, depending on the tag.

use crate::config::{MULTICAST_GC_PERIOD_MS, MULTICAST_LIFETIME_MS};
use crate::utils::{get_timestamp, has_elapsed};
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulticastTag {
    LevelData,
    SpawnPlayer,
    DespawnPlayer,
    SyncBlockData,
    SyncPlayerPosition,
    ChatMessage,
}

const TAG_COUNT: usize = 6;

impl MulticastTag {
    pub const ALL: [MulticastTag; TAG_COUNT] = [
        MulticastTag::LevelData,
        MulticastTag::SpawnPlayer,
        MulticastTag::DespawnPlayer,
        MulticastTag::SyncBlockData,
        MulticastTag::SyncPlayerPosition,
        MulticastTag::ChatMessage,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn expiration_mode(self) -> ExpirationMode {
        match self {
            MulticastTag::LevelData => ExpirationMode::RefCount,
            _ => ExpirationMode::Time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationMode {
    /// Deletable once every write holding the entry has completed.
    RefCount,
    /// Deletable once its lifetime has passed.
    Time,
}

#[derive(Debug)]
pub struct MulticastDataEntry {
    data: Box<[u8]>,
    mode: ExpirationMode,
    ref_count: AtomicUsize,
    expire_at: AtomicU64,
}

impl MulticastDataEntry {
    pub fn new(data: Vec<u8>, mode: ExpirationMode, now: u64) -> Self {
        Self {
            data: data.into_boxed_slice(),
            mode,
            ref_count: AtomicUsize::new(0),
            expire_at: AtomicU64::new(now.saturating_add(MULTICAST_LIFETIME_MS)),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mode(&self) -> ExpirationMode {
        self.mode
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn increase_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrease_ref(&self) {
        let _ = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    pub fn expire_at(&self) -> u64 {
        self.expire_at.load(Ordering::Acquire)
    }

    /// Restarts the lifetime from `now`.
    pub fn update_lifetime(&self, now: u64) {
        self.expire_at
            .store(now.saturating_add(MULTICAST_LIFETIME_MS), Ordering::Release);
    }

    /// Whether the payload can be freed, ignoring whether it is still active.
    pub fn is_safe_delete(&self, now: u64) -> bool {
        match self.mode {
            ExpirationMode::RefCount => self.ref_count() == 0,
            ExpirationMode::Time => now > self.expire_at(),
        }
    }
}

#[derive(Default)]
struct TagEntries {
    active: Option<Arc<MulticastDataEntry>>,
    queue: VecDeque<Arc<MulticastDataEntry>>,
    last_gc: u64,
}

impl TagEntries {
    fn collect(&mut self, now: u64) -> usize {
        let mut reclaimed = 0;
        while let Some(front) = self.queue.front() {
            let is_active = self
                .active
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, front));
            if is_active || !front.is_safe_delete(now) {
                break;
            }
            self.queue.pop_front();
            reclaimed += 1;
        }
        reclaimed
    }
}

pub struct MulticastManager {
    tags: [Mutex<TagEntries>; TAG_COUNT],
}

impl MulticastManager {
    pub fn new() -> Self {
        Self {
            tags: std::array::from_fn(|_| Mutex::new(TagEntries::default())),
        }
    }

    pub fn set_data(&self, tag: MulticastTag, data: Vec<u8>) -> Arc<MulticastDataEntry> {
        self.set_data_at(tag, data, get_timestamp())
    }

    /// Makes `data` the active payload of `tag`. Collects superseded
    /// entries first, at most once per GC period.
    pub fn set_data_at(&self, tag: MulticastTag, data: Vec<u8>, now: u64) -> Arc<MulticastDataEntry> {
        let mut entries = self.tags[tag.index()].lock();
        if has_elapsed(entries.last_gc, MULTICAST_GC_PERIOD_MS, now) {
            let reclaimed = entries.collect(now);
            entries.last_gc = now;
            if reclaimed > 0 {
                trace!("Reclaimed {} {:?} payloads", reclaimed, tag);
            }
        }

        let entry = Arc::new(MulticastDataEntry::new(data, tag.expiration_mode(), now));
        entries.queue.push_back(entry.clone());
        entries.active = Some(entry.clone());
        entry
    }

    /// Drops the active payload so a later GC may reclaim it.
    pub fn reset_data(&self, tag: MulticastTag) {
        self.tags[tag.index()].lock().active = None;
    }

    pub fn active(&self, tag: MulticastTag) -> Option<Arc<MulticastDataEntry>> {
        self.tags[tag.index()].lock().active.clone()
    }

    pub fn gc(&self, tag: MulticastTag) -> usize {
        self.gc_at(tag, get_timestamp())
    }

    /// Frees queued payloads from the front until one is active or still in use.
    pub fn gc_at(&self, tag: MulticastTag, now: u64) -> usize {
        let mut entries = self.tags[tag.index()].lock();
        entries.last_gc = now;
        entries.collect(now)
    }

    /// Number of payloads still held for `tag`, the active one included.
    pub fn len(&self, tag: MulticastTag) -> usize {
        self.tags[tag.index()].lock().queue.len()
    }

    pub fn is_empty(&self, tag: MulticastTag) -> bool {
        self.len(tag) == 0
    }
}

impl Default for MulticastManager {
    fn default() -> Self {
        Self::new()
    }
}
