//! I/O events and the pools they are drawn from.

use super::buffer::IoEventData;
use crate::pool::{ObjectPool, PoolHandle};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A buffer plus the flag telling whether an operation on it is in flight.
pub struct IoEvent {
    data: Mutex<IoEventData>,
    processing: AtomicBool,
}

impl IoEvent {
    pub fn new(data: IoEventData) -> Self {
        Self {
            data: Mutex::new(data),
            processing: AtomicBool::new(false),
        }
    }

    pub fn data(&self) -> MutexGuard<'_, IoEventData> {
        self.data.lock()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Claims the event for a new operation; false if one is already in flight.
    pub fn try_begin_processing(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_processing(&self) {
        self.processing.store(false, Ordering::Release);
    }
}

/// Pools for each event flavor a connection owns.
pub struct IoEventPool {
    recv_events: Arc<ObjectPool<IoEvent>>,
    send_events: Arc<ObjectPool<IoEvent>>,
    small_send_events: Arc<ObjectPool<IoEvent>>,
}

impl IoEventPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            recv_events: Arc::new(ObjectPool::new(max_connections)),
            send_events: Arc::new(ObjectPool::new(max_connections)),
            small_send_events: Arc::new(ObjectPool::new(max_connections)),
        }
    }

    pub fn new_recv_event(&self) -> Option<PoolHandle<IoEvent>> {
        self.recv_events.new_scoped(IoEvent::new(IoEventData::recv()))
    }

    pub fn new_send_event(&self) -> Option<PoolHandle<IoEvent>> {
        self.send_events.new_scoped(IoEvent::new(IoEventData::send()))
    }

    pub fn new_small_send_event(&self) -> Option<PoolHandle<IoEvent>> {
        self.small_send_events
            .new_scoped(IoEvent::new(IoEventData::small_send()))
    }

    pub fn events_in_use(&self) -> usize {
        self.recv_events.size() + self.send_events.size() + self.small_send_events.size()
    }
}
