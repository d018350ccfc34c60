//! Requests waiting on another service.
//!
//! A packet handler that needs an answer from e.g. the login service
//! parks the request here under its connection key and returns
//! `Deferred`. The reply resolves the entry; entries that see no reply
//! are retransmitted every period and dropped after the retry budget.

use crate::connection_key::ConnectionKey;
use crate::utils::has_elapsed;
use parking_lot::Mutex;
use std::collections::HashMap;

struct DeferredEntry<T> {
    payload: T,
    sent_at: u64,
    retries: u32,
}

/// What a retry pass decided for the pending requests.
#[derive(Debug)]
pub struct RetryPlan<T> {
    /// Requests to send again.
    pub resend: Vec<(ConnectionKey, T)>,
    /// Requests that ran out of retries and were removed.
    pub expired: Vec<(ConnectionKey, T)>,
}

pub struct DeferredTable<T> {
    pending: Mutex<HashMap<ConnectionKey, DeferredEntry<T>>>,
    period_ms: u64,
    max_retries: u32,
}

impl<T: Clone> DeferredTable<T> {
    pub fn new(period_ms: u64, max_retries: u32) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            period_ms,
            max_retries,
        }
    }

    /// Parks `payload`; false if `key` already waits on a reply.
    pub fn insert(&self, key: ConnectionKey, payload: T, now: u64) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return false;
        }
        pending.insert(
            key,
            DeferredEntry {
                payload,
                sent_at: now,
                retries: 0,
            },
        );
        true
    }

    /// Removes and returns the request a reply belongs to.
    pub fn resolve(&self, key: ConnectionKey) -> Option<T> {
        self.pending.lock().remove(&key).map(|entry| entry.payload)
    }

    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.pending.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects requests whose period has passed without a reply.
    pub fn retry_at(&self, now: u64) -> RetryPlan<T> {
        let mut plan = RetryPlan {
            resend: Vec::new(),
            expired: Vec::new(),
        };

        let mut pending = self.pending.lock();
        pending.retain(|key, entry| {
            if !has_elapsed(entry.sent_at, self.period_ms, now) {
                return true;
            }
            if entry.retries >= self.max_retries {
                plan.expired.push((*key, entry.payload.clone()));
                return false;
            }
            entry.retries += 1;
            entry.sent_at = now;
            plan.resend.push((*key, entry.payload.clone()));
            true
        });
        plan
    }
}
