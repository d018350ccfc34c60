//! The set of live connections
//!
//! This module owns every connection the server has accepted:
//! - Admission against the configured connection limit
//! - Key based lookup that rejects keys of deleted connections
//! - Periodic expiry of idle connections and deletion of offline ones
//! - Fan-out of send and receive flushes for the game tick
//!
//! Connections live in pool slots; the environment keeps one entry per
//! connection index so that a key resolves in constant time.

use crate::connection::{Connection, ConnectionEvents};
use crate::connection_key::ConnectionKey;
use crate::handler::PacketHandler;
use crate::io::{IoEventPool, IoService, SendChannel, SocketHandle};
use crate::player::Player;
use crate::pool::{ObjectPool, PoolHandle};
use crate::utils::get_timestamp;
use log::{debug, info, warn};
use parking_lot::RwLock;
use shared::ErrorCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Owns all connections and enforces the connection limit
///
/// The accept path and the expiry sweep are the only writers of the
/// connection table. Everything else takes snapshots of the live
/// connections and works on those without holding the table lock.
pub struct ConnectionEnvironment {
    /// Live connections indexed by the low half of their key
    connections: RwLock<Vec<Option<PoolHandle<Connection>>>>,
    connection_pool: Arc<ObjectPool<Connection>>,
    events: IoEventPool,
    service: Arc<dyn IoService>,
    /// Creation stamp for the next accepted connection
    next_stamp: AtomicU32,
}

impl ConnectionEnvironment {
    /// Creates an empty environment admitting up to `max_connections`
    pub fn new(max_connections: usize, service: Arc<dyn IoService>) -> Self {
        Self {
            connections: RwLock::new((0..max_connections).map(|_| None).collect()),
            connection_pool: Arc::new(ObjectPool::new(max_connections)),
            events: IoEventPool::new(max_connections),
            service,
            next_stamp: AtomicU32::new(1),
        }
    }

    /// Admits a freshly accepted socket
    ///
    /// Allocates the connection and its events, registers it with the
    /// dispatcher and arms the first receive. Fails with
    /// `ClientConnectionFull` once every slot is taken.
    pub fn accept(
        &self,
        socket: Arc<SocketHandle>,
        handler: Arc<dyn PacketHandler>,
    ) -> Result<ConnectionKey, ErrorCode> {
        let mut connections = self.connections.write();
        let Some(index) = connections.iter().position(Option::is_none) else {
            warn!("Rejecting {}: connection limit reached", socket.peer_addr());
            return Err(ErrorCode::ClientConnectionFull);
        };

        let events = match (
            self.events.new_recv_event(),
            self.events.new_small_send_event(),
            self.events.new_send_event(),
        ) {
            (Some(recv), Some(immediate), Some(deferred)) => ConnectionEvents {
                recv,
                immediate,
                deferred,
            },
            _ => {
                warn!("Rejecting {}: event pool exhausted", socket.peer_addr());
                return Err(ErrorCode::ClientConnectionFull);
            }
        };

        let stamp = self.next_stamp.fetch_add(1, Ordering::Relaxed);
        let key = ConnectionKey::new(index as u32, stamp);
        let peer_addr = socket.peer_addr();
        let connection = Connection::new(key, socket, events, self.service.clone(), handler);

        let Some(handle) = self.connection_pool.new_scoped(connection) else {
            return Err(ErrorCode::ClientConnectionFull);
        };
        if !handle.object().register() {
            warn!("Dispatcher refused connection {}", key);
            return Err(ErrorCode::InternalError);
        }

        handle.activate_receive_cycle();
        connections[index] = Some(handle);
        info!("Connection {} accepted from {}", key, peer_addr);
        Ok(key)
    }

    /// Resolves `key` to its connection if that connection still exists
    pub fn try_acquire_connection(&self, key: ConnectionKey) -> Option<Arc<Connection>> {
        let connections = self.connections.read();
        connections
            .get(key.index())?
            .as_ref()
            .filter(|handle| handle.key() == key)
            .map(|handle| handle.object().clone())
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .flatten()
            .map(|handle| handle.object().clone())
            .collect()
    }

    /// Calls `f` for every connection, online or not
    pub fn for_each_connection(&self, mut f: impl FnMut(&Arc<Connection>)) {
        for connection in self.snapshot() {
            f(&connection);
        }
    }

    /// Online connections whose attached player satisfies `predicate`
    pub fn select_players(&self, mut predicate: impl FnMut(&Player) -> bool) -> Vec<Arc<Connection>> {
        self.snapshot()
            .into_iter()
            .filter(|connection| {
                connection.is_online()
                    && connection
                        .player()
                        .as_ref()
                        .is_some_and(|player| predicate(player))
            })
            .collect()
    }

    pub fn size_of_connections(&self) -> usize {
        self.connections.read().iter().flatten().count()
    }

    pub fn size_of_max_connections(&self) -> usize {
        self.connections.read().len()
    }

    pub fn events_in_use(&self) -> usize {
        self.events.events_in_use()
    }

    pub fn cleanup_expired_connection(&self) -> usize {
        self.cleanup_expired_connection_at(get_timestamp())
    }

    /// Times out idle connections and deletes offline ones past the grace
    /// period. Returns the number deleted.
    pub fn cleanup_expired_connection_at(&self, now: u64) -> usize {
        for connection in self.snapshot() {
            if connection.is_online() && connection.is_expired_at(now) {
                connection.disconnect_immediate_at(ErrorCode::ConnectionTimeout, now);
            }
        }

        let removed: Vec<PoolHandle<Connection>> = {
            let mut connections = self.connections.write();
            connections
                .iter_mut()
                .filter(|slot| matches!(slot, Some(handle) if handle.is_safe_delete_at(now)))
                .filter_map(Option::take)
                .collect()
        };

        for handle in &removed {
            debug!("Deleting connection {}", handle.key());
            handle.close();
        }
        removed.len()
    }

    /// Starts sending whatever is queued on every connection
    pub fn flush_send(&self) {
        for connection in self.snapshot() {
            connection.activate_send_cycle(SendChannel::Immediate);
            connection.activate_send_cycle(SendChannel::Deferred);
        }
    }

    /// Handles buffered packets and re-arms idle receive cycles
    pub fn flush_receive(&self) {
        for connection in self.snapshot() {
            connection.flush_receive();
        }
    }

    /// Disconnects every online connection with `reason`
    pub fn close_all(&self, reason: ErrorCode) {
        for connection in self.snapshot() {
            connection.disconnect_immediate(reason);
        }
    }
}
