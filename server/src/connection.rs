//! One client's TCP session
//!
//! A connection owns a receive event and two send events drawn from the
//! event pools, and registers itself with the dispatcher under its key.
//! Completions arrive on I/O worker threads through `IoEventHandler`;
//! the game tick and the expiry sweep touch the same connection from
//! other threads, so all mutable state is atomic or behind a lock.
//!
//! Lifecycle: `Online` until a protocol error, timeout or explicit
//! disconnect moves it `Offline`, then deleted by the environment once
//! the safe-delete grace period has passed.

use crate::config::{CONNECTION_EXPIRY_MS, SAFE_DELETE_MS};
use crate::connection_key::ConnectionKey;
use crate::handler::PacketHandler;
use crate::io::{IoEvent, IoEventHandler, IoEventKind, IoService, SendChannel, SocketHandle};
use crate::multicast::MulticastDataEntry;
use crate::player::Player;
use crate::pool::PoolHandle;
use crate::utils::get_timestamp;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use shared::packet::{DisconnectPlayer, MAX_CLIENT_PACKET_SIZE};
use shared::{ErrorCode, HandleOutcome, Packet, PacketFormat, PacketString, ParseError};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// No deferred packet outstanding.
const DEFER_IDLE: u8 = 0;
/// Receive is suspended until the reply arrives.
const DEFER_PENDING: u8 = 1;
/// The reply arrived while the deferring handler was still running.
const DEFER_RESUMED: u8 = 2;

/// The three pooled events a connection owns.
pub struct ConnectionEvents {
    pub recv: PoolHandle<IoEvent>,
    pub immediate: PoolHandle<IoEvent>,
    pub deferred: PoolHandle<IoEvent>,
}

pub struct Connection {
    key: ConnectionKey,
    socket: Arc<SocketHandle>,
    service: Arc<dyn IoService>,
    handler: Arc<dyn PacketHandler>,
    events: ConnectionEvents,
    online: AtomicBool,
    last_interaction: AtomicU64,
    offline_at: AtomicU64,
    deferred: AtomicU8,
    last_error: Mutex<Option<ErrorCode>>,
    player: Mutex<Option<Player>>,
}

impl Connection {
    pub fn new(
        key: ConnectionKey,
        socket: Arc<SocketHandle>,
        events: ConnectionEvents,
        service: Arc<dyn IoService>,
        handler: Arc<dyn PacketHandler>,
    ) -> Self {
        Self {
            key,
            socket,
            service,
            handler,
            events,
            online: AtomicBool::new(true),
            last_interaction: AtomicU64::new(get_timestamp()),
            offline_at: AtomicU64::new(0),
            deferred: AtomicU8::new(DEFER_IDLE),
            last_error: Mutex::new(None),
            player: Mutex::new(None),
        }
    }

    /// Hands the socket and events to the dispatcher.
    pub fn register(self: &Arc<Self>) -> bool {
        let handler: Weak<dyn IoEventHandler> = Arc::downgrade(self) as Weak<dyn IoEventHandler>;
        let source = crate::io::EventSource {
            socket: self.socket.clone(),
            recv_event: self.events.recv.object().clone(),
            immediate_event: self.events.immediate.object().clone(),
            deferred_event: self.events.deferred.object().clone(),
            handler,
        };
        self.service.register_event_source(self.key.raw(), source)
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.socket.peer_addr()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire) == DEFER_PENDING
    }

    pub fn last_error(&self) -> Option<ErrorCode> {
        *self.last_error.lock()
    }

    pub fn last_interaction(&self) -> u64 {
        self.last_interaction.load(Ordering::Acquire)
    }

    pub fn offline_at(&self) -> u64 {
        self.offline_at.load(Ordering::Acquire)
    }

    pub fn player(&self) -> MutexGuard<'_, Option<Player>> {
        self.player.lock()
    }

    pub fn attach_player(&self, player: Player) {
        *self.player.lock() = Some(player);
    }

    /// Runs `f` on the attached player, if any.
    pub fn with_player<R>(&self, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        self.player.lock().as_mut().map(f)
    }

    fn set_error(&self, error: ErrorCode) {
        let mut last_error = self.last_error.lock();
        if last_error.is_none() {
            *last_error = Some(error);
        }
    }

    fn send_event(&self, channel: SendChannel) -> &IoEvent {
        match channel {
            SendChannel::Immediate => &*self.events.immediate,
            SendChannel::Deferred => &*self.events.deferred,
        }
    }

    /// Arms the next receive unless the connection is offline, waiting on
    /// a deferred reply, or short of room for one more packet.
    pub fn activate_receive_cycle(&self) -> bool {
        if !self.is_online() || self.is_deferred() {
            return false;
        }

        let recv = &self.events.recv;
        if recv.data().unused_size() < MAX_CLIENT_PACKET_SIZE {
            return false;
        }

        // Claimed before submission so the completion never sees a stale flag.
        if !recv.try_begin_processing() {
            return false;
        }
        if !self.service.post_recv(self.key.raw()) {
            recv.finish_processing();
            return false;
        }
        true
    }

    /// Submits pending bytes of one send buffer, if any and none in flight.
    pub fn activate_send_cycle(&self, channel: SendChannel) -> bool {
        if self.socket.is_closed() {
            return false;
        }

        let event = self.send_event(channel);
        if event.data().is_empty() || !event.try_begin_processing() {
            return false;
        }
        if !self.service.post_send(self.key.raw(), channel) {
            event.finish_processing();
            return false;
        }
        true
    }

    /// Queues `packet` on `channel`; false when the buffer is full.
    pub fn send_packet<'a, P: PacketFormat<'a>>(&self, channel: SendChannel, packet: &P) -> bool {
        self.send_event(channel).data().push_packet(packet)
    }

    /// Queues pre-encoded packets on `channel`; false when the buffer is full.
    pub fn send_raw(&self, channel: SendChannel, bytes: &[u8]) -> bool {
        self.send_event(channel).data().push(bytes)
    }

    /// Queues `packet` on the immediate channel and starts sending it.
    pub fn send_immediate<'a, P: PacketFormat<'a>>(&self, packet: &P) -> bool {
        let queued = self.send_packet(SendChannel::Immediate, packet);
        self.activate_send_cycle(SendChannel::Immediate);
        queued
    }

    /// Writes a shared payload; the entry stays referenced until the
    /// write completes.
    pub fn send_multicast(&self, entry: &Arc<MulticastDataEntry>) -> bool {
        if !self.is_online() {
            return false;
        }
        entry.increase_ref();
        if self.service.post_multicast(self.key.raw(), entry.clone()) {
            true
        } else {
            entry.decrease_ref();
            false
        }
    }

    pub fn set_offline(&self) -> bool {
        self.set_offline_at(get_timestamp())
    }

    /// Moves the connection offline; false if it already was.
    pub fn set_offline_at(&self, now: u64) -> bool {
        if self
            .online
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.offline_at.store(now, Ordering::Release);
        debug!("Connection {} offline", self.key);
        true
    }

    fn disconnect(&self, channel: SendChannel, reason: ErrorCode, now: u64) -> bool {
        if !self.set_offline_at(now) {
            return false;
        }

        let message = reason.to_string();
        let packet = DisconnectPlayer {
            reason: PacketString::from(message.as_str()),
        };
        if !self.send_packet(channel, &packet) {
            warn!("No room for disconnect notice to {}", self.key);
        }
        info!("Disconnecting {} ({}): {}", self.key, self.peer_addr(), reason);
        true
    }

    /// Sends the disconnect notice right away and goes offline.
    pub fn disconnect_immediate(&self, reason: ErrorCode) -> bool {
        self.disconnect_immediate_at(reason, get_timestamp())
    }

    /// Like `disconnect_immediate`, stamping the offline time with `now`.
    pub fn disconnect_immediate_at(&self, reason: ErrorCode, now: u64) -> bool {
        let disconnected = self.disconnect(SendChannel::Immediate, reason, now);
        if disconnected {
            self.activate_send_cycle(SendChannel::Immediate);
        }
        disconnected
    }

    /// Queues the disconnect notice behind pending game traffic and goes
    /// offline; the next send flush delivers it.
    pub fn disconnect_deferred(&self, reason: ErrorCode) -> bool {
        self.disconnect(SendChannel::Deferred, reason, get_timestamp())
    }

    pub fn try_interact_with_client(&self) -> bool {
        self.try_interact_with_client_at(get_timestamp())
    }

    /// Refreshes the idle timer; false once the connection is offline.
    pub fn try_interact_with_client_at(&self, now: u64) -> bool {
        if !self.is_online() {
            return false;
        }
        self.last_interaction.store(now, Ordering::Release);
        true
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(get_timestamp())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.last_interaction() + CONNECTION_EXPIRY_MS
    }

    pub fn is_safe_delete(&self) -> bool {
        self.is_safe_delete_at(get_timestamp())
    }

    pub fn is_safe_delete_at(&self, now: u64) -> bool {
        !self.is_online() && now >= self.offline_at() + SAFE_DELETE_MS
    }

    /// Handles every complete packet at the front of `data` and returns
    /// the bytes consumed.
    ///
    /// Stops at a partial packet, after a deferred packet, or at the first
    /// error, which is recorded for the receive completion to act on.
    pub fn process_packets(&self, data: &[u8]) -> usize {
        let mut consumed = 0;
        while consumed < data.len() {
            let (packet, size) = match Packet::parse(&data[consumed..]) {
                Ok(parsed) => parsed,
                Err(ParseError::Insufficient) => break,
                Err(ParseError::InvalidId(id)) => {
                    warn!("Invalid packet id {:#04x} from {}", id, self.key);
                    self.set_error(ErrorCode::InvalidPacketId);
                    break;
                }
            };

            if let Err(error) = packet.validate() {
                warn!("Rejected {:?} from {}: {}", packet.id(), self.key, error);
                self.set_error(error);
                break;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| self.handler.handle_packet(self, &packet)))
                .unwrap_or_else(|_| {
                    warn!("Handler panicked on {:?} from {}", packet.id(), self.key);
                    Err(ErrorCode::InternalError)
                });

            match outcome {
                Ok(HandleOutcome::Success) => consumed += size,
                Ok(HandleOutcome::Deferred) => {
                    consumed += size;
                    if self.suspend_for_reply() || !self.is_online() {
                        break;
                    }
                }
                Err(error) => {
                    warn!("Failed to handle {:?} from {}: {}", packet.id(), self.key, error);
                    self.set_error(error);
                    break;
                }
            }
        }
        consumed
    }

    /// Suspends receive after a deferred packet. False when the reply
    /// already came in during the handler call, so processing goes on.
    fn suspend_for_reply(&self) -> bool {
        match self.deferred.compare_exchange(
            DEFER_IDLE,
            DEFER_PENDING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(_) => {
                self.deferred.store(DEFER_IDLE, Ordering::Release);
                false
            }
        }
    }

    /// Handles packets left in the receive buffer and re-arms the
    /// receive cycle. No-op while a receive is in flight.
    pub fn flush_receive(&self) {
        if !self.is_online() || self.is_deferred() {
            return;
        }

        let recv = &self.events.recv;
        if !recv.try_begin_processing() {
            return;
        }
        {
            let mut data = recv.data();
            let consumed = self.process_packets(data.data());
            data.pop(consumed);
        }
        recv.finish_processing();
        self.after_receive();
    }

    /// Completes a deferred packet with the reply of the other service.
    pub fn resume_deferred(&self, result: Result<(), ErrorCode>) {
        let mut state = self.deferred.load(Ordering::Acquire);
        loop {
            let next = match state {
                DEFER_PENDING => DEFER_IDLE,
                _ => DEFER_RESUMED,
            };
            match self
                .deferred
                .compare_exchange(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => state = current,
            }
        }

        match result {
            Ok(()) => self.flush_receive(),
            Err(error) => {
                self.set_error(error);
                self.disconnect_immediate(error);
            }
        }
    }

    fn after_receive(&self) {
        match self.last_error() {
            Some(error) => {
                self.disconnect_immediate(error);
            }
            None => {
                self.activate_receive_cycle();
            }
        }
    }

    /// Stops all socket activity. Pending operations complete with errors.
    pub fn close(&self) {
        self.socket.close();
        self.service.deregister_event_source(self.key.raw());
    }
}

impl IoEventHandler for Connection {
    fn handle_io_event(&self, data: &[u8]) -> usize {
        if !self.try_interact_with_client() {
            return data.len();
        }
        self.process_packets(data)
    }

    fn on_success(&self, kind: IoEventKind) {
        match kind {
            IoEventKind::Recv => self.after_receive(),
            IoEventKind::Send(channel) => {
                self.activate_send_cycle(channel);
            }
            IoEventKind::Multicast => {}
        }
    }

    fn on_error(&self, kind: IoEventKind) {
        if self.set_offline() {
            debug!("Connection {} lost on {:?}", self.key, kind);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoCompletionPort, IoEventPool};
    use shared::packet::{encode, Handshake, PacketId, SetBlockClient};
    use shared::HandleResult;
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Default)]
    struct Recorder {
        packets: Mutex<Vec<PacketId>>,
        defer_handshake: bool,
        reply_before_return: bool,
        panic_on_ping: bool,
    }

    impl PacketHandler for Recorder {
        fn handle_packet(&self, connection: &Connection, packet: &Packet<'_>) -> HandleResult {
            self.packets.lock().push(packet.id());
            match packet {
                Packet::Handshake(_) if self.reply_before_return => {
                    connection.resume_deferred(Ok(()));
                    Ok(HandleOutcome::Deferred)
                }
                Packet::Handshake(_) if self.defer_handshake => Ok(HandleOutcome::Deferred),
                Packet::Ping(_) if self.panic_on_ping => panic!("handler bug"),
                Packet::LevelFinalize(_) => Err(ErrorCode::UnsupportedPacket),
                _ => Ok(HandleOutcome::Success),
            }
        }
    }

    async fn connection(handler: Arc<Recorder>) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        let pool = IoEventPool::new(4);
        let events = ConnectionEvents {
            recv: pool.new_recv_event().unwrap(),
            immediate: pool.new_small_send_event().unwrap(),
            deferred: pool.new_send_event().unwrap(),
        };
        let service: Arc<dyn IoService> =
            Arc::new(IoCompletionPort::new(tokio::runtime::Handle::current()));
        let connection = Arc::new(Connection::new(
            ConnectionKey::new(0, 1),
            Arc::new(SocketHandle::new(stream).unwrap()),
            events,
            service,
            handler,
        ));
        assert!(connection.register());
        (connection, client)
    }

    fn set_block() -> Vec<u8> {
        let mut out = vec![0u8; PacketId::SetBlockClient.size()];
        let packet = SetBlockClient {
            x: 1,
            y: 2,
            z: 3,
            mode: SetBlockClient::MODE_CREATE,
            block_type: 4,
        };
        encode(&packet, &mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_partial_packet_waits_for_rest() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;
        let bytes = set_block();
        assert_eq!(bytes.len(), 9);

        assert_eq!(connection.handle_io_event(&bytes[..8]), 0);
        assert!(handler.packets.lock().is_empty());

        assert_eq!(connection.handle_io_event(&bytes), 9);
        assert_eq!(handler.packets.lock().as_slice(), &[PacketId::SetBlockClient]);
        assert!(connection.last_error().is_none());
    }

    #[tokio::test]
    async fn test_several_packets_in_one_read() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;
        let mut bytes = set_block();
        bytes.push(PacketId::Ping as u8);
        bytes.extend_from_slice(&set_block()[..3]);

        assert_eq!(connection.handle_io_event(&bytes), 10);
        assert_eq!(handler.packets.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_id_records_error_and_disconnects() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;

        assert_eq!(connection.handle_io_event(&[0xEE, 0, 0]), 0);
        assert_eq!(connection.last_error(), Some(ErrorCode::InvalidPacketId));
        assert!(connection.is_online());

        connection.on_success(IoEventKind::Recv);
        assert!(!connection.is_online());
        assert!(!connection.activate_receive_cycle());
    }

    #[tokio::test]
    async fn test_validation_failure_stops_processing() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;

        let mut bytes = vec![0u8; PacketId::Handshake.size()];
        let handshake = Handshake {
            protocol_version: 6,
            username: "alice".into(),
            password: "".into(),
            user_type: 0,
        };
        encode(&handshake, &mut bytes).unwrap();

        assert_eq!(connection.handle_io_event(&bytes), 0);
        assert_eq!(connection.last_error(), Some(ErrorCode::UnsupportedProtocolVersion));
        assert!(handler.packets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_is_recorded() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;

        let mut bytes = vec![0u8; PacketId::LevelFinalize.size()];
        bytes[0] = PacketId::LevelFinalize as u8;
        assert_eq!(connection.handle_io_event(&bytes), 0);
        assert_eq!(connection.last_error(), Some(ErrorCode::UnsupportedPacket));
    }

    #[tokio::test]
    async fn test_deferred_packet_suspends_receive() {
        let handler = Arc::new(Recorder {
            defer_handshake: true,
            ..Recorder::default()
        });
        let (connection, _client) = connection(handler.clone()).await;

        let mut bytes = vec![0u8; PacketId::Handshake.size()];
        let handshake = Handshake {
            protocol_version: shared::PROTOCOL_VERSION,
            username: "alice".into(),
            password: "".into(),
            user_type: 0,
        };
        encode(&handshake, &mut bytes).unwrap();
        bytes.push(PacketId::Ping as u8);

        assert_eq!(connection.handle_io_event(&bytes), PacketId::Handshake.size());
        assert!(connection.is_deferred());
        assert!(!connection.activate_receive_cycle());

        connection.resume_deferred(Ok(()));
        assert!(!connection.is_deferred());
        assert!(connection.is_online());
    }

    fn handshake_then_ping() -> Vec<u8> {
        let mut bytes = vec![0u8; PacketId::Handshake.size()];
        let handshake = Handshake {
            protocol_version: shared::PROTOCOL_VERSION,
            username: "alice".into(),
            password: "".into(),
            user_type: 0,
        };
        encode(&handshake, &mut bytes).unwrap();
        bytes.push(PacketId::Ping as u8);
        bytes
    }

    #[tokio::test]
    async fn test_reply_during_deferring_handler_keeps_receiving() {
        let handler = Arc::new(Recorder {
            reply_before_return: true,
            ..Recorder::default()
        });
        let (connection, _client) = connection(handler.clone()).await;
        let bytes = handshake_then_ping();

        // Same state as a receive completion being dispatched.
        assert!(connection.events.recv.try_begin_processing());
        assert_eq!(connection.handle_io_event(&bytes), bytes.len());
        connection.events.recv.finish_processing();

        assert!(!connection.is_deferred());
        assert_eq!(
            handler.packets.lock().as_slice(),
            &[PacketId::Handshake, PacketId::Ping]
        );
        assert!(connection.activate_receive_cycle());
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let handler = Arc::new(Recorder {
            panic_on_ping: true,
            ..Recorder::default()
        });
        let (connection, _client) = connection(handler.clone()).await;

        assert!(connection.events.recv.data().push(&[PacketId::Ping as u8]));
        connection.flush_receive();

        assert_eq!(connection.last_error(), Some(ErrorCode::InternalError));
        assert!(!connection.is_online());
        assert_eq!(handler.packets.lock().as_slice(), &[PacketId::Ping]);
    }

    #[tokio::test]
    async fn test_failed_deferral_disconnects() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler).await;

        connection.resume_deferred(Err(ErrorCode::LoginServerUnavailable));
        assert!(!connection.is_online());
        assert_eq!(connection.last_error(), Some(ErrorCode::LoginServerUnavailable));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler).await;

        assert!(connection.disconnect_deferred(ErrorCode::ServerShutdown));
        assert!(!connection.disconnect_deferred(ErrorCode::ServerShutdown));
        assert!(!connection.disconnect_immediate(ErrorCode::ServerShutdown));
        assert_eq!(
            connection.events.deferred.data().size(),
            PacketId::DisconnectPlayer.size()
        );
        assert!(!connection.try_interact_with_client());
    }

    #[tokio::test]
    async fn test_expiry_and_safe_delete() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler).await;

        assert!(connection.try_interact_with_client_at(1_000));
        assert!(!connection.is_expired_at(1_000 + CONNECTION_EXPIRY_MS - 1));
        assert!(connection.is_expired_at(1_000 + CONNECTION_EXPIRY_MS));
        assert!(!connection.is_safe_delete_at(u64::MAX / 2));

        assert!(connection.set_offline_at(2_000));
        assert!(!connection.is_safe_delete_at(2_000 + SAFE_DELETE_MS - 1));
        assert!(connection.is_safe_delete_at(2_000 + SAFE_DELETE_MS));
    }

    #[tokio::test]
    async fn test_offline_connection_discards_input() {
        let handler = Arc::new(Recorder::default());
        let (connection, _client) = connection(handler.clone()).await;

        connection.set_offline();
        let bytes = set_block();
        assert_eq!(connection.handle_io_event(&bytes), bytes.len());
        assert!(handler.packets.lock().is_empty());
    }
}
