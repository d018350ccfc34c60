//! Authoritative world state and the game-side packet handler

use crate::config::{ServerConfig, PING_PERIOD_MS, UDP_RETRANSMISSION_PERIOD_MS, UDP_RETRY_COUNT};
use crate::communicator::{Communicator, InboundMessage};
use crate::connection::Connection;
use crate::connection_environment::ConnectionEnvironment;
use crate::connection_key::ConnectionKey;
use crate::deferred::DeferredTable;
use crate::handler::PacketHandler;
use crate::io::SendChannel;
use crate::multicast::{MulticastManager, MulticastTag};
use crate::player::{Player, PlayerState};
use crate::utils::{get_timestamp, has_elapsed};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::extension::{server_ext_entries, server_ext_info};
use shared::level::{serialize_level, LevelDimensions};
use shared::message::{
    ChatBroadcast, HandshakeRequest, HandshakeResponse, Heartbeat, MessageId, MessageRequest,
    PlayerType,
};
use shared::packet::{
    encode_to_vec, ChatMessage, DespawnPlayer, Handshake, LevelInitialize, Ping,
    ServerIdentification, SetBlockClient, SetBlockServer, SpawnPlayer, TwoWayPing,
};
use shared::{
    ErrorCode, HandleOutcome, HandleResult, Packet, PacketId, PlayerPosition, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const BLOCK_AIR: u8 = 0;
pub const BLOCK_GRASS: u8 = 2;
pub const BLOCK_DIRT: u8 = 3;

/// Player id meaning "yourself" in spawn packets
const SELF_PLAYER_ID: i8 = -1;

/// Sender id of chat lines that come from the server or another service
const SERVER_PLAYER_ID: i8 = -1;

/// The block volume players build in
pub struct World {
    dimensions: LevelDimensions,
    blocks: Vec<u8>,
    /// Set when blocks changed since the level payload was last encoded
    dirty: bool,
}

impl World {
    /// Creates a flat world: dirt up to half height, topped with grass
    pub fn flat(dimensions: LevelDimensions) -> Self {
        let mut blocks = vec![BLOCK_AIR; dimensions.volume()];
        let surface = dimensions.y / 2;
        for y in 0..surface {
            let block = if y + 1 == surface { BLOCK_GRASS } else { BLOCK_DIRT };
            for z in 0..dimensions.z {
                for x in 0..dimensions.x {
                    if let Some(index) = dimensions.index_of(x, y, z) {
                        blocks[index] = block;
                    }
                }
            }
        }

        Self {
            dimensions,
            blocks,
            dirty: true,
        }
    }

    pub fn dimensions(&self) -> LevelDimensions {
        self.dimensions
    }

    pub fn block(&self, x: i16, y: i16, z: i16) -> Option<u8> {
        self.dimensions.index_of(x, y, z).map(|index| self.blocks[index])
    }

    /// Stores `block`; false when the coordinates are outside the world
    pub fn set_block(&mut self, x: i16, y: i16, z: i16, block: u8) -> bool {
        match self.dimensions.index_of(x, y, z) {
            Some(index) => {
                self.blocks[index] = block;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn spawn_point(&self) -> PlayerPosition {
        PlayerPosition::spawn_at(self.dimensions.x / 2, self.dimensions.y / 2, self.dimensions.z / 2)
    }

    /// Level initialize, compressed chunks and finalize, ready to multicast
    pub fn encode_level(&self) -> Option<Vec<u8>> {
        let mut payload = Vec::new();
        encode_to_vec(&LevelInitialize, &mut payload);
        match serialize_level(&self.blocks, self.dimensions) {
            Ok(level) => {
                payload.extend_from_slice(&level);
                Some(payload)
            }
            Err(e) => {
                error!("Failed to compress level: {}", e);
                None
            }
        }
    }
}

/// Usernames in the world and the game ids they hold
struct Roster {
    names: HashMap<String, i8>,
    free_ids: Vec<i8>,
}

impl Roster {
    fn new(max_players: usize) -> Self {
        let count = max_players.min(i8::MAX as usize + 1);
        Self {
            names: HashMap::new(),
            free_ids: (0..count).rev().map(|id| id as i8).collect(),
        }
    }

    fn join(&mut self, username: &str) -> Result<i8, ErrorCode> {
        if self.names.contains_key(username) {
            return Err(ErrorCode::AlreadyLoggedIn);
        }
        let game_id = self.free_ids.pop().ok_or(ErrorCode::ClientConnectionFull)?;
        self.names.insert(username.to_string(), game_id);
        Ok(game_id)
    }

    fn leave(&mut self, username: &str) {
        if let Some(game_id) = self.names.remove(username) {
            self.free_ids.push(game_id);
        }
    }

    fn contains(&self, username: &str) -> bool {
        self.names.contains_key(username)
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// A handshake parked while the login service decides
#[derive(Debug, Clone)]
struct PendingLogin {
    username: String,
    password: String,
    cpe: bool,
}

/// Game-side server role
///
/// Handles client packets on the I/O threads and runs the periodic tick
/// that moves players through level transfer and spawn, and broadcasts
/// batched world changes through the multicast manager.
pub struct GameServer {
    server_name: String,
    motd: String,
    world: Mutex<World>,
    roster: Mutex<Roster>,
    multicast: MulticastManager,
    communicator: Option<Arc<Communicator>>,
    login_server: Option<SocketAddr>,
    pending_logins: DeferredTable<PendingLogin>,
    block_batch: Mutex<Vec<u8>>,
    chat_batch: Mutex<Vec<u8>>,
    last_ping: AtomicU64,
}

impl GameServer {
    pub fn new(config: &ServerConfig, communicator: Option<Arc<Communicator>>) -> Self {
        Self {
            server_name: config.server_name.clone(),
            motd: config.motd.clone(),
            world: Mutex::new(World::flat(config.level_dimensions())),
            roster: Mutex::new(Roster::new(config.max_players)),
            multicast: MulticastManager::new(),
            communicator,
            login_server: config.login_server,
            pending_logins: DeferredTable::new(UDP_RETRANSMISSION_PERIOD_MS, UDP_RETRY_COUNT),
            block_batch: Mutex::new(Vec::new()),
            chat_batch: Mutex::new(Vec::new()),
            last_ping: AtomicU64::new(0),
        }
    }

    pub fn online_players(&self) -> usize {
        self.roster.lock().len()
    }

    pub fn pending_logins(&self) -> usize {
        self.pending_logins.len()
    }

    pub fn multicast(&self) -> &MulticastManager {
        &self.multicast
    }

    pub fn block(&self, x: i16, y: i16, z: i16) -> Option<u8> {
        self.world.lock().block(x, y, z)
    }

    fn handle_handshake(&self, connection: &Connection, handshake: &Handshake<'_>) -> HandleResult {
        if connection.player().is_some() || self.pending_logins.contains(connection.key()) {
            return Err(ErrorCode::AlreadyLoggedIn);
        }

        let username = handshake.username.to_string_lossy().into_owned();
        if self.roster.lock().contains(&username) {
            return Err(ErrorCode::AlreadyLoggedIn);
        }

        match (&self.communicator, self.login_server) {
            (Some(communicator), Some(login_server)) => {
                let login = PendingLogin {
                    username,
                    password: handshake.password.to_string_lossy().into_owned(),
                    cpe: handshake.supports_cpe(),
                };
                let request = login_request(connection.key(), &login)?;
                if !self
                    .pending_logins
                    .insert(connection.key(), login, get_timestamp())
                {
                    return Err(ErrorCode::AlreadyLoggedIn);
                }
                if let Err(e) = communicator.try_send_to(&request, login_server) {
                    warn!("Login request for {} not sent yet: {}", connection.key(), e);
                }
                debug!("Handshake of {} waits for login service", connection.key());
                Ok(HandleOutcome::Deferred)
            }
            _ => {
                self.complete_handshake(connection, &username, PlayerType::Guest, handshake.supports_cpe())?;
                Ok(HandleOutcome::Success)
            }
        }
    }

    /// Admits the player into the world and answers the handshake
    fn complete_handshake(
        &self,
        connection: &Connection,
        username: &str,
        player_type: PlayerType,
        cpe: bool,
    ) -> Result<(), ErrorCode> {
        let game_id = self.roster.lock().join(username)?;
        let spawn = self.world.lock().spawn_point();
        connection.attach_player(Player::new(game_id, username, player_type, cpe, spawn));

        let identification = ServerIdentification {
            protocol_version: PROTOCOL_VERSION,
            server_name: self.server_name.as_str().into(),
            motd: self.motd.as_str().into(),
            user_type: player_type.user_type_byte(),
        };
        let mut queued = connection.send_packet(SendChannel::Immediate, &identification);
        if cpe {
            queued &= connection.send_packet(SendChannel::Immediate, &server_ext_info());
            for entry in server_ext_entries() {
                queued &= connection.send_packet(SendChannel::Immediate, &entry);
            }
        }
        connection.activate_send_cycle(SendChannel::Immediate);

        if !queued {
            return Err(ErrorCode::InsufficientSendBuffer);
        }
        info!("{} joined as player {} ({:?})", username, game_id, player_type);
        Ok(())
    }

    fn handle_set_block(&self, packet: &SetBlockClient) -> HandleResult {
        let block = if packet.mode == SetBlockClient::MODE_CREATE {
            packet.block_type
        } else {
            BLOCK_AIR
        };

        if !self.world.lock().set_block(packet.x, packet.y, packet.z, block) {
            debug!("Ignoring block outside the world at {},{},{}", packet.x, packet.y, packet.z);
            return Ok(HandleOutcome::Success);
        }

        let update = SetBlockServer {
            x: packet.x,
            y: packet.y,
            z: packet.z,
            block_type: block,
        };
        encode_to_vec(&update, &mut self.block_batch.lock());
        Ok(HandleOutcome::Success)
    }

    fn handle_chat(&self, connection: &Connection, message: &ChatMessage<'_>) -> HandleResult {
        let sender = connection
            .with_player(|player| (player.game_id(), player.username().to_string()))
            .ok_or(ErrorCode::UnauthenticatedPlayer)?;

        let line = format!("{}: {}", sender.1, message.message.to_string_lossy());
        self.queue_chat(sender.0, &line);
        Ok(HandleOutcome::Success)
    }

    fn queue_chat(&self, player_id: i8, line: &str) {
        let packet = ChatMessage {
            player_id,
            message: line.into(),
        };
        encode_to_vec(&packet, &mut self.chat_batch.lock());
    }

    /// Writes `payload` once to all `targets` through `tag`
    fn broadcast(&self, tag: MulticastTag, payload: Vec<u8>, targets: &[Arc<Connection>]) {
        if payload.is_empty() || targets.is_empty() {
            return;
        }
        let entry = self.multicast.set_data(tag, payload);
        for connection in targets {
            connection.send_multicast(&entry);
        }
    }

    pub fn tick(&self, environment: &ConnectionEnvironment) {
        self.tick_at(environment, get_timestamp());
    }

    /// Advances every player one step and broadcasts what changed
    pub fn tick_at(&self, environment: &ConnectionEnvironment, now: u64) {
        self.despawn_disconnected(environment);
        self.spawn_new_players(environment);
        self.transfer_level(environment);
        self.sync_positions(environment);

        let spawned = environment.select_players(|player| player.state() == PlayerState::Spawned);
        let blocks = std::mem::take(&mut *self.block_batch.lock());
        self.broadcast(MulticastTag::SyncBlockData, blocks, &spawned);
        let chat = std::mem::take(&mut *self.chat_batch.lock());
        self.broadcast(MulticastTag::ChatMessage, chat, &spawned);

        if has_elapsed(self.last_ping.load(Ordering::Acquire), PING_PERIOD_MS, now) {
            self.last_ping.store(now, Ordering::Release);
            environment.for_each_connection(|connection| {
                if connection.is_online() {
                    connection.send_packet(SendChannel::Deferred, &Ping);
                }
            });
        }
    }

    /// Releases players of offline connections and tells the others
    fn despawn_disconnected(&self, environment: &ConnectionEnvironment) {
        let mut despawns = Vec::new();
        environment.for_each_connection(|connection| {
            if connection.is_online() {
                return;
            }
            self.pending_logins.resolve(connection.key());

            let left = connection.with_player(|player| {
                let was = player.state();
                if was == PlayerState::Disconnected {
                    return None;
                }
                player.set_state(PlayerState::Disconnected);
                Some((was, player.game_id(), player.username().to_string()))
            });

            if let Some(Some((was, game_id, username))) = left {
                self.roster.lock().leave(&username);
                if was == PlayerState::Spawned {
                    encode_to_vec(&DespawnPlayer { player_id: game_id }, &mut despawns);
                }
                info!("{} left the world", username);
            }
        });

        let spawned = environment.select_players(|player| player.state() == PlayerState::Spawned);
        self.broadcast(MulticastTag::DespawnPlayer, despawns, &spawned);
    }

    /// Spawns players that received the level
    fn spawn_new_players(&self, environment: &ConnectionEnvironment) {
        let arrivals = environment.select_players(|player| player.state() == PlayerState::LevelInitialized);
        if arrivals.is_empty() {
            return;
        }
        let residents = environment.select_players(|player| player.state() == PlayerState::Spawned);

        let spawn_of = |player: &Player, out: &mut Vec<u8>| {
            let packet = SpawnPlayer {
                player_id: player.game_id(),
                name: player.username().into(),
                position: player.position(),
            };
            encode_to_vec(&packet, out);
        };

        let mut resident_spawns = Vec::new();
        for connection in &residents {
            if let Some(player) = connection.player().as_ref() {
                spawn_of(player, &mut resident_spawns);
            }
        }

        let mut arrival_spawns = Vec::new();
        for connection in &arrivals {
            if let Some(player) = connection.player().as_ref() {
                spawn_of(player, &mut arrival_spawns);
            }
        }

        for connection in &arrivals {
            let mut own = Vec::new();
            let game_id = connection.with_player(|player| {
                let packet = SpawnPlayer {
                    player_id: SELF_PLAYER_ID,
                    name: player.username().into(),
                    position: player.position(),
                };
                encode_to_vec(&packet, &mut own);
                player.set_state(PlayerState::Spawned);
                player.game_id()
            });
            let Some(game_id) = game_id else {
                continue;
            };

            let others: Vec<u8> = arrival_spawns
                .chunks(PacketId::SpawnPlayer.size())
                .filter(|packet| packet.get(1) != Some(&(game_id as u8)))
                .flatten()
                .copied()
                .collect();

            let queued = connection.send_raw(SendChannel::Deferred, &own)
                && connection.send_raw(SendChannel::Deferred, &resident_spawns)
                && connection.send_raw(SendChannel::Deferred, &others);
            if !queued {
                connection.disconnect_immediate(ErrorCode::InsufficientSendBuffer);
            }
        }

        self.broadcast(MulticastTag::SpawnPlayer, arrival_spawns, &residents);
    }

    /// Starts the level transfer for players done with the handshake
    fn transfer_level(&self, environment: &ConnectionEnvironment) {
        let ready = environment.select_players(Player::is_ready_for_level);
        if ready.is_empty() {
            return;
        }

        let entry = {
            let mut world = self.world.lock();
            match self.multicast.active(MulticastTag::LevelData) {
                Some(entry) if !world.dirty => entry,
                _ => {
                    let Some(payload) = world.encode_level() else {
                        return;
                    };
                    world.dirty = false;
                    self.multicast.set_data(MulticastTag::LevelData, payload)
                }
            }
        };

        for connection in &ready {
            if connection.send_multicast(&entry) {
                connection.with_player(|player| player.set_state(PlayerState::LevelInitialized));
            }
        }
    }

    /// Broadcasts movement of every spawned player since the last tick
    fn sync_positions(&self, environment: &ConnectionEnvironment) {
        let spawned = environment.select_players(|player| player.state() == PlayerState::Spawned);

        let mut updates = Vec::new();
        let mut scratch = [0u8; 16];
        for connection in &spawned {
            let update = connection.with_player(Player::take_position_update).flatten();
            if let Some(size) = update.and_then(|update| update.encode(&mut scratch)) {
                updates.extend_from_slice(&scratch[..size]);
            }
        }

        self.broadcast(MulticastTag::SyncPlayerPosition, updates, &spawned);
    }

    /// Collects multicast payloads no write can still be using
    pub fn collect_garbage(&self) -> usize {
        MulticastTag::ALL
            .iter()
            .map(|&tag| self.multicast.gc(tag))
            .sum()
    }

    /// Handles a message from another service
    pub fn on_message(&self, environment: &ConnectionEnvironment, inbound: InboundMessage) {
        let InboundMessage { request, addr } = inbound;
        match request.message_id() {
            MessageId::HandshakeResponse => match request.decode::<HandshakeResponse>() {
                Ok(response) => self.on_login_response(environment, response),
                Err(e) => warn!("Bad login response from {}: {}", addr, e),
            },
            MessageId::ChatBroadcast => match request.decode::<ChatBroadcast>() {
                Ok(chat) => self.queue_chat(SERVER_PLAYER_ID, &format!("[{}] {}", chat.sender, chat.message)),
                Err(e) => warn!("Bad chat broadcast from {}: {}", addr, e),
            },
            MessageId::Ping => {
                let reply = request
                    .decode::<Heartbeat>()
                    .and_then(|heartbeat| MessageRequest::new(MessageId::Pong, &heartbeat));
                match (reply, &self.communicator) {
                    (Ok(reply), Some(communicator)) => {
                        if let Err(e) = communicator.try_send_to(&reply, addr) {
                            warn!("Failed to answer ping from {}: {}", addr, e);
                        }
                    }
                    (Err(e), _) => warn!("Bad ping from {}: {}", addr, e),
                    _ => {}
                }
            }
            other => debug!("Ignoring {:?} from {}", other, addr),
        }
    }

    fn on_login_response(&self, environment: &ConnectionEnvironment, response: HandshakeResponse) {
        let key = ConnectionKey::from_raw(response.connection_key);
        let Some(login) = self.pending_logins.resolve(key) else {
            debug!("Login response for unknown request {}", key);
            return;
        };
        let Some(connection) = environment.try_acquire_connection(key) else {
            debug!("Login response for departed connection {}", key);
            return;
        };

        let result = match response.error {
            Some(error) => Err(error),
            None => {
                let player_type = if response.player_not_exist {
                    PlayerType::Guest
                } else {
                    response.player_type
                };
                self.complete_handshake(&connection, &login.username, player_type, login.cpe)
            }
        };
        connection.resume_deferred(result);
    }

    pub fn retry_pending_logins(&self, environment: &ConnectionEnvironment) {
        self.retry_pending_logins_at(environment, get_timestamp());
    }

    /// Retransmits unanswered login requests and fails those out of retries
    pub fn retry_pending_logins_at(&self, environment: &ConnectionEnvironment, now: u64) {
        let plan = self.pending_logins.retry_at(now);

        if let (Some(communicator), Some(login_server)) = (&self.communicator, self.login_server) {
            for (key, login) in &plan.resend {
                let sent = login_request(*key, login)
                    .ok()
                    .map(|request| communicator.try_send_to(&request, login_server));
                if !matches!(sent, Some(Ok(()))) {
                    warn!("Failed to retransmit login request for {}", key);
                }
            }
        }

        for (key, login) in plan.expired {
            warn!("Login service did not answer for {} ({})", login.username, key);
            if let Some(connection) = environment.try_acquire_connection(key) {
                connection.resume_deferred(Err(ErrorCode::LoginServerUnavailable));
            }
        }
    }
}

fn login_request(key: ConnectionKey, login: &PendingLogin) -> Result<MessageRequest, ErrorCode> {
    let payload = HandshakeRequest {
        connection_key: key.raw(),
        username: login.username.clone(),
        password: login.password.clone(),
    };
    MessageRequest::new(MessageId::HandshakeRequest, &payload).map_err(|e| {
        error!("Failed to encode login request: {}", e);
        ErrorCode::InternalError
    })
}

impl PacketHandler for GameServer {
    fn handle_packet(&self, connection: &Connection, packet: &Packet<'_>) -> HandleResult {
        if let Packet::Handshake(handshake) = packet {
            return self.handle_handshake(connection, handshake);
        }
        if connection.player().is_none() {
            return Err(ErrorCode::UnauthenticatedPlayer);
        }

        match packet {
            Packet::Ping(_) => Ok(HandleOutcome::Success),
            Packet::TwoWayPing(ping) => {
                if ping.direction == 0 {
                    connection.send_immediate(&TwoWayPing {
                        direction: 0,
                        data: ping.data,
                    });
                }
                Ok(HandleOutcome::Success)
            }
            Packet::SetBlockClient(set_block) => self.handle_set_block(set_block),
            Packet::SetPlayerPosition(update) => {
                connection.with_player(|player| player.set_position(update.position));
                Ok(HandleOutcome::Success)
            }
            Packet::ChatMessage(message) => self.handle_chat(connection, message),
            Packet::ExtInfo(info) => {
                connection.with_player(|player| player.begin_extension_sync(info.extension_count));
                Ok(HandleOutcome::Success)
            }
            Packet::ExtEntry(entry) => {
                let name = entry.extension_name.to_string_lossy();
                connection.with_player(|player| player.register_extension(&name, entry.version));
                Ok(HandleOutcome::Success)
            }
            _ => Err(ErrorCode::UnsupportedPacket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoCompletionPort, IoEventHandler, IoService, SocketHandle};
    use shared::message::MESSAGE_CAPACITY;
    use shared::packet::encode;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    #[test]
    fn test_flat_world() {
        let world = World::flat(LevelDimensions::new(4, 8, 4));
        assert_eq!(world.block(0, 0, 0), Some(BLOCK_DIRT));
        assert_eq!(world.block(1, 3, 2), Some(BLOCK_GRASS));
        assert_eq!(world.block(1, 4, 2), Some(BLOCK_AIR));
        assert_eq!(world.block(4, 0, 0), None);
        assert_eq!(world.spawn_point(), PlayerPosition::spawn_at(2, 4, 2));
    }

    #[test]
    fn test_set_block_marks_world_dirty() {
        let mut world = World::flat(LevelDimensions::new(4, 4, 4));
        world.dirty = false;
        assert!(!world.set_block(-1, 0, 0, 1));
        assert!(!world.dirty);
        assert!(world.set_block(1, 1, 1, 7));
        assert!(world.dirty);
        assert_eq!(world.block(1, 1, 1), Some(7));
    }

    #[test]
    fn test_level_payload_framing() {
        let world = World::flat(LevelDimensions::new(16, 16, 16));
        let payload = world.encode_level().unwrap();

        assert_eq!(payload[0], PacketId::LevelInitialize as u8);
        assert_eq!(payload[1], PacketId::LevelDataChunk as u8);
        let finalize = &payload[payload.len() - PacketId::LevelFinalize.size()..];
        assert_eq!(finalize, &[PacketId::LevelFinalize as u8, 0, 16, 0, 16, 0, 16]);
    }

    #[test]
    fn test_roster_ids() {
        let mut roster = Roster::new(2);
        assert_eq!(roster.join("alice"), Ok(0));
        assert_eq!(roster.join("alice"), Err(ErrorCode::AlreadyLoggedIn));
        assert_eq!(roster.join("bob"), Ok(1));
        assert_eq!(roster.join("carol"), Err(ErrorCode::ClientConnectionFull));

        roster.leave("alice");
        assert!(!roster.contains("alice"));
        assert_eq!(roster.join("carol"), Ok(0));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_roster_caps_ids_at_signed_byte() {
        let roster = Roster::new(1_000);
        assert_eq!(roster.free_ids.len(), 128);
        assert!(roster.free_ids.iter().all(|&id| id >= 0));

        let mut roster = Roster::new(128);
        assert_eq!(roster.free_ids.len(), 128);
        assert_eq!(roster.join("alice"), Ok(0));
        assert!(roster.free_ids.contains(&i8::MAX));
    }

    #[test]
    fn test_new_server_is_empty() {
        let server = GameServer::new(&ServerConfig::default(), None);
        assert_eq!(server.online_players(), 0);
        assert_eq!(server.pending_logins(), 0);
        assert!(server.multicast().active(MulticastTag::LevelData).is_none());
        assert_eq!(server.world.lock().dimensions(), LevelDimensions::new(64, 32, 64));
    }

    #[test]
    fn test_server_chat_is_batched() {
        let server = GameServer::new(&ServerConfig::default(), None);
        server.queue_chat(SERVER_PLAYER_ID, "hello");
        server.queue_chat(SERVER_PLAYER_ID, "world");
        assert_eq!(server.chat_batch.lock().len(), 2 * PacketId::ChatMessage.size());
    }

    #[test]
    fn test_block_updates_are_batched() {
        let server = GameServer::new(&ServerConfig::default(), None);
        let packet = SetBlockClient {
            x: 1,
            y: 1,
            z: 1,
            mode: SetBlockClient::MODE_DESTROY,
            block_type: 5,
        };
        assert_eq!(server.handle_set_block(&packet), Ok(HandleOutcome::Success));
        assert_eq!(server.block(1, 1, 1), Some(BLOCK_AIR));

        let outside = SetBlockClient { x: -5, ..packet };
        assert_eq!(server.handle_set_block(&outside), Ok(HandleOutcome::Success));
        assert_eq!(server.block_batch.lock().len(), PacketId::SetBlockServer.size());
    }

    #[tokio::test]
    async fn test_silent_login_service_fails_handshake() {
        let login_service = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            login_server: Some(login_service.local_addr().unwrap()),
            ..ServerConfig::default()
        };
        let communicator = Arc::new(Communicator::bind("127.0.0.1:0").await.unwrap());
        let game = Arc::new(GameServer::new(&config, Some(communicator)));

        let service: Arc<dyn IoService> =
            Arc::new(IoCompletionPort::new(tokio::runtime::Handle::current()));
        let environment = ConnectionEnvironment::new(2, service);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let key = environment
            .accept(Arc::new(SocketHandle::new(stream).unwrap()), game.clone())
            .unwrap();
        let connection = environment.try_acquire_connection(key).unwrap();

        let mut bytes = vec![0u8; PacketId::Handshake.size()];
        let handshake = Handshake {
            protocol_version: PROTOCOL_VERSION,
            username: "alice".into(),
            password: "secret".into(),
            user_type: 0,
        };
        encode(&handshake, &mut bytes).unwrap();
        assert_eq!(connection.handle_io_event(&bytes), bytes.len());
        assert!(connection.is_deferred());
        assert_eq!(game.pending_logins(), 1);

        let start = get_timestamp();
        for attempt in 1..=UDP_RETRY_COUNT as u64 {
            game.retry_pending_logins_at(&environment, start + attempt * UDP_RETRANSMISSION_PERIOD_MS);
            assert!(connection.is_online());
            assert_eq!(game.pending_logins(), 1);
        }

        let mut buffer = [0u8; MESSAGE_CAPACITY];
        for _ in 0..=UDP_RETRY_COUNT {
            let received = tokio::time::timeout(Duration::from_secs(1), login_service.recv_from(&mut buffer));
            let (len, _) = received.await.unwrap().unwrap();
            let request = MessageRequest::parse(&buffer[..len]).unwrap();
            assert_eq!(request.message_id(), MessageId::HandshakeRequest);
        }

        let exhausted = start + (UDP_RETRY_COUNT as u64 + 1) * UDP_RETRANSMISSION_PERIOD_MS;
        game.retry_pending_logins_at(&environment, exhausted);
        assert_eq!(game.pending_logins(), 0);
        assert!(!connection.is_online());
        assert!(!connection.is_deferred());
        assert_eq!(connection.last_error(), Some(ErrorCode::LoginServerUnavailable));
        assert_eq!(game.online_players(), 0);
    }
}
