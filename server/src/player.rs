//! Per-player session state attached to a connection after login
//!
//! A player walks through a fixed sequence of states on its way into the
//! world: handshake, optional protocol extension sync, level transfer and
//! finally spawn. The game tick drives the transitions that need world
//! access; the packet handler drives the ones triggered by the client.

use shared::extension::is_cpe_supported;
use shared::message::PlayerType;
use shared::{PlayerPosition, PositionUpdate};
use std::collections::HashSet;

/// Where a player is in the login and spawn sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerState {
    Handshaking,
    Handshaked,
    ExtensionSyncing,
    ExtensionSynced,
    LevelInitialized,
    Spawned,
    Disconnected,
}

/// A logged-in player
///
/// Holds identity, negotiated protocol extensions and the two positions
/// needed for delta encoding: the latest one reported by the client and
/// the last one broadcast to everybody else.
#[derive(Debug, Clone)]
pub struct Player {
    game_id: i8,
    username: String,
    player_type: PlayerType,
    state: PlayerState,
    cpe: bool,
    pending_extensions: i16,
    extensions: HashSet<String>,
    position: PlayerPosition,
    last_sent_position: PlayerPosition,
}

impl Player {
    /// Creates a handshaked player
    ///
    /// Players that announced extension support start syncing right away
    /// and wait for the client's extension list before the level transfer.
    pub fn new(game_id: i8, username: &str, player_type: PlayerType, cpe: bool, spawn: PlayerPosition) -> Self {
        Self {
            game_id,
            username: username.to_string(),
            player_type,
            state: if cpe {
                PlayerState::ExtensionSyncing
            } else {
                PlayerState::Handshaked
            },
            cpe,
            pending_extensions: -1,
            extensions: HashSet::new(),
            position: spawn,
            last_sent_position: spawn,
        }
    }

    pub fn game_id(&self) -> i8 {
        self.game_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn set_state(&mut self, state: PlayerState) {
        self.state = state;
    }

    pub fn supports_cpe(&self) -> bool {
        self.cpe
    }

    /// True once the player may receive the level
    pub fn is_ready_for_level(&self) -> bool {
        matches!(self.state, PlayerState::Handshaked | PlayerState::ExtensionSynced)
    }

    /// Records how many extension entries the client will announce
    pub fn begin_extension_sync(&mut self, count: i16) {
        if self.state != PlayerState::ExtensionSyncing {
            return;
        }
        self.pending_extensions = count.max(0);
        if self.pending_extensions == 0 {
            self.state = PlayerState::ExtensionSynced;
        }
    }

    /// Records one client extension entry
    ///
    /// Only extensions the server supports at the same version are
    /// enabled. The player becomes synced after the last announced entry.
    pub fn register_extension(&mut self, name: &str, version: i32) {
        if self.state != PlayerState::ExtensionSyncing || self.pending_extensions <= 0 {
            return;
        }
        if is_cpe_supported(name, version) {
            self.extensions.insert(name.to_string());
        }
        self.pending_extensions -= 1;
        if self.pending_extensions == 0 {
            self.state = PlayerState::ExtensionSynced;
        }
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn position(&self) -> PlayerPosition {
        self.position
    }

    pub fn set_position(&mut self, position: PlayerPosition) {
        self.position = position;
    }

    /// Encodes movement since the last broadcast and marks it as sent
    pub fn take_position_update(&mut self) -> Option<PositionUpdate> {
        let update = PositionUpdate::between(self.game_id, &self.last_sent_position, &self.position);
        self.last_sent_position = self.position;
        update
    }
}
