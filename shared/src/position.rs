//! Player positions and the per-tick differential encoding.
//!
//! Coordinates are fixed point with 5 fractional bits (32 units per block).

use crate::packet::{
    encode, SetPlayerPosition, UpdatePlayerCoordinate, UpdatePlayerOrientation,
    UpdatePlayerPosition,
};

/// Largest per-axis change a relative move can carry.
pub const RELATIVE_MOVE_LIMIT: i32 = 32;

/// Extra height applied to spawn points so players stand on the block.
pub const PLAYER_EYE_OFFSET: i16 = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PlayerPosition {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub yaw: u8,
    pub pitch: u8,
}

impl PlayerPosition {
    pub fn new(x: i16, y: i16, z: i16, yaw: u8, pitch: u8) -> Self {
        Self {
            x,
            y,
            z,
            yaw,
            pitch,
        }
    }

    /// Position of a player standing on block (`x`, `y`, `z`).
    pub fn spawn_at(x: i16, y: i16, z: i16) -> Self {
        Self::new(
            x.saturating_mul(32),
            y.saturating_mul(32).saturating_add(PLAYER_EYE_OFFSET),
            z.saturating_mul(32),
            0,
            0,
        )
    }

    pub fn block_coordinates(&self) -> (i16, i16, i16) {
        (self.x >> 5, (self.y - PLAYER_EYE_OFFSET) >> 5, self.z >> 5)
    }
}

/// The wire form chosen for one player's movement since the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionUpdate {
    Absolute(SetPlayerPosition),
    Relative(UpdatePlayerPosition),
    Coordinate(UpdatePlayerCoordinate),
    Orientation(UpdatePlayerOrientation),
}

impl PositionUpdate {
    /// Picks the smallest packet that moves `player_id` from `last` to
    /// `current`, or `None` when nothing changed.
    ///
    /// Any axis moving by more than 32 units needs an absolute teleport.
    /// Otherwise the relative forms are chosen by which of coordinate and
    /// orientation changed.
    pub fn between(player_id: i8, last: &PlayerPosition, current: &PlayerPosition) -> Option<Self> {
        let dx = i32::from(current.x) - i32::from(last.x);
        let dy = i32::from(current.y) - i32::from(last.y);
        let dz = i32::from(current.z) - i32::from(last.z);

        if dx.abs() > RELATIVE_MOVE_LIMIT
            || dy.abs() > RELATIVE_MOVE_LIMIT
            || dz.abs() > RELATIVE_MOVE_LIMIT
        {
            return Some(PositionUpdate::Absolute(SetPlayerPosition {
                player_id,
                position: *current,
            }));
        }

        let moved = dx != 0 || dy != 0 || dz != 0;
        let turned = current.yaw != last.yaw || current.pitch != last.pitch;
        let (dx, dy, dz) = (dx as i8, dy as i8, dz as i8);

        match (moved, turned) {
            (true, true) => Some(PositionUpdate::Relative(UpdatePlayerPosition {
                player_id,
                dx,
                dy,
                dz,
                yaw: current.yaw,
                pitch: current.pitch,
            })),
            (true, false) => Some(PositionUpdate::Coordinate(UpdatePlayerCoordinate {
                player_id,
                dx,
                dy,
                dz,
            })),
            (false, true) => Some(PositionUpdate::Orientation(UpdatePlayerOrientation {
                player_id,
                yaw: current.yaw,
                pitch: current.pitch,
            })),
            (false, false) => None,
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        match self {
            PositionUpdate::Absolute(packet) => encode(packet, out),
            PositionUpdate::Relative(packet) => encode(packet, out),
            PositionUpdate::Coordinate(packet) => encode(packet, out),
            PositionUpdate::Orientation(packet) => encode(packet, out),
        }
    }
}
