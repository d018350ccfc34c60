//! Classic protocol packets.
//!
//! Every packet starts with a one byte id followed by a fixed layout, so
//! the total size is known from the id alone. `Packet::parse` relies on
//! that to report a short buffer without touching any field.

use crate::codec::{FieldReader, FieldWriter, PacketString};
use crate::error::ErrorCode;
use crate::position::PlayerPosition;
use crate::{
    CPE_MAGIC, LEVEL_CHUNK_SIZE, MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH, PROTOCOL_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    Handshake = 0x00,
    Ping = 0x01,
    LevelInitialize = 0x02,
    LevelDataChunk = 0x03,
    LevelFinalize = 0x04,
    SetBlockClient = 0x05,
    SetBlockServer = 0x06,
    SpawnPlayer = 0x07,
    SetPlayerPosition = 0x08,
    UpdatePlayerPosition = 0x09,
    UpdatePlayerCoordinate = 0x0A,
    UpdatePlayerOrientation = 0x0B,
    DespawnPlayer = 0x0C,
    ChatMessage = 0x0D,
    DisconnectPlayer = 0x0E,
    UpdateUserType = 0x0F,
    ExtInfo = 0x10,
    ExtEntry = 0x11,
    TwoWayPing = 0x2B,
    SetPlayerId = 0x37,
    ExtMessage = 0x38,
}

impl PacketId {
    /// Total wire size including the id byte.
    pub const fn size(self) -> usize {
        match self {
            PacketId::Handshake => 131,
            PacketId::Ping => 1,
            PacketId::LevelInitialize => 1,
            PacketId::LevelDataChunk => 1028,
            PacketId::LevelFinalize => 7,
            PacketId::SetBlockClient => 9,
            PacketId::SetBlockServer => 8,
            PacketId::SpawnPlayer => 74,
            PacketId::SetPlayerPosition => 10,
            PacketId::UpdatePlayerPosition => 7,
            PacketId::UpdatePlayerCoordinate => 5,
            PacketId::UpdatePlayerOrientation => 4,
            PacketId::DespawnPlayer => 2,
            PacketId::ChatMessage => 66,
            PacketId::DisconnectPlayer => 65,
            PacketId::UpdateUserType => 2,
            PacketId::ExtInfo => 67,
            PacketId::ExtEntry => 69,
            PacketId::TwoWayPing => 4,
            PacketId::SetPlayerId => 2,
            PacketId::ExtMessage => 66,
        }
    }
}

impl TryFrom<u8> for PacketId {
    type Error = ErrorCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let id = match value {
            0x00 => PacketId::Handshake,
            0x01 => PacketId::Ping,
            0x02 => PacketId::LevelInitialize,
            0x03 => PacketId::LevelDataChunk,
            0x04 => PacketId::LevelFinalize,
            0x05 => PacketId::SetBlockClient,
            0x06 => PacketId::SetBlockServer,
            0x07 => PacketId::SpawnPlayer,
            0x08 => PacketId::SetPlayerPosition,
            0x09 => PacketId::UpdatePlayerPosition,
            0x0A => PacketId::UpdatePlayerCoordinate,
            0x0B => PacketId::UpdatePlayerOrientation,
            0x0C => PacketId::DespawnPlayer,
            0x0D => PacketId::ChatMessage,
            0x0E => PacketId::DisconnectPlayer,
            0x0F => PacketId::UpdateUserType,
            0x10 => PacketId::ExtInfo,
            0x11 => PacketId::ExtEntry,
            0x2B => PacketId::TwoWayPing,
            0x37 => PacketId::SetPlayerId,
            0x38 => PacketId::ExtMessage,
            _ => return Err(ErrorCode::InvalidPacketId),
        };
        Ok(id)
    }
}

/// Largest packet a client may send; a receive is only armed when at
/// least this much buffer space is free.
pub const MAX_CLIENT_PACKET_SIZE: usize = PacketId::Handshake.size();

/// Fixed layout of one packet kind.
pub trait PacketFormat<'a>: Sized {
    const ID: PacketId;
    const SIZE: usize = Self::ID.size();

    /// Reads the fields that follow the id byte.
    fn read_fields(reader: &mut FieldReader<'a>) -> Self;

    /// Writes the fields that follow the id byte.
    fn write_fields(&self, writer: &mut FieldWriter<'_>);

    fn validate(&self) -> Result<(), ErrorCode> {
        Ok(())
    }
}

/// Serializes `packet` into the front of `out`, returning the bytes
/// written, or `None` when `out` cannot hold the whole packet.
pub fn encode<'a, P: PacketFormat<'a>>(packet: &P, out: &mut [u8]) -> Option<usize> {
    if out.len() < P::SIZE {
        return None;
    }
    let mut writer = FieldWriter::new(&mut out[..P::SIZE]);
    writer.write_byte(P::ID as u8);
    packet.write_fields(&mut writer);
    debug_assert_eq!(writer.position(), P::SIZE);
    Some(P::SIZE)
}

pub fn encode_to_vec<'a, P: PacketFormat<'a>>(packet: &P, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + P::SIZE, 0);
    let _ = encode(packet, &mut out[start..]);
}

/// Decodes one packet of a known kind from the front of `buf`.
pub fn decode<'a, P: PacketFormat<'a>>(buf: &'a [u8]) -> Result<P, ParseError> {
    match buf.first() {
        None => Err(ParseError::Insufficient),
        Some(&id) if id != P::ID as u8 => Err(ParseError::InvalidId(id)),
        Some(_) if buf.len() < P::SIZE => Err(ParseError::Insufficient),
        Some(_) => Ok(P::read_fields(&mut FieldReader::new(&buf[1..P::SIZE]))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer does not yet hold the whole packet.
    Insufficient,
    InvalidId(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub protocol_version: u8,
    pub username: PacketString<'a>,
    pub password: PacketString<'a>,
    pub user_type: u8,
}

impl Handshake<'_> {
    /// True when the client announced protocol extension support.
    pub fn supports_cpe(&self) -> bool {
        self.user_type == CPE_MAGIC
    }
}

impl<'a> PacketFormat<'a> for Handshake<'a> {
    const ID: PacketId = PacketId::Handshake;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            protocol_version: reader.read_byte(),
            username: reader.read_string(),
            password: reader.read_string(),
            user_type: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_byte(self.protocol_version);
        writer.write_string(self.username);
        writer.write_string(self.password);
        writer.write_byte(self.user_type);
    }

    fn validate(&self) -> Result<(), ErrorCode> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorCode::UnsupportedProtocolVersion);
        }

        let username = self.username.as_bytes();
        if username.is_empty()
            || username.len() > MAX_USERNAME_LENGTH
            || !username.iter().all(u8::is_ascii_alphanumeric)
        {
            return Err(ErrorCode::InvalidUsername);
        }

        if self.password.len() > MAX_PASSWORD_LENGTH {
            return Err(ErrorCode::InvalidPassword);
        }

        Ok(())
    }
}

/// Server side of the handshake; shares the id and size of `Handshake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerIdentification<'a> {
    pub protocol_version: u8,
    pub server_name: PacketString<'a>,
    pub motd: PacketString<'a>,
    pub user_type: u8,
}

impl<'a> PacketFormat<'a> for ServerIdentification<'a> {
    const ID: PacketId = PacketId::Handshake;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            protocol_version: reader.read_byte(),
            server_name: reader.read_string(),
            motd: reader.read_string(),
            user_type: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_byte(self.protocol_version);
        writer.write_string(self.server_name);
        writer.write_string(self.motd);
        writer.write_byte(self.user_type);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping;

impl<'a> PacketFormat<'a> for Ping {
    const ID: PacketId = PacketId::Ping;

    fn read_fields(_: &mut FieldReader<'a>) -> Self {
        Ping
    }

    fn write_fields(&self, _: &mut FieldWriter<'_>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelInitialize;

impl<'a> PacketFormat<'a> for LevelInitialize {
    const ID: PacketId = PacketId::LevelInitialize;

    fn read_fields(_: &mut FieldReader<'a>) -> Self {
        LevelInitialize
    }

    fn write_fields(&self, _: &mut FieldWriter<'_>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDataChunk<'a> {
    /// Meaningful bytes at the front of `data`.
    pub length: i16,
    pub data: &'a [u8],
    pub percent_complete: u8,
}

impl<'a> PacketFormat<'a> for LevelDataChunk<'a> {
    const ID: PacketId = PacketId::LevelDataChunk;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            length: reader.read_short(),
            data: reader.read_bytes(LEVEL_CHUNK_SIZE),
            percent_complete: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_short(self.length);
        writer.write_bytes(self.data, LEVEL_CHUNK_SIZE);
        writer.write_byte(self.percent_complete);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFinalize {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl<'a> PacketFormat<'a> for LevelFinalize {
    const ID: PacketId = PacketId::LevelFinalize;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            x: reader.read_short(),
            y: reader.read_short(),
            z: reader.read_short(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_short(self.x);
        writer.write_short(self.y);
        writer.write_short(self.z);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBlockClient {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    /// 0 destroys the block, 1 places `block_type`.
    pub mode: u8,
    pub block_type: u8,
}

impl SetBlockClient {
    pub const MODE_DESTROY: u8 = 0;
    pub const MODE_CREATE: u8 = 1;
}

impl<'a> PacketFormat<'a> for SetBlockClient {
    const ID: PacketId = PacketId::SetBlockClient;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            x: reader.read_short(),
            y: reader.read_short(),
            z: reader.read_short(),
            mode: reader.read_byte(),
            block_type: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_short(self.x);
        writer.write_short(self.y);
        writer.write_short(self.z);
        writer.write_byte(self.mode);
        writer.write_byte(self.block_type);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBlockServer {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub block_type: u8,
}

impl<'a> PacketFormat<'a> for SetBlockServer {
    const ID: PacketId = PacketId::SetBlockServer;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            x: reader.read_short(),
            y: reader.read_short(),
            z: reader.read_short(),
            block_type: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_short(self.x);
        writer.write_short(self.y);
        writer.write_short(self.z);
        writer.write_byte(self.block_type);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPlayer<'a> {
    pub player_id: i8,
    pub name: PacketString<'a>,
    pub position: PlayerPosition,
}

impl<'a> PacketFormat<'a> for SpawnPlayer<'a> {
    const ID: PacketId = PacketId::SpawnPlayer;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            name: reader.read_string(),
            position: reader.read_position(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_string(self.name);
        writer.write_position(&self.position);
    }
}

/// Absolute position; sent by clients every tick and by the server to teleport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPlayerPosition {
    pub player_id: i8,
    pub position: PlayerPosition,
}

impl<'a> PacketFormat<'a> for SetPlayerPosition {
    const ID: PacketId = PacketId::SetPlayerPosition;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            position: reader.read_position(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_position(&self.position);
    }
}

/// Relative move plus absolute orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePlayerPosition {
    pub player_id: i8,
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
    pub yaw: u8,
    pub pitch: u8,
}

impl<'a> PacketFormat<'a> for UpdatePlayerPosition {
    const ID: PacketId = PacketId::UpdatePlayerPosition;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            dx: reader.read_sbyte(),
            dy: reader.read_sbyte(),
            dz: reader.read_sbyte(),
            yaw: reader.read_byte(),
            pitch: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_sbyte(self.dx);
        writer.write_sbyte(self.dy);
        writer.write_sbyte(self.dz);
        writer.write_byte(self.yaw);
        writer.write_byte(self.pitch);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePlayerCoordinate {
    pub player_id: i8,
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
}

impl<'a> PacketFormat<'a> for UpdatePlayerCoordinate {
    const ID: PacketId = PacketId::UpdatePlayerCoordinate;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            dx: reader.read_sbyte(),
            dy: reader.read_sbyte(),
            dz: reader.read_sbyte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_sbyte(self.dx);
        writer.write_sbyte(self.dy);
        writer.write_sbyte(self.dz);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePlayerOrientation {
    pub player_id: i8,
    pub yaw: u8,
    pub pitch: u8,
}

impl<'a> PacketFormat<'a> for UpdatePlayerOrientation {
    const ID: PacketId = PacketId::UpdatePlayerOrientation;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            yaw: reader.read_byte(),
            pitch: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_byte(self.yaw);
        writer.write_byte(self.pitch);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DespawnPlayer {
    pub player_id: i8,
}

impl<'a> PacketFormat<'a> for DespawnPlayer {
    const ID: PacketId = PacketId::DespawnPlayer;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
    }
}

/// Chat line. Clients put 0xFF (or a `MessageType` under CPE) in the
/// first byte; the server puts the sender id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMessage<'a> {
    pub player_id: i8,
    pub message: PacketString<'a>,
}

impl<'a> PacketFormat<'a> for ChatMessage<'a> {
    const ID: PacketId = PacketId::ChatMessage;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
            message: reader.read_string(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
        writer.write_string(self.message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectPlayer<'a> {
    pub reason: PacketString<'a>,
}

impl<'a> PacketFormat<'a> for DisconnectPlayer<'a> {
    const ID: PacketId = PacketId::DisconnectPlayer;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            reason: reader.read_string(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_string(self.reason);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateUserType {
    pub user_type: u8,
}

impl<'a> PacketFormat<'a> for UpdateUserType {
    const ID: PacketId = PacketId::UpdateUserType;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            user_type: reader.read_byte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_byte(self.user_type);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtInfo<'a> {
    pub app_name: PacketString<'a>,
    pub extension_count: i16,
}

impl<'a> PacketFormat<'a> for ExtInfo<'a> {
    const ID: PacketId = PacketId::ExtInfo;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            app_name: reader.read_string(),
            extension_count: reader.read_short(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_string(self.app_name);
        writer.write_short(self.extension_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtEntry<'a> {
    pub extension_name: PacketString<'a>,
    pub version: i32,
}

impl<'a> PacketFormat<'a> for ExtEntry<'a> {
    const ID: PacketId = PacketId::ExtEntry;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            extension_name: reader.read_string(),
            version: reader.read_int(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_string(self.extension_name);
        writer.write_int(self.version);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoWayPing {
    /// 0 when the client initiates, 1 when the server does.
    pub direction: u8,
    pub data: i16,
}

impl<'a> PacketFormat<'a> for TwoWayPing {
    const ID: PacketId = PacketId::TwoWayPing;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            direction: reader.read_byte(),
            data: reader.read_short(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_byte(self.direction);
        writer.write_short(self.data);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPlayerId {
    pub player_id: i8,
}

impl<'a> PacketFormat<'a> for SetPlayerId {
    const ID: PacketId = PacketId::SetPlayerId;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            player_id: reader.read_sbyte(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_sbyte(self.player_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtMessage<'a> {
    pub message_type: u8,
    pub message: PacketString<'a>,
}

impl<'a> PacketFormat<'a> for ExtMessage<'a> {
    const ID: PacketId = PacketId::ExtMessage;

    fn read_fields(reader: &mut FieldReader<'a>) -> Self {
        Self {
            message_type: reader.read_byte(),
            message: reader.read_string(),
        }
    }

    fn write_fields(&self, writer: &mut FieldWriter<'_>) {
        writer.write_byte(self.message_type);
        writer.write_string(self.message);
    }
}

/// Any packet that can appear on the wire, borrowed from its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Handshake(Handshake<'a>),
    Ping(Ping),
    LevelInitialize(LevelInitialize),
    LevelDataChunk(LevelDataChunk<'a>),
    LevelFinalize(LevelFinalize),
    SetBlockClient(SetBlockClient),
    SetBlockServer(SetBlockServer),
    SpawnPlayer(SpawnPlayer<'a>),
    SetPlayerPosition(SetPlayerPosition),
    UpdatePlayerPosition(UpdatePlayerPosition),
    UpdatePlayerCoordinate(UpdatePlayerCoordinate),
    UpdatePlayerOrientation(UpdatePlayerOrientation),
    DespawnPlayer(DespawnPlayer),
    ChatMessage(ChatMessage<'a>),
    DisconnectPlayer(DisconnectPlayer<'a>),
    UpdateUserType(UpdateUserType),
    ExtInfo(ExtInfo<'a>),
    ExtEntry(ExtEntry<'a>),
    TwoWayPing(TwoWayPing),
    SetPlayerId(SetPlayerId),
    ExtMessage(ExtMessage<'a>),
}

fn read_as<'a, P: PacketFormat<'a>>(body: &'a [u8]) -> P {
    P::read_fields(&mut FieldReader::new(body))
}

impl<'a> Packet<'a> {
    /// Parses the packet at the front of `buf` and returns it with its size.
    ///
    /// An unknown id is reported even when the buffer holds a single byte;
    /// a known id with too few bytes reports `Insufficient` without
    /// reading any field.
    pub fn parse(buf: &'a [u8]) -> Result<(Packet<'a>, usize), ParseError> {
        let raw_id = *buf.first().ok_or(ParseError::Insufficient)?;
        let id = PacketId::try_from(raw_id).map_err(|_| ParseError::InvalidId(raw_id))?;
        let size = id.size();
        if buf.len() < size {
            return Err(ParseError::Insufficient);
        }

        let body = &buf[1..size];
        let packet = match id {
            PacketId::Handshake => Packet::Handshake(read_as(body)),
            PacketId::Ping => Packet::Ping(Ping),
            PacketId::LevelInitialize => Packet::LevelInitialize(LevelInitialize),
            PacketId::LevelDataChunk => Packet::LevelDataChunk(read_as(body)),
            PacketId::LevelFinalize => Packet::LevelFinalize(read_as(body)),
            PacketId::SetBlockClient => Packet::SetBlockClient(read_as(body)),
            PacketId::SetBlockServer => Packet::SetBlockServer(read_as(body)),
            PacketId::SpawnPlayer => Packet::SpawnPlayer(read_as(body)),
            PacketId::SetPlayerPosition => Packet::SetPlayerPosition(read_as(body)),
            PacketId::UpdatePlayerPosition => Packet::UpdatePlayerPosition(read_as(body)),
            PacketId::UpdatePlayerCoordinate => Packet::UpdatePlayerCoordinate(read_as(body)),
            PacketId::UpdatePlayerOrientation => Packet::UpdatePlayerOrientation(read_as(body)),
            PacketId::DespawnPlayer => Packet::DespawnPlayer(read_as(body)),
            PacketId::ChatMessage => Packet::ChatMessage(read_as(body)),
            PacketId::DisconnectPlayer => Packet::DisconnectPlayer(read_as(body)),
            PacketId::UpdateUserType => Packet::UpdateUserType(read_as(body)),
            PacketId::ExtInfo => Packet::ExtInfo(read_as(body)),
            PacketId::ExtEntry => Packet::ExtEntry(read_as(body)),
            PacketId::TwoWayPing => Packet::TwoWayPing(read_as(body)),
            PacketId::SetPlayerId => Packet::SetPlayerId(read_as(body)),
            PacketId::ExtMessage => Packet::ExtMessage(read_as(body)),
        };

        Ok((packet, size))
    }

    pub fn id(&self) -> PacketId {
        match self {
            Packet::Handshake(_) => PacketId::Handshake,
            Packet::Ping(_) => PacketId::Ping,
            Packet::LevelInitialize(_) => PacketId::LevelInitialize,
            Packet::LevelDataChunk(_) => PacketId::LevelDataChunk,
            Packet::LevelFinalize(_) => PacketId::LevelFinalize,
            Packet::SetBlockClient(_) => PacketId::SetBlockClient,
            Packet::SetBlockServer(_) => PacketId::SetBlockServer,
            Packet::SpawnPlayer(_) => PacketId::SpawnPlayer,
            Packet::SetPlayerPosition(_) => PacketId::SetPlayerPosition,
            Packet::UpdatePlayerPosition(_) => PacketId::UpdatePlayerPosition,
            Packet::UpdatePlayerCoordinate(_) => PacketId::UpdatePlayerCoordinate,
            Packet::UpdatePlayerOrientation(_) => PacketId::UpdatePlayerOrientation,
            Packet::DespawnPlayer(_) => PacketId::DespawnPlayer,
            Packet::ChatMessage(_) => PacketId::ChatMessage,
            Packet::DisconnectPlayer(_) => PacketId::DisconnectPlayer,
            Packet::UpdateUserType(_) => PacketId::UpdateUserType,
            Packet::ExtInfo(_) => PacketId::ExtInfo,
            Packet::ExtEntry(_) => PacketId::ExtEntry,
            Packet::TwoWayPing(_) => PacketId::TwoWayPing,
            Packet::SetPlayerId(_) => PacketId::SetPlayerId,
            Packet::ExtMessage(_) => PacketId::ExtMessage,
        }
    }

    pub fn size(&self) -> usize {
        self.id().size()
    }

    pub fn validate(&self) -> Result<(), ErrorCode> {
        match self {
            Packet::Handshake(packet) => packet.validate(),
            _ => Ok(()),
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        match self {
            Packet::Handshake(p) => encode(p, out),
            Packet::Ping(p) => encode(p, out),
            Packet::LevelInitialize(p) => encode(p, out),
            Packet::LevelDataChunk(p) => encode(p, out),
            Packet::LevelFinalize(p) => encode(p, out),
            Packet::SetBlockClient(p) => encode(p, out),
            Packet::SetBlockServer(p) => encode(p, out),
            Packet::SpawnPlayer(p) => encode(p, out),
            Packet::SetPlayerPosition(p) => encode(p, out),
            Packet::UpdatePlayerPosition(p) => encode(p, out),
            Packet::UpdatePlayerCoordinate(p) => encode(p, out),
            Packet::UpdatePlayerOrientation(p) => encode(p, out),
            Packet::DespawnPlayer(p) => encode(p, out),
            Packet::ChatMessage(p) => encode(p, out),
            Packet::DisconnectPlayer(p) => encode(p, out),
            Packet::UpdateUserType(p) => encode(p, out),
            Packet::ExtInfo(p) => encode(p, out),
            Packet::ExtEntry(p) => encode(p, out),
            Packet::TwoWayPing(p) => encode(p, out),
            Packet::SetPlayerId(p) => encode(p, out),
            Packet::ExtMessage(p) => encode(p, out),
        }
    }
}
