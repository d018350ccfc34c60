pub mod codec;
pub mod error;
pub mod extension;
pub mod level;
pub mod message;
pub mod packet;
pub mod position;

pub use codec::PacketString;
pub use error::{ErrorCode, HandleOutcome, HandleResult};
pub use packet::{Packet, PacketFormat, PacketId, ParseError};
pub use position::{PlayerPosition, PositionUpdate};

pub const PROTOCOL_VERSION: u8 = 7;
pub const CPE_MAGIC: u8 = 0x42;
pub const STRING_FIELD_SIZE: usize = 64;
pub const LEVEL_CHUNK_SIZE: usize = 1024;
pub const MAX_USERNAME_LENGTH: usize = 16;
pub const MAX_PASSWORD_LENGTH: usize = 32;
