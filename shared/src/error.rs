use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a connection or request can fail.
///
/// The `Display` text doubles as the reason string carried by the
/// disconnect packet, so every message fits in one 64-byte string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ErrorCode {
    #[error("Server is full")]
    ClientConnectionFull,
    #[error("Invalid packet id")]
    InvalidPacketId,
    #[error("Unsupported protocol version")]
    UnsupportedProtocolVersion,
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Failed to handle packet")]
    PacketHandleError,
    #[error("Not authenticated")]
    UnauthenticatedPlayer,
    #[error("Already logged in")]
    AlreadyLoggedIn,
    #[error("Login server unavailable")]
    LoginServerUnavailable,
    #[error("Connection timed out")]
    ConnectionTimeout,
    #[error("Send buffer overflow")]
    InsufficientSendBuffer,
    #[error("Unsupported packet")]
    UnsupportedPacket,
    #[error("Server shutting down")]
    ServerShutdown,
    #[error("Internal server error")]
    InternalError,
}

/// Non-error results of a packet handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The packet was fully handled.
    Success,
    /// Handling waits on a reply from another service.
    Deferred,
}

pub type HandleResult = Result<HandleOutcome, ErrorCode>;
