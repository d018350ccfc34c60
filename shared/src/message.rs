//! Envelope for datagrams exchanged with the login and chat services.
//!
//! A message is one id byte followed by a `bincode` payload and never
//! exceeds `MESSAGE_CAPACITY` bytes.

use crate::error::ErrorCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MESSAGE_CAPACITY: usize = 2048;
pub const MESSAGE_HEADER_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    HandshakeRequest = 1,
    HandshakeResponse = 2,
    ChatBroadcast = 3,
    Ping = 4,
    Pong = 5,
}

impl TryFrom<u8> for MessageId {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageId::HandshakeRequest),
            2 => Ok(MessageId::HandshakeResponse),
            3 => Ok(MessageId::ChatBroadcast),
            4 => Ok(MessageId::Ping),
            5 => Ok(MessageId::Pong),
            other => Err(MessageError::UnknownId(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("unknown message id {0}")]
    UnknownId(u8),
    #[error("message of {0} bytes exceeds capacity")]
    TooLarge(usize),
    #[error("payload codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRequest {
    id: MessageId,
    buf: Vec<u8>,
}

impl MessageRequest {
    pub fn new<T: Serialize>(id: MessageId, payload: &T) -> Result<Self, MessageError> {
        let mut buf = Vec::with_capacity(MESSAGE_HEADER_SIZE + bincode::serialized_size(payload)? as usize);
        buf.push(id as u8);
        bincode::serialize_into(&mut buf, payload)?;
        if buf.len() > MESSAGE_CAPACITY {
            return Err(MessageError::TooLarge(buf.len()));
        }
        Ok(Self { id, buf })
    }

    /// Validates a received datagram.
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let id = MessageId::try_from(*bytes.first().ok_or(MessageError::Empty)?)?;
        if bytes.len() > MESSAGE_CAPACITY {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        Ok(Self {
            id,
            buf: bytes.to_vec(),
        })
    }

    pub fn message_id(&self) -> MessageId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[MESSAGE_HEADER_SIZE..]
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        Ok(bincode::deserialize(self.payload())?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Account class of an authenticated player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayerType {
    #[default]
    Guest,
    NewUser,
    Authenticated,
    Admin,
}

impl PlayerType {
    /// User type byte sent in the server handshake; 0x64 marks operators.
    pub fn user_type_byte(self) -> u8 {
        match self {
            PlayerType::Admin => 0x64,
            _ => 0x00,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub connection_key: u64,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub connection_key: u64,
    pub error: Option<ErrorCode>,
    pub player_type: PlayerType,
    /// No account exists; the player may still join as a guest.
    pub player_not_exist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBroadcast {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sequence: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout() {
        let request = MessageRequest::new(
            MessageId::HandshakeRequest,
            &HandshakeRequest {
                connection_key: 42,
                username: "steve".into(),
                password: "pw".into(),
            },
        )
        .unwrap();

        assert_eq!(request.as_bytes()[0], MessageId::HandshakeRequest as u8);
        assert_eq!(request.message_id(), MessageId::HandshakeRequest);

        let parsed = MessageRequest::parse(request.as_bytes()).unwrap();
        let decoded: HandshakeRequest = parsed.decode().unwrap();
        assert_eq!(decoded.connection_key, 42);
        assert_eq!(decoded.username, "steve");
    }

    #[test]
    fn test_rejects_bad_datagrams() {
        assert!(matches!(MessageRequest::parse(&[]), Err(MessageError::Empty)));
        assert!(matches!(
            MessageRequest::parse(&[0xEE, 1, 2]),
            Err(MessageError::UnknownId(0xEE))
        ));
        assert!(matches!(
            MessageRequest::parse(&vec![MessageId::Ping as u8; MESSAGE_CAPACITY + 1]),
            Err(MessageError::TooLarge(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let broadcast = ChatBroadcast {
            sender: "a".into(),
            message: "x".repeat(MESSAGE_CAPACITY),
        };
        assert!(matches!(
            MessageRequest::new(MessageId::ChatBroadcast, &broadcast),
            Err(MessageError::TooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_payload_fails_decode() {
        let request = MessageRequest::new(MessageId::Pong, &Heartbeat { sequence: 9 }).unwrap();
        let truncated = MessageRequest::parse(&request.as_bytes()[..3]).unwrap();
        assert!(truncated.decode::<Heartbeat>().is_err());
    }
}
