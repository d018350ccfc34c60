//! Field level encoding for the classic wire format.
//!
//! Scalars are big-endian. Strings occupy a fixed 64-byte slot padded
//! with spaces; readers hand back the trimmed bytes without copying.

use crate::position::PlayerPosition;
use crate::STRING_FIELD_SIZE;
use std::borrow::Cow;

/// A string field borrowed from a packet buffer, trailing padding removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketString<'a>(&'a [u8]);

impl<'a> PacketString<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.0).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.0)
    }
}

impl<'a> From<&'a str> for PacketString<'a> {
    fn from(value: &'a str) -> Self {
        Self(value.as_bytes())
    }
}

/// Sequential reader over a buffer already known to hold the whole packet.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_byte(&mut self) -> u8 {
        let value = self.buf[self.pos];
        self.pos += 1;
        value
    }

    pub fn read_sbyte(&mut self) -> i8 {
        self.read_byte() as i8
    }

    pub fn read_short(&mut self) -> i16 {
        let value = i16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        value
    }

    pub fn read_int(&mut self) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        i32::from_be_bytes(bytes)
    }

    pub fn read_bytes(&mut self, len: usize) -> &'a [u8] {
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        bytes
    }

    pub fn read_string(&mut self) -> PacketString<'a> {
        let raw = self.read_bytes(STRING_FIELD_SIZE);
        let end = raw
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |last| last + 1);
        PacketString(&raw[..end])
    }

    pub fn read_position(&mut self) -> PlayerPosition {
        PlayerPosition {
            x: self.read_short(),
            y: self.read_short(),
            z: self.read_short(),
            yaw: self.read_byte(),
            pitch: self.read_byte(),
        }
    }
}

/// Sequential writer into a buffer sized for the whole packet.
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf[self.pos] = value;
        self.pos += 1;
    }

    pub fn write_sbyte(&mut self, value: i8) {
        self.write_byte(value as u8);
    }

    pub fn write_short(&mut self, value: i16) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn write_int(&mut self, value: i32) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Writes `data` into a `len`-byte slot, zero filling the rest.
    pub fn write_bytes(&mut self, data: &[u8], len: usize) {
        let copied = data.len().min(len);
        self.buf[self.pos..self.pos + copied].copy_from_slice(&data[..copied]);
        self.buf[self.pos + copied..self.pos + len].fill(0);
        self.pos += len;
    }

    /// Strings longer than the slot are truncated.
    pub fn write_string(&mut self, value: PacketString<'_>) {
        let data = value.as_bytes();
        let copied = data.len().min(STRING_FIELD_SIZE);
        self.buf[self.pos..self.pos + copied].copy_from_slice(&data[..copied]);
        self.buf[self.pos + copied..self.pos + STRING_FIELD_SIZE].fill(b' ');
        self.pos += STRING_FIELD_SIZE;
    }

    pub fn write_position(&mut self, position: &PlayerPosition) {
        self.write_short(position.x);
        self.write_short(position.y);
        self.write_short(position.z);
        self.write_byte(position.yaw);
        self.write_byte(position.pitch);
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}
