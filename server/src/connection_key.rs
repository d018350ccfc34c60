use std::fmt;

/// Stable name of a connection: slot index in the low 32 bits, creation
/// stamp in the high 32 bits. A key stops resolving once its slot is
/// reused by a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionKey(u64);

impl ConnectionKey {
    pub fn new(index: u32, created_at: u32) -> Self {
        Self((u64::from(created_at) << 32) | u64::from(index))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as u32 as usize
    }

    pub fn created_at(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index(), self.created_at())
    }
}
