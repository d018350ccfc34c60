//! Classic Protocol Extension (CPE) negotiation data.

use crate::packet::{ExtEntry, ExtInfo};

pub const CPE_SERVER_NAME: &str = "mmocraft-cpe";

/// Extensions this server speaks, with the only version it accepts.
pub const SUPPORTED_EXTENSIONS: &[(&str, i32)] = &[("MessageTypes", 1)];

pub fn is_cpe_supported(name: &str, version: i32) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|&(supported, supported_version)| supported == name && supported_version == version)
}

pub fn server_ext_info() -> ExtInfo<'static> {
    ExtInfo {
        app_name: CPE_SERVER_NAME.into(),
        extension_count: SUPPORTED_EXTENSIONS.len() as i16,
    }
}

pub fn server_ext_entries() -> impl Iterator<Item = ExtEntry<'static>> {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|&(name, version)| ExtEntry {
            extension_name: name.into(),
            version,
        })
}

/// Where a `MessageTypes` chat line is shown on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Chat = 0,
    Status1 = 1,
    Status2 = 2,
    Status3 = 3,
    BottomRight1 = 11,
    BottomRight2 = 12,
    BottomRight3 = 13,
    Announcement = 100,
}
