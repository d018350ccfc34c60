use crate::connection::Connection;
use shared::{HandleResult, Packet};

/// Game-side consumer of parsed client packets.
///
/// Runs on I/O worker threads, so implementations must not block.
/// Returning `Deferred` suspends the connection's receive cycle until
/// `Connection::resume_deferred` is called.
pub trait PacketHandler: Send + Sync + 'static {
    fn handle_packet(&self, connection: &Connection, packet: &Packet<'_>) -> HandleResult;
}
