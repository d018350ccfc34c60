//! Asynchronous I/O core: buffers, events, sockets and dispatchers.

pub mod buffer;
pub mod event;
pub mod registered;
pub mod service;
pub mod socket;

pub use buffer::IoEventData;
pub use event::{IoEvent, IoEventPool};
pub use registered::RegisteredIo;
pub use service::{
    CompletionKey, EventSource, IoCompletionPort, IoEventHandler, IoEventKind, IoService,
    SendChannel,
};
pub use socket::SocketHandle;

use crate::config::IoModel;
use std::sync::Arc;

/// Builds the dispatcher selected by `model` on the given runtime.
pub fn create_io_service(model: IoModel, runtime: tokio::runtime::Handle) -> Arc<dyn IoService> {
    match model {
        IoModel::CompletionPort => Arc::new(IoCompletionPort::new(runtime)),
        IoModel::Registered => Arc::new(RegisteredIo::new(runtime)),
    }
}
