//! Registered I/O flavor.
//!
//! A source's buffers are bound once, at registration, to a long-lived
//! reader task and a long-lived writer task. Submissions only signal the
//! reader or enqueue a request for the writer, so no per-operation task
//! or buffer setup is needed. The single writer keeps sends in order.

use super::service::{
    CompletionKey, CompletionQueue, EventSource, IoCompletion, IoOperation, IoService,
    SendChannel,
};
use crate::multicast::MulticastDataEntry;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

struct RegisteredChannel {
    recv_armed: Arc<Notify>,
    writes: mpsc::UnboundedSender<IoOperation>,
}

pub struct RegisteredIo {
    runtime: tokio::runtime::Handle,
    queue: CompletionQueue,
    channels: RwLock<HashMap<CompletionKey, RegisteredChannel>>,
}

impl RegisteredIo {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self {
            runtime,
            queue: CompletionQueue::new(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn spawn_reader(&self, key: CompletionKey, source: &EventSource, armed: Arc<Notify>) {
        let socket = source.socket.clone();
        let event = source.recv_event.clone();
        let completions = self.queue.sender();

        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = armed.notified() => {}
                    _ = socket.wait_closed() => break,
                }

                let result = socket.read_into(&event).await;
                let finished = !matches!(result, Ok(read) if read > 0);
                let completion = IoCompletion {
                    key,
                    operation: IoOperation::Recv(event.clone()),
                    result,
                };
                if completions.send(completion).is_err() || finished {
                    break;
                }
            }
            debug!("Reader for {:#x} stopped", key);
        });
    }

    fn spawn_writer(
        &self,
        key: CompletionKey,
        source: &EventSource,
        mut writes: mpsc::UnboundedReceiver<IoOperation>,
    ) {
        let socket = source.socket.clone();
        let completions = self.queue.sender();

        self.runtime.spawn(async move {
            loop {
                let operation = tokio::select! {
                    operation = writes.recv() => operation,
                    _ = socket.wait_closed() => None,
                };
                let Some(operation) = operation else {
                    break;
                };

                let ticket = socket.take_write_ticket();
                let result = match &operation {
                    IoOperation::Send(_, event) => socket.write_from(ticket, event).await,
                    IoOperation::Multicast(entry) => socket.write_bytes(ticket, entry.data()).await,
                    IoOperation::Recv(_) => Ok(0),
                };

                let completion = IoCompletion {
                    key,
                    operation,
                    result,
                };
                if completions.send(completion).is_err() {
                    return;
                }
            }

            // Requests still queued never reach the wire; report them so
            // their claims are released.
            writes.close();
            while let Ok(operation) = writes.try_recv() {
                let completion = IoCompletion {
                    key,
                    operation,
                    result: Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")),
                };
                if completions.send(completion).is_err() {
                    return;
                }
            }
            debug!("Writer for {:#x} stopped", key);
        });
    }

    fn enqueue_write(&self, key: CompletionKey, operation: IoOperation) -> bool {
        match self.channels.read().get(&key) {
            Some(channel) => channel.writes.send(operation).is_ok(),
            None => false,
        }
    }
}

impl IoService for RegisteredIo {
    fn completion_queue(&self) -> &CompletionQueue {
        &self.queue
    }

    fn register_event_source(&self, key: CompletionKey, source: EventSource) -> bool {
        if !self.queue.register(key, source.clone()) {
            return false;
        }

        let armed = Arc::new(Notify::new());
        let (writes, pending_writes) = mpsc::unbounded_channel();
        self.spawn_reader(key, &source, armed.clone());
        self.spawn_writer(key, &source, pending_writes);
        self.channels.write().insert(
            key,
            RegisteredChannel {
                recv_armed: armed,
                writes,
            },
        );
        true
    }

    fn deregister_event_source(&self, key: CompletionKey) {
        self.channels.write().remove(&key);
        if let Some(source) = self.queue.deregister(key) {
            source.socket.close();
        }
    }

    fn post_recv(&self, key: CompletionKey) -> bool {
        match self.channels.read().get(&key) {
            Some(channel) => {
                channel.recv_armed.notify_one();
                true
            }
            None => false,
        }
    }

    fn post_send(&self, key: CompletionKey, channel: SendChannel) -> bool {
        let Some(source) = self.queue.source(key) else {
            return false;
        };
        let event = source.send_event(channel).clone();
        self.enqueue_write(key, IoOperation::Send(channel, event))
    }

    fn post_multicast(&self, key: CompletionKey, entry: Arc<MulticastDataEntry>) -> bool {
        self.enqueue_write(key, IoOperation::Multicast(entry))
    }
}
