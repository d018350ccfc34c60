//! Completion-based dispatch of socket operations.
//!
//! Operations are submitted without blocking and run on the tokio
//! runtime. Their results are posted to a completion queue on which a
//! fixed set of OS worker threads block; each dequeued completion is
//! handled on the dequeuing thread by the handler registered for its key.

use super::event::IoEvent;
use super::socket::SocketHandle;
use crate::multicast::MulticastDataEntry;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

/// Identifies an event source; connections use their connection key.
pub type CompletionKey = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendChannel {
    /// Small control traffic.
    Immediate,
    /// Bulk game-state traffic.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoEventKind {
    Recv,
    Send(SendChannel),
    Multicast,
}

/// Callbacks of an event source.
pub trait IoEventHandler: Send + Sync {
    /// Consumes received bytes and returns how many were used.
    fn handle_io_event(&self, data: &[u8]) -> usize;

    /// The operation finished and its buffer has been updated.
    fn on_success(&self, kind: IoEventKind);

    /// The operation failed or the peer closed the stream. Buffers of the
    /// failed operation must not be used again.
    fn on_error(&self, kind: IoEventKind);
}

/// Everything an event source hands the dispatcher at registration.
#[derive(Clone)]
pub struct EventSource {
    pub socket: Arc<SocketHandle>,
    pub recv_event: Arc<IoEvent>,
    pub immediate_event: Arc<IoEvent>,
    pub deferred_event: Arc<IoEvent>,
    pub handler: Weak<dyn IoEventHandler>,
}

impl EventSource {
    pub fn send_event(&self, channel: SendChannel) -> &Arc<IoEvent> {
        match channel {
            SendChannel::Immediate => &self.immediate_event,
            SendChannel::Deferred => &self.deferred_event,
        }
    }
}

#[derive(Clone)]
pub enum IoOperation {
    Recv(Arc<IoEvent>),
    Send(SendChannel, Arc<IoEvent>),
    Multicast(Arc<MulticastDataEntry>),
}

impl IoOperation {
    pub fn kind(&self) -> IoEventKind {
        match self {
            IoOperation::Recv(_) => IoEventKind::Recv,
            IoOperation::Send(channel, _) => IoEventKind::Send(*channel),
            IoOperation::Multicast(_) => IoEventKind::Multicast,
        }
    }

    /// Releases whatever the submission claimed without touching buffers.
    fn abort(&self) {
        match self {
            IoOperation::Recv(event) | IoOperation::Send(_, event) => event.finish_processing(),
            IoOperation::Multicast(entry) => entry.decrease_ref(),
        }
    }

    fn complete(self, handler: &dyn IoEventHandler, result: io::Result<usize>) {
        let kind = self.kind();
        match (self, result) {
            (IoOperation::Recv(event), Ok(transferred)) if transferred > 0 => {
                {
                    let mut data = event.data();
                    data.commit(transferred);
                    let consumed = handler.handle_io_event(data.data());
                    data.pop(consumed);
                }
                event.finish_processing();
                handler.on_success(kind);
            }
            (IoOperation::Send(_, event), Ok(transferred)) => {
                event.data().pop(transferred);
                event.finish_processing();
                handler.on_success(kind);
            }
            (IoOperation::Multicast(entry), Ok(_)) => {
                entry.decrease_ref();
                handler.on_success(kind);
            }
            (operation, _) => {
                operation.abort();
                handler.on_error(kind);
            }
        }
    }
}

pub struct IoCompletion {
    pub key: CompletionKey,
    pub operation: IoOperation,
    /// Bytes transferred; `Ok(0)` on a receive means end of stream.
    pub result: io::Result<usize>,
}

/// The dispatcher was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Queue and registry shared by both dispatcher flavors.
pub struct CompletionQueue {
    sender: Sender<IoCompletion>,
    receiver: Receiver<IoCompletion>,
    shutdown: Mutex<Option<Sender<()>>>,
    shutdown_signal: Receiver<()>,
    sources: RwLock<HashMap<CompletionKey, EventSource>>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        let (shutdown, shutdown_signal) = channel::bounded(0);
        Self {
            sender,
            receiver,
            shutdown: Mutex::new(Some(shutdown)),
            shutdown_signal,
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn sender(&self) -> Sender<IoCompletion> {
        self.sender.clone()
    }

    pub fn register(&self, key: CompletionKey, source: EventSource) -> bool {
        let mut sources = self.sources.write();
        if sources.contains_key(&key) {
            return false;
        }
        sources.insert(key, source);
        true
    }

    pub fn deregister(&self, key: CompletionKey) -> Option<EventSource> {
        self.sources.write().remove(&key)
    }

    pub fn source(&self, key: CompletionKey) -> Option<EventSource> {
        self.sources.read().get(&key).cloned()
    }

    pub fn len_sources(&self) -> usize {
        self.sources.read().len()
    }

    /// Blocks for at least one completion, then drains up to `max` into `out`.
    pub fn dequeue(&self, out: &mut Vec<IoCompletion>, max: usize) -> Result<usize, QueueClosed> {
        let first = channel::select! {
            recv(self.receiver) -> completion => completion.map_err(|_| QueueClosed)?,
            recv(self.shutdown_signal) -> _ => return Err(QueueClosed),
        };
        out.push(first);

        let mut count = 1;
        while count < max {
            match self.receiver.try_recv() {
                Ok(completion) => {
                    out.push(completion);
                    count += 1;
                }
                Err(_) => break,
            }
        }
        Ok(count)
    }

    /// Hands a completion to its handler.
    ///
    /// Completions for sources that are gone only release their claims.
    /// A panicking handler is logged and sees `on_error` instead.
    pub fn dispatch(&self, completion: IoCompletion) {
        let IoCompletion {
            key,
            operation,
            result,
        } = completion;

        let handler = self
            .sources
            .read()
            .get(&key)
            .and_then(|source| source.handler.upgrade());

        let Some(handler) = handler else {
            debug!("Dropping completion for released source {:#x}", key);
            operation.abort();
            return;
        };

        let kind = operation.kind();
        let claims = operation.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            operation.complete(handler.as_ref(), result);
        }));

        if outcome.is_err() {
            error!("I/O handler for {:#x} panicked on {:?}", key, kind);
            claims.abort();
            handler.on_error(kind);
        }
    }

    pub fn close(&self) {
        self.shutdown.lock().take();
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract shared by the dispatcher flavors.
pub trait IoService: Send + Sync + 'static {
    fn completion_queue(&self) -> &CompletionQueue;

    /// Associates `source` with `key`; false if the key is taken.
    fn register_event_source(&self, key: CompletionKey, source: EventSource) -> bool;

    fn deregister_event_source(&self, key: CompletionKey);

    /// Submits a receive into the unused tail of the source's receive
    /// buffer. The caller marks the event as processing beforehand.
    fn post_recv(&self, key: CompletionKey) -> bool;

    /// Submits the pending bytes of one send buffer.
    fn post_send(&self, key: CompletionKey, channel: SendChannel) -> bool;

    /// Submits a shared payload. The caller holds a reference on `entry`
    /// that the completion releases.
    fn post_multicast(&self, key: CompletionKey, entry: Arc<MulticastDataEntry>) -> bool;

    fn dequeue_event_results(
        &self,
        out: &mut Vec<IoCompletion>,
        max: usize,
    ) -> Result<usize, QueueClosed> {
        self.completion_queue().dequeue(out, max)
    }

    fn run_event_loop_forever(&self) {
        let mut batch = Vec::with_capacity(EVENT_BATCH_SIZE);
        while self
            .dequeue_event_results(&mut batch, EVENT_BATCH_SIZE)
            .is_ok()
        {
            for completion in batch.drain(..) {
                self.completion_queue().dispatch(completion);
            }
        }
        debug!("Event loop on {:?} stopped", thread::current().name());
    }

    fn spawn_event_thread(self: Arc<Self>) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("io-event".into())
            .spawn(move || self.run_event_loop_forever())
    }

    /// Wakes every worker and makes further dequeues fail.
    fn shutdown(&self) {
        self.completion_queue().close();
    }
}

pub const EVENT_BATCH_SIZE: usize = 64;

/// Baseline flavor: every submission runs as its own task.
pub struct IoCompletionPort {
    runtime: tokio::runtime::Handle,
    queue: CompletionQueue,
}

impl IoCompletionPort {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self {
            runtime,
            queue: CompletionQueue::new(),
        }
    }

    fn submit<F>(&self, key: CompletionKey, operation: IoOperation, io: F)
    where
        F: std::future::Future<Output = io::Result<usize>> + Send + 'static,
    {
        let sender = self.queue.sender();
        self.runtime.spawn(async move {
            let result = io.await;
            if sender
                .send(IoCompletion {
                    key,
                    operation,
                    result,
                })
                .is_err()
            {
                warn!("Completion queue closed before {:#x} completed", key);
            }
        });
    }
}

impl IoService for IoCompletionPort {
    fn completion_queue(&self) -> &CompletionQueue {
        &self.queue
    }

    fn register_event_source(&self, key: CompletionKey, source: EventSource) -> bool {
        self.queue.register(key, source)
    }

    fn deregister_event_source(&self, key: CompletionKey) {
        self.queue.deregister(key);
    }

    fn post_recv(&self, key: CompletionKey) -> bool {
        let Some(source) = self.queue.source(key) else {
            return false;
        };
        let event = source.recv_event.clone();
        let socket = source.socket;
        let task_event = event.clone();
        self.submit(key, IoOperation::Recv(event), async move {
            socket.read_into(&task_event).await
        });
        true
    }

    fn post_send(&self, key: CompletionKey, channel: SendChannel) -> bool {
        let Some(source) = self.queue.source(key) else {
            return false;
        };
        let event = source.send_event(channel).clone();
        let socket = source.socket;
        let ticket = socket.take_write_ticket();
        let task_event = event.clone();
        self.submit(key, IoOperation::Send(channel, event), async move {
            socket.write_from(ticket, &task_event).await
        });
        true
    }

    fn post_multicast(&self, key: CompletionKey, entry: Arc<MulticastDataEntry>) -> bool {
        let Some(source) = self.queue.source(key) else {
            return false;
        };
        let socket = source.socket;
        let ticket = socket.take_write_ticket();
        let payload = entry.clone();
        self.submit(key, IoOperation::Multicast(entry), async move {
            socket.write_bytes(ticket, payload.data()).await
        });
        true
    }
}
