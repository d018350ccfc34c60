//! A connected TCP socket shared between the connection and its pending
//! operations.
//!
//! Closing the handle wakes every pending operation with
//! `ConnectionAborted`. Writes are sequenced by tickets taken when the
//! operation is submitted, so bytes reach the wire in submission order
//! even though each write runs on its own task.

use super::event::IoEvent;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::watch;

pub struct SocketHandle {
    stream: TcpStream,
    peer_addr: SocketAddr,
    closed: watch::Sender<bool>,
    next_ticket: AtomicU64,
    now_serving: watch::Sender<u64>,
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

impl SocketHandle {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (closed, _) = watch::channel(false);
        let (now_serving, _) = watch::channel(0);
        Ok(Self {
            stream,
            peer_addr,
            closed,
            next_ticket: AtomicU64::new(0),
            now_serving,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Reserves the next position in the write order.
    pub fn take_write_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::AcqRel)
    }

    /// Reads once into the unused tail of `event` without committing.
    ///
    /// `Ok(0)` means the peer closed the stream.
    pub async fn read_into(&self, event: &IoEvent) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(aborted());
            }

            tokio::select! {
                ready = self.stream.readable() => ready?,
                _ = closed.changed() => return Err(aborted()),
            }

            let result = {
                let mut data = event.data();
                self.stream.try_read(data.unused_mut())
            };

            match result {
                Ok(read) => return Ok(read),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes every byte pending in `event` at the time the ticket is served.
    pub async fn write_from(&self, ticket: u64, event: &IoEvent) -> io::Result<usize> {
        self.wait_for_turn(ticket).await?;
        let pending = event.data().size();
        let result = self
            .write_with(pending, |offset, end| {
                let data = event.data();
                let end = end.min(data.size());
                self.stream.try_write(&data.data()[offset..end])
            })
            .await;
        self.finish_turn(ticket);
        result
    }

    /// Writes a shared payload in full.
    pub async fn write_bytes(&self, ticket: u64, bytes: &[u8]) -> io::Result<usize> {
        self.wait_for_turn(ticket).await?;
        let result = self
            .write_with(bytes.len(), |offset, end| {
                self.stream.try_write(&bytes[offset..end])
            })
            .await;
        self.finish_turn(ticket);
        result
    }

    async fn write_with<F>(&self, len: usize, mut try_write: F) -> io::Result<usize>
    where
        F: FnMut(usize, usize) -> io::Result<usize>,
    {
        let mut closed = self.closed.subscribe();
        let mut written = 0;
        while written < len {
            if *closed.borrow_and_update() {
                return Err(aborted());
            }

            tokio::select! {
                ready = self.stream.writable() => ready?,
                _ = closed.changed() => return Err(aborted()),
            }

            match try_write(written, len) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer stopped reading")),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    async fn wait_for_turn(&self, ticket: u64) -> io::Result<()> {
        let mut serving = self.now_serving.subscribe();
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                self.finish_turn(ticket);
                return Err(aborted());
            }
            if *serving.borrow_and_update() == ticket {
                return Ok(());
            }

            tokio::select! {
                changed = serving.changed() => changed.map_err(|_| aborted())?,
                _ = closed.changed() => {}
            }
        }
    }

    fn finish_turn(&self, ticket: u64) {
        self.now_serving.send_if_modified(|serving| {
            if *serving == ticket {
                *serving += 1;
                true
            } else {
                false
            }
        });
    }
}
