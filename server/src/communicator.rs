//! UDP messaging with the other services (login, chat router)

use crate::error::Error;
use log::{debug, error, warn};
use shared::message::{MessageRequest, MESSAGE_CAPACITY};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// A decoded message and its sender
#[derive(Debug)]
pub struct InboundMessage {
    pub request: MessageRequest,
    pub addr: SocketAddr,
}

pub struct Communicator {
    socket: Arc<UdpSocket>,
}

impl Communicator {
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends without waiting; usable from I/O worker threads.
    pub fn try_send_to(&self, request: &MessageRequest, addr: SocketAddr) -> io::Result<()> {
        self.socket.try_send_to(request.as_bytes(), addr).map(|_| ())
    }

    pub async fn send_to(&self, request: &MessageRequest, addr: SocketAddr) -> io::Result<()> {
        self.socket.send_to(request.as_bytes(), addr).await.map(|_| ())
    }

    /// Sends `request` from a fresh socket and waits for the first reply
    /// from `addr`, retransmitting every `period` up to `retries` times.
    pub async fn send_reliably(
        addr: SocketAddr,
        request: &MessageRequest,
        retries: u32,
        period: Duration,
    ) -> Result<MessageRequest, Error> {
        let socket = UdpSocket::bind(if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }).await?;
        let mut buffer = [0u8; MESSAGE_CAPACITY];

        for attempt in 0..=retries {
            socket.send_to(request.as_bytes(), addr).await?;

            let deadline = tokio::time::Instant::now() + period;
            loop {
                let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await;
                match received {
                    Err(_) => break,
                    Ok(Ok((len, from))) if from == addr => {
                        return Ok(MessageRequest::parse(&buffer[..len])?);
                    }
                    Ok(Ok((_, from))) => debug!("Ignoring reply from unexpected {}", from),
                    Ok(Err(e)) => return Err(e.into()),
                }
            }
            debug!("No reply from {} (attempt {})", addr, attempt + 1);
        }

        Err(io::Error::new(io::ErrorKind::TimedOut, format!("{} did not answer", addr)).into())
    }

    /// Spawns task that forwards every well-formed message to `sender`
    pub fn spawn_receiver(&self, sender: mpsc::UnboundedSender<InboundMessage>) {
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut buffer = [0u8; MESSAGE_CAPACITY];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match MessageRequest::parse(&buffer[..len]) {
                        Ok(request) => {
                            if sender.send(InboundMessage { request, addr }).is_err() {
                                debug!("Message receiver stopped");
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping message from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::{Heartbeat, MessageId};

    #[tokio::test]
    async fn test_receiver_forwards_messages() {
        let server = Communicator::bind("127.0.0.1:0").await.unwrap();
        let client = Communicator::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.spawn_receiver(tx);

        let request = MessageRequest::new(MessageId::Ping, &Heartbeat { sequence: 9 }).unwrap();
        client
            .send_to(&request, server.local_addr().unwrap())
            .await
            .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.addr, client.local_addr().unwrap());
        assert_eq!(inbound.request.message_id(), MessageId::Ping);
        assert_eq!(inbound.request.decode::<Heartbeat>().unwrap().sequence, 9);
    }

    #[tokio::test]
    async fn test_receiver_skips_garbage() {
        let server = Communicator::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.spawn_receiver(tx);

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();
        raw.send_to(&[0xEE, 1, 2], target).await.unwrap();

        let request = MessageRequest::new(MessageId::Pong, &Heartbeat { sequence: 1 }).unwrap();
        raw.send_to(request.as_bytes(), target).await.unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.request.message_id(), MessageId::Pong);
    }

    #[tokio::test]
    async fn test_send_reliably_retransmits() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buffer = [0u8; MESSAGE_CAPACITY];
            // Ignore the first transmission.
            peer.recv_from(&mut buffer).await.unwrap();
            let (_, from) = peer.recv_from(&mut buffer).await.unwrap();
            let pong = MessageRequest::new(MessageId::Pong, &Heartbeat { sequence: 2 }).unwrap();
            peer.send_to(pong.as_bytes(), from).await.unwrap();
        });

        let ping = MessageRequest::new(MessageId::Ping, &Heartbeat { sequence: 1 }).unwrap();
        let reply = Communicator::send_reliably(peer_addr, &ping, 3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(reply.message_id(), MessageId::Pong);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reliably_gives_up() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ping = MessageRequest::new(MessageId::Ping, &Heartbeat { sequence: 1 }).unwrap();
        let result = Communicator::send_reliably(
            silent.local_addr().unwrap(),
            &ping,
            1,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
