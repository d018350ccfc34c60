//! Integration tests for the game server
//!
//! These tests run a real server on loopback and talk to it the way a
//! classic client and the login service do.

use flate2::read::GzDecoder;
use rand::Rng;
use server::config::{IoModel, ServerConfig};
use server::error::Error;
use server::network::{Server, ShutdownHandle};
use shared::extension::server_ext_info;
use shared::message::{
    ChatBroadcast, HandshakeRequest, HandshakeResponse, Heartbeat, MessageId, MessageRequest,
    PlayerType, MESSAGE_CAPACITY,
};
use shared::packet::{
    decode, encode_to_vec, ChatMessage, DespawnPlayer, DisconnectPlayer, ExtEntry, ExtInfo,
    Handshake, LevelDataChunk, LevelFinalize, SetBlockClient, SetBlockServer, SpawnPlayer,
    TwoWayPing,
};
use shared::{ErrorCode, PacketFormat, PacketId, CPE_MAGIC, PROTOCOL_VERSION};
use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningServer {
    addr: SocketAddr,
    udp_addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), Error>>,
}

impl RunningServer {
    async fn start(config: ServerConfig) -> Self {
        let server = Server::new(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let udp_addr = server.udp_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            udp_addr,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        timeout(READ_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        max_players: 8,
        tick_rate: 50,
        io_threads: 2,
        server_name: "test server".to_string(),
        level_width: 16,
        level_height: 16,
        level_length: 16,
        ..ServerConfig::default()
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send<'a, P: PacketFormat<'a>>(&mut self, packet: &P) {
        let mut bytes = Vec::new();
        encode_to_vec(packet, &mut bytes);
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn handshake(&mut self, username: &str, user_type: u8) {
        self.send(&Handshake {
            protocol_version: PROTOCOL_VERSION,
            username: username.into(),
            password: "secret".into(),
            user_type,
        })
        .await;
    }

    /// Reads the next whole packet, id byte included
    async fn read_packet(&mut self) -> Vec<u8> {
        timeout(READ_TIMEOUT, async {
            let id = self.stream.read_u8().await.unwrap();
            let size = PacketId::try_from(id).unwrap().size();
            let mut packet = vec![0u8; size];
            packet[0] = id;
            self.stream.read_exact(&mut packet[1..]).await.unwrap();
            packet
        })
        .await
        .expect("timed out waiting for a packet")
    }

    /// Skips packets until one with `id` arrives
    async fn read_until(&mut self, id: PacketId) -> Vec<u8> {
        loop {
            let packet = self.read_packet().await;
            if packet[0] == id as u8 {
                return packet;
            }
        }
    }

    /// Expects the server to end the connection with `reason`
    async fn expect_disconnect(&mut self, reason: ErrorCode) {
        let packet = self.read_until(PacketId::DisconnectPlayer).await;
        let disconnect: DisconnectPlayer = decode(&packet).unwrap();
        assert_eq!(disconnect.reason.to_string_lossy(), reason.to_string());
    }

    /// Logs in as a guest and waits for the own spawn
    async fn join(addr: SocketAddr, username: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.handshake(username, 0).await;
        loop {
            let packet = client.read_until(PacketId::SpawnPlayer).await;
            let spawn: SpawnPlayer = decode(&packet).unwrap();
            if spawn.player_id == -1 {
                return client;
            }
        }
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;
    use shared::packet::ServerIdentification;

    /// Tests that a guest is answered with the server identification
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn guest_receives_server_identification() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.handshake("alice", 0).await;

        let packet = client.read_until(PacketId::Handshake).await;
        let identification: ServerIdentification = decode(&packet).unwrap();
        assert_eq!(identification.protocol_version, PROTOCOL_VERSION);
        assert_eq!(identification.server_name.to_string_lossy(), "test server");
        assert_eq!(identification.user_type, PlayerType::Guest.user_type_byte());

        server.stop().await;
    }

    /// Tests extension negotiation for clients announcing CPE
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cpe_client_receives_extension_list() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.handshake("alice", CPE_MAGIC).await;

        client.read_until(PacketId::Handshake).await;
        let info_packet = client.read_until(PacketId::ExtInfo).await;
        let info: ExtInfo = decode(&info_packet).unwrap();
        assert_eq!(info.extension_count, server_ext_info().extension_count);
        for _ in 0..info.extension_count {
            let entry_packet = client.read_until(PacketId::ExtEntry).await;
            let entry: ExtEntry = decode(&entry_packet).unwrap();
            assert!(!entry.extension_name.is_empty());
        }

        // The level only follows once the client answered with its own list
        client
            .send(&ExtInfo {
                app_name: "test client".into(),
                extension_count: 1,
            })
            .await;
        client
            .send(&ExtEntry {
                extension_name: "MessageTypes".into(),
                version: 1,
            })
            .await;
        client.read_until(PacketId::LevelInitialize).await;

        server.stop().await;
    }

    /// Tests that the same name cannot be logged in twice
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_username_is_rejected() {
        let server = RunningServer::start(test_config()).await;
        let _first = TestClient::join(server.addr, "alice").await;

        let mut second = TestClient::connect(server.addr).await;
        second.handshake("alice", 0).await;
        second.expect_disconnect(ErrorCode::AlreadyLoggedIn).await;

        server.stop().await;
    }

    /// Tests rejection of a wrong protocol version
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wrong_protocol_version_is_rejected() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client
            .send(&Handshake {
                protocol_version: PROTOCOL_VERSION - 1,
                username: "alice".into(),
                password: "".into(),
                user_type: 0,
            })
            .await;
        client.expect_disconnect(ErrorCode::UnsupportedProtocolVersion).await;

        server.stop().await;
    }

    /// Tests that gameplay packets require a handshake first
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn packets_before_handshake_are_rejected() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client
            .send(&ChatMessage {
                player_id: -1,
                message: "hello".into(),
            })
            .await;
        client.expect_disconnect(ErrorCode::UnauthenticatedPlayer).await;

        server.stop().await;
    }
}

/// LEVEL TRANSFER TESTS
mod level_tests {
    use super::*;

    /// Tests that the streamed level decompresses to the generated world
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn level_stream_decompresses_to_world() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.handshake("alice", 0).await;
        client.read_until(PacketId::LevelInitialize).await;

        let mut compressed = Vec::new();
        let finalize: LevelFinalize = loop {
            let packet = client.read_packet().await;
            match PacketId::try_from(packet[0]).unwrap() {
                PacketId::LevelDataChunk => {
                    let chunk: LevelDataChunk = decode(&packet).unwrap();
                    compressed.extend_from_slice(&chunk.data[..chunk.length as usize]);
                }
                PacketId::LevelFinalize => break decode(&packet).unwrap(),
                other => panic!("unexpected {:?} during level transfer", other),
            }
        };
        assert_eq!(finalize, LevelFinalize { x: 16, y: 16, z: 16 });

        let mut blocks = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut blocks)
            .unwrap();
        assert_eq!(&blocks[..4], &4096u32.to_be_bytes());
        let blocks = &blocks[4..];
        assert_eq!(blocks.len(), 4096);
        // Index is (y * length + z) * width + x
        assert_eq!(blocks[0], 3);
        assert_eq!(blocks[7 * 256], 2);
        assert_eq!(blocks[8 * 256], 0);

        let spawn_packet = client.read_until(PacketId::SpawnPlayer).await;
        let spawn: SpawnPlayer = decode(&spawn_packet).unwrap();
        assert_eq!(spawn.player_id, -1);
        assert_eq!(spawn.name.to_string_lossy(), "alice");

        server.stop().await;
    }

    /// Tests level transfer through the registered I/O flavor
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registered_io_serves_whole_login() {
        let server = RunningServer::start(ServerConfig {
            io_model: IoModel::Registered,
            ..test_config()
        })
        .await;
        let _client = TestClient::join(server.addr, "alice").await;
        server.stop().await;
    }
}

/// GAMEPLAY TESTS
mod gameplay_tests {
    use super::*;

    /// Tests that players see each other spawn and leave
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn players_spawn_and_despawn_for_each_other() {
        let server = RunningServer::start(test_config()).await;
        let mut alice = TestClient::join(server.addr, "alice").await;
        let bob = TestClient::join(server.addr, "bob").await;

        let spawn_packet = alice.read_until(PacketId::SpawnPlayer).await;
        let spawn: SpawnPlayer = decode(&spawn_packet).unwrap();
        assert_eq!(spawn.name.to_string_lossy(), "bob");

        drop(bob);
        let despawn_packet = alice.read_until(PacketId::DespawnPlayer).await;
        let despawn: DespawnPlayer = decode(&despawn_packet).unwrap();
        assert_eq!(despawn.player_id, spawn.player_id);

        server.stop().await;
    }

    /// Tests that block changes reach every spawned player
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn block_change_is_broadcast() {
        let server = RunningServer::start(test_config()).await;
        let mut alice = TestClient::join(server.addr, "alice").await;
        let mut bob = TestClient::join(server.addr, "bob").await;

        alice
            .send(&SetBlockClient {
                x: 3,
                y: 9,
                z: 4,
                mode: SetBlockClient::MODE_CREATE,
                block_type: 1,
            })
            .await;

        for client in [&mut alice, &mut bob] {
            let update_packet = client.read_until(PacketId::SetBlockServer).await;
            let update: SetBlockServer = decode(&update_packet).unwrap();
            assert_eq!((update.x, update.y, update.z, update.block_type), (3, 9, 4, 1));
        }

        server.stop().await;
    }

    /// Tests that chat is prefixed with the sender name
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn chat_is_broadcast_with_sender() {
        let server = RunningServer::start(test_config()).await;
        let mut alice = TestClient::join(server.addr, "alice").await;
        let mut bob = TestClient::join(server.addr, "bob").await;

        alice
            .send(&ChatMessage {
                player_id: -1,
                message: "hello".into(),
            })
            .await;

        let chat_packet = bob.read_until(PacketId::ChatMessage).await;
        let chat: ChatMessage = decode(&chat_packet).unwrap();
        assert_eq!(chat.message.to_string_lossy(), "alice: hello");

        server.stop().await;
    }

    /// Tests that a client initiated two-way ping is echoed
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_way_ping_is_echoed() {
        let server = RunningServer::start(test_config()).await;
        let mut alice = TestClient::join(server.addr, "alice").await;

        alice
            .send(&TwoWayPing {
                direction: 0,
                data: 4242,
            })
            .await;
        let echo_packet = alice.read_until(PacketId::TwoWayPing).await;
        let echo: TwoWayPing = decode(&echo_packet).unwrap();
        assert_eq!(echo, TwoWayPing { direction: 0, data: 4242 });

        server.stop().await;
    }
}

/// CONNECTION HANDLING TESTS
mod connection_tests {
    use super::*;

    /// Tests that the player limit is enforced with a reason
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connection_limit_is_enforced() {
        let server = RunningServer::start(ServerConfig {
            max_players: 1,
            ..test_config()
        })
        .await;
        let _alice = TestClient::join(server.addr, "alice").await;

        let mut rejected = TestClient::connect(server.addr).await;
        rejected.expect_disconnect(ErrorCode::ClientConnectionFull).await;

        server.stop().await;
    }

    /// Tests that an unknown packet id ends the connection
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_packet_id_disconnects() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;
        client.stream.write_all(&[0xFF, 0, 0]).await.unwrap();
        client.expect_disconnect(ErrorCode::InvalidPacketId).await;

        server.stop().await;
    }

    /// Tests that packets split across many writes are reassembled
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fragmented_handshake_is_reassembled() {
        let server = RunningServer::start(test_config()).await;
        let mut client = TestClient::connect(server.addr).await;

        let mut bytes = Vec::new();
        encode_to_vec(
            &Handshake {
                protocol_version: PROTOCOL_VERSION,
                username: "alice".into(),
                password: "".into(),
                user_type: 0,
            },
            &mut bytes,
        );

        let mut rng = rand::thread_rng();
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + rng.gen_range(1..=24)).min(bytes.len());
            client.stream.write_all(&bytes[offset..end]).await.unwrap();
            client.stream.flush().await.unwrap();
            offset = end;
            tokio::time::sleep(Duration::from_millis(rng.gen_range(0..5))).await;
        }

        client.read_until(PacketId::Handshake).await;
        server.stop().await;
    }
}

/// LOGIN SERVICE TESTS
mod login_service_tests {
    use super::*;

    /// Fake login service answering every request with `decide`
    async fn spawn_login_service(
        decide: fn(&HandshakeRequest) -> (Option<ErrorCode>, PlayerType),
    ) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buffer = [0u8; MESSAGE_CAPACITY];
            while let Ok((len, from)) = socket.recv_from(&mut buffer).await {
                let request = MessageRequest::parse(&buffer[..len]).unwrap();
                let reply = match request.message_id() {
                    MessageId::HandshakeRequest => {
                        let handshake: HandshakeRequest = request.decode().unwrap();
                        let (error, player_type) = decide(&handshake);
                        let response = HandshakeResponse {
                            connection_key: handshake.connection_key,
                            error,
                            player_type,
                            player_not_exist: false,
                        };
                        MessageRequest::new(MessageId::HandshakeResponse, &response).unwrap()
                    }
                    MessageId::Ping => {
                        let heartbeat: Heartbeat = request.decode().unwrap();
                        MessageRequest::new(MessageId::Pong, &heartbeat).unwrap()
                    }
                    _ => continue,
                };
                let _ = socket.send_to(reply.as_bytes(), from).await;
            }
        });

        addr
    }

    /// Tests that an accepted login completes the parked handshake
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn login_service_approves_handshake() {
        let login = spawn_login_service(|_| (None, PlayerType::Admin)).await;
        let server = RunningServer::start(ServerConfig {
            login_server: Some(login),
            ..test_config()
        })
        .await;

        let mut client = TestClient::connect(server.addr).await;
        client.handshake("alice", 0).await;
        let packet = client.read_until(PacketId::Handshake).await;
        assert_eq!(packet[packet.len() - 1], PlayerType::Admin.user_type_byte());
        client.read_until(PacketId::LevelInitialize).await;

        server.stop().await;
    }

    /// Tests that a refused login disconnects with the service's reason
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn login_service_rejects_handshake() {
        let login =
            spawn_login_service(|_| (Some(ErrorCode::InvalidPassword), PlayerType::Guest)).await;
        let server = RunningServer::start(ServerConfig {
            login_server: Some(login),
            ..test_config()
        })
        .await;

        let mut client = TestClient::connect(server.addr).await;
        client.handshake("alice", 0).await;
        client.expect_disconnect(ErrorCode::InvalidPassword).await;

        server.stop().await;
    }

    /// Tests that chat from another service reaches spawned players
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn service_chat_reaches_players() {
        let server = RunningServer::start(test_config()).await;
        let mut alice = TestClient::join(server.addr, "alice").await;

        let router = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let chat = ChatBroadcast {
            sender: "router".to_string(),
            message: "maintenance soon".to_string(),
        };
        let request = MessageRequest::new(MessageId::ChatBroadcast, &chat).unwrap();
        router.send_to(request.as_bytes(), server.udp_addr).await.unwrap();

        let line_packet = alice.read_until(PacketId::ChatMessage).await;
        let line: ChatMessage = decode(&line_packet).unwrap();
        assert_eq!(line.message.to_string_lossy(), "[router] maintenance soon");

        server.stop().await;
    }

    /// Tests that the server answers service pings
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_answers_service_ping() {
        let server = RunningServer::start(test_config()).await;

        let ping = MessageRequest::new(MessageId::Ping, &Heartbeat { sequence: 77 }).unwrap();
        let reply = server::communicator::Communicator::send_reliably(
            server.udp_addr,
            &ping,
            2,
            Duration::from_millis(500),
        )
        .await
        .unwrap();
        assert_eq!(reply.message_id(), MessageId::Pong);
        assert_eq!(reply.decode::<Heartbeat>().unwrap().sequence, 77);

        server.stop().await;
    }
}
