//! Server network layer: TCP accept, I/O workers and the main loop

use crate::communicator::{Communicator, InboundMessage};
use crate::config::{ServerConfig, SWEEP_INTERVAL_MS, UDP_RETRANSMISSION_PERIOD_MS, UDP_RETRY_COUNT};
use crate::connection_environment::ConnectionEnvironment;
use crate::error::Error;
use crate::game::GameServer;
use crate::handler::PacketHandler;
use crate::io::{create_io_service, IoService, SocketHandle};
use log::{debug, error, info, warn};
use shared::message::{Heartbeat, MessageId, MessageRequest};
use shared::packet::{encode_to_vec, DisconnectPlayer};
use shared::ErrorCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};

/// Time given to queued disconnect packets before the workers stop
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(100);

/// Stops a running server from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    service: Arc<dyn IoService>,
    environment: Arc<ConnectionEnvironment>,
    game: Arc<GameServer>,
    communicator: Arc<Communicator>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let communicator =
            Arc::new(Communicator::bind(&format!("{}:{}", config.host, config.udp_port)).await?);
        info!("Service messages on udp {}", communicator.local_addr()?);

        let service = create_io_service(config.io_model, tokio::runtime::Handle::current());
        let environment = Arc::new(ConnectionEnvironment::new(config.max_players, service.clone()));
        let game = Arc::new(GameServer::new(&config, Some(communicator.clone())));

        Ok(Server {
            config,
            listener,
            service,
            environment,
            game,
            communicator,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.communicator.local_addr()?)
    }

    pub fn environment(&self) -> &Arc<ConnectionEnvironment> {
        &self.environment
    }

    pub fn game(&self) -> &Arc<GameServer> {
        &self.game
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: self.shutdown.clone(),
        }
    }

    /// Spawns the worker threads that dispatch completed socket operations
    fn spawn_event_threads(&self) -> Result<Vec<JoinHandle<()>>, Error> {
        let count = self.config.io_thread_count();
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            workers.push(self.service.clone().spawn_event_thread()?);
        }
        debug!("Started {} I/O worker threads ({:?})", count, self.config.io_model);
        Ok(workers)
    }

    /// Checks once whether the login service answers
    fn spawn_login_probe(&self) {
        let Some(login_server) = self.config.login_server else {
            return;
        };

        tokio::spawn(async move {
            let ping = match MessageRequest::new(MessageId::Ping, &Heartbeat { sequence: 0 }) {
                Ok(ping) => ping,
                Err(e) => {
                    error!("Failed to encode ping: {}", e);
                    return;
                }
            };
            let period = Duration::from_millis(UDP_RETRANSMISSION_PERIOD_MS);
            match Communicator::send_reliably(login_server, &ping, UDP_RETRY_COUNT, period).await {
                Ok(_) => info!("Login service at {} is reachable", login_server),
                Err(e) => warn!("Login service at {} did not answer: {}", login_server, e),
            }
        });
    }

    /// Main server loop coordinating all operations
    pub async fn run(self) -> Result<(), Error> {
        let workers = self.spawn_event_threads()?;

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundMessage>();
        self.communicator.spawn_receiver(inbound_tx);
        self.spawn_login_probe();

        let handler: Arc<dyn PacketHandler> = self.game.clone();
        let acceptor = tokio::spawn(accept_connections(
            self.listener,
            self.environment.clone(),
            handler,
        ));

        let mut tick_interval = interval(self.config.tick_period());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_interval = interval(Duration::from_millis(SWEEP_INTERVAL_MS));
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.game.tick(&self.environment);
                    self.environment.flush_send();
                    self.environment.flush_receive();
                }

                _ = sweep_interval.tick() => {
                    let deleted = self.environment.cleanup_expired_connection();
                    self.game.retry_pending_logins(&self.environment);
                    let collected = self.game.collect_garbage();
                    if deleted > 0 || collected > 0 {
                        debug!(
                            "Sweep: {} connections deleted, {} payloads collected, {} online",
                            deleted,
                            collected,
                            self.environment.size_of_connections()
                        );
                    }
                }

                Some(inbound) = inbound_rx.recv() => {
                    self.game.on_message(&self.environment, inbound);
                }

                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl+C: {}", e);
                    }
                    info!("Received Ctrl+C, shutting down");
                    break;
                }

                _ = self.shutdown.notified() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        acceptor.abort();
        self.environment.close_all(ErrorCode::ServerShutdown);
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        self.service.shutdown();

        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    error!("I/O worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!("Failed to join I/O workers: {}", e);
        }

        Ok(())
    }
}

/// Accepts sockets until the task is aborted
async fn accept_connections(
    listener: TcpListener,
    environment: Arc<ConnectionEnvironment>,
    handler: Arc<dyn PacketHandler>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let socket = match SocketHandle::new(stream) {
                    Ok(socket) => Arc::new(socket),
                    Err(e) => {
                        warn!("Failed to set up socket from {}: {}", addr, e);
                        continue;
                    }
                };

                if let Err(reason) = environment.accept(socket.clone(), handler.clone()) {
                    tokio::spawn(reject_connection(socket, reason));
                }
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Tells a socket that was never admitted why, then closes it
async fn reject_connection(socket: Arc<SocketHandle>, reason: ErrorCode) {
    let reason = reason.to_string();
    let mut bytes = Vec::new();
    encode_to_vec(
        &DisconnectPlayer {
            reason: reason.as_str().into(),
        },
        &mut bytes,
    );

    let ticket = socket.take_write_ticket();
    if let Err(e) = socket.write_bytes(ticket, &bytes).await {
        debug!("Failed to notify rejected {}: {}", socket.peer_addr(), e);
    }
    socket.close();
}
