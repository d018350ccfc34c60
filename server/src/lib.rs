//! # Game Server Library
//!
//! This library provides the server core for a Minecraft classic world.
//! Clients connect over TCP, log in, receive the compressed level and
//! then exchange block changes, movement and chat with everyone else in
//! the world.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Handles the complete lifecycle of client connections including:
//! - Admission against the player limit
//! - Packet parsing and dispatch to the game
//! - Idle timeouts, disconnect reasons and delayed deletion
//!
//! ### World Broadcasting
//! Changes that every player must see are encoded once per tick and
//! shared by all receivers through the multicast manager, so the level
//! data and each batch of updates exist in memory only once.
//!
//! ### Service Messaging
//! Login decisions come from a separate login service over UDP. The
//! handshake is parked until its answer arrives, with retransmission
//! when the service stays silent.
//!
//! ## Architecture Design
//!
//! ### Completion Based I/O
//! Socket operations are submitted to an I/O service and complete on a
//! small pool of worker threads, which route each result to the
//! connection that owns the socket. Two interchangeable flavors exist:
//! one task per operation, or a long-lived reader and writer per socket.
//!
//! ### Tick Loop
//! A single async loop drives the game tick, the expiry sweep and the
//! inbound service messages. Packet handlers run on the worker threads
//! and only touch state behind short-lived locks.
//!
//! ## Module Organization
//!
//! ### I/O Module (`io`)
//! Event buffers, socket handles and the two dispatcher flavors.
//!
//! ### Connection Modules (`connection`, `connection_environment`)
//! Per-connection state machine and the table of live connections.
//!
//! ### Game Module (`game`)
//! Level, roster and the packet handler that drives players from
//! handshake to spawn.
//!
//! ### Network Module (`network`)
//! TCP accept, I/O worker threads and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 25565,
//!         max_players: 32,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until Ctrl+C: accepts players, ticks the world at the
//!     // configured rate and expires idle connections.
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod communicator;
pub mod config;
pub mod connection;
pub mod connection_environment;
pub mod connection_key;
pub mod deferred;
pub mod error;
pub mod game;
pub mod handler;
pub mod io;
pub mod multicast;
pub mod network;
pub mod player;
pub mod pool;
pub mod utils;
