use clap::Parser;
use log::info;
use server::config::{IoModel, ServerConfig};
use server::network::Server;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command line arguments; anything given here overrides the config file
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Maximum number of connected players
    #[clap(short, long)]
    max_players: Option<usize>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
    /// I/O worker threads, 0 for one per core
    #[clap(long)]
    io_threads: Option<usize>,
    /// How socket operations are dispatched
    #[clap(long, value_enum)]
    io_model: Option<IoModel>,
    /// UDP address of the login service
    #[clap(long)]
    login_server: Option<SocketAddr>,
    /// Local UDP port for service messages
    #[clap(long)]
    udp_port: Option<u16>,
    /// Log level used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, server::error::Error> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(io_threads) = self.io_threads {
            config.io_threads = io_threads;
        }
        if let Some(io_model) = self.io_model {
            config.io_model = io_model;
        }
        if self.login_server.is_some() {
            config.login_server = self.login_server;
        }
        if let Some(udp_port) = self.udp_port {
            config.udp_port = udp_port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let config = args.into_config()?;
    info!(
        "Starting {} with up to {} players at {}Hz",
        config.server_name, config.max_players, config.tick_rate
    );

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
