use clap::Parser;
use log::{error, info};
use server::game::GameState;
use server::network::Server;
use shared::{MovementConfig, DEFAULT_TICK_RATE, SERVER_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// TOML file with movement, modifier and network tuning
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading movement config from {}", path.display());
            MovementConfig::load(path)?
        }
        None => MovementConfig::default(),
    };
    let table = config.modifiers.build_table()?;

    let tick_rate = args.tick_rate.max(1);
    let tick_duration = Duration::from_secs_f64(1.0 / tick_rate as f64);
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting server on {} at {}Hz", address, tick_rate);

    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        GameState::new(config, table),
    )
    .await?;

    if let Err(e) = server.run().await {
        error!("Server stopped: {}", e);
        return Err(e);
    }

    Ok(())
}
