use clap::Parser;
use client::network::{Client, LinkConditions};
use log::info;
use shared::{MovementConfig, DEFAULT_TICK_RATE};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Probability of dropping an outgoing move packet
    #[arg(long, default_value = "0.0")]
    packet_loss: f64,

    /// Client tick rate (moves simulated per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Stop after this many seconds; runs until interrupted when omitted
    #[arg(short, long)]
    duration: Option<u64>,

    /// Seed for the scripted input
    #[arg(long, default_value = "1")]
    seed: u64,

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
        Some(path) => MovementConfig::load(path)?,
        None => MovementConfig::default(),
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    if args.packet_loss > 0.0 {
        info!("Dropping {:.0}% of move packets", args.packet_loss * 100.0);
    }

    let link = LinkConditions {
        fake_ping_ms: args.fake_ping,
        packet_loss: args.packet_loss,
    };
    let mut client = Client::new(&args.server, config, link, args.seed).await?;

    client
        .run(args.tick_rate, args.duration.map(Duration::from_secs))
        .await?;

    Ok(())
}
