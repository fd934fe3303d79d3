use clap::Parser;
use client::input::InputPattern;
use client::network::{Client, ClientOptions};
use log::info;
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

    /// Scripted movement pattern
    #[arg(short = 'p', long, value_enum, default_value = "forward")]
    pattern: InputPattern,

    /// Disconnect after this many seconds (runs until stopped if omitted)
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting headless client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    info!("Input pattern: {:?}", args.pattern);

    let options = ClientOptions {
        server: args.server,
        fake_ping_ms: args.fake_ping,
        pattern: args.pattern,
        duration: args.duration.map(Duration::from_secs),
        ..Default::default()
    };

    let mut client = Client::new(options).await?;
    client.run().await?;

    let stats = client.stats();
    info!(
        "Sent {} inputs, received {} snapshots, {} minor and {} major corrections",
        stats.inputs_sent, stats.snapshots, stats.minor_corrections, stats.major_corrections
    );

    Ok(())
}
