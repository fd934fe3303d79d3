use clap::Parser;
use log::info;
use server::game::SimulationConfig;
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "32")]
    max_players: usize,

    /// Only send players and entities within this horizontal radius
    #[arg(long)]
    relevance_radius: Option<f64>,

    /// Send every snapshot in full
    #[arg(long)]
    no_delta: bool,

    /// Force a full snapshot every N ticks (0 disables)
    #[arg(long, default_value = "60")]
    full_snapshot_interval: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = SimulationConfig {
        tick_rate: args.tick_rate.max(1),
        max_players: args.max_players,
        relevance_radius: args.relevance_radius,
        delta_snapshots: !args.no_delta,
        full_snapshot_interval: args.full_snapshot_interval,
        ..Default::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    info!("Starting server on {} at {} ticks/s", address, config.tick_rate);

    let mut server = Server::new(&address, config).await?;
    let control = server.control();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            let _ = control.send(server::network::ServerMessage::Shutdown);
        }
    }

    Ok(())
}
