use clap::Parser;
use log::{error, info};
use server::config::GameConfig;
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Seconds of silence before a client session is dropped
    #[arg(long, default_value = "5")]
    client_timeout: u64,

    /// World width
    #[arg(long, default_value_t = shared::GAME_WIDTH)]
    width: f32,

    /// World height
    #[arg(long, default_value_t = shared::GAME_HEIGHT)]
    height: f32,

    /// Downward speed applied while holding down in the air (disabled if unset)
    #[arg(long)]
    fast_fall: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));

    let config = GameConfig {
        world_width: args.width,
        world_height: args.height,
        fast_fall_speed: args.fast_fall,
        ..GameConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    info!("Starting server on {} at {}Hz", address, args.tick_rate);

    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        Duration::from_secs(args.client_timeout),
        config,
    )
    .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                if shutdown.send(ServerMessage::Shutdown).is_err() {
                    error!("Server loop already stopped");
                }
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
