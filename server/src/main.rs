use clap::Parser;
use log::info;
use server::hub::{Hub, HubConfig};
use server::shutdown::ShutdownToken;
use server::transport;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

/// Authoritative game server for the survival game.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// WebSocket port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,

    /// Directory containing map JSON files
    #[clap(long, default_value = "./maps")]
    maps_dir: PathBuf,

    /// Map to load into the default room
    #[clap(long, default_value = "office_floor_01")]
    map: String,

    /// Seconds an idle session survives for reconnection
    #[clap(long, default_value = "300")]
    session_ttl: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    info!("starting game server on {addr}");
    info!("tick rate: {} Hz", args.tick_rate);

    let token = ShutdownToken::new();
    let hub = Hub::new(
        &token,
        HubConfig {
            tick_rate: args.tick_rate,
            maps_directory: args.maps_dir,
            map_id: args.map,
            session_ttl: Duration::from_secs(args.session_ttl),
            session_sweep_interval: Duration::from_secs(30),
        },
    );

    let control = hub.clone();
    tokio::spawn(async move { control.run().await });

    let listener = TcpListener::bind(&addr).await?;
    info!("websocket server listening on {addr}");

    let acceptor = hub.clone();
    let accept_token = token.child();
    tokio::spawn(async move { transport::serve(listener, acceptor, accept_token).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    hub.shutdown();
    token.cancel();
    // Bounded grace for pumps and loops to observe cancellation.
    tokio::time::sleep(Duration::from_millis(250)).await;

    info!("server stopped");
    Ok(())
}
