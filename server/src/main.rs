use clap::Parser;
use log::{error, info};
use server::network::{RelayServer, ServerConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of registered players (unlimited if not set)
    #[arg(short, long)]
    max_players: Option<usize>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        max_players: args.max_players,
    };

    info!("Starting relay server...");
    if let Some(max) = config.max_players {
        info!("Player limit: {}", max);
    }

    let server = RelayServer::bind(&config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
