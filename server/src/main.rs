use clap::Parser;
use log::info;
use server::{Args, ScoreServer, ServerConfig};

/// Main-method of the application.
/// Parses command-line arguments, opens the score store and serves HTTP until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::try_from(args)?;
    info!(
        "Starting score server on {} with database {}",
        config.address,
        config.store.path.display()
    );

    ScoreServer::new(config)?.run().await
}
