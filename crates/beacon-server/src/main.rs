//! # Beacon Server
//!
//! Realtime presence and message push for browser chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with custom config
//! beacon --config /path/to/beacon.toml
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! ```

use anyhow::Result;
use beacon_server::{config::Config, handlers, metrics};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Realtime presence and message push server")]
#[command(version)]
struct Args {
    /// Configuration file, instead of the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(args.config.as_deref())?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["beacon", "-c", "/etc/beacon/beacon.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/beacon/beacon.toml")));

        let args = Args::try_parse_from(["beacon"]).unwrap();
        assert_eq!(args.config, None);

        assert!(Args::try_parse_from(["beacon", "--config"]).is_err());
        assert!(Args::try_parse_from(["beacon", "--bogus"]).is_err());
    }
}
