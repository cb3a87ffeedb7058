//! inhook CLI

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use inhook::config::Config;
use inhook::network::NetworkHandler;
use inhook::recording::Registry;

#[derive(Parser)]
#[command(
    name = "inhook",
    version,
    about = "Capture webhook requests per session and stream them live"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the capture server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen address
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Override the base URL used in session capture URLs
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Parse and validate a config file
    CheckConfig {
        /// Path to a TOML config file
        path: PathBuf,
    },
}

fn init_logging(level: &str) {
    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("inhook={level}")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(
    config_path: Option<PathBuf>,
    listen: Option<SocketAddr>,
    public_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }
    if public_url.is_some() {
        config.server.public_url = public_url;
    }
    config.validate()?;

    let registry = Arc::new(Registry::new(config.public_url()));

    if config.server.bootstrap_session {
        let session = registry.create_session().await;
        info!("Bootstrap session ready at {}", session.url);
    }

    let handler = NetworkHandler::bind(&config, registry)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;

    handler.shutdown_on(tokio::signal::ctrl_c());

    handler.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve {
            config,
            listen,
            public_url,
        } => serve(config, listen, public_url).await,
        Commands::CheckConfig { path } => {
            let config = Config::from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            println!("{} is valid", path.display());
            println!("  listen_addr     = {}", config.server.listen_addr);
            println!("  public_url      = {}", config.public_url());
            println!("  observer_buffer = {}", config.limits.observer_buffer);
            Ok(())
        }
    }
}
