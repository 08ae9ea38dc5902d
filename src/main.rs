//! Imbi API server.
//!
//! ```text
//! imbi [--config PATH] serve [--dev] [--host HOST] [--port PORT]
//! imbi [--config PATH] bootstrap-auth
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use imbi::config::{self, ImbiConfig};
use imbi::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "imbi", version)]
#[command(about = "Imbi operational management API", long_about = None)]
struct Cli {
    /// Configuration file (default: ./config.toml, ~/.config/imbi/, /etc/imbi/)
    #[arg(short, long, env = "IMBI_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Imbi HTTP server
    Serve {
        /// Run in development mode (debug logging)
        #[arg(long)]
        dev: bool,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Seed permissions, default roles, organization and group
    BootstrapAuth,
}

fn load(path: Option<&PathBuf>) -> Result<ImbiConfig, config::ConfigError> {
    match path {
        Some(path) => config::load_config(path),
        None => config::load_default_config(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { dev, host, port } => {
            if dev {
                config.server.environment = "development".to_string();
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            logging::init(&config.observability, config.server.is_development());
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                environment = %config.server.environment,
                address = %config.server.bind_address(),
                "Imbi starting"
            );

            if config.observability.metrics_enabled {
                metrics::init_metrics(config.observability.metrics_address.parse()?)?;
            }

            let report = imbi::app::serve(config).await.inspect_err(|e| {
                tracing::error!(error = %e, "Imbi exited with an error");
            })?;
            if !report.is_clean() {
                tracing::warn!(failed = ?report.failed_services(), "Shutdown finished with errors");
            }
            tracing::info!("Shutdown complete");
        }
        Commands::BootstrapAuth => {
            logging::init(&config.observability, config.server.is_development());
            let summary = imbi::app::bootstrap_auth(&config).await?;
            println!(
                "Created {} permissions and {} roles",
                summary.permissions, summary.roles
            );
            println!(
                "Default organization {}",
                if summary.organization { "created" } else { "already exists" }
            );
            println!(
                "Default users group {}",
                if summary.group { "created" } else { "already exists" }
            );
        }
    }

    Ok(())
}
