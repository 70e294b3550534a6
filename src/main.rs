//! Command-line interface for mongo-topology
//!
//! # Usage Examples
//!
//! ```bash
//! # Version and TLS capability of a mongod binary
//! mongo-topology discover --mongod /opt/mongodb/bin/mongod
//!
//! # Purge, start, print the connection string, stop on Ctrl+C
//! RUST_LOG=info mongo-topology up --topology replset.yaml
//!
//! # Clear every data directory the topology uses
//! mongo-topology purge --topology replset.yaml
//! ```
//!
//! See [`mongo_topology::TopologyFile`] for the topology file format.

use std::path::{Path, PathBuf};

use admin_command::ClientSettings;
use anyhow::Context;
use clap::{Parser, Subcommand};
use mongo_topology::discover::probe_server;
use mongo_topology::{Deployment, MetadataShape, Services, TokioLauncher, TopologyFile};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mongo-topology")]
#[command(about = "Provision ephemeral MongoDB replica sets and sharded clusters")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version and TLS support of a mongod binary as JSON
    Discover {
        /// mongod binary to probe
        #[arg(long, default_value = "mongod", env = "MONGOD_BINARY")]
        mongod: String,
    },
    /// Purge and start a topology, then stop it on Ctrl+C
    Up {
        /// Topology file (YAML)
        #[arg(long, env = "MONGO_TOPOLOGY_FILE")]
        topology: PathBuf,
    },
    /// Clear every data directory of a topology
    Purge {
        /// Topology file (YAML)
        #[arg(long, env = "MONGO_TOPOLOGY_FILE")]
        topology: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover { mongod } => {
            let build = probe_server(&TokioLauncher, &mongod)
                .await
                .with_context(|| format!("Failed to probe {mongod}"))?;
            let report = serde_json::json!({
                "binary": mongod,
                "version": build.version.triple(),
                "tls": build.tls,
                "metadata_shape": MetadataShape::for_version(&build.version).to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Up { topology } => {
            let mut deployment = load(&topology).await?;
            let mut events = deployment.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    info!("{} is {}", event.component, event.state);
                }
            });

            let started = deployment.start().await;
            if let Err(e) = started {
                // Whatever did come up must not outlive us.
                if let Err(stop_err) = deployment.stop().await {
                    error!("Failed to stop topology after failed start: {stop_err}");
                }
                return Err(e).context("Failed to start topology");
            }
            println!("{}", deployment.url());

            let mut shutdown = setup_shutdown_handler();
            let _ = shutdown.recv().await;

            deployment
                .stop()
                .await
                .context("Failed to stop topology")?;
        }
        Commands::Purge { topology } => {
            let mut deployment = load(&topology).await?;
            deployment
                .purge()
                .await
                .context("Failed to purge topology")?;
        }
    }

    Ok(())
}

async fn load(path: &Path) -> anyhow::Result<Deployment> {
    let file = TopologyFile::load(path)
        .with_context(|| format!("Failed to load topology file {}", path.display()))?;
    let services = Services::production(ClientSettings::default());
    Deployment::from_file(services, &file)
        .await
        .context("Failed to build topology")
}

/// Sets up a shutdown signal handler
fn setup_shutdown_handler() -> tokio::sync::broadcast::Receiver<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {e}");
        }

        info!("Received interrupt signal (Ctrl+C)");
        let _ = shutdown_tx.send(());
    });

    shutdown_rx
}
