//! Windflow command line
//!
//! Runs analysis queries against configured workers, lists stored projects
//! and runs operational diagnostics.
//!
//! # Usage
//! ```bash
//! windflow ask --session s1 "analyze terrain at 35.5, -101.4"
//! windflow diagnose [--worker wake-simulation]
//! windflow projects
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use windflow_core::geocoding::{Geocoder, HttpGeocoder, NoopGeocoder};
use windflow_core::store::{ProjectStore, SqliteStore};
use windflow_core::worker::HttpWorker;
use windflow_core::{AnalysisRequest, Diagnostics, Orchestrator, WindflowConfig, WorkerRegistry};

/// Windflow - multi-stage wind farm analysis orchestrator
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON); defaults plus WINDFLOW_* overrides when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one natural-language analysis query
    Ask {
        /// The query text
        query: String,

        /// Conversation session id
        #[arg(long, default_value = "cli")]
        session: String,

        /// Caller id
        #[arg(long, default_value = "local")]
        user: String,

        /// Project to use instead of resolving one from the query
        #[arg(long)]
        project: Option<String>,
    },

    /// Check configuration and worker health
    Diagnose {
        /// Only probe this worker
        #[arg(long)]
        worker: Option<String>,
    },

    /// List stored projects
    Projects,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let registry = Arc::new(build_registry(&config)?);

    match cli.command {
        Commands::Ask {
            query,
            session,
            user,
            project,
        } => {
            let store = Arc::new(
                SqliteStore::open(&config.storage.database_path)
                    .with_context(|| format!("opening {}", config.storage.database_path))?,
            );
            let orchestrator = Orchestrator::new(
                &config,
                registry,
                store.clone(),
                store,
                build_geocoder(&config)?,
            );

            let mut request = AnalysisRequest::new(session, user, query);
            if let Some(project) = project {
                request = request.with_project_ref(project);
            }

            let response = orchestrator.handle(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(2);
            }
        }
        Commands::Diagnose { worker } => {
            let diagnostics = Diagnostics::new(&config, registry);
            let results = match worker {
                Some(name) => vec![
                    diagnostics.check_worker_reachable(&name).await,
                    diagnostics.probe_worker(&name).await,
                ],
                None => diagnostics.run_full().await,
            };

            println!("{}", serde_json::to_string_pretty(&results)?);
            if results.iter().any(|r| !r.success) {
                std::process::exit(1);
            }
        }
        Commands::Projects => {
            let store = SqliteStore::open(&config.storage.database_path)
                .with_context(|| format!("opening {}", config.storage.database_path))?;
            let projects = ProjectStore::list(&store).await?;
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays valid JSON
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<WindflowConfig> {
    let config = match path {
        Some(path) => {
            let path = path.to_string_lossy();
            WindflowConfig::from_file(&path).with_context(|| format!("loading {}", path))?
        }
        None => WindflowConfig::default(),
    };
    Ok(config.with_env_overrides())
}

/// One HTTP worker per configured endpoint that has a URL
fn build_registry(config: &WindflowConfig) -> anyhow::Result<WorkerRegistry> {
    let mut registry = WorkerRegistry::new();
    for (stage, endpoint) in &config.workers {
        let Some(url) = &endpoint.url else {
            tracing::debug!(%stage, worker = %endpoint.name, "No URL configured, worker not registered");
            continue;
        };
        let worker = HttpWorker::new(&endpoint.name, url, config.invoker.hard_timeout())
            .with_context(|| format!("building worker {}", endpoint.name))?;
        registry.register(Arc::new(worker));
    }
    Ok(registry)
}

fn build_geocoder(config: &WindflowConfig) -> anyhow::Result<Arc<dyn Geocoder>> {
    if config.geocoding.enabled {
        Ok(Arc::new(HttpGeocoder::new(&config.geocoding)?))
    } else {
        Ok(Arc::new(NoopGeocoder))
    }
}
