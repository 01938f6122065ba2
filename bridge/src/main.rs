mod config;

use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use proxy::ProxyError;
use registry::mysql::MySqlRegistry;
use registry::{Registry, RegistryError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use usersync::client::SyncClient;
use usersync::mirror::{MirrorError, MirrorStore, SqliteMirrorStore};
use usersync::Orchestrator;

#[derive(Parser)]
#[command(name = "bridge", about = "User-sync forwarding gateway")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the forwarding proxy and its admin listener
    Proxy {
        #[arg(long)]
        config_file_path: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("registry unavailable: {0}")]
    Registry(#[from] RegistryError),
    #[error("mirror store unavailable: {0}")]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Proxy { config_file_path } => {
            let config = match Config::from_file(&config_file_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };

            // Held for the lifetime of the process so buffered events get flushed on exit
            let _sentry = config.common.logging.as_ref().map(init_sentry);
            init_tracing();

            if let Err(e) = run_proxy(config) {
                tracing::error!(error = %e, "Proxy exited with error");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_proxy(config: Config) -> Result<(), StartupError> {
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }
    shared::metrics_defs::describe_all(proxy::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(usersync::metrics_defs::ALL_METRICS);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        tracing::info!(
            upstream = %config.proxy.upstream.url,
            mirror = %config.mirror.path.display(),
            "Starting proxy"
        );

        let registry: Arc<dyn Registry> = Arc::new(MySqlRegistry::connect(&config.registry).await?);
        registry.check_connection().await?;

        let mirror: Arc<dyn MirrorStore> = Arc::new(SqliteMirrorStore::open(&config.mirror).await?);
        mirror.check_connection().await?;

        let client = SyncClient::new(config.sync.timeout());
        let orchestrator = Arc::new(Orchestrator::new(registry.clone(), mirror, client));

        proxy::run(config.proxy, orchestrator, move || registry.is_ready()).await?;
        Ok::<(), StartupError>(())
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_sentry(logging: &LoggingConfig) -> sentry::ClientInitGuard {
    sentry::init((
        logging.sentry_dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    ))
}

fn init_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|e| StartupError::Metrics(e.to_string()))
}
