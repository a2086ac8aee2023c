//! Machine remediation operator - installs the remediation components and reports their health

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mro_kube::OperatorConfig;

mod controller;

#[derive(Parser, Debug)]
#[command(name = "machine-remediation-operator")]
#[command(version)]
#[command(about = "Installs the machine remediation components and reports their health", long_about = None)]
struct Cli {
    /// YAML configuration file; flags and environment variables override it
    #[arg(short, long, env = "MRO_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch and install into
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Image tag used when the configuration object sets none
    #[arg(long, env = "OPERATOR_VERSION")]
    operator_version: Option<String>,

    /// Directory holding CRD manifests
    #[arg(long, env = "CRDS_MANIFESTS_DIR")]
    crds_manifests_dir: Option<PathBuf>,

    /// Fixed replica count for component deployments
    #[arg(long, env = "MRO_REPLICAS")]
    replicas: Option<i32>,

    /// Seconds between readiness polls
    #[arg(long, env = "MRO_REQUEUE_AFTER")]
    requeue_after: Option<u64>,

    /// Upper bound in seconds on one reconcile (0 disables)
    #[arg(long, env = "MRO_RECONCILE_TIMEOUT")]
    reconcile_timeout: Option<u64>,

    /// Log filter, e.g. `debug` or `mro_kube=trace`; defaults to RUST_LOG, then `info`
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// File (or defaults) first, then every flag that was given
    fn resolve_config(&self) -> mro_kube::Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => OperatorConfig::load_from(path)?,
            None => OperatorConfig::default(),
        };

        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(version) = &self.operator_version {
            config.operator_version = version.clone();
        }
        if let Some(dir) = &self.crds_manifests_dir {
            config.crds_manifests_dir = dir.clone();
        }
        if let Some(replicas) = self.replicas {
            config.replicas = Some(replicas);
        }
        if let Some(seconds) = self.requeue_after {
            config.requeue_after_seconds = seconds;
        }
        if let Some(seconds) = self.reconcile_timeout {
            config.reconcile_timeout_seconds = seconds;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).into_diagnostic()?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
    .into_diagnostic()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format)?;

    let config = cli.resolve_config().into_diagnostic()?;
    info!(
        namespace = %config.namespace,
        version = %config.operator_version,
        manifests = %config.crds_manifests_dir.display(),
        "starting machine remediation operator"
    );

    let client = kube::Client::try_default().await.into_diagnostic()?;
    controller::run(client, config).await.into_diagnostic()?;

    info!("controller stopped");
    Ok(())
}
