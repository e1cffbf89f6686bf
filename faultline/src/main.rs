use clap::Parser;
use metrics_exporter_statsd::StatsdBuilder;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
enum CliCommand {
    /// Runs the ingestion service
    Run {
        /// Path to the YAML config file
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run { config } => {
            let config = config::Config::from_file(&config)?;
            init_tracing(&config.logging);
            if let Some(metrics_config) = &config.metrics {
                init_metrics(metrics_config)?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(ingest::run(config.ingest))?;
        }
    }

    Ok(())
}

/// RUST_LOG wins over the configured level so a filter can be changed
/// without touching the config file.
fn init_tracing(config: &config::LoggingConfig) {
    let fallback = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn init_metrics(config: &config::MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(&config.prefix))?;
    metrics::set_global_recorder(recorder)?;
    shared::metrics_defs::describe_all(ingest::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "metrics reporting to statsd"
    );
    Ok(())
}
