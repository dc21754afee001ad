use clap::Parser;
use config_service::ServiceContext;
use config_service::store::MemoryStore;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::sync::Arc;

mod config;

use config::Config;

#[derive(Parser)]
enum CliCommand {
    /// Run the config service
    Server {
        #[arg(long, default_value = "herald.yaml")]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = CliCommand::parse();

    match &cli {
        CliCommand::Server { config } => {
            let config = match Config::from_file(config) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            };
            if let Some(metrics) = &config.metrics {
                init_metrics(metrics);
            }
            run_server(config);
        }
    }
}

fn init_metrics(config: &config::MetricsConfig) {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("herald"));
    match recorder {
        Ok(recorder) => {
            if let Err(err) = metrics::set_global_recorder(recorder) {
                tracing::warn!(%err, "metrics recorder already installed");
            }
        }
        Err(err) => tracing::warn!(%err, "failed to set up statsd metrics"),
    }
}

fn run_server(config: Config) {
    let store = Arc::new(MemoryStore::new());
    if let Some(seed) = &config.seed {
        for namespace in &seed.app_namespaces {
            store.add_app_namespace(&namespace.app_id, &namespace.name, namespace.public);
        }
        for release in &seed.releases {
            store.publish_release(
                &release.app_id,
                &release.cluster,
                &release.namespace,
                release.configurations.clone(),
            );
        }
    }
    let context = ServiceContext::with_memory_store(config.service, store);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("build tokio runtime");
    if let Err(err) = rt.block_on(config_service::run(context)) {
        tracing::error!(%err, "config service exited");
        std::process::exit(1);
    }
}
