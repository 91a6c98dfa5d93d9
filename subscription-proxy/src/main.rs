use std::time::Duration;

use clap::Parser;
use prometheus_client::registry::Registry as MetricsRegistry;
use subscription_core::Registry;
use subscription_metrics::RegistryMetrics;
use subscription_proxy::{actor, config::Cli, metrics_log, udp};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!(bind = %cli.bind, tolerance_secs = cli.tolerance_secs, regexp_enabled = cli.regexp_enabled, "starting subscription-proxy");

    let mut metrics_registry = MetricsRegistry::default();
    let metrics = RegistryMetrics::register(&mut metrics_registry);
    metrics_log::spawn_periodic_dump(metrics_registry, Duration::from_secs(30));

    let registry = Registry::new(cli.registry_config());
    let handle = actor::spawn(registry, metrics);

    udp::listen(cli.bind, handle).await
}
