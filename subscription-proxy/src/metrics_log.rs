//! Periodic text-encoded dump of the metrics registry.
//!
//! There's no HTTP exposition endpoint in this demo daemon, so the
//! Prometheus text format is logged instead, on the same cadence a real
//! scrape would use. A real deployment would swap this for a `/metrics`
//! route; the encoding and the counters behind it are identical either way.

use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry as MetricsRegistry;

/// Spawns a task that logs the current metrics snapshot every `period`.
pub fn spawn_periodic_dump(registry: MetricsRegistry, period: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let mut buf = String::new();
            match encode(&mut buf, &registry) {
                Ok(()) => tracing::info!(metrics = %buf, "metrics snapshot"),
                Err(error) => tracing::warn!(%error, "failed to encode metrics snapshot"),
            }
        }
    });
}
