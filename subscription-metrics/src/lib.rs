//! Prometheus metric families for a running subscription registry.
//!
//! Mirrors the family-registered-once-then-cloned-out pattern used
//! elsewhere for balancer pools: one [`RegistryMetrics`] is registered
//! against a [`Registry`] at startup, then its handles are cheap to clone
//! into whichever task observes the `subscription_core::Registry`.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct RegistryMetrics {
    /// Current number of live pools.
    pub pools: Gauge,
    /// Current number of live nodes across all pools.
    pub nodes: Gauge,
    /// Total announcements accepted.
    pub announces_total: Counter,
    /// Total announcements rejected (oversize key/name, bad pattern).
    pub announce_errors_total: Counter,
    /// Total `select` calls that returned a node.
    pub selects_total: Counter,
    /// Total `select` calls that found no live node.
    pub selects_miss_total: Counter,
    /// Total explicit or swept node removals.
    pub removals_total: Counter,
    /// Total nodes freed by the lazy sweep for being stale and unreferenced.
    pub evictions_total: Counter,
    /// Total auto-promotion swaps performed by the registry's lookup.
    pub promotions_total: Counter,
}

impl RegistryMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "subscription_pools",
            "Number of live subscription pools",
            metrics.pools.clone(),
        );
        registry.register(
            "subscription_nodes",
            "Number of live subscription nodes across all pools",
            metrics.nodes.clone(),
        );
        registry.register(
            "subscription_announces",
            "Total announcements accepted",
            metrics.announces_total.clone(),
        );
        registry.register(
            "subscription_announce_errors",
            "Total announcements rejected",
            metrics.announce_errors_total.clone(),
        );
        registry.register(
            "subscription_selects",
            "Total select() calls that returned a node",
            metrics.selects_total.clone(),
        );
        registry.register(
            "subscription_selects_miss",
            "Total select() calls that found no live node",
            metrics.selects_miss_total.clone(),
        );
        registry.register(
            "subscription_removals",
            "Total node removals, explicit or swept",
            metrics.removals_total.clone(),
        );
        registry.register(
            "subscription_evictions",
            "Total nodes freed by the lazy sweep for being stale and unreferenced",
            metrics.evictions_total.clone(),
        );
        registry.register(
            "subscription_promotions",
            "Total auto-promotion swaps performed by the registry's lookup",
            metrics.promotions_total.clone(),
        );
        metrics
    }

    /// Refreshes the pool/node gauges from the registry's current size.
    pub fn observe_sizes(&self, pools: usize, nodes: usize) {
        self.pools.set(pools as i64);
        self.nodes.set(nodes as i64);
    }
}
