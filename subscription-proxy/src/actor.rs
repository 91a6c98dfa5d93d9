//! Single-writer actor around a `subscription_core::Registry`.
//!
//! The registry itself is single-threaded cooperative by design: it
//! holds no locks and must never be shared behind a `Mutex`. This actor is
//! the idiomatic way to give several async tasks (the UDP listener, the
//! demo dispatch loop) a client to the one task that actually owns it.

use std::time::{Duration, Instant};

use subscription_core::{AnnounceError, AnnounceRequest, LookupMode, NodeId, Registry, Selection};
use subscription_metrics::RegistryMetrics;
use tokio::sync::{mpsc, oneshot};

pub enum Command {
    Announce {
        req: AnnounceRequest,
        reply: oneshot::Sender<Result<NodeId, AnnounceError>>,
    },
    Select {
        key: Vec<u8>,
        mode: LookupMode,
        reply: oneshot::Sender<Option<Selection>>,
    },
    Release {
        node: NodeId,
    },
    Remove {
        key: Vec<u8>,
        name: Vec<u8>,
        mode: LookupMode,
        reply: oneshot::Sender<bool>,
    },
    LookupByName {
        key: Vec<u8>,
        name: Vec<u8>,
        mode: LookupMode,
        reply: oneshot::Sender<Option<NodeId>>,
    },
}

/// A cheap-to-clone client for the registry actor task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    pub async fn announce(&self, req: AnnounceRequest) -> Result<NodeId, AnnounceError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Announce { req, reply }).await;
        rx.await.unwrap_or(Err(AnnounceError::RegexpDisabled))
    }

    pub async fn select(&self, key: Vec<u8>, mode: LookupMode) -> Option<Selection> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Select { key, mode, reply }).await;
        rx.await.ok().flatten()
    }

    pub async fn release(&self, node: NodeId) {
        let _ = self.tx.send(Command::Release { node }).await;
    }

    pub async fn remove(&self, key: Vec<u8>, name: Vec<u8>, mode: LookupMode) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::Remove { key, name, mode, reply })
            .await;
        rx.await.unwrap_or(false)
    }

    pub async fn lookup_by_name(&self, key: Vec<u8>, name: Vec<u8>, mode: LookupMode) -> Option<NodeId> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::LookupByName { key, name, mode, reply })
            .await;
        rx.await.ok().flatten()
    }
}

/// Spawns the actor task and returns a handle to it.
pub fn spawn(registry: Registry, metrics: RegistryMetrics) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(run(registry, metrics, rx));
    RegistryHandle { tx }
}

async fn run(mut registry: Registry, metrics: RegistryMetrics, mut rx: mpsc::Receiver<Command>) {
    let mut gauge_tick = tokio::time::interval(Duration::from_secs(5));
    let mut last_evictions = registry.evictions_total();
    let mut last_promotions = registry.promotions_total();
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("registry actor shutting down: all handles dropped");
                    return;
                };
                handle(&mut registry, &metrics, cmd);
                observe_deltas(&registry, &metrics, &mut last_evictions, &mut last_promotions);
            }
            _ = gauge_tick.tick() => {
                metrics.observe_sizes(registry.pool_count(), registry.node_count());
            }
        }
    }
}

/// The registry only tracks eviction/promotion counts cumulatively; this
/// diffs against the last-seen totals so the metric counters only ever
/// move forward by the amount that actually happened since the last call.
fn observe_deltas(
    registry: &Registry,
    metrics: &RegistryMetrics,
    last_evictions: &mut u64,
    last_promotions: &mut u64,
) {
    let evictions = registry.evictions_total();
    let promotions = registry.promotions_total();
    metrics.evictions_total.inc_by(evictions - *last_evictions);
    metrics.promotions_total.inc_by(promotions - *last_promotions);
    *last_evictions = evictions;
    *last_promotions = promotions;
}

fn handle(registry: &mut Registry, metrics: &RegistryMetrics, cmd: Command) {
    let now = Instant::now();
    match cmd {
        Command::Announce { req, reply } => {
            let result = registry.announce(req, now);
            if result.is_ok() {
                metrics.announces_total.inc();
            } else {
                metrics.announce_errors_total.inc();
            }
            let _ = reply.send(result);
        }
        Command::Select { key, mode, reply } => {
            let selection = registry.select(&key, mode, now);
            if selection.is_some() {
                metrics.selects_total.inc();
            } else {
                metrics.selects_miss_total.inc();
            }
            let _ = reply.send(selection);
        }
        Command::Release { node } => {
            registry.release(node);
        }
        Command::Remove { key, name, mode, reply } => {
            let removed = registry.remove(&key, &name, mode);
            if removed {
                metrics.removals_total.inc();
            }
            let _ = reply.send(removed);
        }
        Command::LookupByName { key, name, mode, reply } => {
            let _ = reply.send(registry.lookup_by_name(&key, &name, mode));
        }
    }
}
