use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Announcement listener and registry knobs.
#[derive(Debug, Parser)]
#[command(name = "subscription-proxy", about = "Subscription registry demo daemon")]
pub struct Cli {
    /// Address to listen for subscription announcement datagrams on.
    #[arg(long, default_value = "127.0.0.1:7410")]
    pub bind: SocketAddr,

    /// Seconds of silence after which a node is death-marked.
    #[arg(long, default_value_t = 30)]
    pub tolerance_secs: u64,

    /// Whether pattern-mode (regexp) announcements and lookups are permitted.
    #[arg(long, default_value_t = true)]
    pub regexp_enabled: bool,
}

impl Cli {
    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_secs)
    }

    pub fn registry_config(&self) -> subscription_core::Config {
        subscription_core::Config {
            tolerance: self.tolerance(),
            regexp_enabled: self.regexp_enabled,
        }
    }
}
