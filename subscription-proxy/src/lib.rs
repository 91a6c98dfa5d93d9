pub mod actor;
pub mod config;
pub mod metrics_log;
pub mod udp;
