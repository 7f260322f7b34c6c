//! Cluster health checks: runs a declared list of HTTP(S), WebSocket and plugin checks and
//! reports a pass/fail outcome for each.

pub mod checker;
pub mod checks;
pub mod config;
pub mod report;
pub mod resolver;
pub mod transport;

pub use checker::Checker;
pub use config::{CheckDescriptor, Config, PluginDescriptor};
pub use report::{Report, Summary};
