mod command_check;
mod file_check;
mod tcp_check;

pub mod http;
pub mod loader;
pub mod registry;
pub mod websocket;

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Args;
use crate::transport::seconds;

pub use command_check::CommandCheck;
pub use file_check::FileCheck;
pub use tcp_check::TcpCheck;

/// A named check implementation, registered by a plugin module and selected by name.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    /// Runs the check against `url`. `Err` carries the reason the check failed.
    async fn check(&self, url: &str, args: &Args) -> Result<(), String>;
}

/// Reads `args.timeout` in seconds, falling back to `default`.
pub fn arg_timeout(args: &Args, default: Duration) -> Duration {
    seconds(args.get("timeout").and_then(serde_json::Value::as_f64)).unwrap_or(default)
}

/// Formats an error together with its chain of sources.
pub fn describe(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arg_timeout() {
        let default = Duration::from_secs(10);
        let mut args = Args::new();
        assert_eq!(arg_timeout(&args, default), default);
        args.insert("timeout".to_string(), json!(2));
        assert_eq!(arg_timeout(&args, default), Duration::from_secs(2));
        args.insert("timeout".to_string(), json!("soon"));
        assert_eq!(arg_timeout(&args, default), default);
    }

    #[test]
    fn test_describe_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = crate::transport::TransportError::Io(inner);
        assert_eq!(describe(&outer), "Connection error: refused");
    }
}
