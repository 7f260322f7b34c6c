use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::checks::{arg_timeout, Plugin};
use crate::config::Args;
use crate::resolver::ResolverOverride;

/// Passes when a TCP connection to the URL's host and port can be opened.
pub struct TcpCheck {
    resolver: Arc<ResolverOverride>,
    timeout: Duration,
}

impl TcpCheck {
    pub fn new(resolver: Arc<ResolverOverride>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }
}

#[async_trait]
impl Plugin for TcpCheck {
    fn name(&self) -> &str {
        "TcpCheck"
    }

    async fn check(&self, url: &str, args: &Args) -> Result<(), String> {
        let parsed = Url::parse(url).map_err(|e| format!("Invalid URL {}: {}", url, e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| format!("URL {} has no host", url))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| format!("URL {} has no port", url))?;
        let limit = arg_timeout(args, self.timeout);

        let connect = async {
            let addrs = self.resolver.lookup(host, port).await?;
            debug!("Connecting to {}:{} via {:?}", host, port, addrs);
            TcpStream::connect(&addrs[..]).await
        };
        match timeout(limit, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("Failed to connect to {}:{}: {}", host, port, e)),
            Err(_) => Err(format!("Connecting to {}:{} timed out after {:?}", host, port, limit)),
        }
    }
}
