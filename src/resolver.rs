//! Client-side name resolution override.
//!
//! A [`ResolverOverride`] substitutes the host that gets resolved, never the host that gets
//! requested: HTTP `Host` headers, WebSocket handshakes and TLS SNI all keep the original
//! name, only the address lookup is redirected. The override is built once before any check
//! runs and shared read-only afterwards. It only affects clients that were handed this
//! resolver, so unrelated network use in the same process resolves normally.
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};

use log::{debug, info};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

#[derive(Debug, Clone, Default)]
pub struct ResolverOverride {
    map: HashMap<String, String>,
}

impl ResolverOverride {
    /// Builds the override from `from -> to` host pairs. Keys are normalised here, once.
    pub fn install<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let map: HashMap<String, String> = entries
            .into_iter()
            .map(|(from, to)| {
                debug!("Resolving {} as {}", from, to);
                (normalize(from), to.clone())
            })
            .collect();
        if !map.is_empty() {
            info!("Installed DNS override for {} host(s)", map.len());
        }
        ResolverOverride { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the host that should actually be resolved for `host`.
    pub fn target<'a>(&'a self, host: &'a str) -> &'a str {
        self.map
            .get(&normalize(host))
            .map(String::as_str)
            .unwrap_or(host)
    }

    /// Resolves `host` to socket addresses, honouring the override. IP literals, including
    /// bracketed IPv6 hosts as found in URLs, are used as they are.
    pub async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let target = self.target(host);
        if target != host {
            debug!("Looking up {} in place of {}", target, host);
        }
        if let Some(ip) = ip_literal(target) {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target, port)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", host),
            ));
        }
        Ok(addrs)
    }
}

impl Resolve for ResolverOverride {
    fn resolve(&self, name: Name) -> Resolving {
        let target = self.target(name.as_str()).to_string();
        Box::pin(async move {
            // reqwest replaces the port with the one from the request URL.
            let addrs: Vec<SocketAddr> = match ip_literal(&target) {
                Some(ip) => vec![SocketAddr::new(ip, 0)],
                None => tokio::net::lookup_host((target.as_str(), 0)).await?.collect(),
            };
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Parses `host` as an IP address, accepting the `[..]` form URLs use for IPv6.
fn ip_literal(host: &str) -> Option<IpAddr> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse().ok()
}

/// Lower-cases the host and strips one trailing dot.
fn normalize(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}
