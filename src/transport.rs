//! The low-level network client the protocol handlers talk to.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::debug;
use reqwest::{redirect, Client, Method};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::Args;
use crate::resolver::ResolverOverride;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid URL {0}: {1}")]
    InvalidUrl(String, String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// The response fields the handlers evaluate.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// An HTTP request built from a check's `args`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub params: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub verify: bool,
    pub timeout: Duration,
    pub allow_redirects: bool,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Default, Deserialize)]
struct HttpArgs {
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    params: BTreeMap<String, serde_json::Value>,
    data: Option<String>,
    json: Option<serde_json::Value>,
    verify: Option<bool>,
    timeout: Option<f64>,
    allow_redirects: Option<bool>,
}

const HTTP_ARGS: &[&str] = &[
    "method",
    "headers",
    "params",
    "data",
    "json",
    "verify",
    "timeout",
    "allow_redirects",
];

impl HttpRequest {
    /// Builds a request from pass-through `args`. `default_timeout` applies when `args` has none.
    pub fn from_args(args: &Args, default_timeout: Duration) -> Result<Self, TransportError> {
        for key in args.keys().filter(|k| !HTTP_ARGS.contains(&k.as_str())) {
            debug!("Ignoring unknown HTTP argument {:?}", key);
        }
        let parsed: HttpArgs = serde_json::from_value(serde_json::Value::Object(args.clone()))
            .map_err(|e| TransportError::InvalidArgs(e.to_string()))?;

        let method = parsed.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::InvalidArgs(format!("unknown method {:?}", method)))?;
        let body = match (parsed.json, parsed.data) {
            (Some(json), _) => Some(RequestBody::Json(json)),
            (None, Some(data)) => Some(RequestBody::Text(data)),
            (None, None) => None,
        };
        let params = parsed
            .params
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();

        Ok(HttpRequest {
            method,
            headers: parsed.headers,
            params,
            body,
            verify: parsed.verify.unwrap_or(true),
            timeout: seconds(parsed.timeout).unwrap_or(default_timeout),
            allow_redirects: parsed.allow_redirects.unwrap_or(true),
        })
    }
}

/// WebSocket handshake options built from a check's `args`.
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    pub headers: BTreeMap<String, String>,
    pub verify: bool,
    pub timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct WebSocketArgs {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    verify: Option<bool>,
    timeout: Option<f64>,
}

impl WebSocketOptions {
    pub fn from_args(args: &Args, default_timeout: Duration) -> Result<Self, TransportError> {
        let parsed: WebSocketArgs = serde_json::from_value(serde_json::Value::Object(args.clone()))
            .map_err(|e| TransportError::InvalidArgs(e.to_string()))?;
        Ok(WebSocketOptions {
            headers: parsed.headers,
            verify: parsed.verify.unwrap_or(true),
            timeout: seconds(parsed.timeout).unwrap_or(default_timeout),
        })
    }
}

/// Converts a positive number of seconds into a duration.
pub fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
}

/// An open WebSocket connection.
#[async_trait]
pub trait WebSocketConnection: Send {
    /// Sends a protocol-level ping and waits briefly for the peer's answer.
    async fn ping(&mut self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    async fn close(&mut self);
}

/// The capabilities the protocol handlers need from a network client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue_http(
        &self,
        url: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TransportError>;

    async fn open_websocket(
        &self,
        url: &str,
        options: &WebSocketOptions,
    ) -> Result<Box<dyn WebSocketConnection>, TransportError>;
}

/// The default transport: reqwest for HTTP(S), tokio-tungstenite for WebSockets. All host
/// lookups go through the shared [`ResolverOverride`].
#[derive(Debug, Clone)]
pub struct NetClient {
    resolver: Arc<ResolverOverride>,
}

impl NetClient {
    pub fn new(resolver: Arc<ResolverOverride>) -> Self {
        NetClient { resolver }
    }
}

#[async_trait]
impl Transport for NetClient {
    async fn issue_http(
        &self,
        url: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        debug!("{} {}", request.method, url);
        let client = Client::builder()
            .timeout(request.timeout)
            .connect_timeout(request.timeout)
            .danger_accept_invalid_certs(!request.verify)
            .redirect(if request.allow_redirects {
                redirect::Policy::default()
            } else {
                redirect::Policy::none()
            })
            .dns_resolver(self.resolver.clone())
            .build()?;

        let mut builder = client.request(request.method.clone(), url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Some(RequestBody::Json(json)) => builder.json(json),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("{} {} returned {}", request.method, url, status);
        Ok(HttpResponse { status, body })
    }

    async fn open_websocket(
        &self,
        url: &str,
        options: &WebSocketOptions,
    ) -> Result<Box<dyn WebSocketConnection>, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl(url.to_string(), reason.to_string());
        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        let addrs = within(options.timeout, self.resolver.lookup(host, port)).await?;
        debug!("Connecting to {} via {:?}", url, addrs);
        let stream = within(options.timeout, TcpStream::connect(&addrs[..])).await?;

        let mut request = url.into_client_request()?;
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidArgs(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| TransportError::InvalidArgs(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let connector = if options.verify {
            None
        } else {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            Some(Connector::NativeTls(tls))
        };

        let (stream, response) = within(
            options.timeout,
            client_async_tls_with_config(request, stream, None, connector),
        )
        .await?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        Ok(Box::new(TungsteniteConnection {
            stream,
            timeout: options.timeout,
            connected: true,
        }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
    connected: bool,
}

#[async_trait]
impl WebSocketConnection for TungsteniteConnection {
    async fn ping(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.stream.send(Message::Ping(Default::default())).await {
            self.connected = false;
            return Err(e.into());
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match timeout_at(deadline, self.stream.next()).await {
                Ok(Some(Ok(Message::Pong(_)))) => return Ok(()),
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    self.connected = false;
                    return Ok(());
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    self.connected = false;
                    return Err(e.into());
                }
                // The connection is still open, the peer just did not answer the ping.
                Err(_) => {
                    debug!("No pong received within {:?}", self.timeout);
                    return Ok(());
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        if self.connected {
            if let Err(e) = self.stream.close(None).await {
                debug!("Error closing WebSocket: {}", e);
            }
            self.connected = false;
        }
    }
}

/// Awaits `future`, failing with [`TransportError::Timeout`] once `duration` has elapsed.
async fn within<F, T, E>(duration: Duration, future: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: Into<TransportError>,
{
    match timeout(duration, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(TransportError::Timeout(duration)),
    }
}
