//! Transport discovery
//!
//! `GET /WS_PORT` tells the client how to reach the server:
//! - a port number: open a WebSocket on that port of the same host
//! - `http`: no socket available, use the HTTP emulation
//! - `codespaces-compat:<from>:<to>`: WebSocket through a forwarded host
//!   whose name has `-<from>.` rewritten to `-<to>.`

use std::str::FromStr;
use std::sync::Arc;

use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, SyncError};

use super::http::HttpTransport;
use super::transport::{RpcCore, RpcTransport};
use super::websocket::WebSocketTransport;

/// Parsed body of the `/WS_PORT` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsPortAnswer {
    Port(u16),
    Http,
    CodespacesCompat { from: u16, to: u16 },
}

impl FromStr for WsPortAnswer {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "http" {
            return Ok(Self::Http);
        }
        if let Some(rest) = s.strip_prefix("codespaces-compat:") {
            let (from, to) = rest
                .split_once(':')
                .ok_or_else(|| discovery_error(format!("malformed answer '{}'", s)))?;
            return Ok(Self::CodespacesCompat {
                from: parse_port(from)?,
                to: parse_port(to)?,
            });
        }
        Ok(Self::Port(parse_port(s)?))
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.trim()
        .parse()
        .map_err(|_| discovery_error(format!("'{}' is not a port", s)))
}

fn discovery_error(message: String) -> SyncError {
    SyncError::Discovery { message }
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportChoice {
    WebSocket { url: Url },
    Http { base: Url },
}

impl TransportChoice {
    /// Turn a discovery answer into a concrete endpoint relative to `base`
    pub fn resolve(base: &Url, answer: &WsPortAnswer) -> Result<Self> {
        match answer {
            WsPortAnswer::Http => Ok(Self::Http { base: base.clone() }),
            WsPortAnswer::Port(port) => {
                let mut url = socket_url(base)?;
                url.set_port(Some(*port))
                    .map_err(|_| discovery_error(format!("cannot set port on {}", base)))?;
                Ok(Self::WebSocket { url })
            }
            WsPortAnswer::CodespacesCompat { from, to } => {
                let mut url = socket_url(base)?;
                let host = base
                    .host_str()
                    .ok_or_else(|| discovery_error(format!("{} has no host", base)))?;
                let rewritten = host.replacen(&format!("-{}.", from), &format!("-{}.", to), 1);
                url.set_host(Some(&rewritten))
                    .map_err(|e| discovery_error(format!("invalid host {}: {}", rewritten, e)))?;
                Ok(Self::WebSocket { url })
            }
        }
    }
}

/// `ws://` for `http://`, `wss://` for `https://`, path reset to root
fn socket_url(base: &Url) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(discovery_error(format!("unsupported scheme '{}'", other))),
    };
    let host = base
        .host_str()
        .ok_or_else(|| discovery_error(format!("{} has no host", base)))?;
    let mut url = Url::parse(&format!("{}://{}/", scheme, host))
        .map_err(|e| discovery_error(e.to_string()))?;
    url.set_port(base.port())
        .map_err(|_| discovery_error(format!("cannot set port on {}", base)))?;
    Ok(url)
}

/// Ask the server which transport to use
pub async fn discover(client: &reqwest::Client, base: &Url) -> Result<TransportChoice> {
    let endpoint = base
        .join("WS_PORT")
        .map_err(|e| discovery_error(format!("invalid base url {}: {}", base, e)))?;
    tracing::debug!("Discovering transport via {}", endpoint);

    let response = client.get(endpoint.clone()).send().await?;
    if !response.status().is_success() {
        return Err(discovery_error(format!(
            "{} returned {}",
            endpoint,
            response.status()
        )));
    }
    let answer: WsPortAnswer = response.text().await?.parse()?;
    let choice = TransportChoice::resolve(base, &answer)?;
    tracing::info!("Discovery answered {:?}, using {:?}", answer, choice);
    Ok(choice)
}

/// Open the transport `choice` describes, routing into `core`
pub async fn open(
    choice: &TransportChoice,
    config: &ClientConfig,
    core: Arc<RpcCore>,
) -> Result<Arc<dyn RpcTransport>> {
    match choice {
        TransportChoice::WebSocket { url } => {
            let transport = WebSocketTransport::connect(url.as_str(), core).await?;
            Ok(Arc::new(transport))
        }
        TransportChoice::Http { base } => {
            let transport = HttpTransport::connect(base, core, config.http_options()).await?;
            Ok(Arc::new(transport))
        }
    }
}

/// Discover and open a transport for the configured server
pub async fn connect(config: &ClientConfig, core: Arc<RpcCore>) -> Result<Arc<dyn RpcTransport>> {
    let base = Url::parse(&config.server.url)
        .map_err(|e| discovery_error(format!("invalid server url {}: {}", config.server.url, e)))?;
    let client = reqwest::Client::new();
    let choice = discover(&client, &base).await?;
    open(&choice, config, core).await
}
