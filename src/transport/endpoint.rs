use anyhow::{anyhow, bail, Context, Result};
use std::net::SocketAddr;
use url::Url;

/// Parsed game-server endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsEndpoint {
    pub url: Url,
    pub host: String,
    pub port: u16,
}

impl WsEndpoint {
    /// Resolve the endpoint to socket addresses.
    pub fn socket_addrs(&self) -> Result<Vec<SocketAddr>> {
        let addrs = self
            .url
            .socket_addrs(|| Some(self.port))
            .with_context(|| format!("resolve {}", self.url))?;
        if addrs.is_empty() {
            bail!("{} did not resolve to any address", self.url);
        }
        Ok(addrs)
    }
}

impl std::fmt::Display for WsEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Parse `ws://host:port/path`, or a bare `host:port` (ws assumed).
///
/// `wss://` is rejected: TLS is expected to be terminated in front of the
/// game server.
pub fn parse_ws_endpoint(addr: &str) -> Result<WsEndpoint> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        bail!("game server address is empty");
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{}", trimmed)
    };

    let url = Url::parse(&with_scheme)
        .with_context(|| format!("invalid game server address: {}", addr))?;
    match url.scheme() {
        "ws" => {}
        "wss" => bail!("wss:// endpoints are not supported: {}", addr),
        other => bail!("unsupported game server scheme: {}", other),
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("missing host in {}", addr))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port in {}", addr))?;

    Ok(WsEndpoint { url, host, port })
}
