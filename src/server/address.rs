//! Listen address and advertised hostname resolution.
//!
//! - `auto` binds the LAN address of the outbound interface.
//! - `any` binds all interfaces and advertises the external IP unless an FQDN is set.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

pub const ANY_INTERFACE: &str = "any";
pub const AUTO_INTERFACE: &str = "auto";

/// Resolve an interface selector to the address it should bind.
pub fn interface_address(interface: &str) -> Result<IpAddr> {
    match interface {
        ANY_INTERFACE => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        AUTO_INTERFACE => get_local_ip(),
        name => {
            if let Ok(ip) = name.parse::<IpAddr>() {
                return Ok(ip);
            }
            let interfaces =
                if_addrs::get_if_addrs().context("Failed to list network interfaces")?;
            let mut addresses: Vec<IpAddr> = interfaces
                .into_iter()
                .filter(|iface| iface.name == name)
                .map(|iface| iface.ip())
                .collect();
            // IPv4 first
            addresses.sort_by_key(|ip| ip.is_ipv6());
            addresses
                .first()
                .copied()
                .with_context(|| format!("Network interface '{name}' not found or has no address"))
        }
    }
}

/// An explicit bind address takes precedence over the interface.
pub fn bind_address(interface: &str, bind: Option<IpAddr>) -> Result<IpAddr> {
    match bind {
        Some(ip) => Ok(ip),
        None => interface_address(interface),
    }
}

/// Bind the listening socket. Port 0 picks an ephemeral port.
pub fn listen(ip: IpAddr, port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(ip, port);
    let listener = TcpListener::bind(addr).with_context(|| {
        format!(
            "Failed to bind to {addr}.\n\n\
             Is another qrdrop instance running?\n\
             Or is another service using this port?"
        )
    })?;

    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking mode")?;

    Ok(listener)
}

/// One address of a named network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub ip: IpAddr,
}

impl fmt::Display for InterfaceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.ip)
    }
}

/// Interface addresses sorted by name, IPv4 before IPv6. Loopback only on request.
pub fn list_interfaces(include_loopback: bool) -> Result<Vec<InterfaceAddr>> {
    let mut addrs: Vec<InterfaceAddr> = if_addrs::get_if_addrs()
        .context("Failed to list network interfaces")?
        .into_iter()
        .filter(|iface| include_loopback || !iface.is_loopback())
        .map(|iface| InterfaceAddr {
            ip: iface.ip(),
            name: iface.name,
        })
        .collect();
    addrs.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.ip.is_ipv6().cmp(&b.ip.is_ipv6()))
    });
    Ok(addrs)
}

/// First non-loopback IPv4 address, skipping link-local ones.
fn first_lan_ipv4(addrs: &[InterfaceAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .map(|addr| addr.ip)
        .find(|ip| match ip {
            IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
            IpAddr::V6(_) => false,
        })
}

/// Address the OS would route outbound traffic from. No packet is sent.
fn outbound_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind socket for IP detection")?;

    socket
        .connect("8.8.8.8:80")
        .context("Failed to connect socket for IP detection")?;

    let local_addr = socket.local_addr().context("Failed to get local address")?;

    Ok(local_addr.ip())
}

/// Best-effort local non-loopback IP discovery.
///
/// Uses the outbound route when there is one, otherwise the first LAN IPv4
/// interface (hotspots and offline networks have no default route).
pub fn get_local_ip() -> Result<IpAddr> {
    match outbound_ip() {
        Ok(ip) if !ip.is_unspecified() => Ok(ip),
        route => {
            if let Err(err) = &route {
                tracing::debug!("No outbound route ({err:#}), scanning interfaces");
            }
            let addrs = list_interfaces(false)?;
            first_lan_ipv4(&addrs).context(
                "No usable network address found. Pass --interface or --bind \
                 (see --list-interfaces)",
            )
        }
    }
}

/// Source of the host's public address, used when bound to the wildcard.
#[async_trait]
pub trait ExternalIpLookup: Send + Sync {
    async fn external_ip(&self) -> Result<IpAddr>;
}

/// Queries a plain-text IP echo endpoint.
pub struct HttpIpLookup {
    url: String,
    client: reqwest::Client,
}

impl HttpIpLookup {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ExternalIpLookup for HttpIpLookup {
    async fn external_ip(&self) -> Result<IpAddr> {
        tracing::info!(url = %self.url, "Retrieving the external IP...");
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("External IP lookup against {} failed", self.url))?
            .text()
            .await
            .context("Failed to read external IP response")?;

        body.trim()
            .parse()
            .with_context(|| format!("External IP service returned '{}'", body.trim()))
    }
}

/// Fixed answer, for hosts whose public address is already known.
pub struct StaticIp(pub IpAddr);

#[async_trait]
impl ExternalIpLookup for StaticIp {
    async fn external_ip(&self) -> Result<IpAddr> {
        Ok(self.0)
    }
}

/// Hostname shown to the user: FQDN, else external IP for wildcard binds, else the bind IP.
pub async fn advertised_host(
    bind: IpAddr,
    fqdn: Option<&str>,
    lookup: &dyn ExternalIpLookup,
) -> Result<String> {
    if let Some(fqdn) = fqdn.map(str::trim).filter(|f| !f.is_empty()) {
        return Ok(fqdn.to_string());
    }
    if bind.is_unspecified() {
        let ip = lookup.external_ip().await?;
        return Ok(ip.to_string());
    }
    Ok(bind.to_string())
}
