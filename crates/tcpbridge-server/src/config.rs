//! Proxy configuration

use crate::error::ProxyError;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Per-direction buffer size of a bridge (8KB)
pub const MAX_CHUNK: usize = 8192;

/// Largest accepted per-direction buffer (16MB); each bridge allocates two
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Immutable proxy configuration
///
/// Both addresses are numeric IPv4 literals, parsed once here so that no
/// name resolution happens while bridges are being dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddrV4,
    pub upstream_addr: SocketAddrV4,
    pub buffer_size: usize,
    pub max_bridges: Option<usize>,
}

impl ProxyConfig {
    pub fn new(
        local_host: &str,
        local_port: u16,
        upstream_host: &str,
        upstream_port: u16,
    ) -> Result<Self, ProxyError> {
        let local_ip = parse_ipv4(local_host)?;
        let upstream_ip = parse_ipv4(upstream_host)?;

        Ok(Self::from_parts(
            local_ip,
            local_port,
            upstream_ip,
            upstream_port,
        ))
    }

    pub fn from_parts(
        local_ip: Ipv4Addr,
        local_port: u16,
        upstream_ip: Ipv4Addr,
        upstream_port: u16,
    ) -> Self {
        Self {
            bind_addr: SocketAddrV4::new(local_ip, local_port),
            upstream_addr: SocketAddrV4::new(upstream_ip, upstream_port),
            buffer_size: MAX_CHUNK,
            max_bridges: None,
        }
    }

    /// Override the per-direction buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Result<Self, ProxyError> {
        if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
            return Err(ProxyError::InvalidBufferSize(buffer_size));
        }
        self.buffer_size = buffer_size;
        Ok(self)
    }

    /// Cap the number of bridges alive at once
    pub fn with_max_bridges(mut self, max_bridges: usize) -> Self {
        self.max_bridges = Some(max_bridges.max(1));
        self
    }

    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.bind_addr)
    }

    pub fn upstream_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.upstream_addr)
    }
}

/// Parse a dotted-quad IPv4 literal
pub fn parse_ipv4(host: &str) -> Result<Ipv4Addr, ProxyError> {
    host.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ProxyError::InvalidAddress(host.to_string()))
}

/// Parse a decimal port in `1..=65535`
pub fn parse_port(port: &str) -> Result<u16, ProxyError> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ProxyError::InvalidPort(port.to_string())),
        Ok(p) => Ok(p),
    }
}
