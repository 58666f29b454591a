//! Free-port allocation for preview servers.
//!
//! The allocator scans a configured range and probes each candidate with a
//! short-timeout TCP connect: a successful connect means something is
//! already listening. The caller supplies the set of ports currently
//! recorded on workspace rows (derived from a query, never cached), which
//! covers servers that are assigned but momentarily not accepting
//! connections. A scan alone is not a claim — the supervisor claims the
//! port by persisting it on the workspace row right after a successful
//! health check.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::config::PreviewConfig;
use crate::{AppError, Result};

/// Scans the configured port range for a free candidate.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
    probe_timeout: Duration,
}

impl PortAllocator {
    /// Build an allocator over the configured range.
    #[must_use]
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            range_start: config.port_range_start,
            range_end: config.port_range_end,
            probe_timeout: Duration::from_millis(config.port_probe_timeout_ms),
        }
    }

    /// Return the first port in the range that is neither in `in_use` nor
    /// currently accepting connections.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceExhausted` when every candidate is taken.
    pub async fn allocate(&self, in_use: &HashSet<u16>) -> Result<u16> {
        for port in self.range_start..=self.range_end {
            if in_use.contains(&port) {
                continue;
            }
            if self.is_port_free(port).await {
                debug!(port, "allocated free preview port");
                return Ok(port);
            }
        }
        Err(AppError::ResourceExhausted(format!(
            "no free port in range {}..={}",
            self.range_start, self.range_end
        )))
    }

    /// A port is free when nothing accepts a connection on it within the
    /// probe timeout.
    async fn is_port_free(&self, port: u16) -> bool {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        match tokio::time::timeout(self.probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => false,
            Ok(Err(_)) | Err(_) => true,
        }
    }
}
