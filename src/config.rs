//! Configuration for a [`Container`](crate::container::Container).
//!
//! Unlike many small servers there is no global singleton and no config
//! file here: the engine takes a [`ServerConfig`] directly so tests can
//! construct a container with whatever host, port and timeout they need
//! without touching process-wide state.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Tunables for a [`Container`](crate::container::Container) and the
/// per-connection [`crate::engine`] tasks it spawns.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,

    /// Size of the read buffer passed to the socket on each poll.
    pub read_buffer_size: usize,

    /// Idle timeout: how long a connection may go without receiving any
    /// bytes before its worker is cancelled and the connection is closed.
    pub timeout: Duration,

    /// Upper bound on a single request line, in bytes.
    pub max_request_line_size: usize,
    /// Upper bound on the total bytes spent on headers for one message.
    pub max_header_size: usize,
    /// Upper bound on a request body, in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8888,
            read_buffer_size: 4096,
            timeout: Duration::from_secs(5),
            max_request_line_size: 8 + 1 + 1024 + 1 + 10,
            max_header_size: 8192,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
