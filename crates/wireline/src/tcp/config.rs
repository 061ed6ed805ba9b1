//! Configuration for TCP channels, listeners, and servers.

use std::time::Duration;

use crate::address::Address;
use crate::socket::KeepAliveConfig;

/// Options for a [`TcpChannel`](super::TcpChannel).
#[derive(Clone, Debug)]
pub struct TcpChannelConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Keep-alive probe schedule. `None` disables keep-alive.
    pub keep_alive: Option<KeepAliveConfig>,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Connect timeout. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Send timeout applied to the raw socket. `None` means no timeout.
    pub send_timeout: Option<Duration>,
    /// Receive timeout applied to the raw socket. `None` means no timeout.
    pub receive_timeout: Option<Duration>,
    /// Pause between an unsolicited disconnect and the reconnect attempt.
    pub reconnection_delay: Duration,
}

impl Default for TcpChannelConfig {
    fn default() -> Self {
        Self {
            no_delay: false,
            keep_alive: None,
            read_buffer_size: 8192,
            connect_timeout: Some(Duration::from_secs(30)),
            send_timeout: None,
            receive_timeout: None,
            reconnection_delay: Duration::from_secs(5),
        }
    }
}

impl TcpChannelConfig {
    /// Create a channel configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Enable keep-alive with the given probe schedule.
    pub fn keep_alive(mut self, config: KeepAliveConfig) -> Self {
        self.keep_alive = Some(config);
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for connects.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }

    /// Set the pause before an automatic reconnect.
    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }
}

/// Configuration for a [`TcpListener`](super::TcpListener).
#[derive(Clone, Debug)]
pub struct TcpListenerConfig {
    /// The address to bind. Port 0 asks the kernel for a free port.
    pub address: Address,
    /// Accept backlog.
    pub backlog: i32,
    /// Options applied to accepted channels.
    pub channel: TcpChannelConfig,
}

impl TcpListenerConfig {
    /// Create a listener configuration for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            backlog: 128,
            channel: TcpChannelConfig::default(),
        }
    }

    /// Set the accept backlog.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the options applied to accepted channels.
    pub fn channel_config(mut self, config: TcpChannelConfig) -> Self {
        self.channel = config;
        self
    }
}

/// Configuration for a [`TcpServer`](super::TcpServer): one listener per
/// address.
#[derive(Clone, Debug)]
pub struct TcpServerConfig {
    /// The addresses to listen on.
    pub addresses: Vec<Address>,
    /// Accept backlog for every listener.
    pub backlog: i32,
    /// Options applied to accepted channels.
    pub channel: TcpChannelConfig,
}

impl TcpServerConfig {
    /// Create a server configuration for the given addresses.
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            backlog: 128,
            channel: TcpChannelConfig::default(),
        }
    }

    /// Set the accept backlog.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the options applied to accepted channels.
    pub fn channel_config(mut self, config: TcpChannelConfig) -> Self {
        self.channel = config;
        self
    }
}
