//! Configuration for UDP channels.

use crate::address::Address;

/// Options for a [`UdpChannel`](super::UdpChannel).
#[derive(Clone, Debug)]
pub struct UdpChannelConfig {
    /// Address to bind, and the default send target.
    pub address: Address,
    /// Receive buffer size in bytes. Datagrams longer than this are
    /// truncated by the OS.
    pub recv_buffer_size: usize,
    /// Allow rebinding a recently used local address.
    pub reuse_address: bool,
}

impl UdpChannelConfig {
    /// Create a channel configuration for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            recv_buffer_size: 65535,
            reuse_address: true,
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Enable or disable address reuse.
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.reuse_address = enabled;
        self
    }
}
