//! UDP datagram channel.

mod channel;
mod config;
mod datagram;

pub use channel::UdpChannel;
pub use config::UdpChannelConfig;
pub use datagram::Datagram;
