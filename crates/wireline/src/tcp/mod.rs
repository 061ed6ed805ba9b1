//! TCP channels, listener, and server.
//!
//! [`TcpChannel`] is the client-style reconnecting connection; [`TcpListener`]
//! accepts peers and wraps each as a channel; [`TcpServer`] runs one listener
//! per configured address and tracks the live channels.

mod channel;
mod config;
mod listener;
mod server;
mod state;

pub use channel::{ChannelId, Completion, SocketSetup, TcpChannel};
pub use config::{TcpChannelConfig, TcpListenerConfig, TcpServerConfig};
pub use listener::TcpListener;
pub use server::TcpServer;
pub use state::ChannelState;
