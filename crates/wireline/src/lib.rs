//! Socket I/O runtime: reconnecting TCP/UDP channels, TLV framing, and
//! address resolution.
//!
//! The crate is organized around a small set of value types and
//! signal-driven channels:
//!
//! - [`address::Address`]: an immutable IPv4/IPv6 endpoint with an optional
//!   port and a total order.
//! - [`resolver::Resolver`]: name resolution with a static hosts table and a
//!   TTL cache in front of DNS.
//! - [`stream`]: endian-aware binary streams, and [`tlv::TlvRecord`] for
//!   type-length-value framing on top of them.
//! - [`retrier::Retrier`]: truncated exponential backoff for fallible async
//!   actions.
//! - [`socket::Socket`]: an owned raw socket used for option setup and
//!   non-blocking connects.
//! - [`tcp`]: the reconnecting [`tcp::TcpChannel`], plus
//!   [`tcp::TcpListener`] and [`tcp::TcpServer`] for the accepting side.
//! - [`udp::UdpChannel`]: a bound datagram socket delivering timestamped
//!   [`udp::Datagram`]s.
//!
//! Events are delivered through [`signal::Signal`]s. Slots run on the
//! emitting task unless connected with a [`signal::CallbackContext`], which
//! marshals them onto a caller-chosen executor.

pub mod address;
pub mod error;
pub mod resolver;
pub mod retrier;
pub mod signal;
pub mod socket;
pub mod stream;
pub mod tcp;
pub mod tlv;
pub mod udp;

pub use error::{NetError, Result};

pub use address::{Address, AddressFamily};
pub use resolver::Resolver;
pub use retrier::{Retrier, RetrierOptions};
pub use signal::{CallbackContext, ConnectionId, Signal};
pub use socket::{KeepAliveConfig, Socket, SocketKind};
pub use stream::{ByteOrder, MemoryStream};
pub use tcp::{ChannelState, TcpChannel, TcpChannelConfig, TcpListener, TcpServer};
pub use tlv::TlvRecord;
pub use udp::{Datagram, UdpChannel, UdpChannelConfig};
