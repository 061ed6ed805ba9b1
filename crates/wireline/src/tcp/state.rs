//! Connection state for TCP channels.

/// Lifecycle state of a [`TcpChannel`](super::TcpChannel).
///
/// Transitions happen on the channel's task or under its state lock, and
/// every transition is announced on the channel's `state_changed` signal as
/// an `(old, new)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No connection and none in progress.
    #[default]
    Unconnected,
    /// A connect is in flight.
    Connecting,
    /// Connected; reads and writes flow.
    Connected,
    /// A requested close is in progress.
    Disconnecting,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconnected => write!(f, "Unconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}
