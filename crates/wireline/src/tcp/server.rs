//! Multi-address TCP server over listeners and channels.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::channel::{ChannelId, TcpChannel};
use super::config::{TcpListenerConfig, TcpServerConfig};
use super::listener::TcpListener;
use super::state::ChannelState;
use crate::address::Address;
use crate::error::{NetError, Result};
use crate::signal::Signal;

/// One listener per configured address, plus a registry of live channels.
///
/// A channel enters the registry when its listener accepts it and leaves when
/// it reaches Unconnected, at which point
/// [`client_did_disconnect`](Self::client_did_disconnect) fires.
pub struct TcpServer {
    config: TcpServerConfig,
    listeners: Mutex<Vec<TcpListener>>,
    channels: Arc<Mutex<HashMap<ChannelId, Arc<TcpChannel>>>>,

    /// Signal emitted with each accepted channel.
    pub client_did_connect: Arc<Signal<Arc<TcpChannel>>>,
    /// Signal emitted when a tracked channel reaches Unconnected.
    pub client_did_disconnect: Arc<Signal<ChannelId>>,
    /// Signal emitted for listener errors.
    pub error_occurred: Arc<Signal<NetError>>,
}

impl TcpServer {
    /// Create a server. Nothing binds until [`start`](Self::start).
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            config,
            listeners: Mutex::new(Vec::new()),
            channels: Arc::new(Mutex::new(HashMap::new())),
            client_did_connect: Arc::new(Signal::new()),
            client_did_disconnect: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
        }
    }

    /// Bind and start one listener per configured address.
    ///
    /// All-or-nothing: if any address fails to bind, listeners already
    /// started are stopped and the error is returned.
    pub fn start(&self) -> Result<()> {
        let mut listeners = self.listeners.lock();
        if !listeners.is_empty() {
            return Err(NetError::State("server is already running".to_string()));
        }
        if self.config.addresses.is_empty() {
            return Err(NetError::Config("server has no addresses".to_string()));
        }

        for &address in &self.config.addresses {
            let listener = TcpListener::new(
                TcpListenerConfig::new(address)
                    .backlog(self.config.backlog)
                    .channel_config(self.config.channel.clone()),
            );
            self.wire_listener(&listener);

            if let Err(e) = listener.start() {
                for started in listeners.drain(..) {
                    started.stop();
                }
                return Err(e);
            }
            listeners.push(listener);
        }
        Ok(())
    }

    /// Track each accepted channel and watch it for disconnection.
    fn wire_listener(&self, listener: &TcpListener) {
        let channels = Arc::clone(&self.channels);
        let did_disconnect = Arc::clone(&self.client_did_disconnect);
        listener.set_client_will_connect(move |channel| {
            let id = channel.id();
            channels.lock().insert(id, Arc::clone(channel));

            let channels = Arc::clone(&channels);
            let did_disconnect = Arc::clone(&did_disconnect);
            let weak = Arc::downgrade(channel);
            let observer = Arc::new(Mutex::new(None));
            let observer_slot = Arc::clone(&observer);
            let untrack_channels = Arc::clone(&channels);
            let untrack_signal = Arc::clone(&did_disconnect);
            let connection = channel.state_changed.connect(move |(_, new)| {
                if *new != ChannelState::Unconnected {
                    return;
                }
                if untrack_channels.lock().remove(&id).is_some() {
                    untrack_signal.emit(id);
                }
                // One-shot observer: detach after the first disconnect.
                if let (Some(channel), Some(connection)) =
                    (weak.upgrade(), observer_slot.lock().take())
                {
                    channel.state_changed.disconnect(connection);
                }
            });
            *observer.lock() = Some(connection);

            // The channel may have dropped before the observer attached.
            if channel.state() == ChannelState::Unconnected
                && channels.lock().remove(&id).is_some()
            {
                did_disconnect.emit(id);
            }
        });

        let did_connect = Arc::clone(&self.client_did_connect);
        listener.client_did_connect.connect(move |channel| {
            did_connect.emit(Arc::clone(channel));
        });

        let errors = Arc::clone(&self.error_occurred);
        listener.error_occurred.connect(move |e| {
            errors.emit(e.clone());
        });
    }

    /// Whether any listener is active.
    pub fn is_running(&self) -> bool {
        self.listeners.lock().iter().any(TcpListener::is_running)
    }

    /// The bound addresses of the running listeners.
    pub fn local_addresses(&self) -> Vec<Address> {
        self.listeners
            .lock()
            .iter()
            .filter_map(TcpListener::local_address)
            .collect()
    }

    /// Number of tracked live channels.
    pub fn connection_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// A snapshot of the tracked channels.
    pub fn clients(&self) -> Vec<Arc<TcpChannel>> {
        self.channels.lock().values().cloned().collect()
    }

    /// Ask every tracked channel to disconnect. Channels leave the registry
    /// as they reach Unconnected.
    pub fn disconnect_all_clients(&self) {
        for channel in self.clients() {
            let id = channel.id();
            if let Err(e) = channel.disconnect(|_| {}) {
                tracing::debug!(target: "wireline::tcp", %id, error = %e, "disconnect skipped");
            }
        }
    }

    /// Stop all listeners and disconnect every tracked channel.
    pub fn stop(&self) {
        for listener in self.listeners.lock().drain(..) {
            listener.stop();
        }
        self.disconnect_all_clients();
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("addresses", &self.config.addresses.len())
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .finish()
    }
}
