//! Accepting side of the TCP layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::channel::{SocketSetup, TcpChannel};
use super::config::TcpListenerConfig;
use crate::address::Address;
use crate::error::{NetError, Result};
use crate::signal::Signal;
use crate::socket::{Socket, SocketKind};

type ShouldConnect = Arc<dyn Fn(&Address) -> bool + Send + Sync>;
type WillConnect = Arc<dyn Fn(&Arc<TcpChannel>) + Send + Sync>;

enum ListenerCommand {
    Stop,
}

struct ListenerShared {
    local: Mutex<Option<Address>>,
    is_running: AtomicBool,
    command_tx: Mutex<Option<mpsc::UnboundedSender<ListenerCommand>>>,
    client_should_connect: Mutex<Option<ShouldConnect>>,
    client_will_connect: Mutex<Option<WillConnect>>,
    socket_setup: Mutex<Option<SocketSetup>>,

    client_did_connect: Arc<Signal<Arc<TcpChannel>>>,
    error_occurred: Arc<Signal<NetError>>,
}

/// Accepts TCP connections on one address and wraps each as a
/// [`TcpChannel`].
///
/// Per accepted connection: the `client_should_connect` predicate may reject
/// the peer (the connection is dropped), the `client_will_connect` hook runs
/// on the fresh channel, then [`client_did_connect`](Self::client_did_connect)
/// fires. Accept errors are reported on
/// [`error_occurred`](Self::error_occurred) and the listener keeps running.
pub struct TcpListener {
    config: TcpListenerConfig,
    shared: Arc<ListenerShared>,

    /// Signal emitted with each accepted channel.
    pub client_did_connect: Arc<Signal<Arc<TcpChannel>>>,
    /// Signal emitted when binding or accepting fails.
    pub error_occurred: Arc<Signal<NetError>>,
}

impl TcpListener {
    /// Create a listener. Nothing binds until [`start`](Self::start).
    pub fn new(config: TcpListenerConfig) -> Self {
        let shared = Arc::new(ListenerShared {
            local: Mutex::new(None),
            is_running: AtomicBool::new(false),
            command_tx: Mutex::new(None),
            client_should_connect: Mutex::new(None),
            client_will_connect: Mutex::new(None),
            socket_setup: Mutex::new(None),
            client_did_connect: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
        });
        Self {
            client_did_connect: Arc::clone(&shared.client_did_connect),
            error_occurred: Arc::clone(&shared.error_occurred),
            config,
            shared,
        }
    }

    /// The bound address once listening (reports the kernel-assigned port
    /// when the configured port was 0).
    pub fn local_address(&self) -> Option<Address> {
        *self.shared.local.lock()
    }

    /// Whether the accept loop is active.
    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Acquire)
    }

    /// Install the peer-address predicate. Rejected peers are dropped before
    /// a channel is built.
    pub fn set_client_should_connect<F>(&self, predicate: F)
    where
        F: Fn(&Address) -> bool + Send + Sync + 'static,
    {
        *self.shared.client_should_connect.lock() = Some(Arc::new(predicate));
    }

    /// Install the hook run on each accepted channel before
    /// [`client_did_connect`](Self::client_did_connect) fires.
    pub fn set_client_will_connect<F>(&self, hook: F)
    where
        F: Fn(&Arc<TcpChannel>) + Send + Sync + 'static,
    {
        *self.shared.client_will_connect.lock() = Some(Arc::new(hook));
    }

    /// Install a hook that adjusts each accepted raw socket.
    pub fn set_socket_setup<F>(&self, hook: F)
    where
        F: Fn(&Socket) -> Result<()> + Send + Sync + 'static,
    {
        *self.shared.socket_setup.lock() = Some(Arc::new(hook));
    }

    /// Bind, listen, and start the accept loop.
    ///
    /// Bind and listen failures surface here synchronously; later accept
    /// errors go to [`error_occurred`](Self::error_occurred).
    pub fn start(&self) -> Result<()> {
        if self.shared.is_running.swap(true, Ordering::AcqRel) {
            return Err(NetError::State("listener is already running".to_string()));
        }

        match self.bind_and_spawn() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.is_running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn bind_and_spawn(&self) -> Result<()> {
        let socket = Socket::new(self.config.address.family(), SocketKind::Stream)?;
        socket.set_reuse_address(true)?;
        socket.bind(self.config.address)?;
        socket.listen(self.config.backlog)?;
        socket.set_nonblocking(true)?;

        let local = socket.local_address()?;
        *self.shared.local.lock() = Some(local);
        tracing::debug!(target: "wireline::tcp", %local, "listening");

        let listener = socket.into_tcp_listener()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<ListenerCommand>();
        *self.shared.command_tx.lock() = Some(tx);

        let shared = Arc::clone(&self.shared);
        let channel_config = self.config.channel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        match cmd {
                            Some(ListenerCommand::Stop) | None => break,
                        }
                    }

                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let peer = Address::from(peer_addr);

                                let allowed = shared
                                    .client_should_connect
                                    .lock()
                                    .clone()
                                    .is_none_or(|predicate| predicate(&peer));
                                if !allowed {
                                    tracing::debug!(target: "wireline::tcp", %peer, "peer rejected");
                                    continue;
                                }

                                let setup = shared.socket_setup.lock().clone();
                                match TcpChannel::accepted(stream, channel_config.clone(), setup) {
                                    Ok(channel) => {
                                        let channel = Arc::new(channel);
                                        if let Some(hook) = shared.client_will_connect.lock().clone() {
                                            hook(&channel);
                                        }
                                        shared.client_did_connect.emit(channel);
                                    }
                                    Err(e) => shared.error_occurred.emit(e),
                                }
                            }
                            Err(e) => {
                                shared.error_occurred.emit(NetError::from(e));
                            }
                        }
                    }
                }
            }

            *shared.command_tx.lock() = None;
            *shared.local.lock() = None;
            shared.is_running.store(false, Ordering::Release);
        });

        Ok(())
    }

    /// Stop accepting. Already-accepted channels are untouched.
    pub fn stop(&self) {
        if let Some(tx) = self.shared.command_tx.lock().as_ref() {
            let _ = tx.send(ListenerCommand::Stop);
        }
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("address", &self.config.address.to_string())
            .field("local", &self.local_address())
            .field("running", &self.is_running())
            .finish()
    }
}
