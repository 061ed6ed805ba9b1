//! UDP channel with signal-based datagram delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::config::UdpChannelConfig;
use super::datagram::Datagram;
use crate::address::Address;
use crate::error::{NetError, Result};
use crate::signal::Signal;
use crate::socket::{Socket, SocketKind};
use crate::tcp::{Completion, SocketSetup};

enum UdpCommand {
    Send(Bytes, Option<Address>, Completion),
    Cancel,
}

struct UdpShared {
    config: UdpChannelConfig,
    is_resumed: AtomicBool,
    local: Mutex<Option<Address>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<UdpCommand>>>,
    socket_setup: Mutex<Option<SocketSetup>>,

    datagram_received: Arc<Signal<Datagram>>,
    error_occurred: Arc<Signal<NetError>>,
    closed: Arc<Signal<()>>,
}

/// A bound UDP socket delivering datagrams through signals.
///
/// [`resume`](Self::resume) binds and starts receiving; every received
/// payload arrives as a timestamped [`Datagram`] on
/// [`datagram_received`](Self::datagram_received). [`cancel`](Self::cancel)
/// tears the socket down and fires [`closed`](Self::closed) once the task has
/// drained.
pub struct UdpChannel {
    shared: Arc<UdpShared>,

    /// Signal emitted for each received datagram.
    pub datagram_received: Arc<Signal<Datagram>>,
    /// Signal emitted for bind, send, and receive errors.
    pub error_occurred: Arc<Signal<NetError>>,
    /// Signal emitted once the channel has fully shut down.
    pub closed: Arc<Signal<()>>,
}

impl UdpChannel {
    /// Create a channel. Nothing binds until [`resume`](Self::resume).
    pub fn new(config: UdpChannelConfig) -> Self {
        let shared = Arc::new(UdpShared {
            config,
            is_resumed: AtomicBool::new(false),
            local: Mutex::new(None),
            command_tx: Mutex::new(None),
            socket_setup: Mutex::new(None),
            datagram_received: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
            closed: Arc::new(Signal::new()),
        });
        Self {
            datagram_received: Arc::clone(&shared.datagram_received),
            error_occurred: Arc::clone(&shared.error_occurred),
            closed: Arc::clone(&shared.closed),
            shared,
        }
    }

    /// Whether the channel is bound and receiving.
    pub fn is_resumed(&self) -> bool {
        self.shared.is_resumed.load(Ordering::Acquire)
    }

    /// The bound address once resumed (reports the kernel-assigned port when
    /// the configured port was 0).
    pub fn local_address(&self) -> Option<Address> {
        *self.shared.local.lock()
    }

    /// Install a hook that adjusts the raw socket before it binds.
    pub fn set_socket_setup<F>(&self, hook: F)
    where
        F: Fn(&Socket) -> Result<()> + Send + Sync + 'static,
    {
        *self.shared.socket_setup.lock() = Some(Arc::new(hook));
    }

    /// Bind the configured address and start receiving.
    ///
    /// A no-op while already resumed. A bind failure is reported on
    /// [`error_occurred`](Self::error_occurred) and cancels the channel.
    pub fn resume(&self) {
        if self.shared.is_resumed.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.bind_and_spawn() {
            Ok(()) => {}
            Err(e) => {
                self.shared.is_resumed.store(false, Ordering::Release);
                self.shared.error_occurred.emit(e);
                self.shared.closed.emit(());
            }
        }
    }

    fn bind_and_spawn(&self) -> Result<()> {
        let config = &self.shared.config;
        let socket = Socket::new(config.address.family(), SocketKind::Datagram)?;
        socket.set_reuse_address(config.reuse_address)?;
        if let Some(setup) = self.shared.socket_setup.lock().clone() {
            setup(&socket)?;
        }
        socket.bind(config.address)?;
        socket.set_nonblocking(true)?;

        let local = socket.local_address()?;
        *self.shared.local.lock() = Some(local);
        tracing::debug!(target: "wireline::udp", %local, "resumed");

        let socket = socket.into_udp_socket()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<UdpCommand>();
        *self.shared.command_tx.lock() = Some(tx);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut buffer = vec![0u8; shared.config.recv_buffer_size];

            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        match cmd {
                            Some(UdpCommand::Send(data, target, completion)) => {
                                let target = target.unwrap_or(shared.config.address);
                                let result = Self::send_one(&socket, &data, target).await;
                                if let Err(e) = &result {
                                    shared.error_occurred.emit(e.clone());
                                }
                                completion(result);
                            }
                            Some(UdpCommand::Cancel) | None => break,
                        }
                    }

                    result = socket.recv_from(&mut buffer) => {
                        match result {
                            Ok((n, from)) => {
                                shared.datagram_received.emit(Datagram::new(
                                    Bytes::copy_from_slice(&buffer[..n]),
                                    Address::from(from),
                                ));
                            }
                            // Receive errors are reported but not fatal.
                            Err(e) => shared.error_occurred.emit(NetError::from(e)),
                        }
                    }
                }
            }

            *shared.command_tx.lock() = None;
            *shared.local.lock() = None;
            shared.is_resumed.store(false, Ordering::Release);
            shared.closed.emit(());
        });

        Ok(())
    }

    async fn send_one(socket: &tokio::net::UdpSocket, data: &[u8], target: Address) -> Result<()> {
        let addr = target.to_socket_addr()?;
        let sent = socket.send_to(data, addr).await?;
        if sent != data.len() {
            return Err(NetError::Protocol(format!(
                "short send: {sent} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    /// Queue a datagram. `target = None` sends to the configured address.
    ///
    /// Valid only while resumed.
    pub fn send<F>(&self, data: impl Into<Bytes>, target: Option<Address>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let tx = self.shared.command_tx.lock();
        match tx.as_ref() {
            Some(tx) => tx
                .send(UdpCommand::Send(data.into(), target, Box::new(callback)))
                .map_err(|_| NetError::State("channel task has shut down".to_string())),
            None => Err(NetError::State("channel is not resumed".to_string())),
        }
    }

    /// Tear the channel down. [`closed`](Self::closed) fires once the
    /// receive task has drained.
    pub fn cancel(&self) {
        if let Some(tx) = self.shared.command_tx.lock().as_ref() {
            let _ = tx.send(UdpCommand::Cancel);
        }
    }
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("address", &self.shared.config.address.to_string())
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_fast_before_resume() {
        let channel = UdpChannel::new(UdpChannelConfig::new("127.0.0.1:0".parse().unwrap()));
        assert!(matches!(
            channel.send(Bytes::from_static(b"x"), None, |_| {}),
            Err(NetError::State(_))
        ));
    }

    #[tokio::test]
    async fn bind_failure_reports_and_cancels() {
        // Binding an address that is not local fails.
        let channel = UdpChannel::new(UdpChannelConfig::new("8.8.8.8:1".parse().unwrap()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        channel.error_occurred.connect(move |e| {
            let _ = tx.send(e.clone());
        });

        channel.resume();
        assert!(rx.recv().await.is_some());
        assert!(!channel.is_resumed());
        assert_eq!(channel.local_address(), None);
    }
}
