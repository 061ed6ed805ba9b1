//! Reconnecting TCP channel with signal-based event delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::config::TcpChannelConfig;
use super::state::ChannelState;
use crate::address::Address;
use crate::error::{NetError, Result};
use crate::retrier::{Retrier, RetrierOptions};
use crate::signal::Signal;
use crate::socket::{Socket, SocketKind};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one channel for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Completion callback for a connect, write, or disconnect request.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send>;

/// Hook run on the raw socket before it connects (or, server side, before
/// the accepted channel goes live).
pub type SocketSetup = Arc<dyn Fn(&Socket) -> Result<()> + Send + Sync>;

/// Command sent to the channel's I/O task.
enum Command {
    Write(Bytes, Completion),
    Close(Completion),
}

struct ChannelShared {
    id: ChannelId,
    config: TcpChannelConfig,
    remote: Address,
    state: Mutex<ChannelState>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    socket_setup: Mutex<Option<SocketSetup>>,
    should_reconnect: Mutex<Option<Arc<dyn Fn() -> bool + Send + Sync>>>,
    // Completion of a disconnect that arrived while a connect was in flight;
    // fired once the channel lands back on Unconnected.
    pending_disconnect: Mutex<Option<Completion>>,
    // The active reconnect driver, kept so an explicit disconnect can stop it.
    reconnect: Mutex<Option<Arc<Retrier>>>,

    data_received: Arc<Signal<Bytes>>,
    state_changed: Arc<Signal<(ChannelState, ChannelState)>>,
    error_occurred: Arc<Signal<NetError>>,
}

impl ChannelShared {
    /// Swap the state and announce the transition.
    fn set_state(&self, new: ChannelState) {
        let old = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, new)
        };
        if old != new {
            tracing::debug!(target: "wireline::tcp", id = %self.id, %old, %new, "state change");
            self.state_changed.emit((old, new));
        }
    }

    /// Unconnected → Connecting, or a `State` error without side effects.
    fn begin_connecting(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Unconnected {
                return Err(NetError::State(format!(
                    "cannot connect while {state}"
                )));
            }
            *state = ChannelState::Connecting;
        }
        self.state_changed
            .emit((ChannelState::Unconnected, ChannelState::Connecting));
        Ok(())
    }

    fn apply_socket_options(&self, socket: &Socket) -> Result<()> {
        socket.set_no_delay(self.config.no_delay)?;
        socket.set_keep_alive(self.config.keep_alive)?;
        if self.config.send_timeout.is_some() {
            socket.set_send_timeout(self.config.send_timeout)?;
        }
        if self.config.receive_timeout.is_some() {
            socket.set_receive_timeout(self.config.receive_timeout)?;
        }
        if let Some(setup) = self.socket_setup.lock().clone() {
            setup(socket)?;
        }
        Ok(())
    }

    /// Open a socket for the remote's family, configure it, and complete a
    /// non-blocking connect.
    async fn open_stream(&self) -> Result<TcpStream> {
        let socket = Socket::new(self.remote.family(), SocketKind::Stream)?;
        self.apply_socket_options(&socket)?;
        socket.set_nonblocking(true)?;

        let finished = socket.connect(self.remote)?;
        let stream = socket.into_tcp_stream()?;

        let completion = async {
            if !finished {
                stream.writable().await?;
                if let Some(err) = stream.take_error()? {
                    return Err(NetError::from(err));
                }
                // A connect that failed without a queued error still has no
                // peer.
                stream.peer_addr()?;
            }
            Ok::<(), NetError>(())
        };

        match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, completion)
                .await
                .map_err(|_| NetError::Timeout)??,
            None => completion.await?,
        }

        Ok(stream)
    }

    /// One connect attempt. The caller has already moved the state to
    /// Connecting; failure rolls it back and reports on `error_occurred`.
    async fn run_connect(self: &Arc<Self>) -> Result<()> {
        match self.open_stream().await {
            Ok(stream) => {
                if self.spawn_io(stream) {
                    Ok(())
                } else {
                    // A disconnect arrived while the connect was in flight.
                    self.set_state(ChannelState::Unconnected);
                    self.finish_pending_disconnect();
                    Err(NetError::Cancelled)
                }
            }
            Err(err) => {
                self.set_state(ChannelState::Unconnected);
                self.finish_pending_disconnect();
                self.error_occurred.emit(err.clone());
                Err(err)
            }
        }
    }

    fn finish_pending_disconnect(&self) {
        if let Some(completion) = self.pending_disconnect.lock().take() {
            completion(Ok(()));
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(retrier) = self.reconnect.lock().take() {
            retrier.cancel();
        }
    }

    /// Take ownership of a connected stream: start the I/O task and flip to
    /// Connected. Returns `false` (stream dropped, nothing started) when a
    /// disconnect was requested while the connect was in flight.
    fn spawn_io(self: &Arc<Self>, stream: TcpStream) -> bool {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let old = {
            let mut state = self.state.lock();
            if *state == ChannelState::Disconnecting {
                return false;
            }
            *self.command_tx.lock() = Some(tx);
            std::mem::replace(&mut *state, ChannelState::Connected)
        };
        if old != ChannelState::Connected {
            tracing::debug!(
                target: "wireline::tcp",
                id = %self.id,
                %old,
                new = %ChannelState::Connected,
                "state change"
            );
            self.state_changed.emit((old, ChannelState::Connected));
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let (mut reader, mut writer) = stream.into_split();
            let mut buffer = vec![0u8; shared.config.read_buffer_size];
            let mut close_completion: Option<Completion> = None;

            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        match cmd {
                            Some(Command::Write(data, completion)) => {
                                match writer.write_all(&data).await {
                                    Ok(()) => completion(Ok(())),
                                    Err(e) => {
                                        let err = NetError::from(e);
                                        shared.error_occurred.emit(err.clone());
                                        completion(Err(err));
                                        break;
                                    }
                                }
                            }
                            Some(Command::Close(completion)) => {
                                let _ = writer.shutdown().await;
                                close_completion = Some(completion);
                                break;
                            }
                            None => break,
                        }
                    }

                    result = reader.read(&mut buffer) => {
                        match result {
                            // EOF: the peer closed.
                            Ok(0) => break,
                            Ok(n) => {
                                shared.data_received.emit(Bytes::copy_from_slice(&buffer[..n]));
                            }
                            Err(e) => {
                                shared.error_occurred.emit(NetError::from(e));
                                break;
                            }
                        }
                    }
                }
            }

            *shared.command_tx.lock() = None;
            let requested = close_completion.is_some();
            shared.set_state(ChannelState::Unconnected);
            if let Some(completion) = close_completion {
                completion(Ok(()));
            }

            if !requested && shared.reconnect_requested() {
                shared.schedule_reconnect();
            }
        });
        true
    }

    fn reconnect_requested(&self) -> bool {
        self.should_reconnect
            .lock()
            .clone()
            .is_some_and(|predicate| predicate())
    }

    /// After an unsolicited disconnect: wait `reconnection_delay`, then drive
    /// connect attempts through a retrier until one lands.
    ///
    /// The `should_reconnect` predicate is consulted again before every
    /// attempt, so it doubles as the off switch between attempts; an explicit
    /// [`TcpChannel::disconnect`] cancels the retrier outright.
    fn schedule_reconnect(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(
                target: "wireline::tcp",
                id = %shared.id,
                delay = ?shared.config.reconnection_delay,
                "reconnect scheduled"
            );
            tokio::time::sleep(shared.config.reconnection_delay).await;
            if !shared.reconnect_requested() {
                return;
            }

            let attempt_shared = Arc::clone(&shared);
            let retrier = Arc::new(Retrier::new(RetrierOptions::default(), move || {
                let shared = Arc::clone(&attempt_shared);
                async move {
                    if !shared.reconnect_requested() {
                        shared.cancel_reconnect();
                        return Err(NetError::Cancelled);
                    }
                    if shared.begin_connecting().is_err() {
                        // Someone else owns the state now (a manual connect,
                        // or a teardown); stop competing with it.
                        shared.cancel_reconnect();
                        return Err(NetError::Cancelled);
                    }
                    shared.run_connect().await
                }
            }));
            *shared.reconnect.lock() = Some(Arc::clone(&retrier));
            retrier.resume();
        });
    }
}

/// A client-style TCP channel.
///
/// A channel targets one remote address. It connects on demand, serializes
/// all I/O and state transitions on a single task, and reports everything
/// through signals. An unsolicited disconnect can trigger an automatic
/// reconnect via [`set_should_reconnect`](Self::set_should_reconnect).
///
/// # Signals
///
/// - [`data_received`](Self::data_received): a chunk arrived
/// - [`state_changed`](Self::state_changed): `(old, new)` on every transition
/// - [`error_occurred`](Self::error_occurred): a connect or I/O error
///
/// # Example
///
/// ```ignore
/// let channel = TcpChannel::new("127.0.0.1:8080".parse()?, TcpChannelConfig::default());
/// channel.data_received.connect(|data| println!("{} bytes", data.len()));
/// channel.connect(|result| println!("connect: {result:?}"))?;
/// ```
pub struct TcpChannel {
    shared: Arc<ChannelShared>,

    /// Signal emitted for every received chunk.
    pub data_received: Arc<Signal<Bytes>>,
    /// Signal emitted on every state transition as `(old, new)`.
    pub state_changed: Arc<Signal<(ChannelState, ChannelState)>>,
    /// Signal emitted when a connect or I/O error occurs.
    pub error_occurred: Arc<Signal<NetError>>,
}

impl TcpChannel {
    /// Create a channel targeting `remote`. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(remote: Address, config: TcpChannelConfig) -> Self {
        let shared = Arc::new(ChannelShared {
            id: ChannelId::next(),
            config,
            remote,
            state: Mutex::new(ChannelState::Unconnected),
            command_tx: Mutex::new(None),
            socket_setup: Mutex::new(None),
            should_reconnect: Mutex::new(None),
            pending_disconnect: Mutex::new(None),
            reconnect: Mutex::new(None),
            data_received: Arc::new(Signal::new()),
            state_changed: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
        });
        Self::from_shared(shared)
    }

    fn from_shared(shared: Arc<ChannelShared>) -> Self {
        Self {
            data_received: Arc::clone(&shared.data_received),
            state_changed: Arc::clone(&shared.state_changed),
            error_occurred: Arc::clone(&shared.error_occurred),
            shared,
        }
    }

    /// Adopt an already-established connection (server side).
    ///
    /// The configuration and setup hook are applied to the raw socket before
    /// the channel flips straight to Connected; accepted channels never
    /// auto-reconnect.
    pub fn accepted(
        stream: TcpStream,
        config: TcpChannelConfig,
        setup: Option<SocketSetup>,
    ) -> Result<Self> {
        let peer = Address::from(stream.peer_addr()?);

        // Drop back to a raw socket so the option surface and the hook see
        // the descriptor before any traffic flows.
        let std_stream = stream.into_std()?;
        let socket = Socket::from_raw(socket2::Socket::from(std_stream), peer.family());

        let shared = Arc::new(ChannelShared {
            id: ChannelId::next(),
            config,
            remote: peer,
            state: Mutex::new(ChannelState::Unconnected),
            command_tx: Mutex::new(None),
            socket_setup: Mutex::new(setup),
            should_reconnect: Mutex::new(None),
            pending_disconnect: Mutex::new(None),
            reconnect: Mutex::new(None),
            data_received: Arc::new(Signal::new()),
            state_changed: Arc::new(Signal::new()),
            error_occurred: Arc::new(Signal::new()),
        });

        shared.apply_socket_options(&socket)?;
        socket.set_nonblocking(true)?;
        let stream = socket.into_tcp_stream()?;
        shared.spawn_io(stream);

        Ok(Self::from_shared(shared))
    }

    /// The channel's process-unique id.
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    /// The remote address this channel targets (for accepted channels, the
    /// peer).
    pub fn remote_address(&self) -> Address {
        self.shared.remote
    }

    /// The current state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Whether the channel is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Install a hook that adjusts the raw socket before each connect.
    pub fn set_socket_setup<F>(&self, hook: F)
    where
        F: Fn(&Socket) -> Result<()> + Send + Sync + 'static,
    {
        *self.shared.socket_setup.lock() = Some(Arc::new(hook));
    }

    /// Install the predicate consulted after an unsolicited disconnect.
    /// Returning `true` schedules a reconnect after the configured
    /// `reconnection_delay`.
    pub fn set_should_reconnect<F>(&self, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        *self.shared.should_reconnect.lock() = Some(Arc::new(predicate));
    }

    /// Start a single connect attempt.
    ///
    /// Fails fast with a `State` error (no I/O, no callback) unless the
    /// channel is Unconnected. The callback fires exactly once with the
    /// attempt's outcome.
    pub fn connect<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.shared.begin_connecting()?;
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            callback(shared.run_connect().await);
        });
        Ok(())
    }

    /// Connect, retrying failed attempts with exponential backoff.
    ///
    /// Fails fast like [`connect`](Self::connect). The callback fires once:
    /// `Ok` on the first successful attempt, or the last attempt's error when
    /// `options.max_attempts` runs out.
    pub fn connect_with_retry<F>(&self, options: RetrierOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        {
            let state = self.shared.state.lock();
            if *state != ChannelState::Unconnected {
                return Err(NetError::State(format!("cannot connect while {state}")));
            }
        }

        let attempt_shared = Arc::clone(&self.shared);
        let retrier = Retrier::new(options, move || {
            let shared = Arc::clone(&attempt_shared);
            async move {
                shared.begin_connecting()?;
                shared.run_connect().await
            }
        });

        let callback = Mutex::new(Some(callback));
        retrier.finished.connect(move |outcome| {
            if let Some(callback) = callback.lock().take() {
                callback(outcome.clone());
            }
        });
        retrier.resume();
        Ok(())
    }

    /// Queue `data` for writing.
    ///
    /// Valid only while Connected. Completions fire in submission order.
    pub fn write<F>(&self, data: impl Into<Bytes>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if self.state() != ChannelState::Connected {
            return Err(NetError::State(format!(
                "cannot write while {}",
                self.state()
            )));
        }
        let tx = self.shared.command_tx.lock();
        match tx.as_ref() {
            Some(tx) => tx
                .send(Command::Write(data.into(), Box::new(callback)))
                .map_err(|_| NetError::State("channel task has shut down".to_string())),
            None => Err(NetError::State("cannot write while Unconnected".to_string())),
        }
    }

    /// Close the connection gracefully.
    ///
    /// Fails fast with a `State` error only while Unconnected. A disconnect
    /// during Connecting aborts the in-flight connect; while one is already
    /// in progress it is a no-op whose callback fires immediately. The
    /// callback fires exactly once. An explicit disconnect also stops any
    /// pending automatic reconnect.
    pub fn disconnect<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let mut completion: Option<Completion> = Some(Box::new(callback));
        let old = {
            let mut state = self.shared.state.lock();
            match *state {
                ChannelState::Unconnected => {
                    return Err(NetError::State(
                        "cannot disconnect while Unconnected".to_string(),
                    ));
                }
                ChannelState::Disconnecting => {
                    drop(state);
                    if let Some(completion) = completion.take() {
                        completion(Ok(()));
                    }
                    return Ok(());
                }
                ChannelState::Connecting => {
                    // The connect task notices Disconnecting instead of going
                    // live; the completion is held until it lands.
                    *self.shared.pending_disconnect.lock() = completion.take();
                    std::mem::replace(&mut *state, ChannelState::Disconnecting)
                }
                ChannelState::Connected => {
                    std::mem::replace(&mut *state, ChannelState::Disconnecting)
                }
            }
        };
        self.shared
            .state_changed
            .emit((old, ChannelState::Disconnecting));
        self.shared.cancel_reconnect();

        match completion.take() {
            // Connect abort: the completion is parked with the connect task.
            None => Ok(()),
            Some(completion) => {
                let tx = self.shared.command_tx.lock();
                match tx.as_ref() {
                    Some(tx) => tx
                        .send(Command::Close(completion))
                        .map_err(|_| NetError::State("channel task has shut down".to_string())),
                    None => Err(NetError::State("channel task has shut down".to_string())),
                }
            }
        }
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("id", &self.shared.id)
            .field("remote", &self.shared.remote.to_string())
            .field("state", &self.state())
            .finish()
    }
}
