//! Signal/slot event delivery.
//!
//! Channels, listeners, and the resolver report events through [`Signal`]s.
//! Connecting a slot returns a [`ConnectionId`]; the owner of the id
//! explicitly disconnects when it is no longer interested, so a signal never
//! keeps a consumer alive implicitly.
//!
//! Slots run on the thread that emits by default. A slot connected with
//! [`Signal::connect_on`] is instead handed to a caller-supplied
//! [`CallbackContext`] — typically a main-thread or event-loop dispatcher —
//! so consumers choose where their callbacks execute.
//!
//! # Example
//!
//! ```
//! use wireline::signal::Signal;
//!
//! let data_received = Signal::<Vec<u8>>::new();
//! let id = data_received.connect(|data| println!("{} bytes", data.len()));
//! data_received.emit(vec![1, 2, 3]);
//! data_received.disconnect(id);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Handle for a signal-slot connection.
    ///
    /// Returned by [`Signal::connect`]; pass it to [`Signal::disconnect`]
    /// to stop receiving callbacks.
    pub struct ConnectionId;
}

/// An execution context callbacks can be marshaled onto.
///
/// The runtime never assumes a particular main-thread primitive; callers
/// inject one (a channel into their event loop, an executor handle, a test
/// harness) and the signal forwards the boxed invocation to it.
pub type CallbackContext = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

struct Connection<Args> {
    slot: Arc<dyn Fn(&Args) + Send + Sync>,
    context: Option<CallbackContext>,
}

/// A type-safe signal with explicitly managed connections.
pub struct Signal<Args> {
    connections: Mutex<SlotMap<ConnectionId, Connection<Args>>>,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Connect a slot. It will be invoked on the emitting thread.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connections.lock().insert(Connection {
            slot: Arc::new(slot),
            context: None,
        })
    }

    /// Connect a slot whose invocations are marshaled onto `context`.
    pub fn connect_on<F>(&self, context: CallbackContext, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connections.lock().insert(Connection {
            slot: Arc::new(slot),
            context: Some(context),
        })
    }

    /// Disconnect a slot by its connection id.
    ///
    /// Returns `true` if the connection was found and removed.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Disconnect all slots.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Invoke every connected slot with `args`.
    ///
    /// Slots are cloned out of the registry before invocation so a slot may
    /// connect or disconnect without deadlocking.
    pub fn emit(&self, args: Args) {
        let slots: Vec<(Arc<dyn Fn(&Args) + Send + Sync>, Option<CallbackContext>)> = self
            .connections
            .lock()
            .values()
            .map(|c| (c.slot.clone(), c.context.clone()))
            .collect();

        for (slot, context) in slots {
            match context {
                Some(context) => {
                    let args = args.clone();
                    context(Box::new(move || slot(&args)));
                }
                None => slot(&args),
            }
        }
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}
