//! Cooperative cancellation for the bus, its receivers, and their listeners.
//!
//! Cancelling the bus cancels the connection-pool requests held by every
//! listener, which causes consuming to stop with `Stopped(Regular)` (see
//! [`crate::listener`]). Each component holds a *child* token so cancelling
//! a parent cancels the whole subtree without the parent needing to track
//! its children explicitly.
//!
//! # Example
//!
//! ```rust
//! use conduitbus_core::cancellation::BusCancellation;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = BusCancellation::new();
//! let receiver = bus.child();
//! let listener = receiver.child();
//!
//! bus.cancel();
//! assert!(listener.is_cancelled());
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Why a [`BusCancellation`] tree was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Manual shutdown request (e.g. `Bus::stop`).
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Manual => write!(f, "Manual"),
        }
    }
}

/// A node in the cancellation tree.
///
/// Cloning shares the same token; [`BusCancellation::child`] derives a new
/// token that is cancelled whenever its parent is, but can also be
/// cancelled independently (used for re-enlistment: the offending listener
/// is cancelled without tearing down the whole receiver).
#[derive(Clone)]
pub struct BusCancellation {
    token: CancellationToken,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl Default for BusCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl BusCancellation {
    /// Create a new root cancellation token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            signal_tx: broadcast::channel(1).0,
        }
    }

    /// Derive a child token cancelled whenever this one is, or independently.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            signal_tx: self.signal_tx.clone(),
        }
    }

    /// Cancel this node (and transitively, all of its children).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel this node, recording why.
    pub fn cancel_with(&self, signal: ShutdownSignal) {
        let _ = self.signal_tx.send(signal);
        self.token.cancel();
    }

    /// True if this node (or an ancestor) has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until this node is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Race a future against cancellation; `None` if cancelled first.
    ///
    /// Cancellation is checked with priority: if the token is already
    /// cancelled when this is called, an immediately-ready `future` does not
    /// get to sneak in a `Some` result.
    pub async fn run_until_cancelled<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            result = future => Some(result),
        }
    }

    /// Subscribe to shutdown-signal notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Cancel with a deadline: returns once cancelled or once `timeout`
    /// elapses, whichever comes first. Used by `stopConsuming`'s drain
    /// deadline (spec.md §5).
    pub async fn cancelled_or_timeout(&self, timeout: Duration) {
        tokio::select! {
            _ = self.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}
