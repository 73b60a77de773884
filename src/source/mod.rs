//! ==============================================================================
//! source/mod.rs - push-source client abstraction
//! ==============================================================================
//!
//! purpose:
//!     the session controller never talks to a transport directly. it is handed
//!     a `PushSource` at construction and asks it for two subscriptions:
//!     - a data channel for a named path (sensor payloads or "no data")
//!     - a connectivity channel (connected true/false, transport errors)
//!
//! ```text
//!     each subscription is a bounded channel plus a cancellation token. the
//!     source side runs in its own task and stops publishing as soon as the
//!     token is cancelled. reconnects, if any, happen inside the source.
//! ```
//!
//! implementations:
//!     - simulated.rs   : random readings on a fixed interval
//!     - realtime_db.rs : server-sent events from a hosted realtime database
//!     - socket.rs      : newline-delimited json over tcp
//!
//! ==============================================================================

pub mod link;
pub mod realtime_db;
pub mod simulated;
pub mod socket;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

pub use link::{LinkMonitor, LinkState};
pub use realtime_db::RealtimeDbSource;
pub use simulated::SimulatedSource;
pub use socket::SocketSource;

/// queue depth per subscription
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// one event on the data channel
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    /// a payload was published at the path (shape unchecked)
    Value(Value),
    /// the path exists but holds no value
    Absent,
    /// the event arrived but could not be decoded
    Malformed(String),
    /// the subscription itself failed (e.g. cancelled by the server)
    Failed(String),
}

/// one event on the connectivity channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityEvent {
    Connected(bool),
    Error(String),
}

/// a push-based backend the session can subscribe to
///
/// both calls are fire-and-forget registrations: they spawn whatever they need
/// on the current tokio runtime and return immediately.
pub trait PushSource: Send + Sync {
    fn subscribe_data(&self, path: &str) -> Result<Subscription<DataEvent>, SourceError>;

    fn subscribe_connectivity(&self) -> Result<Subscription<ConnectivityEvent>, SourceError>;

    /// short name for logs
    fn describe(&self) -> String;
}

/// create a linked publisher/subscription pair
pub fn subscription<T>() -> (Publisher<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let cancel = CancellationToken::new();
    (
        Publisher { tx, cancel: cancel.clone() },
        Subscription { rx, cancel },
    )
}

/// source-side half of a subscription
#[derive(Debug)]
pub struct Publisher<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), cancel: self.cancel.clone() }
    }
}

impl<T> Publisher<T> {
    /// returns false once the subscriber has gone away
    pub async fn publish(&self, event: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            res = self.tx.send(event) => res.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// resolves when the subscriber unsubscribes
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// subscriber-side half; unsubscribes on drop
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// next event, or None once unsubscribed or the source has finished
    pub async fn recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// synchronous and idempotent
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// token that ends this subscription from elsewhere when cancelled
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
