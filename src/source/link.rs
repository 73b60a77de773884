//! Transport liveness shared between a source's data task and its
//! connectivity subscribers.

use std::sync::Arc;

use tokio::sync::watch;

use super::{subscription, ConnectivityEvent, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// no connection attempt has finished yet
    Pending,
    Up,
    /// `Some` carries a transport error, `None` is a plain disconnect
    Down(Option<String>),
}

#[derive(Debug, Clone)]
pub struct LinkMonitor {
    tx: Arc<watch::Sender<LinkState>>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkState::Pending);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_up(&self) {
        self.tx.send_replace(LinkState::Up);
    }

    pub fn set_down(&self, reason: Option<String>) {
        self.tx.send_replace(LinkState::Down(reason));
    }

    pub fn state(&self) -> LinkState {
        self.tx.borrow().clone()
    }

    /// forwards every observed state change as a connectivity event
    ///
    /// intermediate states may be coalesced; the latest one is always delivered.
    pub fn subscribe(&self) -> Subscription<ConnectivityEvent> {
        let (publisher, sub) = subscription();
        let mut rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                let event = match rx.borrow_and_update().clone() {
                    LinkState::Pending => None,
                    LinkState::Up => Some(ConnectivityEvent::Connected(true)),
                    LinkState::Down(None) => Some(ConnectivityEvent::Connected(false)),
                    LinkState::Down(Some(reason)) => Some(ConnectivityEvent::Error(reason)),
                };
                if let Some(event) = event {
                    if !publisher.publish(event).await {
                        return;
                    }
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = publisher.closed() => return,
                }
            }
        });

        sub
    }
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
