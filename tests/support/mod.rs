//! Fake push source driven directly by the test body.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gamma_dash::error::SourceError;
use gamma_dash::source::{subscription, ConnectivityEvent, DataEvent, Publisher, PushSource, Subscription};
use gamma_dash::{LiveSession, SessionConfig, SessionSnapshot};

#[derive(Default)]
pub struct FakeSource {
    data: Mutex<Vec<Publisher<DataEvent>>>,
    connectivity: Mutex<Vec<Publisher<ConnectivityEvent>>>,
    paths: Mutex<Vec<String>>,
    subscribe_calls: AtomicUsize,
    fail_connectivity: bool,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// data subscriptions succeed, connectivity subscriptions fail
    pub fn failing_connectivity() -> Arc<Self> {
        Arc::new(Self { fail_connectivity: true, ..Self::default() })
    }

    pub async fn send_data(&self, event: DataEvent) -> bool {
        let publisher = self.data.lock().unwrap().last().cloned();
        match publisher {
            Some(p) => p.publish(event).await,
            None => false,
        }
    }

    pub async fn send_connectivity(&self, event: ConnectivityEvent) -> bool {
        let publisher = self.connectivity.lock().unwrap().last().cloned();
        match publisher {
            Some(p) => p.publish(event).await,
            None => false,
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// true once every subscription handed out has been released
    pub fn all_released(&self) -> bool {
        self.data.lock().unwrap().iter().all(|p| p.is_closed())
            && self.connectivity.lock().unwrap().iter().all(|p| p.is_closed())
    }
}

impl PushSource for FakeSource {
    fn subscribe_data(&self, path: &str) -> Result<Subscription<DataEvent>, SourceError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_string());
        let (publisher, sub) = subscription();
        self.data.lock().unwrap().push(publisher);
        Ok(sub)
    }

    fn subscribe_connectivity(&self) -> Result<Subscription<ConnectivityEvent>, SourceError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connectivity {
            return Err(SourceError::Closed);
        }
        let (publisher, sub) = subscription();
        self.connectivity.lock().unwrap().push(publisher);
        Ok(sub)
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

pub fn session(source: Arc<FakeSource>) -> LiveSession {
    LiveSession::new(source, SessionConfig::default())
}

/// poll snapshots until `pred` holds; panics after two seconds
pub async fn wait_for<F>(session: &LiveSession, pred: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snap = session.snapshot().await;
        if pred(&snap) {
            return snap;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached, last snapshot: {:?}", snap);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
