//! Simulated sensor feed.
//!
//! Publishes a random payload every `interval` (first one immediately) using
//! the same value ranges as the bench detector: CPS 50-149, CPM 3000-8999,
//! dose 0-3 µSv/h, so the alert threshold gets crossed regularly.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::{subscription, ConnectivityEvent, DataEvent, PushSource, Subscription};
use crate::error::SourceError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

pub struct SimulatedSource {
    interval: Duration,
    seed: Option<u64>,
}

impl SimulatedSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval, seed: None }
    }

    /// deterministic payload sequence, for tests
    pub fn with_seed(interval: Duration, seed: u64) -> Self {
        Self { interval, seed: Some(seed) }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

/// one fake detector payload
pub fn mock_payload<R: Rng>(rng: &mut R) -> Value {
    json!({
        "CPS": rng.gen_range(50..150),
        "CPM": rng.gen_range(3000..9000),
        "Dose_uSv": round_to(rng.gen_range(0.0..3.0), 3),
        "Activity_Ci": round_to(rng.gen_range(0.0..0.001), 6),
        "Activity_Bq": rng.gen_range(500..1500),
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

impl PushSource for SimulatedSource {
    fn subscribe_data(&self, path: &str) -> Result<Subscription<DataEvent>, SourceError> {
        let (publisher, sub) = subscription();
        let interval = self.interval;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        debug!("[SOURCE] simulated feed for '{}' every {:?}", path, interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let payload = mock_payload(&mut rng);
                        if !publisher.publish(DataEvent::Value(payload)).await {
                            break;
                        }
                    }
                    _ = publisher.closed() => break,
                }
            }
            debug!("[SOURCE] simulated feed stopped");
        });

        Ok(sub)
    }

    fn subscribe_connectivity(&self) -> Result<Subscription<ConnectivityEvent>, SourceError> {
        let (publisher, sub) = subscription();
        tokio::spawn(async move {
            if publisher.publish(ConnectivityEvent::Connected(true)).await {
                publisher.closed().await;
            }
        });
        Ok(sub)
    }

    fn describe(&self) -> String {
        format!("simulated ({}ms)", self.interval.as_millis())
    }
}
