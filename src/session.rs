//! ==============================================================================
//! session.rs - live session controller
//! ==============================================================================
//!
//! purpose:
//!     owns every piece of mutable dashboard state and the two subscriptions
//!     that feed it. one pump task per session reads both channels with
//!     `tokio::select!`, so data and connectivity events are applied one at a
//!     time, each to completion.
//!
//! state machine:
//!
//! ```text
//!     Idle ──start()──> Running ──stop()──> Stopped (terminal)
//!       └───────────────stop()──────────────────┘
//!
//!     while Running, connection status moves between
//!     Connecting / Connected / Disconnected on connectivity events only.
//!     data events never touch the status, except a failed subscription.
//! ```
//!
//! locking:
//!     reading, series, status and error live in one `SessionState` behind
//!     one `RwLock`. the alert flag is never stored; it is computed from the
//!     reading inside the same guard that reads the reading.
//!
//! relationships:
//!     - uses: source/ (PushSource, subscriptions), validator.rs, series.rs
//!     - read by: server.rs (snapshots)
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{gauge_percent, AlertLevel, ConnectionStatus, Reading, Sample, SessionSnapshot};
use crate::error::SessionError;
use crate::series::{SeriesBuffer, DEFAULT_MAX_POINTS};
use crate::source::{ConnectivityEvent, DataEvent, PushSource, Subscription};
use crate::validator::validate;

pub const DEFAULT_DANGER_THRESHOLD: f64 = 2.0;
pub const DEFAULT_DATA_PATH: &str = "sensor";

pub const NO_DATA_MESSAGE: &str = "no data available from sensor";
pub const LOST_CONNECTION_MESSAGE: &str = "lost connection";
pub const UNREACHABLE_MESSAGE: &str = "unable to connect to data source";

// ==============================================================================
// configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// path subscribed on the push source
    pub data_path: String,
    /// dose rate (µSv/h) strictly above which the alert is raised
    pub danger_threshold: f64,
    /// rolling window size
    pub max_points: usize,
    /// mark the snapshot stale when the last update is older than this
    pub stale_after: Option<Duration>,
    /// log every accepted reading at info level
    pub show_readings: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_path: DEFAULT_DATA_PATH.to_string(),
            danger_threshold: DEFAULT_DANGER_THRESHOLD,
            max_points: DEFAULT_MAX_POINTS,
            stale_after: None,
            show_readings: false,
        }
    }
}

// ==============================================================================
// session state
// ==============================================================================

/// what kind of problem the current error message describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// the path holds no data
    Absence,
    /// an event could not be processed
    Processing,
    /// the transport dropped or the subscription failed
    Transport,
}

#[derive(Debug, Clone, PartialEq)]
struct Advisory {
    kind: ErrorKind,
    message: String,
}

/// the aggregate live view; mutated only by the session pump
#[derive(Debug, Clone)]
pub struct SessionState {
    reading: Reading,
    series: SeriesBuffer,
    status: ConnectionStatus,
    last_update: Option<DateTime<Utc>>,
    error: Option<Advisory>,
    danger_threshold: f64,
    /// set on teardown; every later event is ignored
    closed: bool,
}

impl SessionState {
    pub fn new(danger_threshold: f64, max_points: usize) -> Self {
        Self {
            reading: Reading::default(),
            series: SeriesBuffer::new(max_points),
            status: ConnectionStatus::Connecting,
            last_update: None,
            error: None,
            danger_threshold,
            closed: false,
        }
    }

    pub fn apply_data(&mut self, event: DataEvent, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        match event {
            DataEvent::Value(payload) => {
                let reading = validate(&payload);
                self.reading = reading;
                self.error = None;
                self.last_update = Some(now);
                self.series.push(Sample::new(reading.dose_usv_h, now));
            }
            DataEvent::Absent => self.set_error(ErrorKind::Absence, NO_DATA_MESSAGE),
            DataEvent::Malformed(reason) => self.set_error(ErrorKind::Processing, reason),
            DataEvent::Failed(reason) => {
                self.status = ConnectionStatus::Disconnected;
                self.set_error(ErrorKind::Transport, reason);
            }
        }
    }

    pub fn apply_connectivity(&mut self, event: ConnectivityEvent) {
        if self.closed {
            return;
        }
        match event {
            ConnectivityEvent::Connected(true) => {
                self.status = ConnectionStatus::Connected;
                if self.error_kind() == Some(ErrorKind::Transport) {
                    self.error = None;
                }
            }
            ConnectivityEvent::Connected(false) => match self.status {
                ConnectionStatus::Connected => {
                    self.status = ConnectionStatus::Disconnected;
                    self.set_error(ErrorKind::Transport, LOST_CONNECTION_MESSAGE);
                }
                ConnectionStatus::Connecting => {
                    self.status = ConnectionStatus::Disconnected;
                    self.set_error(ErrorKind::Transport, UNREACHABLE_MESSAGE);
                }
                ConnectionStatus::Disconnected => {}
            },
            ConnectivityEvent::Error(reason) => {
                self.status = ConnectionStatus::Disconnected;
                self.set_error(ErrorKind::Transport, reason);
            }
        }
    }

    /// freeze the state; later events are dropped
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn set_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error = Some(Advisory { kind, message: message.into() });
    }

    pub fn reading(&self) -> Reading {
        self.reading
    }

    pub fn series(&self) -> &SeriesBuffer {
        &self.series
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|a| a.message.as_str())
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|a| a.kind)
    }

    pub fn alert(&self) -> bool {
        self.reading.exceeds(self.danger_threshold)
    }

    pub fn alert_level(&self) -> AlertLevel {
        AlertLevel::from_flag(self.alert())
    }

    /// true only when a limit is set and the last update is older than it
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Option<Duration>) -> bool {
        let (Some(limit), Some(last)) = (stale_after, self.last_update) else {
            return false;
        };
        match (now - last).to_std() {
            Ok(age) => age > limit,
            Err(_) => false,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>, stale_after: Option<Duration>) -> SessionSnapshot {
        let level = self.alert_level();
        SessionSnapshot {
            reading: self.reading,
            series: self.series.snapshot(),
            status: self.status,
            last_update: self.last_update,
            error: self.error().map(str::to_string),
            alert: self.alert(),
            status_label: level.status_label().to_string(),
            headline: level.headline().to_string(),
            gauge_percent: gauge_percent(self.reading.dose_usv_h),
            danger_threshold: self.danger_threshold,
            stale: self.is_stale(now, stale_after),
        }
    }
}

// ==============================================================================
// controller
// ==============================================================================

enum Phase {
    Idle,
    Running {
        cancel: CancellationToken,
        subscriptions: [CancellationToken; 2],
        task: JoinHandle<()>,
    },
    Stopped,
}

pub struct LiveSession {
    source: Arc<dyn PushSource>,
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    phase: Mutex<Phase>,
}

impl LiveSession {
    pub fn new(source: Arc<dyn PushSource>, config: SessionConfig) -> Self {
        let state = SessionState::new(config.danger_threshold, config.max_points);
        Self {
            source,
            config,
            state: Arc::new(RwLock::new(state)),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// subscribe to the data path and the connectivity channel and start
    /// applying their events
    ///
    /// fails if the session is already running or was stopped. if either
    /// subscription cannot be created the failure is also recorded in the
    /// state as a transport error and the session stays idle.
    pub async fn start(&self) -> Result<(), SessionError> {
        let subscribed = {
            let mut phase = self.phase();
            match *phase {
                Phase::Running { .. } => return Err(SessionError::AlreadyStarted),
                Phase::Stopped => return Err(SessionError::Terminated),
                Phase::Idle => {}
            }

            let subscribed = self
                .source
                .subscribe_data(&self.config.data_path)
                .and_then(|data| {
                    self.source
                        .subscribe_connectivity()
                        .map(|connectivity| (data, connectivity))
                });

            match subscribed {
                Ok((data, connectivity)) => {
                    let cancel = CancellationToken::new();
                    let subscriptions = [data.cancel_handle(), connectivity.cancel_handle()];
                    let task = tokio::spawn(pump(
                        self.state.clone(),
                        data,
                        connectivity,
                        cancel.clone(),
                        self.config.show_readings,
                    ));
                    *phase = Phase::Running { cancel, subscriptions, task };
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match subscribed {
            Ok(()) => {
                info!(
                    "[SESSION] subscribed to '{}' on {}",
                    self.config.data_path,
                    self.source.describe()
                );
                Ok(())
            }
            Err(e) => {
                warn!("[SESSION] subscription failed: {}", e);
                self.state
                    .write()
                    .await
                    .apply_connectivity(ConnectivityEvent::Error(e.to_string()));
                Err(SessionError::Subscribe(e))
            }
        }
    }

    /// release both subscriptions; terminal, idempotent and non-blocking
    ///
    /// an event the pump is applying at this very moment may still land.
    /// use [`LiveSession::shutdown`] to wait until the state is frozen.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.phase(), Phase::Stopped);
        if let Ok(mut state) = self.state.try_write() {
            state.close();
        }
        if let Phase::Running { cancel, subscriptions, task } = previous {
            cancel.cancel();
            for token in &subscriptions {
                token.cancel();
            }
            task.abort();
            info!("[SESSION] stopped");
        }
    }

    /// stop, then wait for any in-flight event and freeze the state
    ///
    /// once this returns the state never changes again.
    pub async fn shutdown(&self) {
        self.stop();
        self.state.write().await.close();
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.phase(), Phase::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.phase(), Phase::Stopped)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state
            .read()
            .await
            .snapshot(Utc::now(), self.config.stale_after)
    }

    pub async fn reading(&self) -> Reading {
        self.state.read().await.reading()
    }

    pub async fn series(&self) -> Vec<Sample> {
        self.state.read().await.series().snapshot()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.read().await.status()
    }

    pub async fn alert(&self) -> bool {
        self.state.read().await.alert()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ==============================================================================
// pump task
// ==============================================================================

async fn pump(
    state: Arc<RwLock<SessionState>>,
    mut data: Subscription<DataEvent>,
    mut connectivity: Subscription<ConnectivityEvent>,
    cancel: CancellationToken,
    show_readings: bool,
) {
    let mut data_open = true;
    let mut connectivity_open = true;

    while data_open || connectivity_open {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = data.recv(), if data_open => {
                let Some(event) = event else {
                    debug!("[SESSION] data channel closed by source");
                    data_open = false;
                    continue;
                };
                let mut guard = state.write().await;
                if cancel.is_cancelled() || guard.is_closed() {
                    break;
                }
                guard.apply_data(event, Utc::now());
                log_data(&guard, show_readings);
            }
            event = connectivity.recv(), if connectivity_open => {
                let Some(event) = event else {
                    debug!("[SESSION] connectivity channel closed by source");
                    connectivity_open = false;
                    continue;
                };
                let mut guard = state.write().await;
                if cancel.is_cancelled() || guard.is_closed() {
                    break;
                }
                let before = guard.status();
                guard.apply_connectivity(event);
                log_status(before, &guard);
            }
        }
    }

    data.unsubscribe();
    connectivity.unsubscribe();
}

fn log_data(state: &SessionState, show_readings: bool) {
    match (state.error(), state.error_kind()) {
        (Some(msg), Some(ErrorKind::Absence)) => warn!("[SESSION] {}", msg),
        (Some(msg), _) => warn!("[SESSION] event rejected: {}", msg),
        (None, _) if show_readings => {
            let r = state.reading();
            info!(
                "[READING] CPS: {} | CPM: {} | Dose: {:.3} µSv/h | {}",
                r.cps,
                r.cpm,
                r.dose_usv_h,
                state.alert_level().status_label()
            );
        }
        (None, _) => {}
    }
}

fn log_status(before: ConnectionStatus, state: &SessionState) {
    let after = state.status();
    if before == after {
        return;
    }
    match after {
        ConnectionStatus::Connected => info!("[SESSION] connected"),
        _ => warn!(
            "[SESSION] {}: {}",
            after.caption(),
            state.error().unwrap_or("no reason given")
        ),
    }
}
