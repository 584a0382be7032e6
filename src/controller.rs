//! ==============================================================================
//! controller.rs - device session state machine
//! ==============================================================================
//!
//! purpose:
//!     owns the connect / poll / disconnect lifecycle for one device and
//!     coordinates the device client, history, alerts and relay on each tick.
//!
//! states:
//! ```text
//!     ┌──────┐ connect(addr) ┌────────────┐  first fetch ok  ┌───────────┐
//!     │ Idle │──────────────►│ Connecting │─────────────────►│ Connected │◄─┐
//!     └──────┘               └────────────┘                  └─────┬─────┘  │ tick
//!        ▲   ▲  fetch failed /      │                              │        │ (ok or
//!        │   └──────────────────────┘                              ├────────┘  failed)
//!        │                disconnect() / shutdown()                │
//!        └─────────────────────────────────────────────────────────┘
//! ```
//! concurrency:
//!     - session fields sit behind a std mutex that is never held across an
//!       await. every transition away from a session bumps `generation`, so
//!       an in-flight fetch that finishes late can tell its session is gone
//!       and drops its result.
//!     - the poll timer is a PollTimer handle stored in the session. dropping
//!       it aborts the task, so every reset() releases it.
//!     - ticks run one after another on that single task. a tick that runs
//!       past the interval makes the next one skip, never overlap.
//!     - relays go through a try-lock gate: a second relay while one is in
//!       flight is rejected.
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::device::DeviceClient;
use crate::domain::{ConnectionState, ConnectionTarget, HistoryEntry, Reading, Snapshot};
use crate::error::ControllerError;
use crate::history::{HistoryStore, Settings, SettingsStore};
use crate::notify::{AlertNotifier, NotificationSink};
use crate::relay::{RelayClient, RelayResult};
use crate::storage::KeyValueStore;

// ==============================================================================
// session state
// ==============================================================================

struct Session {
    generation: u64,
    state: ConnectionState,
    target: Option<ConnectionTarget>,
    last_reading: Option<Reading>,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
    timer: Option<PollTimer>,
}

impl Session {
    fn idle() -> Self {
        Self {
            generation: 0,
            state: ConnectionState::Idle,
            target: None,
            last_reading: None,
            last_error: None,
            last_success_at: None,
            timer: None,
        }
    }

    /// back to Idle, releasing the timer
    fn reset(&mut self) {
        self.generation += 1;
        self.state = ConnectionState::Idle;
        self.target = None;
        self.last_reading = None;
        self.last_error = None;
        self.last_success_at = None;
        self.timer = None;
    }

    fn is_current(&self, generation: u64, state: ConnectionState) -> bool {
        self.generation == generation && self.state == state
    }
}

/// recurring poll task, aborted when the handle is dropped
struct PollTimer {
    handle: JoinHandle<()>,
}

impl PollTimer {
    fn start(inner: Weak<Inner>, generation: u64, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            // the connect already fetched once, so the first tick is one period out
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                if !inner.poll_once(generation).await {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ==============================================================================
// controller
// ==============================================================================

struct Inner {
    device: DeviceClient,
    history: HistoryStore,
    settings: SettingsStore,
    alerts: AlertNotifier,
    relay: RelayClient,
    interval: Duration,
    default_address: String,
    show_sensor_data: bool,
    session: Mutex<Session>,
    relay_gate: tokio::sync::Mutex<()>,
}

/// cheap to clone; all clones drive the same session
#[derive(Clone)]
pub struct PollingController {
    inner: Arc<Inner>,
}

impl PollingController {
    pub fn new(
        config: &MonitorConfig,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let device = DeviceClient::new(&config.device);
        Self {
            inner: Arc::new(Inner {
                alerts: AlertNotifier::new(sink, device.clone()),
                device,
                history: HistoryStore::new(store.clone()),
                settings: SettingsStore::new(store),
                relay: RelayClient::new(&config.relay),
                interval: config.polling.interval(),
                default_address: config.device.default_address.clone(),
                show_sensor_data: config.logging.show_sensor_data,
                session: Mutex::new(Session::idle()),
                relay_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// validate, fetch once, and start polling on success
    pub async fn connect(&self, address: &str) -> Result<Snapshot, ControllerError> {
        let target = ConnectionTarget::parse(address)?;

        let generation = {
            let mut session = self.inner.session();
            if session.state != ConnectionState::Idle {
                let active = session
                    .target
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                return Err(ControllerError::AlreadyActive(active));
            }
            session.generation += 1;
            session.state = ConnectionState::Connecting;
            session.target = Some(target.clone());
            session.generation
        };

        info!("connecting to {target}");
        let mut attempt = ConnectAttempt {
            inner: &*self.inner,
            generation,
            armed: true,
        };

        let fetched = self.inner.device.fetch_reading(&target).await;

        {
            let mut session = self.inner.session();
            if !session.is_current(generation, ConnectionState::Connecting) {
                return Err(ControllerError::Cancelled);
            }
            match &fetched {
                Ok(reading) => {
                    session.state = ConnectionState::Connected;
                    session.last_reading = Some(reading.clone());
                    session.last_success_at = Some(reading.observed_at);
                }
                Err(e) => {
                    warn!("connection to {target} failed: {e}");
                    session.reset();
                }
            }
        }
        let reading = fetched?;
        attempt.armed = false;

        self.inner.record(generation, &target, None, &reading).await;

        {
            let mut session = self.inner.session();
            if session.is_current(generation, ConnectionState::Connected) {
                session.timer = Some(PollTimer::start(
                    Arc::downgrade(&self.inner),
                    generation,
                    self.inner.interval,
                ));
            }
        }

        let settings = Settings {
            last_address: Some(target.to_string()),
        };
        if let Err(e) = self.inner.settings.save(&settings).await {
            warn!("failed to remember address {target}: {e}");
        }

        info!("connected to {target}, polling every {:?}", self.inner.interval);
        self.inner
            .alerts
            .connection_notice(&format!("Conectado al ESP32 en {target}"));

        Ok(self.snapshot().await)
    }

    /// stop polling and return to Idle; no-op when already idle
    pub async fn disconnect(&self) -> Snapshot {
        let ended = {
            let mut session = self.inner.session();
            if session.state == ConnectionState::Idle {
                None
            } else {
                let target = session.target.clone();
                session.reset();
                target
            }
        };

        if let Some(target) = ended {
            info!("disconnected from {target}");
            self.inner
                .alerts
                .connection_notice(&format!("Desconectado del ESP32 en {target}"));
        }

        self.snapshot().await
    }

    /// process teardown: cancel the timer without notifying anyone
    pub fn shutdown(&self) {
        let mut session = self.inner.session();
        if session.state != ConnectionState::Idle {
            debug!("shutting down active session");
        }
        session.reset();
    }

    /// push the whole history to the collector
    ///
    /// works with or without an active session. a relay while another one
    /// is still in flight is rejected.
    pub async fn trigger_relay(&self) -> Result<RelayResult, ControllerError> {
        let _gate = self
            .inner
            .relay_gate
            .try_lock()
            .map_err(|_| ControllerError::RelayInFlight)?;

        let entries = self.inner.history.all().await;
        let tag = self.relay_tag().await;
        info!("relaying {} readings as {tag}", entries.len());

        Ok(self.inner.relay.send(&entries, &tag).await?)
    }

    pub async fn snapshot(&self) -> Snapshot {
        let mut snapshot = {
            let session = self.inner.session();
            Snapshot {
                state: session.state,
                target: session.target.clone(),
                last_reading: session.last_reading.clone(),
                last_error: session.last_error.clone(),
                last_success_at: session.last_success_at,
                history: Vec::new(),
            }
        };
        snapshot.history = self.inner.history.all().await;
        snapshot
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.all().await
    }

    pub async fn clear_history(&self) -> Result<(), ControllerError> {
        self.inner.history.clear().await?;
        info!("history cleared");
        Ok(())
    }

    /// last address a session was established with, else the configured default
    pub async fn remembered_address(&self) -> String {
        self.inner
            .settings
            .load()
            .await
            .last_address
            .unwrap_or_else(|| self.inner.default_address.clone())
    }

    /// active target, else the remembered address
    async fn relay_tag(&self) -> String {
        let active = self.inner.session().target.clone();
        match active {
            Some(target) => target.to_string(),
            None => self.remembered_address().await,
        }
    }

    #[cfg(test)]
    fn has_timer(&self) -> bool {
        self.inner.session().timer.is_some()
    }
}

/// resets a Connecting session if connect() is dropped before it settles
struct ConnectAttempt<'a> {
    inner: &'a Inner,
    generation: u64,
    armed: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.inner.session();
        if session.is_current(self.generation, ConnectionState::Connecting) {
            session.reset();
        }
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// one steady-state tick; false once the session it belongs to is gone
    async fn poll_once(&self, generation: u64) -> bool {
        let target = {
            let session = self.session();
            if !session.is_current(generation, ConnectionState::Connected) {
                return false;
            }
            match session.target.clone() {
                Some(target) => target,
                None => return false,
            }
        };

        match self.device.fetch_reading(&target).await {
            Ok(reading) => {
                let previous = {
                    let mut session = self.session();
                    if !session.is_current(generation, ConnectionState::Connected) {
                        return false;
                    }
                    session.last_error = None;
                    session.last_success_at = Some(reading.observed_at);
                    session.last_reading.replace(reading.clone())
                };
                self.record(generation, &target, previous.as_ref(), &reading)
                    .await;
            }
            Err(e) => {
                warn!("poll of {target} failed: {e}");
                let mut session = self.session();
                if !session.is_current(generation, ConnectionState::Connected) {
                    return false;
                }
                session.last_error = Some(e.to_string());
            }
        }
        true
    }

    /// store a fresh reading and evaluate the movement edge against `previous`
    async fn record(
        &self,
        generation: u64,
        target: &ConnectionTarget,
        previous: Option<&Reading>,
        reading: &Reading,
    ) {
        if self.show_sensor_data {
            info!(
                "[{target}] temp: {:.1}°C | humidity: {:.1}% | movement: {}",
                reading.temperature, reading.humidity, reading.movement_alert
            );
        } else {
            debug!(?reading, "reading from {target}");
        }

        if let Err(e) = self.history.append(reading.clone()).await {
            warn!("failed to store reading: {e}");
            let mut session = self.session();
            if session.generation == generation {
                session.last_error = Some(format!("history not saved: {e}"));
            }
        }

        self.alerts.on_reading(previous, reading, target);
    }
}
