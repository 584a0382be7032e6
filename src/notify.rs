//! ==============================================================================
//! notify.rs - user notifications and movement alert edge detection
//! ==============================================================================
//!
//! purpose:
//!     turns a false -> true flip of the device's movement flag into exactly
//!     one user notification, and asks the device to clear its latch.
//!
//! relationships:
//!     - used by: controller.rs (feeds previous + current reading each poll)
//!     - uses: device.rs (reset_alert, best effort, on its own task)
//!
//! sinks:
//!     one NotificationSink is picked at startup from config:
//!     - LogNotifier: emits a warn-level tracing event
//!     - CommandNotifier: runs an external program (notify-send by default)
//!
//! ==============================================================================

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{NotificationBackend, NotificationsConfig};
use crate::device::DeviceClient;
use crate::domain::{ConnectionTarget, Reading};

pub const MOVEMENT_TITLE: &str = "Alerta de Seguridad";
pub const MOVEMENT_BODY: &str = "Se ha detectado movimiento en tu dispositivo ESP32.";
pub const CONNECTION_TITLE: &str = "Monitor ESP32";

/// fire-and-forget delivery of a titled message to the user
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        warn!(target: "notification", "{title}: {body}");
    }
}

pub struct CommandNotifier {
    program: String,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl NotificationSink for CommandNotifier {
    fn notify(&self, title: &str, body: &str) {
        let mut command = tokio::process::Command::new(&self.program);
        command.arg(title).arg(body);

        match command.spawn() {
            Ok(mut child) => {
                let program = self.program.clone();
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            warn!("{program} exited with {status}")
                        }
                        Err(e) => warn!("{program} failed: {e}"),
                        _ => {}
                    }
                });
            }
            Err(e) => warn!("failed to run {}: {e}", self.program),
        }
    }
}

/// build the sink selected in config
pub fn sink_from_config(config: &NotificationsConfig) -> Arc<dyn NotificationSink> {
    match config.backend {
        NotificationBackend::Log => Arc::new(LogNotifier),
        NotificationBackend::Command => Arc::new(CommandNotifier::new(config.command.clone())),
    }
}

/// true when the movement flag flipped from false (or unknown) to true
pub fn is_rising_edge(previous: Option<&Reading>, current: &Reading) -> bool {
    current.movement_alert && !previous.map(|p| p.movement_alert).unwrap_or(false)
}

#[derive(Clone)]
pub struct AlertNotifier {
    sink: Arc<dyn NotificationSink>,
    device: DeviceClient,
}

impl AlertNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, device: DeviceClient) -> Self {
        Self { sink, device }
    }

    /// notify on a rising edge and kick off the device reset
    ///
    /// holds no state of its own: the caller supplies the previous reading.
    /// returns the handle of the reset task when the alert fired.
    pub fn on_reading(
        &self,
        previous: Option<&Reading>,
        current: &Reading,
        target: &ConnectionTarget,
    ) -> Option<JoinHandle<()>> {
        if !is_rising_edge(previous, current) {
            return None;
        }

        info!("movement detected on {target}");
        self.sink.notify(MOVEMENT_TITLE, MOVEMENT_BODY);

        let device = self.device.clone();
        let target = target.clone();
        Some(tokio::spawn(async move {
            device.reset_alert(&target).await;
        }))
    }

    pub fn connection_notice(&self, body: &str) {
        self.sink.notify(CONNECTION_TITLE, body);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::NotificationSink;

    /// keeps every notification for later inspection
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub fn titles(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }

        pub fn count(&self, title: &str) -> usize {
            self.titles().iter().filter(|t| *t == title).count()
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, title: &str, body: &str) {
            self.sent.lock().unwrap().push((title.to_string(), body.to_string()));
        }
    }
}
