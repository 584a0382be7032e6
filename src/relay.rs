//! ==============================================================================
//! relay.rs - push the stored history to the collector
//! ==============================================================================
//!
//! purpose:
//!     one-shot POST of every history entry to a fixed collector url.
//!
//! result contract:
//!     once the request round-trips, whatever status came back is a result,
//!     not an error: 4xx/5xx show up as `success == false` with the status and
//!     body kept for display. only transport problems (timeout, refused,
//!     dns) are returned as RelayError.
//!
//! payload:
//!     {"device_id": "ESP32_192_168_1_108", "readings": [...],
//!      "total_readings": 3, "timestamp": "2026-10-18T09:00:00Z"}
//!
//! ==============================================================================

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::domain::HistoryEntry;
use crate::error::RelayError;

#[derive(Serialize)]
struct RelayPayload<'a> {
    device_id: String,
    readings: &'a [HistoryEntry],
    total_readings: usize,
    timestamp: String,
}

/// what the collector said
#[derive(Debug, Clone, Serialize)]
pub struct RelayResult {
    pub success: bool,
    pub status: u16,
    pub message: String,
    /// raw response body
    pub body: String,
    /// body parsed as json when possible, otherwise the raw text
    pub data: Value,
}

#[derive(Clone, Debug)]
pub struct RelayClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            timeout: config.timeout(),
        }
    }

    pub async fn send(
        &self,
        entries: &[HistoryEntry],
        device_tag: &str,
    ) -> Result<RelayResult, RelayError> {
        if entries.is_empty() {
            return Err(RelayError::EmptyHistory);
        }

        let payload = RelayPayload {
            device_id: device_id(device_tag),
            readings: entries,
            total_readings: entries.len(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let request = async {
            let response = self
                .http
                .post(&self.url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&payload)
                .send()
                .await
                .map_err(|e| RelayError::Connection(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| RelayError::Connection(e.to_string()))?;
            Ok::<_, RelayError>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(RelayError::Timeout(self.timeout.as_millis() as u64)),
        };

        let success = status.is_success();
        let message = if success {
            "Datos enviados correctamente".to_string()
        } else {
            format!("Error {}", status.as_u16())
        };
        let data = serde_json::from_str(&body).unwrap_or_else(|_| Value::String(body.clone()));

        if success {
            info!("relayed {} readings ({})", entries.len(), status);
        } else {
            warn!("collector rejected relay: {} {}", status, body);
        }

        Ok(RelayResult {
            success,
            status: status.as_u16(),
            message,
            body,
            data,
        })
    }
}

/// collector-side device tag, e.g. `192.168.1.108` -> `ESP32_192_168_1_108`
pub fn device_id(device_tag: &str) -> String {
    format!("ESP32_{}", device_tag.replace('.', "_"))
}
