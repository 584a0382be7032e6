//! ==============================================================================
//! device.rs - http client for the esp32 sensor node
//! ==============================================================================
//!
//! purpose:
//!     pulls readings from the device and clears its movement latch.
//!
//! device api:
//!     GET  /data         -> {"temperature": .., "humidity": .., "movement_alert": ..}
//!     POST /reset_alert  -> any 2xx
//!
//! bounds:
//!     every request is wrapped in tokio::time::timeout. when the bound
//!     elapses the request future is dropped, which cancels it.
//!
//! leniency:
//!     the firmware is not trusted to send well-typed json. numbers that
//!     arrive as strings are parsed, anything else becomes 0.0, and the
//!     alert flag follows javascript truthiness. this keeps a sloppy
//!     device usable instead of failing every poll.
//!
//! ==============================================================================

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::domain::{ConnectionTarget, Reading};
use crate::error::DeviceError;

#[derive(Clone, Debug)]
pub struct DeviceClient {
    http: reqwest::Client,
    port: u16,
    fetch_timeout: Duration,
    reset_timeout: Duration,
}

impl DeviceClient {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            port: config.port,
            fetch_timeout: config.fetch_timeout(),
            reset_timeout: config.reset_timeout(),
        }
    }

    fn url(&self, target: &ConnectionTarget, path: &str) -> String {
        if self.port == 80 {
            format!("http://{}{}", target.address(), path)
        } else {
            format!("http://{}:{}{}", target.address(), self.port, path)
        }
    }

    /// GET /data, bounded by the fetch timeout
    pub async fn fetch_reading(&self, target: &ConnectionTarget) -> Result<Reading, DeviceError> {
        let url = self.url(target, "/data");
        debug!("fetching {url}");

        let request = async {
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| DeviceError::Connection(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(DeviceError::Http {
                    status: status.as_u16(),
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| DeviceError::Connection(e.to_string()))?;
            parse_reading(&body)
        };

        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout(self.fetch_timeout.as_millis() as u64)),
        }
    }

    /// POST /reset_alert, bounded by the reset timeout
    ///
    /// advisory only: failures are logged here and never reach the caller.
    pub async fn reset_alert(&self, target: &ConnectionTarget) {
        let url = self.url(target, "/reset_alert");

        let request = async {
            let response = self
                .http
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .send()
                .await
                .map_err(|e| DeviceError::Connection(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok::<(), DeviceError>(())
            } else {
                Err(DeviceError::Http {
                    status: status.as_u16(),
                })
            }
        };

        let outcome = match tokio::time::timeout(self.reset_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout(self.reset_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(()) => debug!("movement alert reset on {target}"),
            Err(e) => warn!("failed to reset movement alert on {target}: {e}"),
        }
    }
}

/// decode a /data body into a Reading stamped with the current time
pub fn parse_reading(body: &[u8]) -> Result<Reading, DeviceError> {
    let parsed: Value =
        serde_json::from_slice(body).map_err(|e| DeviceError::Parse(e.to_string()))?;

    if !parsed.is_object() {
        return Err(DeviceError::Parse(format!("expected a json object, got {parsed}")));
    }

    Ok(Reading::new(
        coerce_number(&parsed["temperature"]),
        coerce_number(&parsed["humidity"]),
        truthy(&parsed["movement_alert"]),
    ))
}

/// numbers pass through, numeric prefixes of strings are parsed, the rest is 0.0
///
/// non-finite results also become 0.0: json has no encoding for them, so they
/// would not survive a trip through the stored history.
fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => leading_float(s.trim_start()).unwrap_or(0.0),
        _ => 0.0,
    };
    if !n.is_finite() {
        0.0
    } else {
        n
    }
}

// longest prefix that parses as a float, so "23.5C" reads as 23.5
fn leading_float(s: &str) -> Option<f64> {
    let mut best = None;
    for (i, c) in s.char_indices() {
        if !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) {
            break;
        }
        let end = i + c.len_utf8();
        if let Ok(v) = s[..end].parse::<f64>() {
            best = Some(v);
        }
    }
    best
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0 && !v.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
