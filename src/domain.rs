//! ==============================================================================
//! domain.rs - readings, history entries and connection targets
//! ==============================================================================
//!
//! purpose:
//!     the plain data the rest of the crate passes around.
//!     nothing in here does i/o.
//!
//! relationships:
//!     - produced by: device.rs (Reading), history.rs (HistoryEntry)
//!     - consumed by: controller.rs, relay.rs, api.rs
//!
//! ==============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// a single observation pulled from the device
///
/// `observed_at` is stamped by us when the response arrives; the device
/// clock is never consulted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub movement_alert: bool,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64, movement_alert: bool) -> Self {
        Self {
            temperature,
            humidity,
            movement_alert,
            observed_at: Utc::now(),
        }
    }
}

/// a reading as it sits in the persisted history
///
/// serialises flat: `{id, temperature, humidity, movement_alert, timestamp, date}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(rename = "date")]
    pub captured_date: String,
}

/// a validated device address (IPv4 dotted quad)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConnectionTarget {
    address: String,
}

impl ConnectionTarget {
    pub fn parse(candidate: &str) -> Result<Self, AddressError> {
        if is_valid_address(candidate) {
            Ok(Self {
                address: candidate.to_string(),
            })
        } else {
            Err(AddressError(candidate.to_string()))
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl FromStr for ConnectionTarget {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// four dot-separated decimal octets, each 0-255, nothing before or after
///
/// octets may carry leading zeros (`010`), up to three digits.
pub fn is_valid_address(candidate: &str) -> bool {
    let octets: Vec<&str> = candidate.split('.').collect();
    if octets.len() != 4 {
        return false;
    }

    octets.iter().all(|octet| {
        !octet.is_empty()
            && octet.len() <= 3
            && octet.bytes().all(|b| b.is_ascii_digit())
            && octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
}

/// read-only view handed to the ui
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub target: Option<ConnectionTarget>,
    pub last_reading: Option<Reading>,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
}
