//! esp32-monitor: polls an ESP32 sensor node over http, keeps a rolling
//! history of its readings, raises a notification when movement is first
//! reported, and relays the history to a collector on demand.

pub mod api;
pub mod config;
pub mod controller;
pub mod device;
pub mod domain;
pub mod error;
pub mod history;
pub mod notify;
pub mod relay;
pub mod storage;

pub use controller::PollingController;
pub use domain::{ConnectionState, ConnectionTarget, HistoryEntry, Reading, Snapshot};
pub use error::ControllerError;
