//! error taxonomy shared by the device, storage, relay and controller layers

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid device address: {0:?}")]
pub struct AddressError(pub String);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device did not answer within {0} ms")]
    Timeout(u64),

    #[error("device replied with HTTP {status}")]
    Http { status: u16 },

    #[error("could not parse device payload: {0}")]
    Parse(String),

    #[error("connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no readings to send")]
    EmptyHistory,

    #[error("collector did not answer within {0} ms")]
    Timeout(u64),

    #[error("connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] AddressError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("a session is already active for {0}")]
    AlreadyActive(String),

    #[error("connection attempt was cancelled")]
    Cancelled,

    #[error("a relay is already in flight")]
    RelayInFlight,
}
