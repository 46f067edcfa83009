// Copyright (c) 2022-2023 The MobileCoin Foundation

use tokio::time::error::Elapsed;

/// Microwallet driver error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport read / write failed (including a closed stream)
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or enumerated
    #[cfg(feature = "transport_serial")]
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// No device available for connection
    #[error("No device found")]
    NoDevice,

    /// Device returned an `error` field, message passed through verbatim
    #[error("{0}")]
    DeviceRejected(String),

    /// Device reported a curve this driver does not recognise
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Response did not contain a required field
    #[error("Missing response field: {0}")]
    MissingField(&'static str),

    /// Hex field of unexpected length
    #[error("Invalid length for {field} (expected {expected} hex chars, got {actual})")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Hex field could not be decoded
    #[error("Malformed hex in response: {0}")]
    Malformed(#[from] hex::FromHexError),

    /// Integer wider than the curve field
    #[error("Value exceeds {0} byte field width")]
    Overflow(usize),

    /// Request timeout
    #[error("Timeout waiting for device response")]
    RequestTimeout,

    /// An earlier exchange did not complete, request / response pairing on
    /// this transport is lost
    #[error("Transport desynchronized by an incomplete exchange, reconnect to continue")]
    Desynchronized,

    /// Caller supplied value cannot be sent to the device
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    /// Check whether this error was reported by the device itself
    pub fn is_device_rejection(&self) -> bool {
        matches!(self, Error::DeviceRejected(_))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::RequestTimeout
    }
}
