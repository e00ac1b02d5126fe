//! Error types for drishti-io
//!
//! # Error Recovery Strategies
//!
//! ## Transient Errors (Handled Internally)
//!
//! - **`Connection`**: Network setup or socket I/O failure. `StreamClient`
//!   recovers these itself by reconnecting with bounded backoff; the error
//!   only surfaces when the very first connection cannot be established.
//!
//! - **`MalformedPacket`**: Framing sanity failure (bad signature with
//!   failover disabled, or an implausible size field). Fatal for the current
//!   connection; the client drops it and reconnects. When raised by a
//!   sub-parser it means the buffer did not match the advertised layout and
//!   the packet is discarded.
//!
//! ## Fatal Errors (Stop the Stream)
//!
//! - **`FirmwareVersionMismatch`** / **`FirmwareWatchdogViolation`**: the
//!   sensor reported an incompatible or unhealthy firmware state in a data
//!   packet. No cloud is produced for that packet; the recommended response
//!   is to shut the pipeline down.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`InvalidReturnSelection`**, **`InvalidDegreesPerCloud`**,
//!   **`InvalidVerticalAngles`**: raised synchronously by parser setters,
//!   never from packet data.
//!
//! - **`Config`**: configuration file invalid or out of range.

use thiserror::Error;

/// Errors that can occur in drishti-io
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Sensor firmware does not match the client software version")]
    FirmwareVersionMismatch,

    #[error("Sensor firmware reported a watchdog violation")]
    FirmwareWatchdogViolation,

    #[error("Invalid return selection: {0}")]
    InvalidReturnSelection(usize),

    #[error("Invalid degrees per cloud: {0} (must be in (0, 360])")]
    InvalidDegreesPerCloud(f64),

    #[error("Invalid vertical angles: {0}")]
    InvalidVerticalAngles(String),

    #[error("Unknown sensor type: {0}")]
    UnknownSensor(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
