//! Error types for hexboot.

use std::io;
use thiserror::Error;

/// Result type for hexboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hexboot operations.
///
/// Every variant is fatal for the current run: the tool never retries a
/// transfer on its own, a failed run must be restarted by the operator.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening the serial port failed.
    #[error("cannot open {port}: {source}")]
    PortOpen {
        /// Name of the port that could not be opened.
        port: String,
        /// Underlying serial port error.
        source: serialport::Error,
    },

    /// Writing to the serial port failed.
    #[error("serial write failed: {0}")]
    PortWrite(#[source] io::Error),

    /// Draining pending output to the wire failed.
    #[error("serial drain failed: {0}")]
    PortDrain(#[source] io::Error),

    /// A byte outside a record that is neither a record start nor whitespace.
    #[error("unexpected byte {byte:#04x} outside a record at offset {offset}")]
    MalformedHexFile {
        /// The offending input byte.
        byte: u8,
        /// 1-based offset of the byte in the input stream.
        offset: u64,
    },

    /// A record contained an odd number of hex digits.
    #[error("odd number of hex digits in record at offset {offset}")]
    OddNibbleCount {
        /// 1-based offset of the terminating non-hex byte.
        offset: u64,
    },

    /// A record's declared payload does not fit the one-byte binary length.
    #[error("record payload of {0} bytes exceeds the binary record limit")]
    OversizedRecord(u8),

    /// The bootloader reported an error during transfer.
    #[error("device reported error: {0}")]
    Device(String),

    /// Mutually exclusive options were requested.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// The device and host disagree about the negotiated protocol state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait for a device marker expired.
    ///
    /// Only reachable when an ack deadline is configured; by default all
    /// marker waits are unbounded.
    #[error("timed out waiting for {0}")]
    AckTimeout(&'static str),

    /// I/O error (hex file reading, listener plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
