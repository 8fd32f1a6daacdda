//! Bootloader wire protocol: commands, markers, and scanners.
//!
//! The device side speaks a line-oriented text protocol for control and
//! status, with an optional compact binary encoding for the hex records
//! themselves. Everything the device reports is matched as a substring of
//! accumulated, newline-truncated text.

pub mod encoder;
pub mod go;
pub mod handshake;

/// Fill byte of the reset pattern. Chosen so that a bootloader interrupted
/// in the middle of a binary record cannot read the fill as a low memory
/// address and overwrite itself.
pub const RESET_FILL: u8 = 0x80;

/// Number of fill bytes sent ahead of the reset command.
pub const RESET_FILL_LEN: usize = 256;

/// Reset command byte, sent after the fill pattern.
pub const CMD_RESET: u8 = b'R';

/// Run command byte.
pub const CMD_GO: u8 = b'g';

/// Start-delay directive prefix; followed by uppercase hex milliseconds
/// and a newline.
pub const CMD_START_DELAY: u8 = b's';

/// Record start marker in the plaintext hex stream.
pub const RECORD_MARK_TEXT: u8 = b':';

/// Record start marker in the compact binary encoding.
pub const RECORD_MARK_BINARY: u8 = b'=';

/// Printed by the bootloader once it is ready to receive records.
pub const READY_MARKER: &str = "IHEX";

/// Ready marker of a bootloader that also understands binary records.
pub const FAST_READY_MARKER: &str = "IHEX-F";

/// Prefix of a device-reported transfer error; the message runs up to the
/// next carriage return.
pub const ERROR_PREFIX: &str = "#ERR:";

/// Printed by the bootloader after it accepted the run command.
pub const GO_ACK_MARKER: &str = "\r--\r\n\n";

/// Negotiated transfer mode for the record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Hex records are passed through as text.
    Plain,
    /// Records are re-encoded into the compact binary format.
    Binary,
}

/// Outcome of scanning accumulated text for the ready banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadyScan {
    /// No decision yet; more bytes needed.
    Pending,
    /// Device is ready, plain mode only.
    Plain,
    /// Device is ready and advertises binary mode.
    Fast,
}

/// Scan for the ready banner, distinguishing `IHEX` from `IHEX-F`.
///
/// The fast marker is a superset of the plain one, so a scan must not
/// commit to plain mode while the text still ends exactly at `IHEX` or
/// `IHEX-` — the next byte decides.
pub(crate) fn scan_ready(text: &str) -> ReadyScan {
    if text.contains(FAST_READY_MARKER) {
        return ReadyScan::Fast;
    }
    let Some(pos) = text.find(READY_MARKER) else {
        return ReadyScan::Pending;
    };
    let rest = &text[pos + READY_MARKER.len()..];
    if rest.is_empty() || rest == "-" {
        ReadyScan::Pending
    } else {
        ReadyScan::Plain
    }
}

/// Block until a listener resolves the pending wait.
///
/// Without a deadline the wait is unbounded, preserving the base protocol
/// behavior (the operator interrupts the process if the device never
/// answers). With a deadline, expiry surfaces as
/// [`Error::AckTimeout`](crate::Error::AckTimeout).
pub(crate) fn wait_for<T>(
    rx: &std::sync::mpsc::Receiver<T>,
    deadline: Option<std::time::Duration>,
    what: &'static str,
) -> crate::Result<T> {
    use crate::error::Error;
    use std::sync::mpsc::RecvTimeoutError;

    match deadline {
        None => rx.recv().map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "listener dropped while waiting",
            ))
        }),
        Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::AckTimeout(what),
            RecvTimeoutError::Disconnected => Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "listener dropped while waiting",
            )),
        }),
    }
}

/// Scan for a completed device error report, returning its message.
///
/// Returns `None` while the report is still missing its terminating
/// carriage return.
pub(crate) fn scan_device_error(text: &str) -> Option<String> {
    let pos = text.find(ERROR_PREFIX)?;
    let rest = &text[pos + ERROR_PREFIX.len()..];
    let end = rest.find('\r')?;
    Some(rest[..end].to_string())
}
