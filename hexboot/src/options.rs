//! Flash run configuration consumed by the protocol core.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default baud rate for both flashing and user interaction.
pub const DEFAULT_BAUD: u32 = 115200;

/// Default delay after sending the reboot magic string.
pub const DEFAULT_REBOOT_DELAY: Duration = Duration::from_millis(1000);

/// Default file read chunk size for the transfer driver.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Policy for the compact binary transfer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FastMode {
    /// Use binary mode when the device advertises it.
    #[default]
    Auto,
    /// Require binary mode; fail if the device does not advertise it.
    Always,
    /// Never use binary mode, even if advertised.
    Never,
}

/// Configuration for a flash run.
///
/// Supplied by the embedding application (typically the CLI); validated
/// before any device interaction.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashOptions {
    /// Serial port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate used while flashing.
    pub flash_baud: u32,
    /// Baud rate used for the reboot magic and monitor mode.
    pub user_baud: u32,
    /// Wait for device acknowledgements (ready banner, go ack).
    pub wait_ack: bool,
    /// Binary transfer mode policy.
    pub fast: FastMode,
    /// The link runs through a buffering intermediary that corrupts long
    /// plain-text bursts; binary mode is mandatory and the encoder flushes
    /// after every record.
    pub unreliable_link: bool,
    /// Send the go command after the transfer.
    pub send_go: bool,
    /// Start delay in milliseconds sent ahead of the go command.
    pub go_delay_ms: Option<u32>,
    /// Magic string written at the user baud rate to reboot the device
    /// into its bootloader before flashing.
    pub reboot_magic: Option<String>,
    /// Delay observed after sending the reboot magic.
    pub reboot_delay: Duration,
    /// File read chunk size for the transfer driver.
    pub chunk_size: usize,
    /// Optional bound on marker waits. `None` preserves the unbounded
    /// waits of the base protocol.
    pub ack_deadline: Option<Duration>,
}

impl FlashOptions {
    /// Create options for the given port with protocol defaults.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            flash_baud: DEFAULT_BAUD,
            user_baud: DEFAULT_BAUD,
            wait_ack: true,
            fast: FastMode::default(),
            unreliable_link: false,
            send_go: true,
            go_delay_ms: None,
            reboot_magic: None,
            reboot_delay: DEFAULT_REBOOT_DELAY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_deadline: None,
        }
    }

    /// Check the option set for internal contradictions.
    ///
    /// Called before the port is opened; a conflict here never reaches the
    /// device.
    pub fn validate(&self) -> Result<()> {
        if self.unreliable_link && self.fast == FastMode::Never {
            return Err(Error::ConfigConflict(
                "an unreliable link requires the binary transfer mode, \
                 but it was explicitly disabled"
                    .into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::ConfigConflict("chunk size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = FlashOptions::new("/dev/ttyUSB0");
        assert_eq!(opts.flash_baud, DEFAULT_BAUD);
        assert_eq!(opts.user_baud, DEFAULT_BAUD);
        assert!(opts.wait_ack);
        assert_eq!(opts.fast, FastMode::Auto);
        assert!(!opts.unreliable_link);
        assert!(opts.send_go);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(opts.ack_deadline.is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_unreliable_link_with_fast_disabled_conflicts() {
        let mut opts = FlashOptions::new("/dev/ttyUSB0");
        opts.unreliable_link = true;
        opts.fast = FastMode::Never;
        assert!(matches!(opts.validate(), Err(Error::ConfigConflict(_))));
    }

    #[test]
    fn test_unreliable_link_with_auto_fast_is_fine() {
        let mut opts = FlashOptions::new("/dev/ttyUSB0");
        opts.unreliable_link = true;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut opts = FlashOptions::new("/dev/ttyUSB0");
        opts.chunk_size = 0;
        assert!(matches!(opts.validate(), Err(Error::ConfigConflict(_))));
    }
}
