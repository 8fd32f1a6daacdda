//! Reset, ready detection, fast-mode negotiation, and error watching.
//!
//! The handshake walks the device from an unknown state into a known-ready
//! bootloader: it writes the reset pattern, waits for the ready banner,
//! and records whether the bootloader advertises the compact binary mode.
//! During the transfer an armed [`ErrorWatch`] scans everything the device
//! prints for an error report and lets the driver abort mid-stream.

use crate::error::{Error, Result};
use crate::line::LineBuffer;
use crate::options::{FastMode, FlashOptions};
use crate::protocol::{
    self, CMD_RESET, RESET_FILL, RESET_FILL_LEN, ReadyScan, TransferMode, wait_for,
};
use crate::session::{Link, Subscription};
use log::{debug, info};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Delay after draining the last transfer bytes, so error reports that
/// arrive just behind them are still caught.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Write the reset pattern: fill bytes to flush a previously interrupted
/// binary record out of the bootloader's record state, then the reset
/// command itself.
fn send_reset<L: Link>(link: &mut L) -> Result<()> {
    debug!("sending reset command");
    let mut pattern = [RESET_FILL; RESET_FILL_LEN + 1];
    pattern[RESET_FILL_LEN] = CMD_RESET;
    link.send(&pattern)?;
    link.drain()
}

/// Reset the device and wait until it reports ready, negotiating the
/// transfer mode from the banner and the configured policy.
///
/// With acknowledgements disabled the ready wait is skipped entirely and
/// the mode follows the configuration alone: binary only when forced
/// (explicitly or by an unreliable link), since the device's capability
/// cannot be observed.
pub fn reset_and_sync<L: Link>(link: &mut L, opts: &FlashOptions) -> Result<TransferMode> {
    if !opts.wait_ack {
        send_reset(link)?;
        let mode = if opts.fast == FastMode::Always || opts.unreliable_link {
            TransferMode::Binary
        } else {
            TransferMode::Plain
        };
        debug!("acknowledgements disabled, assuming {mode:?} mode");
        return Ok(mode);
    }

    // Listener goes in before the reset so a banner that arrives
    // immediately is not missed.
    let (tx, rx) = mpsc::channel();
    let mut lines = LineBuffer::new();
    let sub = link.subscribe(Box::new(move |data| {
        lines.append(data);
        match protocol::scan_ready(lines.text()) {
            ReadyScan::Pending => lines.truncate_to_last_line(),
            ReadyScan::Plain => {
                let _ = tx.send(false);
                lines.clear();
            }
            ReadyScan::Fast => {
                let _ = tx.send(true);
                lines.clear();
            }
        }
    }));

    send_reset(link)?;
    info!("waiting for device ready");
    let device_fast = wait_for(&rx, opts.ack_deadline, "device ready")?;
    drop(sub);

    negotiate(device_fast, opts)
}

fn negotiate(device_fast: bool, opts: &FlashOptions) -> Result<TransferMode> {
    let fast_required = opts.unreliable_link || opts.fast == FastMode::Always;
    if device_fast && opts.fast != FastMode::Never {
        info!("device ready, binary transfer mode negotiated");
        Ok(TransferMode::Binary)
    } else if fast_required {
        Err(Error::Protocol(
            "binary transfer mode is required, but the bootloader only \
             advertises plain mode"
                .into(),
        ))
    } else {
        info!("device ready, plain transfer mode");
        Ok(TransferMode::Plain)
    }
}

/// Armed watcher for device-reported transfer errors.
///
/// Holds the session's listener for the duration of the transfer. The
/// report pattern is `#ERR:<message>\r`; once a complete report is seen,
/// [`ErrorWatch::check`] fails with [`Error::Device`].
pub struct ErrorWatch {
    rx: mpsc::Receiver<String>,
    _sub: Subscription,
}

impl ErrorWatch {
    /// Install the error-watching listener.
    pub fn arm<L: Link>(link: &mut L) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut lines = LineBuffer::new();
        let sub = link.subscribe(Box::new(move |data| {
            lines.append(data);
            if let Some(msg) = protocol::scan_device_error(lines.text()) {
                let _ = tx.send(msg);
                lines.clear();
            } else {
                lines.truncate_to_last_line();
            }
        }));
        Self { rx, _sub: sub }
    }

    /// Non-blocking check; fails once the device has reported an error.
    pub fn check(&self) -> Result<()> {
        match self.rx.try_recv() {
            Ok(msg) => Err(Error::Device(msg)),
            Err(_) => Ok(()),
        }
    }
}

/// Drain the wire after the last transfer byte and give the device a
/// moment to report a late error before the watch is disarmed.
pub fn settle_after_transfer<L: Link>(link: &mut L, watch: &ErrorWatch) -> Result<()> {
    link.drain()?;
    thread::sleep(SETTLE_DELAY);
    watch.check()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockLink;

    fn opts() -> FlashOptions {
        FlashOptions::new("mock")
    }

    #[test]
    fn test_reset_pattern_shape() {
        let mut link = MockLink::new();
        link.reply_on(b"R", b"IHEX\r\n");

        reset_and_sync(&mut link, &opts()).unwrap();

        assert_eq!(link.sent.len(), RESET_FILL_LEN + 1);
        assert!(link.sent[..RESET_FILL_LEN].iter().all(|b| *b == RESET_FILL));
        assert_eq!(link.sent[RESET_FILL_LEN], b'R');
        assert_eq!(link.drains, 1);
    }

    #[test]
    fn test_fast_capable_device_negotiates_binary() {
        let mut link = MockLink::new();
        link.reply_on(b"R", b"IHEX-F\r\n");

        let mode = reset_and_sync(&mut link, &opts()).unwrap();
        assert_eq!(mode, TransferMode::Binary);
    }

    #[test]
    fn test_plain_device_stays_plain() {
        let mut link = MockLink::new();
        link.reply_on(b"R", b"IHEX\r\n");

        let mode = reset_and_sync(&mut link, &opts()).unwrap();
        assert_eq!(mode, TransferMode::Plain);
    }

    #[test]
    fn test_fast_disabled_overrides_capable_device() {
        let mut link = MockLink::new();
        link.reply_on(b"R", b"IHEX-F\r\n");

        let mut opts = opts();
        opts.fast = FastMode::Never;
        let mode = reset_and_sync(&mut link, &opts).unwrap();
        assert_eq!(mode, TransferMode::Plain);
    }

    #[test]
    fn test_fast_required_but_not_advertised_fails() {
        let mut link = MockLink::new();
        link.reply_on(b"R", b"IHEX\r\n");

        let mut opts = opts();
        opts.fast = FastMode::Always;
        assert!(matches!(
            reset_and_sync(&mut link, &opts),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_banner_split_across_chunks() {
        let mut link = MockLink::new();
        // The ready banner arrives in two reads, cut inside the marker.
        link.reply_on(b"R", b"IHEX");
        link.reply_on(b"R", b"-F\r\n");

        let mode = reset_and_sync(&mut link, &opts()).unwrap();
        assert_eq!(mode, TransferMode::Binary);
    }

    #[test]
    fn test_no_ack_skips_ready_wait() {
        let mut link = MockLink::new();

        let mut opts = opts();
        opts.wait_ack = false;
        let mode = reset_and_sync(&mut link, &opts).unwrap();
        assert_eq!(mode, TransferMode::Plain);
        assert_eq!(link.sent.len(), RESET_FILL_LEN + 1);
    }

    #[test]
    fn test_no_ack_with_unreliable_link_assumes_binary() {
        let mut link = MockLink::new();

        let mut opts = opts();
        opts.wait_ack = false;
        opts.unreliable_link = true;
        let mode = reset_and_sync(&mut link, &opts).unwrap();
        assert_eq!(mode, TransferMode::Binary);
    }

    #[test]
    fn test_ready_wait_deadline_expires() {
        let mut link = MockLink::new();

        let mut opts = opts();
        opts.ack_deadline = Some(Duration::from_millis(30));
        assert!(matches!(
            reset_and_sync(&mut link, &opts),
            Err(Error::AckTimeout("device ready"))
        ));
    }

    #[test]
    fn test_error_watch_reports_device_error() {
        let mut link = MockLink::new();
        let watch = ErrorWatch::arm(&mut link);

        assert!(watch.check().is_ok());
        link.emit(b"#ERR:bad address\r");
        match watch.check() {
            Err(Error::Device(msg)) => assert_eq!(msg, "bad address"),
            other => panic!("expected device error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_watch_handles_split_report() {
        let mut link = MockLink::new();
        let watch = ErrorWatch::arm(&mut link);

        link.emit(b"#ERR:bad ad");
        assert!(watch.check().is_ok());
        link.emit(b"dress\r");
        assert!(matches!(watch.check(), Err(Error::Device(_))));
    }

    #[test]
    fn test_settle_drains_and_rechecks() {
        let mut link = MockLink::new();
        let watch = ErrorWatch::arm(&mut link);
        link.emit(b"#ERR:late failure\r");

        let result = settle_after_transfer(&mut link, &watch);
        assert_eq!(link.drains, 1);
        assert!(matches!(result, Err(Error::Device(_))));
    }
}
