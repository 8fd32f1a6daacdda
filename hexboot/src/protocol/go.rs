//! Run command and its acknowledgement.

use crate::error::{Error, Result};
use crate::line::LineBuffer;
use crate::options::FlashOptions;
use crate::protocol::{self, CMD_GO, CMD_START_DELAY, GO_ACK_MARKER, wait_for};
use crate::session::Link;
use log::{debug, info};
use std::sync::mpsc;

enum GoEvent {
    Acked,
    Failed(String),
}

/// Send the run command, optionally preceded by a start-delay directive,
/// and wait for the device's acknowledgement.
///
/// The acknowledgement wait shares one listener between the ack marker and
/// the device error report, so a bootloader that rejects the command is
/// distinguished from one that never answers. With acknowledgements
/// disabled the call returns as soon as the command is on the wire.
pub fn send_go<L: Link>(link: &mut L, opts: &FlashOptions) -> Result<()> {
    if let Some(ms) = opts.go_delay_ms {
        debug!("requesting start delay of {ms} ms");
        let directive = format!("{}{ms:X}\n", CMD_START_DELAY as char);
        link.send(directive.as_bytes())?;
    }

    if !opts.wait_ack {
        info!("sending go command");
        link.send(&[CMD_GO])?;
        return link.drain();
    }

    let (tx, rx) = mpsc::channel();
    let mut lines = LineBuffer::new();
    let _sub = link.subscribe(Box::new(move |data| {
        lines.append(data);
        if let Some(msg) = protocol::scan_device_error(lines.text()) {
            let _ = tx.send(GoEvent::Failed(msg));
            lines.clear();
        } else if lines.text().contains(GO_ACK_MARKER) {
            let _ = tx.send(GoEvent::Acked);
            lines.clear();
        } else {
            lines.truncate_to_last_line();
        }
    }));

    info!("sending go command");
    link.send(&[CMD_GO])?;
    match wait_for(&rx, opts.ack_deadline, "go acknowledgement")? {
        GoEvent::Acked => {
            info!("device acknowledged go");
            Ok(())
        }
        GoEvent::Failed(msg) => Err(Error::Device(msg)),
    }
}
