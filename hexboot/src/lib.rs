//! # hexboot
//!
//! A library for streaming hex-record firmware images to a microcontroller
//! bootloader over a serial link.
//!
//! This crate implements the host side of the bootloader protocol:
//!
//! - Reset handshake with ready detection and fast-mode negotiation
//! - A resumable hex-to-binary record encoder for the compact fast mode
//! - Device error watching that aborts an in-flight transfer
//! - Go command with textual acknowledgement
//! - Serial port lifecycle (baud switch with reopen, drain, single
//!   byte-stream listener)
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------+
//! |          Flasher            |  reboot -> connect -> upload -> go
//! +------+-------------+--------+
//!        |             |
//!        v             v
//! +------+-----+ +-----+-------+
//! | handshake/ | | transfer /  |
//! | go         | | encoder     |
//! +------+-----+ +-----+-------+
//!        |             |
//!        v             v
//! +------+-------------+--------+
//! |         Link trait          |
//! +------+-------------+--------+
//!        |             |
//!   Session (serial)  mock (tests)
//! ```
//!
//! The protocol layer only sees the [`Link`] seam, so all of it is
//! testable without hardware.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hexboot::{FlashOptions, Flasher};
//!
//! fn main() -> hexboot::Result<()> {
//!     let mut opts = FlashOptions::new("/dev/ttyUSB0");
//!     opts.flash_baud = 921600;
//!
//!     let mut flasher = Flasher::open(opts)?;
//!     flasher.connect()?;
//!     flasher.upload_file("kernel.hex".as_ref(), &mut |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     flasher.go()?;
//!     flasher.close()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flasher;
pub mod line;
pub mod options;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use {
    error::{Error, Result},
    flasher::Flasher,
    line::LineBuffer,
    options::{DEFAULT_BAUD, DEFAULT_CHUNK_SIZE, FastMode, FlashOptions},
    protocol::{TransferMode, encoder::RecordEncoder, handshake::ErrorWatch},
    session::{Link, Listener, Session, Subscription},
    transfer::{TransferDriver, TransferStats},
};
