//! High-level flash run orchestration.

use crate::error::{Error, Result};
use crate::options::FlashOptions;
use crate::protocol::handshake::{self, ErrorWatch};
use crate::protocol::{TransferMode, go};
use crate::session::{Link, Session, Subscription};
use crate::transfer::{TransferDriver, TransferStats};
use log::info;
use std::io::{self, Read};
use std::path::Path;
use std::thread;

/// Sequences a complete flash run over a [`Link`].
///
/// Phases run strictly one after another — reboot magic, handshake,
/// transfer, go, monitor — and each phase takes the session's single
/// listener for exactly as long as it needs it.
///
/// Generic over the port seam; production code uses [`Flasher<Session>`]
/// via [`Flasher::open`].
pub struct Flasher<L: Link> {
    link: L,
    opts: FlashOptions,
    mode: Option<TransferMode>,
}

impl Flasher<Session> {
    /// Validate `opts` and open the serial port at the flash baud rate.
    ///
    /// Configuration conflicts are reported before the port is touched.
    pub fn open(opts: FlashOptions) -> Result<Self> {
        opts.validate()?;
        let link = Session::open(&opts.port, opts.flash_baud)?;
        Ok(Self {
            link,
            opts,
            mode: None,
        })
    }
}

impl<L: Link> Flasher<L> {
    /// Build a flasher over an already-open link.
    pub fn with_link(link: L, opts: FlashOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            link,
            opts,
            mode: None,
        })
    }

    /// The configuration this flasher runs with.
    pub fn options(&self) -> &FlashOptions {
        &self.opts
    }

    /// The negotiated transfer mode, once [`Flasher::connect`] succeeded.
    pub fn mode(&self) -> Option<TransferMode> {
        self.mode
    }

    /// Send the configured reboot magic at the user baud rate, then wait
    /// out the reboot delay. No-op when no magic is configured.
    pub fn reboot(&mut self) -> Result<()> {
        let Some(magic) = self.opts.reboot_magic.clone() else {
            return Ok(());
        };
        info!("sending reboot magic {magic:?}");
        self.link.set_baud(self.opts.user_baud)?;
        self.link.send(magic.as_bytes())?;
        self.link.drain()?;
        thread::sleep(self.opts.reboot_delay);
        Ok(())
    }

    /// Reset the device and negotiate the transfer mode.
    pub fn connect(&mut self) -> Result<TransferMode> {
        self.link.set_baud(self.opts.flash_baud)?;
        let mode = handshake::reset_and_sync(&mut self.link, &self.opts)?;
        self.mode = Some(mode);
        Ok(mode)
    }

    /// Stream a hex-record source to the device.
    ///
    /// Requires a prior successful [`Flasher::connect`]. While the stream
    /// is in flight the error watcher owns the listener; when
    /// acknowledgements are on and no go command will follow, the session
    /// is drained and given a settle period to catch late error reports
    /// before the watcher is removed.
    pub fn upload<R: Read>(
        &mut self,
        source: R,
        total: u64,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<TransferStats> {
        let mode = self.mode.ok_or_else(|| {
            Error::Protocol("device not synchronized; connect before uploading".into())
        })?;

        let watch = self
            .opts
            .wait_ack
            .then(|| ErrorWatch::arm(&mut self.link));

        let driver = TransferDriver::new(
            &mut self.link,
            mode,
            self.opts.chunk_size,
            self.opts.unreliable_link,
        );
        let stats = driver.run(source, total, watch.as_ref(), progress)?;

        if let Some(watch) = watch.as_ref() {
            if !self.opts.send_go {
                handshake::settle_after_transfer(&mut self.link, watch)?;
            }
        }
        Ok(stats)
    }

    /// Stream a hex file to the device.
    pub fn upload_file(
        &mut self,
        path: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<TransferStats> {
        let file = std::fs::File::open(path)?;
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.upload(file, total, progress)
    }

    /// Send the run command and wait for its acknowledgement.
    pub fn go(&mut self) -> Result<()> {
        go::send_go(&mut self.link, &self.opts)
    }

    /// Switch to the user baud rate and forward everything the device
    /// prints to `out`.
    ///
    /// Returns the live listener handle; dropping it ends the
    /// pass-through.
    pub fn monitor<W: io::Write + Send + 'static>(&mut self, mut out: W) -> Result<Subscription> {
        self.link.set_baud(self.opts.user_baud)?;
        info!("monitoring at {} baud", self.opts.user_baud);
        Ok(self.link.subscribe(Box::new(move |data| {
            let _ = out.write_all(data);
            let _ = out.flush();
        })))
    }

    /// Drain and close the underlying session.
    pub fn close(&mut self) -> Result<()> {
        self.link.close()
    }
}
