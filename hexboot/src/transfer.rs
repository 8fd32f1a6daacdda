//! Transfer driver: streams the hex file to the device.

use crate::error::{Error, Result};
use crate::protocol::TransferMode;
use crate::protocol::encoder::RecordEncoder;
use crate::protocol::handshake::ErrorWatch;
use crate::session::Link;
use log::info;
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Observability summary of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// Input bytes consumed from the hex file.
    pub bytes: u64,
    /// The transfer mode that was in effect.
    pub mode: TransferMode,
    /// Wall-clock time of the transfer. Reported for operator feedback,
    /// not a correctness contract.
    pub elapsed: Duration,
}

/// Streams a hex-record source to the device in fixed-size chunks.
///
/// In binary mode every byte runs through the [`RecordEncoder`]; in plain
/// mode chunks are written through untouched. An armed [`ErrorWatch`] is
/// consulted between chunks so a device-reported error aborts the stream
/// even mid-record, after which nothing further is written — buffered
/// encoder output is abandoned.
pub struct TransferDriver<'a, L: Link> {
    link: &'a mut L,
    mode: TransferMode,
    chunk_size: usize,
    encoder: Option<RecordEncoder>,
}

impl<'a, L: Link> TransferDriver<'a, L> {
    /// Create a driver for the negotiated `mode`.
    ///
    /// `flush_per_record` is forwarded to the encoder for transports that
    /// are unreliable at burst boundaries.
    pub fn new(
        link: &'a mut L,
        mode: TransferMode,
        chunk_size: usize,
        flush_per_record: bool,
    ) -> Self {
        let encoder = match mode {
            TransferMode::Binary => Some(RecordEncoder::new(flush_per_record)),
            TransferMode::Plain => None,
        };
        Self {
            link,
            mode,
            chunk_size,
            encoder,
        }
    }

    /// Feed the whole `source` to the device.
    ///
    /// `total` is a size hint for the progress callback (0 when unknown);
    /// `progress` receives (consumed, total) after every chunk.
    pub fn run<R: Read>(
        mut self,
        mut source: R,
        total: u64,
        watch: Option<&ErrorWatch>,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<TransferStats> {
        let started = Instant::now();
        let mut buf = vec![0u8; self.chunk_size];
        let mut consumed: u64 = 0;

        info!("sending {total} bytes in {:?} mode", self.mode);
        loop {
            if let Some(watch) = watch {
                watch.check()?;
            }

            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };

            match self.encoder.as_mut() {
                Some(encoder) => {
                    for &byte in &buf[..n] {
                        encoder.feed(byte, self.link)?;
                    }
                }
                None => self.link.send(&buf[..n])?,
            }

            consumed += n as u64;
            progress(consumed, total);
        }

        if let Some(watch) = watch {
            watch.check()?;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.flush(self.link)?;
        }

        let elapsed = started.elapsed();
        info!(
            "transferred {consumed} bytes in {:.1}s",
            elapsed.as_secs_f64()
        );
        Ok(TransferStats {
            bytes: consumed,
            mode: self.mode,
            elapsed,
        })
    }
}
