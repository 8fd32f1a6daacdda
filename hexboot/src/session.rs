//! Serial port session with a single-subscriber byte listener.
//!
//! The session owns the open port and a background reader thread. The
//! reader thread is the single event source for incoming bytes: it reads
//! from a cloned port handle and hands every chunk to whichever listener is
//! currently installed. Protocol phases install and remove listeners at
//! phase boundaries; at most one listener is active at a time.
//!
//! Protocol logic does not depend on `Session` directly but on the [`Link`]
//! trait, so it can be exercised against an in-memory fake.

use crate::error::{Error, Result};
use log::{debug, trace, warn};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval of the session reader thread.
const READ_POLL: Duration = Duration::from_millis(20);

/// Callback receiving incoming byte chunks.
pub type Listener = Box<dyn FnMut(&[u8]) + Send>;

/// Byte-level seam between the protocol layer and the serial session.
///
/// [`Session`] is the production implementation; tests drive the protocol
/// against a scripted in-memory fake.
pub trait Link {
    /// Write bytes to the device. Completes once the transport has
    /// accepted them, and strictly before the next `send` is issued.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Block until all accepted bytes have been physically transmitted.
    fn drain(&mut self) -> Result<()>;

    /// Switch the baud rate, closing and reopening the underlying handle
    /// if necessary. Idempotent at the current rate.
    fn set_baud(&mut self, baud: u32) -> Result<()>;

    /// Install `listener` as the single subscriber for incoming bytes,
    /// atomically replacing any previous one.
    fn subscribe(&mut self, listener: Listener) -> Subscription;

    /// Drain and release the connection. No-op when already closed.
    fn close(&mut self) -> Result<()>;
}

/// Shared slot holding the currently installed listener.
///
/// Install bumps a generation counter so that dropping a stale
/// [`Subscription`] cannot remove a listener installed after it.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    inner: Mutex<SlotInner>,
}

#[derive(Default)]
struct SlotInner {
    generation: u64,
    listener: Option<Listener>,
}

impl ListenerSlot {
    pub(crate) fn install(slot: &Arc<Self>, listener: Listener) -> Subscription {
        let mut inner = slot.inner.lock().expect("listener slot poisoned");
        inner.generation += 1;
        inner.listener = Some(listener);
        Subscription {
            slot: Arc::clone(slot),
            generation: inner.generation,
        }
    }

    pub(crate) fn dispatch(&self, data: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(listener) = inner.listener.as_mut() {
                listener(data);
            }
        }
    }

    fn remove(&self, generation: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.generation == generation {
                inner.listener = None;
            }
        }
    }

    #[cfg(test)]
    fn is_occupied(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.listener.is_some())
            .unwrap_or(false)
    }
}

/// Owned handle to an installed listener.
///
/// Dropping the handle removes the listener; a handle whose listener was
/// already replaced by a newer `subscribe` call is inert. Ownership of the
/// handle stands in for ownership of the session's receive side, so the
/// single-listener discipline is enforced by moves rather than convention.
pub struct Subscription {
    slot: Arc<ListenerSlot>,
    generation: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.slot.remove(self.generation);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("generation", &self.generation)
            .finish()
    }
}

/// An open serial connection to the device.
pub struct Session {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud: u32,
    slot: Arc<ListenerSlot>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Session {
    /// Open the named port at the given baud rate (8 data bits, 1 stop
    /// bit, no parity, no flow control).
    pub fn open(name: &str, baud: u32) -> Result<Self> {
        let slot = Arc::new(ListenerSlot::default());
        let mut session = Self {
            port: None,
            name: name.to_string(),
            baud,
            slot,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        };
        session.open_handle(baud)?;
        Ok(session)
    }

    fn open_handle(&mut self, baud: u32) -> Result<()> {
        debug!("opening {} at {} baud", self.name, baud);
        let port = serialport::new(&self.name, baud)
            .timeout(READ_POLL)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| Error::PortOpen {
                port: self.name.clone(),
                source,
            })?;

        let reader = port.try_clone().map_err(|source| Error::PortOpen {
            port: self.name.clone(),
            source,
        })?;

        self.port = Some(port);
        self.baud = baud;
        self.stop = Arc::new(AtomicBool::new(false));
        self.reader = Some(spawn_reader(reader, Arc::clone(&self.slot), Arc::clone(&self.stop)));
        Ok(())
    }

    /// The port name this session was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current baud rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Whether the session currently holds an open handle.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.port.take();
    }

    #[cfg(test)]
    fn closed_stub(name: &str) -> Self {
        Self {
            port: None,
            name: name.to_string(),
            baud: 0,
            slot: Arc::new(ListenerSlot::default()),
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn spawn_reader(
    mut reader: Box<dyn serialport::SerialPort>,
    slot: Arc<ListenerSlot>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 512];
        while !stop.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    trace!("received {n} bytes");
                    slot.dispatch(&buf[..n]);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if !stop.load(Ordering::Relaxed) {
                        warn!("reader stopped: {e}");
                    }
                    break;
                }
            }
        }
    })
}

impl Link for Session {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| {
            Error::PortWrite(io::Error::new(io::ErrorKind::NotConnected, "port closed"))
        })?;
        port.write_all(data).map_err(Error::PortWrite)
    }

    fn drain(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| {
            Error::PortDrain(io::Error::new(io::ErrorKind::NotConnected, "port closed"))
        })?;
        port.flush().map_err(Error::PortDrain)
    }

    fn set_baud(&mut self, baud: u32) -> Result<()> {
        if self.is_open() && self.baud == baud {
            return Ok(());
        }
        self.close()?;
        self.open_handle(baud)
    }

    fn subscribe(&mut self, listener: Listener) -> Subscription {
        ListenerSlot::install(&self.slot, listener)
    }

    fn close(&mut self) -> Result<()> {
        if self.port.is_none() {
            return Ok(());
        }
        debug!("closing {}", self.name);
        if let Err(e) = self.drain() {
            warn!("drain before close failed: {e}");
        }
        self.release();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockLink;
    use super::*;

    #[test]
    fn test_close_when_already_closed_is_noop() {
        let mut session = Session::closed_stub("/dev/null-port");
        assert!(!session.is_open());
        assert!(session.close().is_ok());
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_write_on_closed_session_fails() {
        let mut session = Session::closed_stub("/dev/null-port");
        assert!(matches!(session.send(b"x"), Err(Error::PortWrite(_))));
        assert!(matches!(session.drain(), Err(Error::PortDrain(_))));
    }

    #[test]
    fn test_subscription_drop_removes_listener() {
        let mut link = MockLink::new();
        let sub = link.subscribe(Box::new(|_| {}));
        assert!(link.has_listener());
        drop(sub);
        assert!(!link.has_listener());
    }

    #[test]
    fn test_subscribe_replaces_previous_listener() {
        use std::sync::mpsc;

        let mut link = MockLink::new();
        let (tx_old, rx_old) = mpsc::channel();
        let (tx_new, rx_new) = mpsc::channel();

        let old = link.subscribe(Box::new(move |d| {
            let _ = tx_old.send(d.to_vec());
        }));
        let _new = link.subscribe(Box::new(move |d| {
            let _ = tx_new.send(d.to_vec());
        }));

        link.emit(b"hello");
        assert!(rx_old.try_recv().is_err());
        assert_eq!(rx_new.try_recv().unwrap(), b"hello");

        // Dropping the stale handle must not disturb the new listener.
        drop(old);
        assert!(link.has_listener());
        link.emit(b"again");
        assert_eq!(rx_new.try_recv().unwrap(), b"again");
    }

    #[test]
    fn test_dispatch_without_listener_is_silent() {
        let link = MockLink::new();
        link.emit(b"dropped on the floor");
    }
}
