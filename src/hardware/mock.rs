//! Mock Serial Devices
//!
//! In-memory devices for exercising sessions without hardware. Bytes travel
//! over tokio duplex pipes, so transfers really do go pending when no data
//! is buffered (or the pipe is full) and really are completed by a waker.
//!
//! # Available Mocks
//!
//! - **Loopback** - every byte written comes back on the read side, like a
//!   device with TX wired to RX.
//! - **Peer** - the far end of the line is handed to the test as a
//!   [`MockPeer`], which can feed bytes in and drain bytes out from any thread.
//!
//! [`MockOpener`] counts live handles so tests can check that no handle
//! outlives its session, and injects faults into each step of the open
//! sequence.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::executor::block_on;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_serial::{DataBits, ErrorKind, FlowControl, Parity, StopBits};

use super::{DeviceOpener, DeviceResult, LineSettings, SerialDevice, TimeoutPolicy};

/// Default pipe capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Faults injected into devices produced by a [`MockOpener`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockFaults {
    /// Acquiring the handle fails
    pub open: bool,
    /// Reading the control block fails
    pub read_line_settings: bool,
    /// Applying the control block fails
    pub apply_line_settings: bool,
    /// Applying the timeout policy fails
    pub apply_timeouts: bool,
    /// Polling a read panics
    pub panic_on_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wiring {
    Loopback,
    Peer,
}

/// Decrements the opener's live-handle count when the device is dropped.
#[derive(Debug)]
struct LiveHandle(Arc<AtomicUsize>);

impl LiveHandle {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An open mock device.
#[derive(Debug)]
pub struct MockSerialDevice {
    reader: DuplexStream,
    writer: DuplexStream,
    line: LineSettings,
    faults: MockFaults,
    _live: LiveHandle,
}

impl MockSerialDevice {
    /// The control block a freshly opened mock reports: deliberately not the
    /// session's framing, so tests can see it being overwritten.
    pub fn power_on_settings(baud_rate: u32) -> LineSettings {
        LineSettings {
            baud_rate,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
            flow_control: FlowControl::None,
        }
    }
}

impl AsyncRead for MockSerialDevice {
    #[allow(clippy::panic)]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.faults.panic_on_read {
            panic!("mock serial device fault during read");
        }
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockSerialDevice {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

impl SerialDevice for MockSerialDevice {
    fn line_settings(&self) -> DeviceResult<LineSettings> {
        if self.faults.read_line_settings {
            return Err(tokio_serial::Error::new(
                ErrorKind::Io(io::ErrorKind::Other),
                "mock: control block unreadable",
            ));
        }
        Ok(self.line)
    }

    fn apply_line_settings(&mut self, settings: &LineSettings) -> DeviceResult<()> {
        if self.faults.apply_line_settings {
            return Err(tokio_serial::Error::new(
                ErrorKind::InvalidInput,
                "mock: control block rejected",
            ));
        }
        self.line = *settings;
        Ok(())
    }

    fn apply_timeouts(&mut self, _policy: &TimeoutPolicy) -> DeviceResult<()> {
        if self.faults.apply_timeouts {
            return Err(tokio_serial::Error::new(
                ErrorKind::InvalidInput,
                "mock: timeouts rejected",
            ));
        }
        Ok(())
    }
}

/// The far end of a peer-wired mock device.
///
/// Methods block the calling thread, so a peer can be driven from a plain
/// `std::thread` while the session blocks on another.
#[derive(Debug)]
pub struct MockPeer {
    reader: DuplexStream,
    writer: DuplexStream,
}

impl MockPeer {
    /// Put bytes on the line towards the session.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        block_on(self.writer.write_all(bytes))
    }

    /// Take exactly `len` bytes the session has written.
    pub fn receive(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        block_on(self.reader.read_exact(&mut buf))?;
        Ok(buf)
    }
}

/// Opener producing [`MockSerialDevice`]s.
#[derive(Debug)]
pub struct MockOpener {
    wiring: Wiring,
    capacity: usize,
    faults: MockFaults,
    live: Arc<AtomicUsize>,
    opens: Mutex<Vec<OpenRecord>>,
    peers: Mutex<VecDeque<MockPeer>>,
}

/// One handle acquisition attempt seen by a [`MockOpener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    /// Resolved device path
    pub path: String,
    /// Requested baud rate
    pub baud_rate: u32,
    /// Live handles at the moment of the attempt
    pub live_before: usize,
}

impl MockOpener {
    fn new(wiring: Wiring) -> Self {
        Self {
            wiring,
            capacity: DEFAULT_CAPACITY,
            faults: MockFaults::default(),
            live: Arc::new(AtomicUsize::new(0)),
            opens: Mutex::new(Vec::new()),
            peers: Mutex::new(VecDeque::new()),
        }
    }

    /// Devices whose writes come back on their reads.
    pub fn loopback() -> Self {
        Self::new(Wiring::Loopback)
    }

    /// Devices whose far end is queued for [`MockOpener::take_peer`].
    pub fn with_peer() -> Self {
        Self::new(Wiring::Peer)
    }

    /// Set the pipe capacity (bytes a write can buffer before going pending).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Inject faults into every device this opener produces.
    pub fn with_faults(mut self, faults: MockFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Handles currently alive.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Every acquisition attempt so far, in order.
    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().clone()
    }

    /// Far end of the oldest peer-wired device not yet claimed.
    pub fn take_peer(&self) -> Option<MockPeer> {
        self.peers.lock().pop_front()
    }
}

impl DeviceOpener for MockOpener {
    fn open(&self, path: &str, baud_rate: u32) -> DeviceResult<Box<dyn SerialDevice>> {
        self.opens.lock().push(OpenRecord {
            path: path.to_string(),
            baud_rate,
            live_before: self.live_handles(),
        });

        if self.faults.open {
            return Err(tokio_serial::Error::new(
                ErrorKind::NoDevice,
                format!("mock: no device at {}", path),
            ));
        }

        let (reader, writer) = match self.wiring {
            Wiring::Loopback => {
                let (tx, rx) = tokio::io::duplex(self.capacity);
                (rx, tx)
            }
            Wiring::Peer => {
                let (device_rx, peer_tx) = tokio::io::duplex(self.capacity);
                let (device_tx, peer_rx) = tokio::io::duplex(self.capacity);
                self.peers.lock().push_back(MockPeer {
                    reader: peer_rx,
                    writer: peer_tx,
                });
                (device_rx, device_tx)
            }
        };

        Ok(Box::new(MockSerialDevice {
            reader,
            writer,
            line: MockSerialDevice::power_on_settings(baud_rate),
            faults: self.faults,
            _live: LiveHandle::acquire(&self.live),
        }))
    }
}
