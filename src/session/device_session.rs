use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::signal::CompletionSignal;
use super::transfer;
use super::wait::Wait;
use crate::error::{ConfigStage, SessionError, SessionResult};
use crate::hardware::{
    resolve_device_path, DeviceOpener, LineSettings, SerialDevice, TimeoutPolicy,
};

/// One exclusively owned serial device plus its per-direction completion
/// signals.
///
/// States are Closed (initial) and Open. A failed [`open`](Self::open) leaves
/// the session Closed with no handle held. Reads and writes are the only
/// calls that block, and only while Open.
///
/// The session drives its own current-thread I/O reactor and blocks the
/// calling thread. Do not call it from inside an async task; hand it to
/// `tokio::task::spawn_blocking` instead.
pub struct DeviceSession {
    // Declared first: released before the reactor it is registered with.
    device: Option<Box<dyn SerialDevice>>,
    path: Option<String>,
    line: Option<LineSettings>,
    read_signal: CompletionSignal,
    write_signal: CompletionSignal,
    opener: Arc<dyn DeviceOpener>,
    runtime: Runtime,
}

impl DeviceSession {
    /// Create a Closed session. The completion signals live until the session
    /// is dropped.
    pub fn new(opener: Arc<dyn DeviceOpener>) -> SessionResult<Self> {
        let read_signal = CompletionSignal::new("read");
        let write_signal = CompletionSignal::new("write");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SessionError::Runtime)?;

        Ok(Self {
            device: None,
            path: None,
            line: None,
            read_signal,
            write_signal,
            opener,
            runtime,
        })
    }

    /// Acquire `name` exclusively and configure it for `baud_rate`, 8 data
    /// bits, 1 stop bit, no parity, with reads completing on the first
    /// available byte and no write timeout.
    ///
    /// A handle already held by this session is released first. On any error
    /// no handle is held afterwards.
    pub fn open(&mut self, name: &str, baud_rate: u32) -> SessionResult<()> {
        if baud_rate == 0 {
            return Err(SessionError::InvalidBaudRate(baud_rate));
        }
        if self.device.is_some() {
            debug!("Re-opening: releasing current handle first");
            self.release();
        }

        let path = resolve_device_path(name);
        let _context = self.runtime.enter();

        let mut device =
            self.opener
                .open(&path, baud_rate)
                .map_err(|source| SessionError::DeviceUnavailable {
                    path: path.clone(),
                    source,
                })?;

        let configuration = |stage: ConfigStage| {
            let path = path.clone();
            move |source: tokio_serial::Error| SessionError::Configuration {
                path,
                stage,
                source,
            }
        };

        let current = device
            .line_settings()
            .map_err(configuration(ConfigStage::ReadLineSettings))?;
        let line = LineSettings::overlay(&current, baud_rate);
        device
            .apply_line_settings(&line)
            .map_err(configuration(ConfigStage::ApplyLineSettings))?;
        device
            .apply_timeouts(&TimeoutPolicy::default())
            .map_err(configuration(ConfigStage::ApplyTimeouts))?;

        info!(path = %path, baud_rate, previous = ?current, "Serial session opened");

        self.device = Some(device);
        self.path = Some(path);
        self.line = Some(line);
        Ok(())
    }

    /// Release the handle. Fails with [`SessionError::NotOpen`] if no handle
    /// is held.
    pub fn close(&mut self) -> SessionResult<()> {
        if self.release() {
            Ok(())
        } else {
            Err(SessionError::NotOpen)
        }
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Completes as soon as at least one byte is available. With
    /// [`Wait::forever`] a quiet line blocks the caller until data arrives.
    pub fn read(&mut self, buf: &mut [u8], wait: &Wait) -> SessionResult<usize> {
        let Self {
            device,
            read_signal,
            runtime,
            ..
        } = self;
        let device = device.as_mut().ok_or(SessionError::NotOpen)?;
        if buf.is_empty() {
            return Ok(0);
        }
        transfer::complete(runtime, read_signal, wait, device.read(buf))
    }

    /// Write `buf`, returning how many bytes the driver accepted.
    pub fn write(&mut self, buf: &[u8], wait: &Wait) -> SessionResult<usize> {
        let Self {
            device,
            write_signal,
            runtime,
            ..
        } = self;
        let device = device.as_mut().ok_or(SessionError::NotOpen)?;
        if buf.is_empty() {
            return Ok(0);
        }
        transfer::complete(runtime, write_signal, wait, device.write(buf))
    }

    /// Whether a device handle is held.
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Resolved path of the open device.
    pub fn device_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Line settings applied at open.
    pub fn line_settings(&self) -> Option<LineSettings> {
        self.line
    }

    /// Completion signal for reads.
    pub fn read_signal(&self) -> &CompletionSignal {
        &self.read_signal
    }

    /// Completion signal for writes.
    pub fn write_signal(&self) -> &CompletionSignal {
        &self.write_signal
    }

    fn release(&mut self) -> bool {
        let Some(device) = self.device.take() else {
            return false;
        };
        {
            let _context = self.runtime.enter();
            drop(device);
        }
        self.line = None;
        let path = self.path.take().unwrap_or_default();
        debug!(path = %path, "Serial device handle released");
        true
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("path", &self.path)
            .field("line", &self.line)
            .field("read_signal", &self.read_signal)
            .field("write_signal", &self.write_signal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockFaults, MockOpener, MockSerialDevice};
    use crate::session::CancelToken;
    use std::time::{Duration, Instant};
    use tokio_serial::{DataBits, Parity, StopBits};
    use tracing_test::traced_test;

    fn session_with(opener: &Arc<MockOpener>) -> DeviceSession {
        DeviceSession::new(opener.clone()).expect("session")
    }

    #[test]
    fn test_new_session_is_closed() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        assert!(!session.is_open());
        assert!(session.device_path().is_none());

        let start = Instant::now();
        let mut buf = [0u8; 4];
        assert!(matches!(
            session.read(&mut buf, &Wait::forever()),
            Err(SessionError::NotOpen)
        ));
        assert!(matches!(
            session.write(b"ab", &Wait::forever()),
            Err(SessionError::NotOpen)
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(opener.opens().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_open_applies_fixed_framing() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        session.open("mock0", 19_200).expect("open");

        assert!(session.is_open());
        assert_eq!(session.device_path(), Some(resolve_device_path("mock0").as_str()));
        let line = session.line_settings().expect("line settings");
        assert_eq!(line.baud_rate, 19_200);
        assert_eq!(line.data_bits, DataBits::Eight);
        assert_eq!(line.stop_bits, StopBits::One);
        assert_eq!(line.parity, Parity::None);
        assert_ne!(line, MockSerialDevice::power_on_settings(19_200));
        assert_eq!(opener.live_handles(), 1);
        assert!(logs_contain("Serial session opened"));
    }

    #[test]
    fn test_zero_baud_rate_rejected_before_acquisition() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        assert!(matches!(
            session.open("mock0", 0),
            Err(SessionError::InvalidBaudRate(0))
        ));
        assert!(opener.opens().is_empty());
    }

    #[test]
    fn test_every_failed_open_stage_releases_handle() {
        let cases = [
            (
                MockFaults {
                    read_line_settings: true,
                    ..Default::default()
                },
                ConfigStage::ReadLineSettings,
            ),
            (
                MockFaults {
                    apply_line_settings: true,
                    ..Default::default()
                },
                ConfigStage::ApplyLineSettings,
            ),
            (
                MockFaults {
                    apply_timeouts: true,
                    ..Default::default()
                },
                ConfigStage::ApplyTimeouts,
            ),
        ];

        for (faults, expected) in cases {
            let opener = Arc::new(MockOpener::loopback().with_faults(faults));
            let mut session = session_with(&opener);
            match session.open("mock0", 9600) {
                Err(SessionError::Configuration { stage, .. }) => assert_eq!(stage, expected),
                other => panic!("expected configuration failure, got {:?}", other),
            }
            assert!(!session.is_open());
            assert_eq!(opener.live_handles(), 0);
        }
    }

    #[test]
    fn test_unavailable_device() {
        let opener = Arc::new(MockOpener::loopback().with_faults(MockFaults {
            open: true,
            ..Default::default()
        }));
        let mut session = session_with(&opener);
        assert!(matches!(
            session.open("mock0", 9600),
            Err(SessionError::DeviceUnavailable { .. })
        ));
        assert!(!session.is_open());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn test_close_twice() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        session.close().expect("first close");
        assert_eq!(opener.live_handles(), 0);
        assert!(matches!(session.close(), Err(SessionError::NotOpen)));

        let mut buf = [0u8; 2];
        assert!(matches!(
            session.read(&mut buf, &Wait::forever()),
            Err(SessionError::NotOpen)
        ));
    }

    #[test]
    fn test_loopback_round_trip() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");

        let payload: Vec<u8> = (0u8..=63).collect();
        for len in [1usize, 2, 17, 64] {
            let written = session
                .write(&payload[..len], &Wait::forever())
                .expect("write");
            assert_eq!(written, len);

            let mut buf = vec![0u8; 64];
            let read = session.read(&mut buf, &Wait::forever()).expect("read");
            assert_eq!(&buf[..read], &payload[..len]);
        }
        assert!(!session.read_signal().is_signaled());
        assert!(!session.write_signal().is_signaled());
    }

    #[test]
    fn test_reopen_releases_previous_handle_first() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        session.open("mock1", 9600).expect("reopen");

        let opens = opener.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[1].live_before, 0);
        assert_eq!(opener.live_handles(), 1);
    }

    #[test]
    fn test_pending_read_completes_when_data_arrives() {
        let opener = Arc::new(MockOpener::with_peer());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        let mut peer = opener.take_peer().expect("peer");

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            peer.send(&[0x41, 0x42]).expect("send");
            peer
        });

        let mut buf = [0u8; 8];
        let n = session.read(&mut buf, &Wait::forever()).expect("read");
        assert!(n >= 1);
        let mut received = buf[..n].to_vec();
        if received.len() < 2 {
            let n = session.read(&mut buf, &Wait::forever()).expect("read rest");
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, vec![0x41, 0x42]);
        assert!(!session.read_signal().is_signaled());
        sender.join().expect("sender");
    }

    #[test]
    fn test_pending_write_completes_when_line_drains() {
        let opener = Arc::new(MockOpener::with_peer().with_capacity(4));
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        let mut peer = opener.take_peer().expect("peer");

        assert_eq!(session.write(b"full", &Wait::forever()).expect("fill"), 4);

        let drainer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let drained = peer.receive(4).expect("drain");
            (peer, drained)
        });

        let n = session.write(b"next", &Wait::forever()).expect("pending write");
        let (mut peer, drained) = drainer.join().expect("drainer");
        assert_eq!(drained, b"full");
        assert!((1..=4).contains(&n));
        assert_eq!(peer.receive(n).expect("receive"), &b"next"[..n]);
        assert!(!session.write_signal().is_signaled());
    }

    #[test]
    fn test_read_timeout_on_quiet_line_loses_nothing() {
        let opener = Arc::new(MockOpener::with_peer());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        let mut peer = opener.take_peer().expect("peer");

        let mut buf = [0u8; 4];
        let result = session.read(&mut buf, &Wait::timeout(Duration::from_millis(30)));
        assert!(matches!(result, Err(SessionError::TimedOut(_))));
        assert!(!session.read_signal().is_signaled());

        peer.send(b"z").expect("send");
        let n = session.read(&mut buf, &Wait::forever()).expect("read");
        assert_eq!(&buf[..n], b"z");
    }

    #[test]
    fn test_late_data_after_timed_out_read_leaves_signal_quiet() {
        let opener = Arc::new(MockOpener::with_peer());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        let mut peer = opener.take_peer().expect("peer");

        let mut buf = [0u8; 4];
        let result = session.read(&mut buf, &Wait::timeout(Duration::from_millis(20)));
        assert!(matches!(result, Err(SessionError::TimedOut(_))));

        // The pipe still holds the abandoned read's waker and fires it here.
        peer.send(b"z").expect("send");
        assert_eq!(session.write(b"q", &Wait::forever()).expect("write"), 1);
        assert!(!session.read_signal().is_signaled());
        assert!(!session.read_signal().is_armed());

        let n = session.read(&mut buf, &Wait::forever()).expect("read");
        assert_eq!(&buf[..n], b"z");
        assert_eq!(peer.receive(1).expect("receive"), b"q");
    }

    #[test]
    fn test_cancel_blocked_read() {
        let opener = Arc::new(MockOpener::with_peer());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");

        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let mut buf = [0u8; 4];
        let result = session.read(&mut buf, &Wait::forever().with_cancel(token));
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert!(session.is_open());
        canceller.join().expect("canceller");
    }

    #[test]
    fn test_drop_releases_handle() {
        let opener = Arc::new(MockOpener::loopback());
        let mut session = session_with(&opener);
        session.open("mock0", 9600).expect("open");
        drop(session);
        assert_eq!(opener.live_handles(), 0);
    }
}
