/*!
Serial channel boundary.

The supervisor owns exactly one [`SerialChannel`] at a time and obtains fresh
ones from a [`Connector`] on every (re)connect. Dropping a channel closes it.
*/

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};

/// Byte stream to the radar
pub trait SerialChannel: Send {
    /// Write all bytes
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read until `marker` has been received or the read timeout expires.
    ///
    /// Returns whatever arrived, marker included when found. An empty
    /// vector means nothing arrived within the timeout.
    fn read_until(&mut self, marker: &[u8]) -> io::Result<Vec<u8>>;

    /// Bytes received but not yet consumed
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Discard everything buffered on the input side
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Opens channels for the supervisor
pub trait Connector: Send {
    type Channel: SerialChannel;

    fn connect(&mut self) -> io::Result<Self::Channel>;
}

/// [`SerialChannel`] over a `serialport` handle
pub struct SerialPortChannel {
    port: Box<dyn SerialPort>,
    pending: BytesMut,
    read_timeout: Duration,
}

impl SerialPortChannel {
    /// Open `path` at `baud_rate`; each `read_until` waits at most `read_timeout`
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Self> {
        info!("🔌 Opening serial port {} at {} baud", path, baud_rate);
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(io::Error::from)?;

        Ok(Self::from_port(port, read_timeout))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPort>, read_timeout: Duration) -> Self {
        Self {
            port,
            pending: BytesMut::with_capacity(1024),
            read_timeout,
        }
    }

    fn take_through_marker(&mut self, marker: &[u8]) -> Option<Vec<u8>> {
        let pos = self
            .pending
            .windows(marker.len())
            .position(|w| w == marker)?;
        Some(self.pending.split_to(pos + marker.len()).to_vec())
    }
}

impl SerialChannel for SerialPortChannel {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_until(&mut self, marker: &[u8]) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(found) = self.take_through_marker(marker) {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                break;
            }
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(self.pending.split().to_vec())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        let in_driver = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        Ok(in_driver + self.pending.len())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let stale = self.pending.len();
        self.pending.clear();
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)?;
        debug!("Cleared input buffer ({} buffered bytes dropped)", stale);
        Ok(())
    }
}

/// Opens a [`SerialPortChannel`] on every connect
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialPortConnector {
    /// Connector with factory baud rate and default read timeout
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Connector for SerialPortConnector {
    type Channel = SerialPortChannel;

    fn connect(&mut self) -> io::Result<SerialPortChannel> {
        SerialPortChannel::open(&self.path, self.baud_rate, self.read_timeout)
    }
}

/// Scripted device used by protocol and supervisor tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use crate::codec::ACK_WORD_FLAG;
    use crate::protocol::{CMD_FOOTER, CMD_HEADER, DATA_FOOTER, DATA_HEADER};

    /// One scripted event on the streaming side
    #[derive(Debug, Clone)]
    pub enum Step {
        Bytes(Vec<u8>),
        Fail(io::ErrorKind),
    }

    /// Acknowledged response frame for `word` carrying `data`
    pub fn ack(word: u16, data: &[u8]) -> Vec<u8> {
        response(word, 0, data)
    }

    /// Response frame with an explicit ack status
    pub fn response(word: u16, status: u16, data: &[u8]) -> Vec<u8> {
        let mut out = CMD_HEADER.to_vec();
        out.extend_from_slice(&((4 + data.len()) as u16).to_le_bytes());
        out.extend_from_slice(&(word | ACK_WORD_FLAG).to_le_bytes());
        out.extend_from_slice(&status.to_le_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&CMD_FOOTER);
        out
    }

    /// Offset-sign encoding used by the data stream
    pub fn offset_sign(v: i32) -> [u8; 2] {
        let raw = if v > 0 { v as u16 + 0x8000 } else { (-v) as u16 };
        raw.to_le_bytes()
    }

    /// Complete 30-byte data frame from up to three (x, y) slots
    pub fn data_frame(slots: &[(i32, i32)]) -> Vec<u8> {
        let mut out = DATA_HEADER.to_vec();
        for i in 0..3 {
            let (x, y) = slots.get(i).copied().unwrap_or((0, 0));
            if x == 0 && y == 0 {
                out.extend_from_slice(&[0u8; 8]);
                continue;
            }
            out.extend_from_slice(&offset_sign(x));
            out.extend_from_slice(&offset_sign(y));
            out.extend_from_slice(&offset_sign(0));
            out.extend_from_slice(&360u16.to_le_bytes());
        }
        out.extend_from_slice(&DATA_FOOTER);
        out
    }

    /// Device double: acknowledges every command it is sent and replays a
    /// script on the streaming side.
    #[derive(Default)]
    pub struct MockChannel {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        replies: VecDeque<Vec<u8>>,
        data: HashMap<u16, Vec<u8>>,
        naks: HashMap<u16, u32>,
        silent: HashMap<u16, u32>,
        stream: VecDeque<Step>,
        repeat: Option<Vec<u8>>,
        backlog: usize,
        pub clears: usize,
    }

    impl MockChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Data bytes appended after the ack status for `word`
        pub fn with_data(mut self, word: u16, data: &[u8]) -> Self {
            self.data.insert(word, data.to_vec());
            self
        }

        /// Reject `word` with a negative ack `count` times
        pub fn nak(mut self, word: u16, count: u32) -> Self {
            self.naks.insert(word, count);
            self
        }

        /// Ignore `word` (no reply) `count` times
        pub fn silent(mut self, word: u16, count: u32) -> Self {
            self.silent.insert(word, count);
            self
        }

        pub fn stream(mut self, steps: Vec<Step>) -> Self {
            self.stream = steps.into();
            self
        }

        /// Keep returning `frame` once the stream script is exhausted
        pub fn repeat(mut self, frame: Vec<u8>) -> Self {
            self.repeat = Some(frame);
            self
        }

        /// Bytes reported as waiting beyond any queued reply
        pub fn backlog(mut self, bytes: usize) -> Self {
            self.backlog = bytes;
            self
        }

        fn decrement(map: &mut HashMap<u16, u32>, word: u16) -> bool {
            match map.get_mut(&word) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        }
    }

    impl SerialChannel for MockChannel {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().push(bytes.to_vec());
            let word = u16::from_le_bytes([bytes[6], bytes[7]]);

            if Self::decrement(&mut self.silent, word) {
                return Ok(());
            }
            if Self::decrement(&mut self.naks, word) {
                self.replies.push_back(response(word, 1, &[]));
                return Ok(());
            }
            let data = self.data.get(&word).cloned().unwrap_or_default();
            self.replies.push_back(ack(word, &data));
            Ok(())
        }

        fn read_until(&mut self, _marker: &[u8]) -> io::Result<Vec<u8>> {
            if let Some(reply) = self.replies.pop_front() {
                return Ok(reply);
            }
            match self.stream.pop_front() {
                Some(Step::Bytes(bytes)) => Ok(bytes),
                Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Ok(self.repeat.clone().unwrap_or_default())
                }
            }
        }

        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(self.backlog + self.replies.iter().map(Vec::len).sum::<usize>())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.clears += 1;
            Ok(())
        }
    }

    /// Hands out scripted channels; fails once the script is exhausted
    #[derive(Clone, Default)]
    pub struct MockConnector {
        channels: Arc<Mutex<VecDeque<io::Result<MockChannel>>>>,
        pub connects: Arc<AtomicUsize>,
    }

    impl MockConnector {
        pub fn new(channels: Vec<io::Result<MockChannel>>) -> Self {
            Self {
                channels: Arc::new(Mutex::new(channels.into())),
                connects: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Connector for MockConnector {
        type Channel = MockChannel;

        fn connect(&mut self) -> io::Result<MockChannel> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.channels
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotFound, "no device")))
        }
    }
}
