/*!
Acquisition supervisor.

Runs the radar read loop on a background thread and keeps it alive across
unplugs, resets and configuration failures:

```text
Connecting --configured--> Streaming --I/O error or timeout--> Disconnected
    ^   |                      |  ^                                  |
    |   +--failure, backoff----+  +--enabled--> Idle (parked)        |
    +-----------------------------backoff----------------------------+
```

The consumer side only ever sees a [`SupervisorHandle`]: it polls decoded
frames from the bounded queue and reads liveness and statistics. Every wait
inside the loop is sliced so that [`SupervisorHandle::stop`] takes effect
within one slice or one serial read timeout.
*/

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::channel::{Connector, SerialChannel};
use crate::client::{ProtocolClient, RetryPolicy};
use crate::error::ChannelError;
use crate::frame::{DataFrame, FrameDecoder};
use crate::protocol::{DATA_FOOTER, RESTART_DELAY};
use crate::queue::{BoundedQueue, PushOutcome};
use crate::types::DeviceSettings;

/// Longest uninterrupted sleep inside the loop
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Supervisor loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    Connecting = 0,
    Streaming = 1,
    Disconnected = 2,
    /// Connected but parked by the enable flag
    Idle = 3,
    Stopped = 4,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Streaming,
            2 => Self::Disconnected,
            3 => Self::Idle,
            _ => Self::Stopped,
        }
    }
}

/// Supervisor settings, fixed for the lifetime of the loop
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause before reconnecting after any failure
    pub reconnect_backoff: Duration,
    /// Frames held for the consumer before new ones are dropped
    pub queue_capacity: usize,
    /// Decoded frames discarded after each connect while the module settles
    pub warmup_frames: u32,
    /// Wait after a restart command before reopening the port
    pub restart_delay: Duration,
    pub retry: RetryPolicy,
    /// Applied on every connect
    pub device: DeviceSettings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(1),
            queue_capacity: 64,
            warmup_frames: 50,
            restart_delay: RESTART_DELAY,
            retry: RetryPolicy::default(),
            device: DeviceSettings::default(),
        }
    }
}

/// Snapshot of the loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub frames_decoded: u64,
    /// Frames lost because the queue was full
    pub frames_dropped: u64,
    pub anomalies: u64,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    dropped: AtomicU64,
    anomalies: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    active: AtomicBool,
    enabled: AtomicBool,
    stop: AtomicBool,
    /// Unread serial input after the last read
    backlog: AtomicUsize,
    counters: Counters,
}

/// Consumer-side view of a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
    queue: BoundedQueue,
}

impl SupervisorHandle {
    /// Wait up to `timeout` for the next frame
    pub fn poll(&self, timeout: Duration) -> Option<DataFrame> {
        self.queue.poll(timeout)
    }

    /// True while a configured device is connected
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Frames waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Bytes left on the serial input after the most recent frame read.
    ///
    /// A growing value means the loop is falling behind the module.
    pub fn input_backlog(&self) -> usize {
        self.shared.backlog.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> SupervisorStats {
        let c = &self.shared.counters;
        SupervisorStats {
            frames_decoded: c.decoded.load(Ordering::Relaxed),
            frames_dropped: c.dropped.load(Ordering::Relaxed),
            anomalies: c.anomalies.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Pause or resume streaming without closing the port
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Ask the loop to exit
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }
}

/// Owns the connector and the current channel; see the module docs
pub struct AcquisitionSupervisor<K: Connector> {
    connector: K,
    config: SupervisorConfig,
    handle: SupervisorHandle,
    decoder: FrameDecoder,
}

impl<K: Connector> AcquisitionSupervisor<K> {
    pub fn new(connector: K, config: SupervisorConfig) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(SupervisorState::Connecting as u8),
            active: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            backlog: AtomicUsize::new(0),
            counters: Counters::default(),
        });
        let handle = SupervisorHandle {
            shared,
            queue: BoundedQueue::new(config.queue_capacity),
        };

        Self {
            connector,
            config,
            handle,
            decoder: FrameDecoder::new(),
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Run the loop on the current thread until stopped
    pub fn run(mut self) {
        info!("🚀 Acquisition loop starting");
        let mut first_connect = true;

        while !self.stopping() {
            self.set_state(SupervisorState::Connecting);
            if !first_connect {
                self.handle.shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            }
            first_connect = false;

            let channel = match self.connect() {
                Ok(Some(channel)) => channel,
                Ok(None) => break,
                Err(e) => {
                    if !self.stopping() {
                        warn!("⚠️ Radar setup failed: {}", e);
                        self.pause(self.config.reconnect_backoff);
                    }
                    continue;
                }
            };

            match self.stream(channel) {
                Ok(()) => break,
                Err(e) => {
                    self.set_active(false);
                    self.handle.shared.backlog.store(0, Ordering::Relaxed);
                    self.set_state(SupervisorState::Disconnected);
                    error!("❌ Radar down: {}", e);
                    self.pause(self.config.reconnect_backoff);
                }
            }
        }

        self.set_active(false);
        self.set_state(SupervisorState::Stopped);
        let stats = self.handle.stats();
        info!(
            "🏁 Acquisition loop stopped: {} frames decoded, {} dropped, {} anomalies, \
             {} reconnects",
            stats.frames_decoded, stats.frames_dropped, stats.anomalies, stats.reconnects
        );
    }

    /// Open a channel and apply the device settings to it.
    ///
    /// `Ok(None)` means a stop arrived while waiting for the module to restart.
    fn connect(&mut self) -> Result<Option<K::Channel>, ChannelError> {
        let device = self.config.device.clone();
        let retry = self.config.retry;

        let mut client = ProtocolClient::with_retry(self.connector.connect()?, retry);
        client.set_bluetooth(device.bluetooth)?;

        if device.restart_after_radio {
            client.restart()?;
            drop(client);
            info!("🔄 Radar restarting, reopening in {:?}", self.config.restart_delay);
            self.pause(self.config.restart_delay);
            if self.stopping() {
                return Ok(None);
            }
            client = ProtocolClient::with_retry(self.connector.connect()?, retry);
        }

        client.apply_detection_settings(&device)?;
        Ok(Some(client.into_inner()))
    }

    /// Read frames until the channel fails (`Err`) or a stop is requested (`Ok`)
    fn stream(&mut self, mut channel: K::Channel) -> Result<(), ChannelError> {
        channel.clear_input()?;
        self.set_active(true);
        self.set_state(SupervisorState::Streaming);
        info!("📡 Radar up");

        let mut warmup_left = self.config.warmup_frames;

        while !self.stopping() {
            if !self.handle.is_enabled() {
                self.park();
                if self.stopping() {
                    break;
                }
                channel.clear_input()?;
                self.set_state(SupervisorState::Streaming);
                continue;
            }

            let raw = channel.read_until(&DATA_FOOTER)?;
            if raw.is_empty() {
                return Err(ChannelError::Timeout);
            }
            let backlog = channel.bytes_available()?;
            self.handle.shared.backlog.store(backlog, Ordering::Relaxed);

            let frame = match self.decoder.try_decode(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    self.handle.shared.counters.anomalies.fetch_add(1, Ordering::Relaxed);
                    warn!("⚠️ Dropping data frame: {}", e);
                    continue;
                }
            };
            self.handle.shared.counters.decoded.fetch_add(1, Ordering::Relaxed);

            if warmup_left > 0 {
                warmup_left -= 1;
                continue;
            }

            if self.handle.queue.push(frame) == PushOutcome::Dropped {
                let counters = &self.handle.shared.counters;
                let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Frame queue full, {} frames dropped so far", dropped);
                }
            }
        }

        Ok(())
    }

    /// Sit in `Idle` until re-enabled or stopped
    fn park(&self) {
        self.set_state(SupervisorState::Idle);
        debug!("Acquisition parked");
        while !self.handle.is_enabled() && !self.stopping() {
            thread::sleep(WAIT_SLICE);
        }
        debug!("Acquisition resumed");
    }

    /// Sleep for `total`, waking early on stop
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }

    fn stopping(&self) -> bool {
        self.handle.is_stopping()
    }

    fn set_active(&self, active: bool) {
        self.handle.shared.active.store(active, Ordering::SeqCst);
    }

    fn set_state(&self, state: SupervisorState) {
        let prev = self.handle.shared.state.swap(state as u8, Ordering::SeqCst);
        if prev != state as u8 {
            debug!("Supervisor {:?} -> {:?}", SupervisorState::from_u8(prev), state);
        }
    }
}

impl<K: Connector + 'static> AcquisitionSupervisor<K> {
    /// Run the loop on a named background thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("ld2450-acquisition".to_string())
            .spawn(move || self.run())
    }
}
