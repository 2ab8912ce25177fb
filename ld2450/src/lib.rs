/*!
# LD2450 Radar Driver

Driver and acquisition pipeline for the HLK-LD2450 multi-target mmWave radar,
plus the smoothing primitives shared by every actuator channel of the
installation.

## Core Types

- [`Command`] / [`ResponseFrame`] - configuration command wire frames
- [`ProtocolClient`] - configuration-mode transactions with retries
- [`DataFrame`] / [`Target`] - decoded streaming samples
- [`AcquisitionSupervisor`] - background read loop with reconnect
- [`SlidingWindowAverage`] - O(1) moving average
- [`RateLimitedMapper`] - delta-clamped linear mapping

## Modules

- [`codec`] - command encoding, response framing, checksums
- [`client`] - command transactions and the high-level command set
- [`types`] - device settings and decoded command results
- [`frame`] - streaming data frame decoding
- [`channel`] - serial channel boundary
- [`queue`] - drop-incoming bounded queue
- [`supervisor`] - acquisition state machine
- [`smoothing`] - sliding window average
- [`mapping`] - clamp, linear map and rate-limited mapper
- [`error`] - error types
*/

pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod mapping;
pub mod queue;
pub mod smoothing;
pub mod supervisor;
pub mod types;

// Re-export commonly used types
pub use channel::{Connector, SerialChannel, SerialPortChannel, SerialPortConnector};
pub use client::{DeviceInfo, ProtocolClient, RetryPolicy};
pub use codec::{Command, ResponseFrame};
pub use error::{ChannelError, CoreError, DecodeAnomaly, FramingError, Phase, ProtocolError, Result};
pub use frame::{DataFrame, FrameDecoder, Target};
pub use mapping::{clamp, linear_map, MapperConfig, RateLimitedMapper, Rest};
pub use queue::{BoundedQueue, PushOutcome};
pub use smoothing::SlidingWindowAverage;
pub use supervisor::{
    AcquisitionSupervisor, SupervisorConfig, SupervisorHandle, SupervisorState, SupervisorStats,
};
pub use types::{
    BaudRate, DeviceSettings, FirmwareVersion, MacAddress, Region, TrackingMode, ZoneFilter,
    ZoneMode,
};

/// Version information for the driver library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire constants
pub mod protocol {
    use std::time::Duration;

    /// Command frame header
    pub const CMD_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];

    /// Command frame footer
    pub const CMD_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];

    /// Streaming data frame header
    pub const DATA_HEADER: [u8; 4] = [0xAA, 0xFF, 0x03, 0x00];

    /// Streaming data frame footer
    pub const DATA_FOOTER: [u8; 2] = [0x55, 0xCC];

    /// Target slots per data frame
    pub const TARGET_SLOTS: usize = 3;

    /// Bytes per target slot
    pub const SLOT_SIZE_BYTES: usize = 8;

    /// Full data frame size: header + slots + footer
    pub const DATA_FRAME_SIZE_BYTES: usize =
        DATA_HEADER.len() + TARGET_SLOTS * SLOT_SIZE_BYTES + DATA_FOOTER.len();

    /// Factory default baud rate
    pub const DEFAULT_BAUD_RATE: u32 = 256_000;

    /// Default serial read timeout
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Time the module needs to come back after a restart command
    pub const RESTART_DELAY: Duration = Duration::from_secs(3);

    /// Half-width of the usable horizontal field of view (radians)
    pub const ANGLE_MAX: f64 = std::f64::consts::FRAC_PI_3;

    /// Lower bound of the usable horizontal field of view (radians)
    pub const ANGLE_MIN: f64 = -ANGLE_MAX;
}
