/*!
Configuration-mode command transactions.

Every command other than streaming reads has to be bracketed by "enter
configuration" and "exit configuration". The link drops or garbles replies
often enough that each of the three steps is retried on its own before a
whole transaction is given up:

```text
for cycle in 1..=outer_cycles
    EnterConfig  x attempts_per_phase   exhausted -> fail
    SendCommand  x attempts_per_phase   exhausted -> next cycle
    ExitConfig   x attempts_per_phase   exhausted -> next cycle
    all three ok -> return the SendCommand reply
fail
```
*/

use tracing::{debug, info, warn};

use crate::channel::SerialChannel;
use crate::codec::{decode_response, Command, ResponseFrame};
use crate::error::{Phase, ProtocolError};
use crate::protocol::CMD_FOOTER;
use crate::types::{
    BaudRate, DeviceSettings, FirmwareVersion, MacAddress, TrackingMode, ZoneFilter,
};

/// Command words
pub mod words {
    pub const ENTER_CONFIG: u16 = 0x00FF;
    pub const EXIT_CONFIG: u16 = 0x00FE;
    pub const SINGLE_TRACKING: u16 = 0x0080;
    pub const MULTI_TRACKING: u16 = 0x0090;
    pub const QUERY_TRACKING: u16 = 0x0091;
    pub const FIRMWARE_VERSION: u16 = 0x00A0;
    pub const SET_BAUD_RATE: u16 = 0x00A1;
    pub const FACTORY_RESET: u16 = 0x00A2;
    pub const RESTART: u16 = 0x00A3;
    pub const BLUETOOTH: u16 = 0x00A4;
    pub const MAC_ADDRESS: u16 = 0x00A5;
    pub const QUERY_ZONE_FILTER: u16 = 0x00C1;
    pub const SET_ZONE_FILTER: u16 = 0x00C2;
}

/// Retry limits for one command transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full enter/send/exit cycles
    pub outer_cycles: u32,
    /// Attempts per phase within one cycle
    pub attempts_per_phase: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            outer_cycles: 4,
            attempts_per_phase: 4,
        }
    }
}

/// Summary of the module's current configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware: FirmwareVersion,
    /// `None` while the bluetooth radio is off
    pub mac: Option<MacAddress>,
    pub tracking: TrackingMode,
    pub zone_filter: ZoneFilter,
}

/// Executes commands over a [`SerialChannel`]
pub struct ProtocolClient<C> {
    channel: C,
    retry: RetryPolicy,
}

impl<C: SerialChannel> ProtocolClient<C> {
    /// Create a client with the default retry policy
    pub fn new(channel: C) -> Self {
        Self::with_retry(channel, RetryPolicy::default())
    }

    pub fn with_retry(channel: C, retry: RetryPolicy) -> Self {
        Self { channel, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Access the underlying channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Give back the underlying channel
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// One request/reply exchange with no retries
    pub fn transact(&mut self, command: &Command) -> Result<ResponseFrame, ProtocolError> {
        let frame = command.encode();
        debug!("CMD {:#06X}: {}", command.word, hex::encode(&frame));
        self.channel.write_all(&frame)?;

        let raw = self.channel.read_until(&CMD_FOOTER)?;
        debug!("RESPONSE {:#06X}: {}", command.word, hex::encode(&raw));

        let response = decode_response(&raw)?;
        if response.command_word() != command.word {
            return Err(ProtocolError::WordMismatch {
                expected: command.word,
                found: response.command_word(),
            });
        }
        if !response.is_acknowledged() {
            return Err(ProtocolError::NegativeAck {
                word: command.word,
                status: response.ack_status(),
            });
        }
        Ok(response)
    }

    /// Execute `command` inside a configuration-mode bracket
    pub fn execute(&mut self, command: &Command) -> Result<ResponseFrame, ProtocolError> {
        let enter = Command::with_value(words::ENTER_CONFIG, vec![0x00, 0x01]);
        let exit = Command::new(words::EXIT_CONFIG);
        let cycles = self.retry.outer_cycles.max(1);
        let mut last_failure = None;

        for cycle in 1..=cycles {
            // Enter-config exhaustion is final
            if let Err(e) = self.run_phase(Phase::EnterConfig, &enter) {
                return Err(execution(command.word, Phase::EnterConfig, cycle, e));
            }

            let response = match self.run_phase(Phase::SendCommand, command) {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Failed to execute command {:#06X} (cycle {}): {}",
                        command.word, cycle, e
                    );
                    last_failure = Some((Phase::SendCommand, cycle, e));
                    continue;
                }
                Err(e) => return Err(execution(command.word, Phase::SendCommand, cycle, e)),
            };

            match self.run_phase(Phase::ExitConfig, &exit) {
                Ok(_) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Failed to end configuration for {:#06X} (cycle {}): {}",
                        command.word, cycle, e
                    );
                    last_failure = Some((Phase::ExitConfig, cycle, e));
                }
                Err(e) => return Err(execution(command.word, Phase::ExitConfig, cycle, e)),
            }
        }

        let (phase, cycle, source) = last_failure.unwrap_or((
            Phase::SendCommand,
            cycles,
            ProtocolError::invalid_argument("no attempts made"),
        ));
        Err(execution(command.word, phase, cycle, source))
    }

    /// Retry a single phase; I/O failures abort at once
    fn run_phase(
        &mut self,
        phase: Phase,
        command: &Command,
    ) -> Result<ResponseFrame, ProtocolError> {
        let attempts = self.retry.attempts_per_phase.max(1);
        let mut attempt = 1;
        loop {
            match self.transact(command) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!("{} attempt {}/{} failed: {}", phase, attempt, attempts, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // High-level commands
    // ------------------------------------------------------------------------

    /// Firmware version, e.g. `V1.02.22062416`
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, ProtocolError> {
        let word = words::FIRMWARE_VERSION;
        let response = self.execute(&Command::new(word))?;
        let payload = response.payload();
        if payload.len() < 14 {
            return Err(ProtocolError::unexpected_payload(
                word,
                format!("{} bytes, expected 14", payload.len()),
            ));
        }

        Ok(FirmwareVersion {
            major: payload[9],
            minor: payload[8],
            build: u32::from_le_bytes([payload[10], payload[11], payload[12], payload[13]]),
        })
    }

    /// Change the serial baud rate; takes effect after a restart
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<(), ProtocolError> {
        let value = baud_rate.wire_index().to_be_bytes();
        self.execute(&Command::with_value(words::SET_BAUD_RATE, value.to_vec()))?;
        info!("Baud rate set to {}", baud_rate.as_u32());
        Ok(())
    }

    /// Restore factory settings: 256000 baud, bluetooth on, multi-target
    /// tracking, zone filtering off. Takes effect after a restart.
    pub fn restore_factory_settings(&mut self) -> Result<(), ProtocolError> {
        self.execute(&Command::new(words::FACTORY_RESET))?;
        Ok(())
    }

    /// Restart the module. The caller has to reopen the port after
    /// [`RESTART_DELAY`](crate::protocol::RESTART_DELAY).
    pub fn restart(&mut self) -> Result<(), ProtocolError> {
        self.execute(&Command::new(words::RESTART))?;
        info!("🔄 Radar restart requested");
        Ok(())
    }

    /// Switch the bluetooth radio; takes effect after a restart
    pub fn set_bluetooth(&mut self, on: bool) -> Result<(), ProtocolError> {
        let value = vec![0x00, u8::from(on)];
        self.execute(&Command::with_value(words::BLUETOOTH, value))?;
        Ok(())
    }

    /// Bluetooth MAC address
    pub fn mac_address(&mut self) -> Result<MacAddress, ProtocolError> {
        let word = words::MAC_ADDRESS;
        let response = self.execute(&Command::with_value(word, vec![0x00, 0x01]))?;
        let payload = response.payload();
        if payload.len() < 12 {
            return Err(ProtocolError::unexpected_payload(
                word,
                format!("{} bytes, expected 12", payload.len()),
            ));
        }

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&payload[6..12]);
        Ok(MacAddress(mac))
    }

    /// The module has no radio-state query; it only reports a MAC address
    /// while bluetooth is on.
    pub fn bluetooth_enabled(&mut self) -> Result<bool, ProtocolError> {
        match self.mac_address() {
            Ok(_) => Ok(true),
            Err(ProtocolError::UnexpectedPayload { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), ProtocolError> {
        let word = match mode {
            TrackingMode::Single => words::SINGLE_TRACKING,
            TrackingMode::Multi => words::MULTI_TRACKING,
        };
        self.execute(&Command::new(word))?;
        Ok(())
    }

    pub fn tracking_mode(&mut self) -> Result<TrackingMode, ProtocolError> {
        let word = words::QUERY_TRACKING;
        let response = self.execute(&Command::new(word))?;
        let mode = response
            .u16_at(6)
            .ok_or_else(|| ProtocolError::unexpected_payload(word, "missing tracking mode"))?;
        TrackingMode::try_from(mode)
            .map_err(|e| ProtocolError::unexpected_payload(word, e.to_string()))
    }

    pub fn zone_filter(&mut self) -> Result<ZoneFilter, ProtocolError> {
        let word = words::QUERY_ZONE_FILTER;
        let response = self.execute(&Command::new(word))?;
        ZoneFilter::from_payload(word, response.payload())
    }

    pub fn set_zone_filter(&mut self, filter: &ZoneFilter) -> Result<(), ProtocolError> {
        let value = filter.to_value_bytes()?;
        self.execute(&Command::with_raw_value(words::SET_ZONE_FILTER, value))?;
        Ok(())
    }

    /// Tracking mode and zone filter from `settings`. Radio state is left to
    /// the caller because it needs a restart and reopen to take effect.
    pub fn apply_detection_settings(
        &mut self,
        settings: &DeviceSettings,
    ) -> Result<(), ProtocolError> {
        self.set_tracking_mode(settings.tracking)?;
        self.set_zone_filter(&settings.zone_filter)?;
        Ok(())
    }

    /// Query everything shown by `presence info`
    pub fn device_info(&mut self) -> Result<DeviceInfo, ProtocolError> {
        let firmware = self.firmware_version()?;
        let mac = match self.mac_address() {
            Ok(mac) => Some(mac),
            Err(ProtocolError::UnexpectedPayload { .. }) => None,
            Err(e) => return Err(e),
        };
        let tracking = self.tracking_mode()?;
        let zone_filter = self.zone_filter()?;

        Ok(DeviceInfo {
            firmware,
            mac,
            tracking,
            zone_filter,
        })
    }
}

fn execution(word: u16, phase: Phase, cycle: u32, source: ProtocolError) -> ProtocolError {
    ProtocolError::Execution {
        word,
        phase,
        cycle,
        source: Box::new(source),
    }
}
