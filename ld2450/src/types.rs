/*!
Device settings and decoded results of configuration commands.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Target tracking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Report only the strongest target
    Single,
    /// Report up to three targets
    Multi,
}

impl TrackingMode {
    /// Value reported by the "query tracking mode" command
    pub fn wire_value(self) -> u16 {
        match self {
            Self::Single => 1,
            Self::Multi => 2,
        }
    }
}

impl TryFrom<u16> for TrackingMode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Single),
            2 => Ok(Self::Multi),
            other => Err(ProtocolError::invalid_argument(format!(
                "unknown tracking mode {}",
                other
            ))),
        }
    }
}

/// Zone filtering behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    /// No filtering
    #[default]
    Off,
    /// Only detect inside the regions
    Inside,
    /// Ignore targets inside the regions
    Outside,
}

impl ZoneMode {
    pub fn wire_value(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Inside => 1,
            Self::Outside => 2,
        }
    }
}

impl TryFrom<u16> for ZoneMode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Inside),
            2 => Ok(Self::Outside),
            other => Err(ProtocolError::invalid_argument(format!(
                "unknown zone filtering mode {}",
                other
            ))),
        }
    }
}

/// Rectangular region given by two diagonal corners (mm)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x1: i16,
    pub y1: i16,
    pub x2: i16,
    pub y2: i16,
}

impl Region {
    /// Wire layout: four signed 16-bit little-endian corners
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        for (i, v) in [self.x1, self.y1, self.x2, self.y2].into_iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let at = |i: usize| i16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Self {
            x1: at(0),
            y1: at(2),
            x2: at(4),
            y2: at(6),
        }
    }

    fn is_empty(&self) -> bool {
        self.x1 == 0 && self.y1 == 0 && self.x2 == 0 && self.y2 == 0
    }
}

/// Maximum number of filter regions the module stores
pub const MAX_REGIONS: usize = 3;

/// Zone filtering configuration: a mode and up to three regions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneFilter {
    pub mode: ZoneMode,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl ZoneFilter {
    /// Filtering disabled
    pub fn off() -> Self {
        Self::default()
    }

    /// Value bytes for the "set zone filtering" command, already in wire order.
    /// Unused region slots are sent as zeros.
    pub fn to_value_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.regions.len() > MAX_REGIONS {
            return Err(ProtocolError::invalid_argument(format!(
                "at most {} filter regions, got {}",
                MAX_REGIONS,
                self.regions.len()
            )));
        }

        let mut value = Vec::with_capacity(2 + MAX_REGIONS * 8);
        value.push(self.mode.wire_value());
        value.push(0x00);
        for region in &self.regions {
            value.extend_from_slice(&region.to_bytes());
        }
        value.resize(2 + MAX_REGIONS * 8, 0);
        Ok(value)
    }

    /// Parse mode and region table from a "query zone filtering" payload
    pub(crate) fn from_payload(word: u16, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 32 {
            return Err(ProtocolError::unexpected_payload(
                word,
                format!("zone filter payload has {} bytes, expected 32", payload.len()),
            ));
        }
        let mode = u16::from_le_bytes([payload[6], payload[7]]);
        let mode = ZoneMode::try_from(mode)
            .map_err(|e| ProtocolError::unexpected_payload(word, e.to_string()))?;

        let mut regions = Vec::new();
        for i in 0..MAX_REGIONS {
            let from = (i + 1) * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[from..from + 8]);
            let region = Region::from_bytes(&bytes);
            if !region.is_empty() {
                regions.push(region);
            }
        }

        Ok(Self { mode, regions })
    }
}

/// Supported serial baud rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B256000,
    B460800,
}

impl BaudRate {
    const ALL: [BaudRate; 8] = [
        Self::B9600,
        Self::B19200,
        Self::B38400,
        Self::B57600,
        Self::B115200,
        Self::B230400,
        Self::B256000,
        Self::B460800,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            Self::B9600 => 9_600,
            Self::B19200 => 19_200,
            Self::B38400 => 38_400,
            Self::B57600 => 57_600,
            Self::B115200 => 115_200,
            Self::B230400 => 230_400,
            Self::B256000 => 256_000,
            Self::B460800 => 460_800,
        }
    }

    /// Index used by the "set baud rate" command (1-based)
    pub fn wire_index(self) -> u16 {
        Self::ALL.iter().position(|b| *b == self).unwrap_or(0) as u16 + 1
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::B256000
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_u32() == value)
            .ok_or_else(|| {
                let supported: Vec<String> =
                    Self::ALL.iter().map(|b| b.as_u32().to_string()).collect();
                ProtocolError::invalid_argument(format!(
                    "baud rate must be one of: {}",
                    supported.join(", ")
                ))
            })
    }
}

/// Firmware version as reported by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u32,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}.{:02}.{:08X}", self.major, self.minor, self.build)
    }
}

/// Bluetooth MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        f.write_str(&parts.join(" "))
    }
}

/// Device configuration applied once per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Bluetooth radio state
    pub bluetooth: bool,
    /// Tracking mode
    pub tracking: TrackingMode,
    /// Zone filtering
    pub zone_filter: ZoneFilter,
    /// Restart the module after setting the radio state (required for it to take effect)
    pub restart_after_radio: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            bluetooth: false,
            tracking: TrackingMode::Multi,
            zone_filter: ZoneFilter::off(),
            restart_after_radio: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_index() {
        assert_eq!(BaudRate::B9600.wire_index(), 1);
        assert_eq!(BaudRate::B256000.wire_index(), 7);
        assert_eq!(BaudRate::B460800.wire_index(), 8);
        assert_eq!(BaudRate::try_from(115_200).unwrap(), BaudRate::B115200);
        assert!(BaudRate::try_from(1_000).is_err());
    }

    #[test]
    fn test_region_bytes() {
        let region = Region {
            x1: -1000,
            y1: 0,
            x2: 1000,
            y2: 3000,
        };
        let bytes = region.to_bytes();
        assert_eq!(&bytes[0..2], &(-1000i16).to_le_bytes());
        assert_eq!(Region::from_bytes(&bytes), region);
    }

    #[test]
    fn test_zone_filter_value_bytes() {
        let filter = ZoneFilter {
            mode: ZoneMode::Outside,
            regions: vec![Region {
                x1: 1,
                y1: 2,
                x2: 3,
                y2: 4,
            }],
        };
        let value = filter.to_value_bytes().unwrap();
        assert_eq!(value.len(), 26);
        assert_eq!(&value[0..2], &[0x02, 0x00]);
        assert_eq!(&value[2..4], &[0x01, 0x00]);
        assert_eq!(&value[10..26], &[0u8; 16]);
    }

    #[test]
    fn test_zone_filter_rejects_extra_regions() {
        let region = Region {
            x1: 0,
            y1: 0,
            x2: 1,
            y2: 1,
        };
        let filter = ZoneFilter {
            mode: ZoneMode::Inside,
            regions: vec![region; 4],
        };
        assert!(filter.to_value_bytes().is_err());
    }

    #[test]
    fn test_firmware_display() {
        let version = FirmwareVersion {
            major: 1,
            minor: 2,
            build: 0x2209_1615,
        };
        assert_eq!(version.to_string(), "V1.02.22091615");
    }

    #[test]
    fn test_mac_display() {
        let mac = MacAddress([0x8F, 0x27, 0x2E, 0xB8, 0x0F, 0x65]);
        assert_eq!(mac.to_string(), "8F 27 2E B8 0F 65");
    }

    #[test]
    fn test_default_settings() {
        let settings = DeviceSettings::default();
        assert!(!settings.bluetooth);
        assert_eq!(settings.tracking, TrackingMode::Multi);
        assert_eq!(settings.zone_filter.mode, ZoneMode::Off);
    }
}
