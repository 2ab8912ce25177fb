/*!
Streaming data frame decoding.

While not in configuration mode the module streams 30-byte frames at roughly
10 Hz:

```text
AA FF 03 00 | slot 0 | slot 1 | slot 2 | 55 CC
slot = x (2B) | y (2B) | speed (2B) | distance resolution (2B)
```

x, y and speed use offset-sign encoding: a raw value below `0x8000` is the
negated magnitude, a value at or above `0x8000` is positive after removing
the offset. This is not two's complement.
*/

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DecodeAnomaly;
use crate::protocol::{
    DATA_FOOTER, DATA_FRAME_SIZE_BYTES, DATA_HEADER, SLOT_SIZE_BYTES, TARGET_SLOTS,
};

const SIGN_OFFSET: u16 = 0x8000;

/// Decode an offset-sign 16-bit field
pub fn decode_offset_sign(raw: u16) -> i32 {
    if raw < SIGN_OFFSET {
        -(raw as i32)
    } else {
        (raw - SIGN_OFFSET) as i32
    }
}

/// One detected target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Slot index in the frame (0..3)
    pub slot: u8,
    /// Lateral position in mm, positive to the right
    pub x: i32,
    /// Distance along the boresight in mm
    pub y: i32,
    /// Radial speed in cm/s
    pub speed: i32,
    /// Distance gate resolution in mm
    pub resolution: u16,
}

impl Target {
    /// Straight-line distance from the sensor in mm
    pub fn distance(&self) -> f64 {
        (self.x as f64).hypot(self.y as f64)
    }

    /// Horizontal angle in radians, zero straight ahead
    pub fn angle(&self) -> f64 {
        (self.x as f64 / self.y as f64).atan()
    }
}

/// One decoded streaming sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Present targets; empty slots are omitted
    pub targets: Vec<Target>,
}

impl DataFrame {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Target closest to the sensor
    pub fn nearest(&self) -> Option<&Target> {
        self.targets
            .iter()
            .min_by(|a, b| a.distance().total_cmp(&b.distance()))
    }
}

/// Decoder for chunks read up to the data footer.
///
/// Holds no counts; the acquisition loop keeps those.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a chunk, logging and dropping anything malformed.
    ///
    /// A `None` means the caller should keep scanning for the next footer.
    pub fn decode(&self, raw: &[u8]) -> Option<DataFrame> {
        match self.try_decode(raw) {
            Ok(frame) => Some(frame),
            Err(DecodeAnomaly::Truncated { len }) if len == 0 => None,
            Err(e) => {
                warn!("⚠️ Dropping data frame: {}", e);
                None
            }
        }
    }

    /// Decode the last frame in `raw`; anything before it is ignored
    pub fn try_decode(&self, raw: &[u8]) -> Result<DataFrame, DecodeAnomaly> {
        let frame = parse(raw)?;
        debug!("Decoded frame with {} targets", frame.targets.len());
        Ok(frame)
    }
}

fn parse(raw: &[u8]) -> Result<DataFrame, DecodeAnomaly> {
    if raw.len() < DATA_FRAME_SIZE_BYTES {
        return Err(DecodeAnomaly::Truncated { len: raw.len() });
    }
    if !raw.ends_with(&DATA_FOOTER) {
        return Err(DecodeAnomaly::MissingFooter);
    }

    let frame = &raw[raw.len() - DATA_FRAME_SIZE_BYTES..];
    let header = &frame[..DATA_HEADER.len()];
    if header != DATA_HEADER {
        return Err(DecodeAnomaly::BadHeader {
            found: hex::encode(header),
        });
    }

    let slots = &frame[DATA_HEADER.len()..DATA_HEADER.len() + TARGET_SLOTS * SLOT_SIZE_BYTES];
    let targets = slots
        .chunks_exact(SLOT_SIZE_BYTES)
        .enumerate()
        .filter_map(|(i, slot)| parse_slot(i as u8, slot))
        .collect();

    Ok(DataFrame { targets })
}

fn parse_slot(slot: u8, bytes: &[u8]) -> Option<Target> {
    let field = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);

    let x = decode_offset_sign(field(0));
    let y = decode_offset_sign(field(2));
    if x == 0 && y == 0 {
        return None;
    }

    Some(Target {
        slot,
        x,
        y,
        speed: decode_offset_sign(field(4)),
        resolution: field(6),
    })
}
