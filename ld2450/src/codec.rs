/*!
Command frame encoding and response framing.

A configuration command travels as

```text
FD FC FB FA | length (u16 LE) | word (u16 LE) | value | 04 03 02 01
```

where `length` counts the word and value bytes. The device answers with the
same envelope; its payload echoes the word with bit `0x0100` set and carries
a 16-bit ack status at offset 4.
*/

use tracing::trace;

use crate::error::FramingError;
use crate::protocol::{CMD_FOOTER, CMD_HEADER};

/// Offset of the ack status inside a response payload
const ACK_OFFSET: usize = 4;

/// Offset of command-specific data inside a response payload
const DATA_OFFSET: usize = 6;

/// Bit the device sets in the echoed command word
pub const ACK_WORD_FLAG: u16 = 0x0100;

/// A single configuration command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command word, e.g. `0x00A0` for "read firmware version"
    pub word: u16,
    /// Value bytes in logical (big-endian) order
    pub value: Vec<u8>,
    /// Whether the value bytes are reversed on the wire
    pub reverse_value: bool,
}

impl Command {
    /// Command with no value payload
    pub fn new(word: u16) -> Self {
        Self {
            word,
            value: Vec::new(),
            reverse_value: true,
        }
    }

    /// Command with a value that is byte-reversed on the wire
    pub fn with_value(word: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            word,
            value: value.into(),
            reverse_value: true,
        }
    }

    /// Command whose value bytes are sent as given
    pub fn with_raw_value(word: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            word,
            value: value.into(),
            reverse_value: false,
        }
    }

    /// Encode into a complete wire frame
    pub fn encode(&self) -> Vec<u8> {
        encode(self.word, &self.value, self.reverse_value)
    }
}

/// Build a full command frame.
///
/// The word is always written byte-reversed (little-endian). The value is
/// reversed only when `reverse_value` is set; zone filter commands pass
/// their region table already in wire order.
pub fn encode(word: u16, value: &[u8], reverse_value: bool) -> Vec<u8> {
    let length = (2 + value.len()) as u16;

    let mut frame = Vec::with_capacity(CMD_HEADER.len() + 4 + value.len() + CMD_FOOTER.len());
    frame.extend_from_slice(&CMD_HEADER);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&word.to_le_bytes());
    if reverse_value {
        frame.extend(value.iter().rev());
    } else {
        frame.extend_from_slice(value);
    }
    frame.extend_from_slice(&CMD_FOOTER);
    frame
}

/// Seed for the XOR checksum: doubled device address XOR register
pub fn checksum_seed(address: u8, register: u8) -> u8 {
    address.wrapping_mul(2) ^ register
}

/// XOR every message byte into the seed
pub fn checksum(seed: u8, message: &[u8]) -> u8 {
    message.iter().fold(seed, |acc, b| acc ^ b)
}

/// DDC/CI address of the display brightness chip
pub const DDC_ADDRESS: u8 = 0x37;

/// DDC/CI sub-address register
pub const DDC_REGISTER: u8 = 0x51;

/// Block for the brightness chip's "set VCP 0x10" request, checksum appended.
///
/// The I2C write itself belongs to the brightness driver.
pub fn brightness_message(value: u8) -> Vec<u8> {
    let mut message = vec![0x84, 0x03, 0x10, 0x00, value];
    let cs = checksum(checksum_seed(DDC_ADDRESS, DDC_REGISTER), &message);
    message.push(cs);
    message
}

/// Payload of a command response, between header and footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    payload: Vec<u8>,
}

impl ResponseFrame {
    /// Raw payload bytes, starting with the length field
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Declared length of word + data
    pub fn length(&self) -> u16 {
        u16::from_le_bytes([self.payload[0], self.payload[1]])
    }

    /// Echoed command word as sent by the device
    pub fn word(&self) -> u16 {
        u16::from_le_bytes([self.payload[2], self.payload[3]])
    }

    /// Echoed word with the device's ack bit cleared
    pub fn command_word(&self) -> u16 {
        self.word() & !ACK_WORD_FLAG
    }

    /// Ack status; zero means success
    pub fn ack_status(&self) -> u16 {
        u16::from_le_bytes([self.payload[ACK_OFFSET], self.payload[ACK_OFFSET + 1]])
    }

    /// True iff the device accepted the command
    pub fn is_acknowledged(&self) -> bool {
        self.ack_status() == 0
    }

    /// Command-specific data after the ack field
    pub fn data(&self) -> &[u8] {
        &self.payload[DATA_OFFSET..]
    }

    /// Little-endian u16 at a payload offset
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        self.payload
            .get(offset..offset + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }
}

/// Extract the response payload from whatever the port returned.
///
/// Leading garbage is skipped by slicing after the last header occurrence.
pub fn decode_response(raw: &[u8]) -> Result<ResponseFrame, FramingError> {
    let start = find_last(raw, &CMD_HEADER).ok_or(FramingError::MissingHeader {
        received: raw.len(),
    })? + CMD_HEADER.len();

    let rest = &raw[start..];
    if !rest.ends_with(&CMD_FOOTER) {
        return Err(FramingError::MissingFooter);
    }
    let payload = &rest[..rest.len() - CMD_FOOTER.len()];

    if payload.len() < DATA_OFFSET {
        return Err(FramingError::TooShort { len: payload.len() });
    }

    let declared = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let actual = payload.len() - 2;
    if declared != actual {
        return Err(FramingError::LengthMismatch { declared, actual });
    }

    trace!("response payload: {}", hex::encode(payload));
    Ok(ResponseFrame {
        payload: payload.to_vec(),
    })
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_enter_config() {
        let frame = encode(0x00FF, &[0x00, 0x01], true);
        assert_eq!(
            frame,
            vec![
                0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFF, 0x00, 0x01, 0x00, 0x04, 0x03, 0x02,
                0x01
            ]
        );
    }

    #[test]
    fn test_encode_raw_value_keeps_order() {
        let frame = encode(0x00C2, &[0x01, 0x00, 0x10, 0x20], false);
        assert_eq!(&frame[4..6], &[0x06, 0x00]);
        assert_eq!(&frame[6..8], &[0xC2, 0x00]);
        assert_eq!(&frame[8..12], &[0x01, 0x00, 0x10, 0x20]);
    }

    #[test]
    fn test_checksum_deterministic() {
        let message = [0x84, 0x03, 0x10, 0x00, 0x32];
        let seed = checksum_seed(0x37, 0x51);
        assert_eq!(seed, 0x6E ^ 0x51);
        assert_eq!(checksum(seed, &message), checksum(seed, &message));
        assert_eq!(checksum(seed, &[]), seed);
    }

    #[test]
    fn test_brightness_message() {
        let message = brightness_message(50);
        assert_eq!(message.len(), 6);
        assert_eq!(&message[..5], &[0x84, 0x03, 0x10, 0x00, 50]);
        // The appended byte zeroes the XOR over seed + whole block
        let seed = checksum_seed(DDC_ADDRESS, DDC_REGISTER);
        assert_eq!(checksum(seed, &message), 0);
    }

    #[test]
    fn test_encode_decode_recovers_word() {
        for word in [0x00A0u16, 0x00A5, 0x00C2, 0x0091] {
            let frame = Command::with_value(word, vec![0x00, 0x01]).encode();
            let response = decode_response(&frame).unwrap();
            assert_eq!(response.word(), word);
            assert_eq!(response.length() as usize, 4);
        }
    }

    #[test]
    fn test_decode_ack_response() {
        // Enter config ack: protocol version 1, buffer size 0x40
        let raw = [
            0xFD, 0xFC, 0xFB, 0xFA, 0x08, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x01, 0x00, 0x40, 0x00,
            0x04, 0x03, 0x02, 0x01,
        ];
        let response = decode_response(&raw).unwrap();
        assert!(response.is_acknowledged());
        assert_eq!(response.word(), 0x01FF);
        assert_eq!(response.command_word(), 0x00FF);
        assert_eq!(response.data(), &[0x01, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn test_decode_negative_ack() {
        let raw = [
            0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0x90, 0x01, 0x01, 0x00, 0x04, 0x03, 0x02, 0x01,
        ];
        let response = decode_response(&raw).unwrap();
        assert!(!response.is_acknowledged());
        assert_eq!(response.ack_status(), 1);
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let mut raw = vec![0xAA, 0xFF, 0x03, 0x00, 0x12, 0xFD, 0xFC, 0xFB, 0xFA];
        raw.extend_from_slice(&[
            0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFE, 0x01, 0x00, 0x00, 0x04, 0x03, 0x02, 0x01,
        ]);
        let response = decode_response(&raw).unwrap();
        assert_eq!(response.command_word(), 0x00FE);
        assert!(response.is_acknowledged());
    }

    #[test]
    fn test_decode_framing_errors() {
        assert_eq!(
            decode_response(&[0x01, 0x02]),
            Err(FramingError::MissingHeader { received: 2 })
        );
        assert_eq!(
            decode_response(&[0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFE, 0x01]),
            Err(FramingError::MissingFooter)
        );
        assert_eq!(
            decode_response(&[0xFD, 0xFC, 0xFB, 0xFA, 0x01, 0x04, 0x03, 0x02, 0x01]),
            Err(FramingError::TooShort { len: 1 })
        );
        assert_eq!(
            decode_response(&[
                0xFD, 0xFC, 0xFB, 0xFA, 0x09, 0x00, 0xFE, 0x01, 0x00, 0x00, 0x04, 0x03, 0x02,
                0x01
            ]),
            Err(FramingError::LengthMismatch {
                declared: 9,
                actual: 4
            })
        );
    }
}
