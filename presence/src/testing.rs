//! Radar double for the controller and diagnostics tests

use std::collections::{HashMap, VecDeque};
use std::io;
use std::thread;
use std::time::Duration;

use ld2450::protocol::{CMD_FOOTER, CMD_HEADER, DATA_FOOTER, DATA_HEADER};
use ld2450::{Connector, SerialChannel};

/// Acknowledges every command and streams one fixed data frame.
///
/// Replies for a word registered with [`FakeRadar::replies`] cycle through
/// the given data blocks, one per request.
#[derive(Default)]
pub struct FakeRadar {
    pending: VecDeque<Vec<u8>>,
    data: HashMap<u16, VecDeque<Vec<u8>>>,
    frame: Vec<u8>,
    backlog: usize,
    pub written: Vec<u16>,
}

impl FakeRadar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(mut self, word: u16, blocks: &[&[u8]]) -> Self {
        let blocks = blocks.iter().map(|b| b.to_vec()).collect();
        self.data.insert(word, blocks);
        self
    }

    pub fn streaming(mut self, frame: Vec<u8>) -> Self {
        self.frame = frame;
        self
    }

    pub fn backlog(mut self, bytes: usize) -> Self {
        self.backlog = bytes;
        self
    }
}

impl SerialChannel for FakeRadar {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let word = u16::from_le_bytes([bytes[6], bytes[7]]);
        self.written.push(word);

        let data = match self.data.get_mut(&word) {
            Some(blocks) => {
                let block = blocks.pop_front().unwrap_or_default();
                blocks.push_back(block.clone());
                block
            }
            None => Vec::new(),
        };

        let mut reply = CMD_HEADER.to_vec();
        reply.extend_from_slice(&((4 + data.len()) as u16).to_le_bytes());
        reply.extend_from_slice(&(word | 0x0100).to_le_bytes());
        reply.extend_from_slice(&[0x00, 0x00]);
        reply.extend_from_slice(&data);
        reply.extend_from_slice(&CMD_FOOTER);
        self.pending.push_back(reply);
        Ok(())
    }

    fn read_until(&mut self, _marker: &[u8]) -> io::Result<Vec<u8>> {
        if let Some(reply) = self.pending.pop_front() {
            return Ok(reply);
        }
        thread::sleep(Duration::from_millis(5));
        Ok(self.frame.clone())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.backlog)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One target at x = +0, y = 800 mm
pub fn single_target_frame() -> Vec<u8> {
    let mut frame = DATA_HEADER.to_vec();
    frame.extend_from_slice(&[0x00, 0x80, 0x20, 0x83, 0x00, 0x00, 0x68, 0x01]);
    frame.extend_from_slice(&[0u8; 16]);
    frame.extend_from_slice(&DATA_FOOTER);
    frame
}

/// Connects to a streaming [`FakeRadar`]
pub struct FakeConnector {
    pub backlog: usize,
}

impl Connector for FakeConnector {
    type Channel = FakeRadar;

    fn connect(&mut self) -> io::Result<FakeRadar> {
        Ok(FakeRadar::new()
            .streaming(single_target_frame())
            .backlog(self.backlog))
    }
}
