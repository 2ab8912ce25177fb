/*!
Bench tools for a radar on the desk.

- [`monitor`] prints every frame the acquisition loop delivers together with
  the frame queue depth and the unread serial backlog, so a slow consumer or
  a drifting link shows up immediately.
- [`query_consistency`] repeats the read-only configuration queries and
  collects every distinct answer. A healthy module gives one answer each.
*/

use std::collections::BTreeSet;
use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::Result;
use ld2450::protocol::TARGET_SLOTS;
use ld2450::{DataFrame, ProtocolClient, ProtocolError, SerialChannel, SupervisorHandle};
use tracing::{debug, warn};

const SECOND: Duration = Duration::from_secs(1);
const MONITOR_POLL: Duration = Duration::from_millis(200);

/// Numbers samples within consecutive one-second windows
#[derive(Debug)]
pub struct RateCounter {
    window_end: Instant,
    count: u32,
}

impl RateCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_end: now + SECOND,
            count: 0,
        }
    }

    /// Count one sample. Returns its number within the current window and
    /// whether it opened a new window.
    pub fn tick(&mut self, now: Instant) -> (u32, bool) {
        let rolled = now > self.window_end;
        if rolled {
            self.window_end = now + SECOND;
            self.count = 0;
        }
        self.count += 1;
        (self.count, rolled)
    }
}

/// One monitor line; every slot gets an x/y column, empty ones print zeros
pub fn format_sample(sample: u32, queue_depth: usize, backlog: usize, frame: &DataFrame) -> String {
    let mut line = format!("Sample: {:5} | Queue: {:3} | IN: {:5}", sample, queue_depth, backlog);
    for slot in 0..TARGET_SLOTS {
        let (x, y) = frame
            .targets
            .iter()
            .find(|t| usize::from(t.slot) == slot)
            .map_or((0, 0), |t| (t.x, t.y));
        line.push_str(&format!(" | {:5} {:5}", x, y));
    }
    line
}

/// Write frames from a running supervisor to `out` until it stops or
/// `limit` frames have been shown; in the latter case the supervisor is
/// asked to stop. Returns the number of frames shown.
pub fn monitor<W: Write>(
    handle: &SupervisorHandle,
    limit: Option<u64>,
    out: &mut W,
) -> Result<u64> {
    let mut rate = RateCounter::new(Instant::now());
    let mut shown = 0;

    while !handle.is_stopping() {
        if limit.is_some_and(|n| shown >= n) {
            handle.stop();
            break;
        }
        let Some(frame) = handle.poll(MONITOR_POLL) else {
            continue;
        };

        let (sample, rolled) = rate.tick(Instant::now());
        if rolled {
            writeln!(out)?;
        }
        let line = format_sample(sample, handle.queue_depth(), handle.input_backlog(), &frame);
        writeln!(out, "{}", line)?;
        shown += 1;
    }

    Ok(shown)
}

/// Distinct answers seen across repeated queries
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueryReport {
    pub rounds: u32,
    pub firmware: BTreeSet<String>,
    /// MAC addresses, or `off` while the radio is disabled
    pub mac: BTreeSet<String>,
    pub tracking: BTreeSet<String>,
    /// Queries that failed after all retries
    pub failures: u32,
}

impl QueryReport {
    pub fn is_consistent(&self) -> bool {
        self.failures == 0
            && self.firmware.len() <= 1
            && self.mac.len() <= 1
            && self.tracking.len() <= 1
    }
}

/// Ask for firmware version, MAC address and tracking mode `rounds` times.
///
/// Individual failed queries are counted; a dead link ends the run.
pub fn query_consistency<C: SerialChannel>(
    client: &mut ProtocolClient<C>,
    rounds: u32,
) -> Result<QueryReport, ProtocolError> {
    let mut report = QueryReport::default();

    for round in 1..=rounds {
        debug!("Query round {}/{}", round, rounds);

        let firmware = client.firmware_version().map(|v| v.to_string());
        collect(&mut report.firmware, &mut report.failures, "firmware", firmware)?;

        let mac = match client.mac_address() {
            Ok(mac) => Ok(mac.to_string()),
            Err(ProtocolError::UnexpectedPayload { .. }) => Ok("off".to_string()),
            Err(e) => Err(e),
        };
        collect(&mut report.mac, &mut report.failures, "MAC address", mac)?;

        let tracking = client.tracking_mode().map(|m| format!("{:?}", m));
        collect(&mut report.tracking, &mut report.failures, "tracking mode", tracking)?;

        report.rounds = round;
    }

    Ok(report)
}

fn collect(
    seen: &mut BTreeSet<String>,
    failures: &mut u32,
    what: &str,
    answer: Result<String, ProtocolError>,
) -> Result<(), ProtocolError> {
    match answer {
        Ok(value) => {
            seen.insert(value);
            Ok(())
        }
        Err(e) if e.is_link_failure() => Err(e),
        Err(e) => {
            warn!("⚠️ {} query failed: {}", what, e);
            *failures += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeRadar};
    use ld2450::client::words;
    use ld2450::{AcquisitionSupervisor, SupervisorConfig, Target};
    use std::io;

    const FIRMWARE: &[u8] = &[0x00, 0x00, 0x02, 0x01, 0x16, 0x24, 0x06, 0x22];
    const MAC: &[u8] = &[0x8F, 0x27, 0x2E, 0xB8, 0x0F, 0x65];

    #[test]
    fn test_rate_counter_restarts_each_second() {
        let t0 = Instant::now();
        let mut rate = RateCounter::new(t0);

        assert_eq!(rate.tick(t0), (1, false));
        assert_eq!(rate.tick(t0 + Duration::from_millis(500)), (2, false));
        assert_eq!(rate.tick(t0 + Duration::from_millis(1001)), (1, true));
        assert_eq!(rate.tick(t0 + Duration::from_millis(1100)), (2, false));
    }

    #[test]
    fn test_format_sample_keeps_slot_columns() {
        let frame = DataFrame {
            targets: vec![Target {
                slot: 1,
                x: -300,
                y: 1200,
                speed: 0,
                resolution: 360,
            }],
        };
        let line = format_sample(7, 2, 60, &frame);
        assert_eq!(
            line,
            "Sample:     7 | Queue:   2 | IN:    60 |     0     0 |  -300  1200 |     0     0"
        );
    }

    #[test]
    fn test_monitor_stops_after_limit() {
        let config = SupervisorConfig {
            warmup_frames: 0,
            device: ld2450::DeviceSettings {
                restart_after_radio: false,
                ..Default::default()
            },
            ..SupervisorConfig::default()
        };
        let supervisor = AcquisitionSupervisor::new(FakeConnector { backlog: 42 }, config);
        let handle = supervisor.handle();
        let join = supervisor.spawn().unwrap();

        let mut out = Vec::new();
        let shown = monitor(&handle, Some(3), &mut out).unwrap();
        join.join().unwrap();

        assert_eq!(shown, 3);
        assert!(handle.is_stopping());
        let text = String::from_utf8(out).unwrap();
        let samples: Vec<&str> = text.lines().filter(|l| l.starts_with("Sample:")).collect();
        assert_eq!(samples.len(), 3);
        for line in samples {
            assert!(line.contains("IN:    42"), "{}", line);
            assert!(line.contains("|     0   800 |"), "{}", line);
        }
    }

    #[test]
    fn test_query_consistency_collects_distinct_answers() {
        let radar = FakeRadar::new()
            .replies(words::FIRMWARE_VERSION, &[FIRMWARE])
            .replies(words::MAC_ADDRESS, &[MAC, &[]])
            .replies(words::QUERY_TRACKING, &[&[0x02, 0x00]]);
        let mut client = ProtocolClient::new(radar);

        let report = query_consistency(&mut client, 4).unwrap();

        assert_eq!(report.rounds, 4);
        assert_eq!(report.failures, 0);
        assert_eq!(report.firmware, BTreeSet::from(["V1.02.22062416".to_string()]));
        assert_eq!(
            report.mac,
            BTreeSet::from(["8F 27 2E B8 0F 65".to_string(), "off".to_string()])
        );
        assert_eq!(report.tracking, BTreeSet::from(["Multi".to_string()]));
        assert!(!report.is_consistent());

        // Each round is three bracketed queries
        let written = &client.channel_mut().written;
        assert_eq!(written.len(), 4 * 3 * 3);
    }

    #[test]
    fn test_query_failures_counted_not_fatal() {
        let radar = FakeRadar::new()
            .replies(words::FIRMWARE_VERSION, &[FIRMWARE])
            .replies(words::MAC_ADDRESS, &[MAC])
            .replies(words::QUERY_TRACKING, &[&[0x07, 0x00]]);
        let mut client = ProtocolClient::new(radar);

        let report = query_consistency(&mut client, 2).unwrap();

        assert_eq!(report.rounds, 2);
        assert_eq!(report.failures, 2);
        assert!(report.tracking.is_empty());
        assert_eq!(report.firmware.len(), 1);
        assert!(!report.is_consistent());
    }

    struct Unplugged;

    impl SerialChannel for Unplugged {
        fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn read_until(&mut self, _marker: &[u8]) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(0)
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_query_consistency_stops_on_dead_link() {
        let mut client = ProtocolClient::new(Unplugged);
        let err = query_consistency(&mut client, 10).unwrap_err();
        assert!(err.is_link_failure());
    }
}
