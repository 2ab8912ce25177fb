/*!
Control loop: radar frames in, actuator values out.

Each target slot has its own pair of sliding windows for x and y. The
nearest smoothed target decides presence, distance and angle, which every
enabled channel maps through its own rate-limited mapper.
*/

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use ld2450::codec::brightness_message;
use ld2450::protocol::{ANGLE_MAX, ANGLE_MIN, TARGET_SLOTS};
use ld2450::{
    linear_map, DataFrame, MapperConfig, RateLimitedMapper, Rest, SlidingWindowAverage,
    SupervisorHandle,
};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, RadarConfig};

/// Output channel driven by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Brightness,
    Flower,
    Eye,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Brightness => "brightness",
            Channel::Flower => "flower",
            Channel::Eye => "eye",
        };
        f.write_str(name)
    }
}

/// Hardware boundary for the output channels
pub trait Actuator {
    fn set(&mut self, channel: Channel, value: f64) -> Result<()>;
}

/// Actuator that only logs what it would drive
#[derive(Debug, Default)]
pub struct LoggingActuator {
    /// Brightness range to rescale onto the monitor's 0..100 DDC/CI scale
    ddc_range: Option<(f64, f64)>,
}

impl LoggingActuator {
    pub fn new(config: &AppConfig) -> Self {
        let ddc_range = config
            .brightness
            .as_ref()
            .filter(|b| b.ddc)
            .map(|b| (b.min, b.max));
        Self { ddc_range }
    }
}

impl Actuator for LoggingActuator {
    fn set(&mut self, channel: Channel, value: f64) -> Result<()> {
        debug!("{} -> {:.2}", channel, value);

        if let (Channel::Brightness, Some((min, max))) = (channel, self.ddc_range) {
            let percent = linear_map(value, min, max, 0.0, 100.0).round() as u8;
            debug!("DDC/CI block: {}", hex::encode(brightness_message(percent)));
        }
        Ok(())
    }
}

/// Channels enabled by the configuration, resolved once at startup
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub brightness: Option<RateLimitedMapper>,
    pub flower: Option<RateLimitedMapper>,
    pub eye: Option<RateLimitedMapper>,
}

impl Capabilities {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let radar = &config.radar;
        let (dmin, dmax) = (radar.distance_min, radar.distance_max);

        let brightness = config
            .brightness
            .as_ref()
            .map(|b| {
                RateLimitedMapper::new(MapperConfig::inverted(dmin, dmax, b.min, b.max, b.delta))
            })
            .transpose()?;

        let flower = config
            .flower
            .as_ref()
            .map(|f| {
                let mapping = MapperConfig::direct(dmin, dmax, 0.0, 100.0, f.duty_cycle_delta);
                RateLimitedMapper::new(mapping)
            })
            .transpose()?;

        let eye = config
            .eye
            .as_ref()
            .map(|e| {
                let (lo, hi) = (e.x_min, e.x_max);
                let mapping = MapperConfig::direct(ANGLE_MIN, ANGLE_MAX, lo, hi, e.x_delta)
                    .with_rest(Rest::Hold)
                    .with_initial((e.x_min + e.x_max) / 2.0);
                RateLimitedMapper::new(mapping)
            })
            .transpose()?;

        Ok(Self {
            brightness,
            flower,
            eye,
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.brightness.is_some() {
            names.push("brightness");
        }
        if self.flower.is_some() {
            names.push("flower");
        }
        if self.eye.is_some() {
            names.push("eye");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// What the controller concluded from one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub present: bool,
    /// Smoothed distance of the nearest target, `distance_max` when absent
    pub distance: f64,
    /// Smoothed angle of the nearest target; kept from the last sighting when absent
    pub angle: f64,
}

struct SlotWindows {
    x: SlidingWindowAverage,
    y: SlidingWindowAverage,
}

pub struct Controller<A: Actuator> {
    slots: Vec<SlotWindows>,
    distance_max: f64,
    capabilities: Capabilities,
    actuator: A,
    last: Observation,
    steps: u64,
}

impl<A: Actuator> Controller<A> {
    pub fn new(radar: &RadarConfig, capabilities: Capabilities, actuator: A) -> Result<Self> {
        let slots = (0..TARGET_SLOTS)
            .map(|_| -> Result<SlotWindows> {
                Ok(SlotWindows {
                    x: SlidingWindowAverage::new(radar.window_size)?,
                    y: SlidingWindowAverage::new(radar.window_size)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            distance_max: radar.distance_max,
            capabilities,
            actuator,
            last: Observation {
                present: false,
                distance: radar.distance_max,
                angle: 0.0,
            },
            steps: 0,
        })
    }

    /// Poll frames until the supervisor is stopped
    pub fn run(&mut self, handle: &SupervisorHandle, poll_interval: Duration) {
        info!("🎛️ Control loop running ({})", self.capabilities.names().join(", "));

        while !handle.is_stopping() {
            match handle.poll(poll_interval) {
                Some(frame) => {
                    let obs = self.process(&frame);
                    if self.steps % 10 == 0 {
                        debug!(
                            "Q: {} | present: {} | D: {:7.1} | A: {:5.2}",
                            handle.queue_depth(),
                            obs.present,
                            obs.distance,
                            obs.angle
                        );
                    }
                }
                // Radar down: outputs relax toward their resting values
                None if !handle.is_active() => {
                    self.process_absent();
                }
                None => {}
            }
        }

        info!("Control loop finished after {} steps", self.steps);
    }

    /// Smooth the frame's targets and drive every channel once
    pub fn process(&mut self, frame: &DataFrame) -> Observation {
        let nearest = frame
            .targets
            .iter()
            .filter_map(|t| {
                let windows = self.slots.get_mut(t.slot as usize)?;
                let x = windows.x.add(t.x as f64);
                let y = windows.y.add(t.y as f64);
                Some((x.hypot(y), (x / y).atan()))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let obs = match nearest {
            Some((distance, angle)) if distance < self.distance_max => Observation {
                present: true,
                distance,
                angle,
            },
            _ => self.absent(),
        };
        self.drive(obs);
        obs
    }

    /// Drive every channel as if nobody were in range
    pub fn process_absent(&mut self) -> Observation {
        let obs = self.absent();
        self.drive(obs);
        obs
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    fn absent(&self) -> Observation {
        Observation {
            present: false,
            distance: self.distance_max,
            angle: self.last.angle,
        }
    }

    fn drive(&mut self, obs: Observation) {
        self.last = obs;
        self.steps += 1;

        let outputs = [
            (Channel::Brightness, self.capabilities.brightness.as_mut(), obs.distance),
            (Channel::Flower, self.capabilities.flower.as_mut(), obs.distance),
            (Channel::Eye, self.capabilities.eye.as_mut(), obs.angle),
        ];
        for (channel, mapper, input) in outputs {
            let Some(mapper) = mapper else { continue };
            let value = mapper.step(input, obs.present);
            if let Err(e) = self.actuator.set(channel, value) {
                warn!("⚠️ Failed to set {}: {:#}", channel, e);
            }
        }
    }
}
