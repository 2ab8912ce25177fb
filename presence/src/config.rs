/*!
Configuration management for the presence controller.

The `[radar]` section is required. Each actuator section (`[brightness]`,
`[flower]`, `[eye]`) is optional and its presence enables that channel.
*/

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use ld2450::{DeviceSettings, RetryPolicy, SupervisorConfig};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub radar: RadarConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<BrightnessConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower: Option<FlowerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye: Option<EyeConfig>,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            radar: RadarConfig::default(),
            brightness: Some(BrightnessConfig::default()),
            flower: None,
            eye: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Radar link, acquisition and presence detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Serial device path
    pub port: String,

    pub baud_rate: u32,

    /// Longest wait for one frame or command reply
    pub read_timeout_ms: u64,

    /// Pause between reconnect attempts
    pub reconnect_backoff_ms: u64,

    /// Wait after a restart before reopening the port
    pub restart_delay_ms: u64,

    /// Frames buffered between acquisition and control
    pub queue_capacity: usize,

    /// Frames discarded after each connect
    pub warmup_frames: u32,

    /// Distance (mm) that maps to the strongest response
    pub distance_min: f64,

    /// Distance (mm) beyond which nobody counts as present
    pub distance_max: f64,

    /// Sliding window length for coordinate smoothing
    pub window_size: usize,

    /// Control loop poll timeout
    pub poll_interval_ms: u64,

    /// Applied to the module on every connect
    pub device: DeviceSettings,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: ld2450::protocol::DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
            reconnect_backoff_ms: 1000,
            restart_delay_ms: 3000,
            queue_capacity: 64,
            warmup_frames: 50,
            distance_min: 500.0,
            distance_max: 3000.0,
            window_size: 15,
            poll_interval_ms: 100,
            device: DeviceSettings::default(),
        }
    }
}

impl RadarConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settings for the acquisition supervisor
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            queue_capacity: self.queue_capacity,
            warmup_frames: self.warmup_frames,
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            retry: RetryPolicy::default(),
            device: self.device.clone(),
        }
    }
}

/// Panel brightness channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessConfig {
    /// Brightness with nobody near (and the resting level)
    pub min: f64,

    /// Brightness at `distance_min`
    pub max: f64,

    /// Largest change per control step
    pub delta: f64,

    /// Also log the monitor's DDC/CI set-brightness block (0..100 scale)
    pub ddc: bool,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            min: 15000.0,
            max: 65535.0,
            delta: 1000.0,
            ddc: false,
        }
    }
}

/// Flower servo duty cycle channel (0..100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowerConfig {
    pub duty_cycle_delta: f64,
}

impl Default for FlowerConfig {
    fn default() -> Self {
        Self {
            duty_cycle_delta: 5.0,
        }
    }
}

/// Eye position channel, follows the target angle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    /// Output at the left edge of the field of view
    pub x_min: f64,

    /// Output at the right edge of the field of view
    pub x_max: f64,

    pub x_delta: f64,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            x_min: -100.0,
            x_max: 100.0,
            x_delta: 10.0,
        }
    }
}
