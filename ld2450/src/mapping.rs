/*!
Linear mapping with a per-step rate limit.

Every actuator channel (panel brightness, flower duty cycle, eye position)
maps a smoothed radar quantity onto its own output range and then moves
toward that target by at most `delta_limit` per control step.
*/

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Clamp `v` into `[low, high]`
pub fn clamp(v: f64, low: f64, high: f64) -> f64 {
    v.max(low).min(high)
}

/// Clamp `v` into `[low, high]` and rescale it onto `[begin, end]`.
///
/// `begin` may be greater than `end` for an inverted mapping.
pub fn linear_map(v: f64, low: f64, high: f64, begin: f64, end: f64) -> f64 {
    let v = clamp(v, low, high);
    (v - low) / (high - low) * (end - begin) + begin
}

/// Target used while nobody is in range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rest {
    /// Drift back to a fixed value
    Value(f64),
    /// Keep the last output
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Input range; values outside are clamped
    pub in_min: f64,
    pub in_max: f64,
    /// Output at `in_min`
    pub begin: f64,
    /// Output at `in_max`
    pub end: f64,
    /// Largest change per step
    pub delta_limit: f64,
    pub rest: Rest,
    /// Output before the first step
    pub initial: f64,
}

impl MapperConfig {
    /// Far input gives `out_min`, near input gives `out_max`; rests at `out_min`
    pub fn inverted(in_min: f64, in_max: f64, out_min: f64, out_max: f64, delta: f64) -> Self {
        Self {
            in_min,
            in_max,
            begin: out_max,
            end: out_min,
            delta_limit: delta,
            rest: Rest::Value(out_min),
            initial: out_min,
        }
    }

    /// `in_min` gives `out_min`, `in_max` gives `out_max`; rests at `out_min`
    pub fn direct(in_min: f64, in_max: f64, out_min: f64, out_max: f64, delta: f64) -> Self {
        Self {
            in_min,
            in_max,
            begin: out_min,
            end: out_max,
            delta_limit: delta,
            rest: Rest::Value(out_min),
            initial: out_min,
        }
    }

    pub fn with_rest(mut self, rest: Rest) -> Self {
        self.rest = rest;
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }
}

/// Stateful rate-limited mapper for one output channel
#[derive(Debug, Clone)]
pub struct RateLimitedMapper {
    config: MapperConfig,
    value: f64,
}

impl RateLimitedMapper {
    pub fn new(config: MapperConfig) -> Result<Self> {
        if !(config.in_min < config.in_max) {
            return Err(CoreError::invalid_range(format!(
                "input range [{}, {}] is empty",
                config.in_min, config.in_max
            )));
        }
        if !(config.delta_limit > 0.0) {
            return Err(CoreError::invalid_range(format!(
                "delta limit must be positive, got {}",
                config.delta_limit
            )));
        }
        Ok(Self {
            value: config.initial,
            config,
        })
    }

    /// Advance one control step and return the new output
    pub fn step(&mut self, raw: f64, human_present: bool) -> f64 {
        let target = if human_present {
            self.target_for(raw)
        } else {
            match self.config.rest {
                Rest::Value(v) => v,
                Rest::Hold => self.value,
            }
        };

        let limit = self.config.delta_limit;
        self.value += clamp(target - self.value, -limit, limit);
        self.value
    }

    /// Output the mapper converges to for a present target at `raw`
    pub fn target_for(&self, raw: f64) -> f64 {
        let c = &self.config;
        linear_map(raw, c.in_min, c.in_max, c.begin, c.end)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_map() {
        assert_eq!(linear_map(500.0, 500.0, 3000.0, 0.0, 100.0), 0.0);
        assert_eq!(linear_map(1750.0, 500.0, 3000.0, 0.0, 100.0), 50.0);
        assert_eq!(linear_map(9999.0, 500.0, 3000.0, 0.0, 100.0), 100.0);
        assert_eq!(linear_map(-1.0, 0.0, 10.0, 100.0, 0.0), 100.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let empty = MapperConfig::direct(10.0, 10.0, 0.0, 1.0, 1.0);
        assert!(matches!(
            RateLimitedMapper::new(empty),
            Err(CoreError::InvalidRange(_))
        ));
        let no_delta = MapperConfig::direct(0.0, 10.0, 0.0, 1.0, 0.0);
        assert!(RateLimitedMapper::new(no_delta).is_err());
    }

    #[test]
    fn test_step_never_exceeds_delta() {
        let config = MapperConfig::inverted(500.0, 3000.0, 15000.0, 65535.0, 1000.0);
        let mut mapper = RateLimitedMapper::new(config).unwrap();

        let inputs = [500.0, 500.0, 3000.0, 800.0, 0.0, 2500.0, 4000.0];
        let mut prev = mapper.value();
        for (i, d) in inputs.iter().cycle().take(200).enumerate() {
            let out = mapper.step(*d, i % 17 != 0);
            assert!((out - prev).abs() <= 1000.0 + 1e-9);
            assert!((15000.0..=65535.0).contains(&out));
            prev = out;
        }
    }

    #[test]
    fn test_converges_in_expected_steps() {
        let config = MapperConfig::direct(0.0, 100.0, 0.0, 100.0, 7.0);
        let mut mapper = RateLimitedMapper::new(config).unwrap();

        let jump: f64 = 100.0;
        let steps = (jump / 7.0).ceil() as usize;
        for _ in 0..steps - 1 {
            assert!(mapper.step(100.0, true) < 100.0);
        }
        assert_eq!(mapper.step(100.0, true), 100.0);
        assert_eq!(mapper.step(100.0, true), 100.0);
    }

    #[test]
    fn test_inverted_brightness() {
        let config = MapperConfig::inverted(500.0, 3000.0, 15000.0, 65535.0, 1_000_000.0);
        let mut mapper = RateLimitedMapper::new(config).unwrap();

        assert_eq!(mapper.value(), 15000.0);
        assert_eq!(mapper.step(500.0, true), 65535.0);
        assert_eq!(mapper.step(3000.0, true), 15000.0);
        assert!(mapper.target_for(1000.0) > mapper.target_for(2000.0));
    }

    #[test]
    fn test_rest_value_and_hold() {
        let config = MapperConfig::direct(0.0, 100.0, 0.0, 100.0, 50.0);
        let mut falls = RateLimitedMapper::new(config).unwrap();
        falls.step(100.0, true);
        falls.step(100.0, true);
        assert_eq!(falls.step(100.0, false), 50.0);
        assert_eq!(falls.step(100.0, false), 0.0);

        // Eye position keeps looking where the target was last seen
        let eye = MapperConfig::direct(-1.0, 1.0, -100.0, 100.0, 25.0)
            .with_rest(Rest::Hold)
            .with_initial(0.0);
        let mut eye = RateLimitedMapper::new(eye).unwrap();
        assert_eq!(eye.step(1.0, true), 25.0);
        assert_eq!(eye.step(-1.0, false), 25.0);
        assert_eq!(eye.step(-1.0, false), 25.0);
    }
}
