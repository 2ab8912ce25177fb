/*!
Sliding window average.

One instance per scalar channel (each coordinate of each target slot). The
window starts zero-filled, so the first `capacity - 1` outputs are pulled
toward zero while it fills.
*/

use crate::error::{CoreError, Result};

/// Decimal places of the returned average
pub const DEFAULT_PRECISION: u32 = 2;

/// Round to `precision` decimal places, exact halves to the even neighbour
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round_ties_even() / scale
}

/// Fixed-capacity moving average with O(1) updates
#[derive(Debug, Clone)]
pub struct SlidingWindowAverage {
    values: Vec<f64>,
    cursor: usize,
    sum: f64,
    precision: u32,
}

impl SlidingWindowAverage {
    /// Window of `capacity` samples rounded to two decimals
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_precision(capacity, DEFAULT_PRECISION)
    }

    pub fn with_precision(capacity: usize, precision: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidWindow(capacity));
        }
        Ok(Self {
            values: vec![0.0; capacity],
            cursor: 0,
            sum: 0.0,
            precision,
        })
    }

    /// Push a sample and return the new average
    pub fn add(&mut self, value: f64) -> f64 {
        self.sum -= self.values[self.cursor];
        self.values[self.cursor] = value;
        self.sum += value;
        self.cursor = (self.cursor + 1) % self.values.len();

        // Once per full revolution, rebuild the sum so float error cannot accumulate
        if self.cursor == 0 {
            self.sum = self.values.iter().sum();
        }

        self.average()
    }

    /// Current rounded average
    pub fn average(&self) -> f64 {
        round_to(self.sum / self.values.len() as f64, self.precision)
    }

    /// Running sum
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Buffer contents in slot order (not chronological)
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Forget all samples
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.cursor = 0;
        self.sum = 0.0;
    }
}
