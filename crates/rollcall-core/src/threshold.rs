//! Process-wide acceptance cutoff.
//!
//! The value is stored as an `f32` bit pattern in an atomic so readers never
//! block. Recognition reads it once at the start of each call and uses that
//! snapshot for every face; an update landing mid-call only affects later calls.

use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Threshold must be between 0 and 1 (got {0})")]
    OutOfRange(f64),
}

/// Live confidence threshold shared between the service and the engine.
#[derive(Debug)]
pub struct ThresholdConfig {
    bits: AtomicU32,
}

impl ThresholdConfig {
    pub fn new(initial: f32) -> Result<Self, ThresholdError> {
        validate(initial.into())?;
        Ok(Self {
            bits: AtomicU32::new(initial.to_bits()),
        })
    }

    pub fn current(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Replace the live value. Returns the previous threshold.
    ///
    /// Rejected values leave the current threshold untouched.
    pub fn update(&self, value: f32) -> Result<f32, ThresholdError> {
        validate(value.into())?;
        Ok(self.store(value))
    }

    /// Like [`update`](Self::update), but checks the range before narrowing
    /// to `f32`, so values just above 1 cannot round into range.
    pub fn update_f64(&self, value: f64) -> Result<f32, ThresholdError> {
        validate(value)?;
        Ok(self.store(value as f32))
    }

    fn store(&self, value: f32) -> f32 {
        let previous = f32::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel));
        tracing::info!(previous, threshold = value, "confidence threshold updated");
        previous
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            bits: AtomicU32::new(DEFAULT_THRESHOLD.to_bits()),
        }
    }
}

fn validate(value: f64) -> Result<(), ThresholdError> {
    // NaN fails both comparisons.
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ThresholdError::OutOfRange(value))
    }
}
