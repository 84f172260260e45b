use serde::{Deserialize, Serialize};

use super::error::TuneError;

/// A multiplicative acceptance band around the nominal sample length.
///
/// `fast` is the lower factor (sample too short), `slow` the upper one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub fast: f64,
    pub slow: f64,
}

impl Band {
    pub const fn new(fast: f64, slow: f64) -> Self {
        Self { fast, slow }
    }

    pub fn lower(&self, nominal_ps: f64) -> f64 {
        nominal_ps * self.fast
    }

    pub fn upper(&self, nominal_ps: f64) -> f64 {
        nominal_ps * self.slow
    }

    pub fn contains(&self, value_ps: f64, nominal_ps: f64) -> bool {
        !self.is_above(value_ps, nominal_ps) && !self.is_below(value_ps, nominal_ps)
    }

    pub fn is_above(&self, value_ps: f64, nominal_ps: f64) -> bool {
        value_ps > self.upper(nominal_ps)
    }

    pub fn is_below(&self, value_ps: f64, nominal_ps: f64) -> bool {
        value_ps < self.lower(nominal_ps)
    }

    /// Human readable "(lower, upper)" range in picoseconds
    pub fn describe(&self, nominal_ps: f64) -> String {
        format!(
            "({:.3}, {:.3})",
            self.lower(nominal_ps),
            self.upper(nominal_ps)
        )
    }
}

/// Acceptance bands and targets for one supported sample rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuneBands {
    pub sample_rate_mhz: i64,
    pub seam: Band,
    pub slow: Band,
    pub mean: Band,
    pub target_width: i64,
}

const BANDS_2400: TuneBands = TuneBands {
    sample_rate_mhz: 2400,
    seam: Band::new(0.97, 1.03),
    // the slow sample is allowed to be a little fast
    slow: Band::new(0.95, 1.01),
    // 0.1% of 416.67 ps, at which point the seam is close enough
    mean: Band::new(0.999, 1.001),
    target_width: 1300,
};

const BANDS_3200: TuneBands = TuneBands {
    sample_rate_mhz: 3200,
    seam: Band::new(0.92, 1.12),
    slow: Band::new(0.8, 1.02),
    mean: Band::new(0.997, 1.003),
    target_width: 1000,
};

impl TuneBands {
    /// Look up the bands for a sample rate in MHz. Only 2400 and 3200 MHz are known.
    pub fn for_sample_rate(sample_rate_mhz: i64) -> Result<Self, TuneError> {
        match sample_rate_mhz {
            2400 => Ok(BANDS_2400),
            3200 => Ok(BANDS_3200),
            _ => Err(TuneError::UnsupportedSampleRate(sample_rate_mhz)),
        }
    }

    /// Nominal sample length in picoseconds
    pub fn nominal_sample(&self) -> f64 {
        1e6 / self.sample_rate_mhz as f64
    }
}
