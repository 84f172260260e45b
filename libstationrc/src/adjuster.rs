use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::channel::Channel;
use super::constants::{BULK_TRIM_COUNT, BULK_TRIM_END, BULK_TRIM_FIRST, VADJN_REGISTER};
use super::error::HardwareError;
use super::radiant::Radiant;

// Seam mode thresholds (ps) above which the step grows by a random amount
const SEAM_COARSE_DIFF: f64 = 50.0;
const SEAM_FAR_DIFF: f64 = 100.0;
// Mean mode thresholds (ps); the mean moves much less per register count
const MEAN_COARSE_DIFF: f64 = 0.3;
const MEAN_FAR_DIFF: f64 = 0.6;
const MEAN_COARSE_STEP: i64 = 3;
const MEAN_FAR_STEP: i64 = 6;

/// Which quantity drives a seam register correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuneMode {
    /// The seam sample (phase 0) itself
    Seam,
    /// The mean of phases 1..126 as a proxy for the seam
    Mean,
}

impl Display for TuneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seam => write!(f, "seam"),
            Self::Mean => write!(f, "mean"),
        }
    }
}

/// Signed register increment for a seam correction.
///
/// The sign rules were found empirically on hardware and are deliberately not
/// unified: VadjN runs against the DLL seam trim, and the mean moves against
/// the seam because the 128 phases always add up to one full window.
pub fn seam_step<R: Rng + ?Sized>(
    measured_ps: f64,
    nominal_ps: f64,
    register: u16,
    mode: TuneMode,
    rng: &mut R,
) -> i64 {
    let diff = (measured_ps - nominal_ps).abs();
    let signed_diff = measured_ps - nominal_ps;

    let mut delta: i64 = 1;
    match mode {
        TuneMode::Seam => {
            if diff > SEAM_COARSE_DIFF {
                delta += rng.gen_range(1..=3);
            }
            // max step of 10, jumping far past the optimum only causes bouncing
            if diff > SEAM_FAR_DIFF {
                delta += rng.gen_range(2..=6);
            }
        }
        TuneMode::Mean => {
            if diff > MEAN_COARSE_DIFF {
                delta += MEAN_COARSE_STEP;
            }
            if diff > MEAN_FAR_DIFF {
                delta += MEAN_FAR_STEP;
            }
        }
    }

    if register == VADJN_REGISTER {
        delta = -delta;
    }
    match mode {
        TuneMode::Seam if signed_diff < 0.0 => delta = -delta,
        TuneMode::Mean if signed_diff > 0.0 => delta = -delta,
        _ => (),
    }
    delta
}

/// Move the seam tune register of a channel towards the nominal sample length.
///
/// Returns the value written to the register.
pub fn adjust_seam_register<H, R>(
    radiant: &mut H,
    rng: &mut R,
    channel: Channel,
    measured_ps: f64,
    nominal_ps: f64,
    register: u16,
    mode: TuneMode,
) -> Result<i64, HardwareError>
where
    H: Radiant + ?Sized,
    R: Rng + ?Sized,
{
    let delta = seam_step(measured_ps, nominal_ps, register, mode, rng);
    let current = radiant.calibration_get(channel)?.get(register)?;
    let new_value = current + delta;
    spdlog::info!(
        "{channel}: Seam {measured_ps:.2}, register {register} ({current} -> {new_value})"
    );
    radiant.calibration_set(channel, register, new_value)?;
    Ok(new_value)
}

/// Signed bulk trim increment for a slow sample correction.
///
/// A slow sample that is too slow is sped up (positive step), one that is too
/// fast is slowed down (negative step). Inside the band the step is unchanged.
pub fn bulk_trim_step(
    measured_ps: f64,
    step: i64,
    nominal_ps: f64,
    slow_factor: f64,
    fast_factor: f64,
) -> i64 {
    if measured_ps > nominal_ps * slow_factor {
        step.abs()
    } else if measured_ps < nominal_ps * fast_factor {
        -step.abs()
    } else {
        step
    }
}

/// Shift all 126 bulk trims of a channel to move the slow sample.
///
/// Returns the new average trim, which is only used for logging.
pub fn adjust_bulk_trim<H: Radiant + ?Sized>(
    radiant: &mut H,
    channel: Channel,
    measured_ps: f64,
    step: i64,
    nominal_ps: f64,
    slow_factor: f64,
    fast_factor: f64,
) -> Result<f64, HardwareError> {
    let step = bulk_trim_step(measured_ps, step, nominal_ps, slow_factor, fast_factor);
    if step > 0 {
        spdlog::info!("Need to speed up slow sample ({step})");
    } else {
        spdlog::info!("Need to slow down slow sample ({step})");
    }

    let current = radiant.calibration_get(channel)?;
    let mut old_sum = 0;
    for register in BULK_TRIM_FIRST..BULK_TRIM_END {
        let old = current.get(register)?;
        old_sum += old;
        radiant.calibration_set(channel, register, old + step)?;
    }
    let old_average = old_sum as f64 / BULK_TRIM_COUNT as f64;
    let new_average = old_average + step as f64;
    spdlog::info!("{channel}: Slow {measured_ps:.2}, ({old_average} -> {new_average})");
    Ok(new_average)
}
