use bitvec::prelude::*;
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{s, Array2, ArrayView1, Axis};

use super::channel::Channel;
use super::constants::{
    CALRAM_DEPTH, CALRAM_WORD_SIZE, FEEDBACK_WRAP_FACTOR, NUM_CHANNELS, SAMPLES_PER_WINDOW,
    SEAM_PHASE, SLOW_PHASE, WINDOWS_PER_ROLL,
};
use super::error::SamplerError;
use super::radiant::{CalMode, DmaDescriptor, DmaMode, Radiant};

const TRIGGERS_PER_BURST: usize = 128;
const ROLLS_PER_CAPTURE: usize = 3;
// Every other window of a record is buffered in case the following seam is invalid
const BUFFERED_WINDOW_SPACING: usize = 2 * SAMPLES_PER_WINDOW;

/// Per-channel, per-phase sample intervals in picoseconds.
///
/// Shape is [channel][phase] with 128 phases. Phase 0 is the seam, phase 127
/// the slow sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSample {
    times: Array2<f64>,
}

impl TimingSample {
    /// Wrap an externally computed [channel][phase] array
    pub fn from_array(times: Array2<f64>) -> Result<Self, SamplerError> {
        if times.dim() != (NUM_CHANNELS, SAMPLES_PER_WINDOW) {
            return Err(SamplerError::WrongShape {
                expected: (NUM_CHANNELS, SAMPLES_PER_WINDOW),
                actual: times.dim(),
            });
        }
        Ok(Self { times })
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.times
    }

    pub fn phases(&self, channel: Channel) -> ArrayView1<'_, f64> {
        self.times.row(channel.id())
    }

    pub fn seam(&self, channel: Channel) -> f64 {
        self.times[[channel.id(), SEAM_PHASE]]
    }

    pub fn slow(&self, channel: Channel) -> f64 {
        self.times[[channel.id(), SLOW_PHASE]]
    }

    /// Mean of phases 1..126, the proxy used when the seam itself can not be trusted
    pub fn mid_mean(&self, channel: Channel) -> f64 {
        self.times
            .slice(s![channel.id(), SEAM_PHASE + 1..SLOW_PHASE])
            .mean()
            .unwrap_or(0.0)
    }

    /// Sum of every phase after the seam
    pub fn sum_after_seam(&self, channel: Channel) -> f64 {
        self.times.slice(s![channel.id(), SEAM_PHASE + 1..]).sum()
    }

    /// If the phases after the seam already take up more than a full window, the
    /// seam measurement has wrapped and is logged with its sign inverted. The
    /// sample itself is left untouched; feedback always uses the measured seam.
    pub fn seam_feedback_wrapped(&self, channel: Channel, nominal_ps: f64) -> bool {
        let total = self.sum_after_seam(channel);
        if total > nominal_ps * FEEDBACK_WRAP_FACTOR {
            let seam = self.seam(channel);
            spdlog::warn!(
                "Feedback {channel} way off ({:.2}): {seam:.2} -> {:.2}",
                nominal_ps * (SLOW_PHASE as f64) - total,
                -seam
            );
            true
        } else {
            false
        }
    }
}

fn windows_per_record(samples_per_roll: usize) -> Result<usize, SamplerError> {
    if samples_per_roll == 0 || CALRAM_DEPTH % (samples_per_roll * SAMPLES_PER_WINDOW) != 0 {
        return Err(SamplerError::BadSamplesPerRoll(samples_per_roll));
    }
    let windows = CALRAM_DEPTH / (samples_per_roll * SAMPLES_PER_WINDOW);
    // The seam needs at least one valid window per record to be measurable
    if windows < 4 {
        return Err(SamplerError::BadSamplesPerRoll(samples_per_roll));
    }
    Ok(windows)
}

/// The fraction of rolls that contribute a valid seam zero-crossing.
///
/// For 4 records per roll there are 8 windows per record of which 3 carry a
/// valid seam, so 12 of the 32 windows of a roll are valid: 0.375.
pub fn seam_rescale(samples_per_roll: usize) -> Result<f64, SamplerError> {
    let windows = windows_per_record(samples_per_roll)?;
    let valid_windows = windows / 2 - 1;
    Ok((valid_windows * samples_per_roll) as f64 / WINDOWS_PER_ROLL as f64)
}

/// Mask of calibration RAM positions which never hold a valid zero-crossing count.
///
/// The first sample of each record is invalid because the previous sample is not
/// known when it arrives. Every sample at `record_start + 256*j + 128` is only
/// buffered in case the next seam is the end of the record.
fn invalid_tap_mask(samples_per_roll: usize) -> Result<BitVec, SamplerError> {
    let windows = windows_per_record(samples_per_roll)?;
    let samples_per_record = CALRAM_DEPTH / samples_per_roll;
    let mut mask = bitvec![0; CALRAM_DEPTH];
    for record in 0..samples_per_roll {
        let start = samples_per_record * record;
        mask.set(start, true);
        for j in 0..windows / 2 {
            mask.set(start + BUFFERED_WINDOW_SPACING * j + SAMPLES_PER_WINDOW, true);
        }
    }
    Ok(mask)
}

/// Reduce a raw calibration RAM dump into a TimingSample.
///
/// `raw` holds 4096 little-endian 32-bit zero-crossing counts per channel, for
/// all 24 channels. This is a pure function of its inputs.
pub fn reduce_timing(
    raw: &[u8],
    num_rolls: i64,
    frequency_hz: f64,
    samples_per_roll: usize,
) -> Result<TimingSample, SamplerError> {
    let expected = NUM_CHANNELS * CALRAM_DEPTH * CALRAM_WORD_SIZE;
    if raw.len() < expected {
        return Err(SamplerError::ShortDmaRead {
            expected,
            actual: raw.len(),
        });
    }
    if num_rolls <= 0 {
        return Err(SamplerError::NoRolls);
    }
    let mask = invalid_tap_mask(samples_per_roll)?;
    let rescale = seam_rescale(samples_per_roll)?;

    let mut words = vec![0u32; NUM_CHANNELS * CALRAM_DEPTH];
    LittleEndian::read_u32_into(&raw[..expected], &mut words);
    let mut time_by_lab = Array2::from_shape_vec((NUM_CHANNELS, CALRAM_DEPTH), words)?;

    for mut lab in time_by_lab.rows_mut() {
        for position in mask.iter_ones() {
            lab[position] = 0;
        }
    }

    // Samples within a window share a phase, so fold the 32 windows of a roll together
    let time_by_window = time_by_lab
        .mapv(f64::from)
        .into_shape((NUM_CHANNELS, WINDOWS_PER_ROLL, SAMPLES_PER_WINDOW))?
        .sum_axis(Axis(1));

    // picoseconds per cycle over the number of windows seen
    let conversion = (1e12 / frequency_hz) / (num_rolls as f64 * WINDOWS_PER_ROLL as f64);
    let mut times = time_by_window * conversion;

    // The seam has lower statistics than the other phases
    times
        .column_mut(SEAM_PHASE)
        .mapv_inplace(|seam| seam / rescale);

    Ok(TimingSample { times })
}

/// Capture the sample timing of every channel on the board.
///
/// The calibration RAM and DMA engine are reconfigured; the trigger controller
/// is left stopped. `frequency_hz` is the frequency of the calibration signal.
pub fn capture_timing<H: Radiant + ?Sized>(
    radiant: &mut H,
    frequency_hz: f64,
    samples_per_roll: usize,
) -> Result<TimingSample, SamplerError> {
    // Validate before touching the board
    windows_per_record(samples_per_roll)?;

    radiant.controller_stop()?;
    radiant.calram_zero(true)?;
    radiant.calram_mode(CalMode::None)?;
    radiant.controller_start()?;
    // junk the first roll
    radiant.controller_force_trigger(samples_per_roll, true, false)?;
    radiant.calram_mode(CalMode::Zerocrossing)?;
    // Groups of 384 can not trip the zero-crossing overflow limit
    for _ in 0..ROLLS_PER_CAPTURE * samples_per_roll {
        radiant.controller_force_trigger(TRIGGERS_PER_BURST, true, false)?;
    }
    radiant.controller_stop()?;

    let num_rolls = radiant.calram_num_rolls()?;
    spdlog::debug!("Calibration RAM accumulated {num_rolls} rolls");

    radiant.dma_enable(DmaMode::Calibration)?;
    let base = radiant.calram_base()?;
    let lab_bytes = (CALRAM_DEPTH * CALRAM_WORD_SIZE) as u32;
    for lab in 0..NUM_CHANNELS {
        radiant.dma_set_descriptor(&DmaDescriptor {
            num: lab,
            address: base + lab_bytes * lab as u32,
            length: CALRAM_DEPTH,
            increment: true,
            is_final: lab == NUM_CHANNELS - 1,
        })?;
    }
    radiant.dma_begin()?;
    let raw = radiant.dma_read(NUM_CHANNELS * CALRAM_DEPTH * CALRAM_WORD_SIZE)?;

    reduce_timing(&raw, num_rolls, frequency_hz, samples_per_roll)
}
