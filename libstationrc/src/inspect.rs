use ndarray::{s, Array1, Array3, ArrayView2, Axis};

use super::channel::{Channel, Quad};
use super::constants::{SAMPLES_PER_WINDOW, SEAM_PHASE, SLOW_PHASE};
use super::error::SamplerError;
use super::radiant::{Radiant, SigGenBand};
use super::sampler::capture_timing;

/// Recording-averaged seam, slow sample and middle-phase mean of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSummary {
    pub seam_ps: f64,
    pub slow_ps: f64,
    pub mid_mean_ps: f64,
}

/// Repeated timing recordings of the channels of one quad.
///
/// `times` has shape [channel][recording][phase], channels in quad order.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadTiming {
    quad: Quad,
    channels: Vec<Channel>,
    times: Array3<f64>,
}

impl QuadTiming {
    pub fn quad(&self) -> Quad {
        self.quad
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn times(&self) -> &Array3<f64> {
        &self.times
    }

    fn index_of(&self, channel: Channel) -> Option<usize> {
        self.channels.iter().position(|ch| *ch == channel)
    }

    /// All recordings of one channel, [recording][phase]
    pub fn recordings(&self, channel: Channel) -> Option<ArrayView2<'_, f64>> {
        self.index_of(channel)
            .map(|idx| self.times.slice(s![idx, .., ..]))
    }

    /// Per-phase timing of one channel averaged over the recordings
    pub fn mean_timing(&self, channel: Channel) -> Option<Array1<f64>> {
        self.recordings(channel)
            .and_then(|recordings| recordings.mean_axis(Axis(0)))
    }

    pub fn summary(&self, channel: Channel) -> Option<TimingSummary> {
        let mean = self.mean_timing(channel)?;
        Some(TimingSummary {
            seam_ps: mean[SEAM_PHASE],
            slow_ps: mean[SLOW_PHASE],
            mid_mean_ps: mean.slice(s![SEAM_PHASE + 1..SLOW_PHASE]).mean()?,
        })
    }
}

/// Power-cycle the onboard signal generator into a filter band and refresh the
/// pedestals while it is off
pub fn prepare_signal_generator<H: Radiant + ?Sized>(
    radiant: &mut H,
    band: SigGenBand,
) -> Result<(), SamplerError> {
    radiant.sig_gen_enable(false)?;
    radiant.sig_gen_configure(false, band)?;
    radiant.pedestal_update()?;
    radiant.sig_gen_enable(true)?;
    Ok(())
}

/// Record the sample timing of one quad `recordings` times with the signal
/// generator running at `frequency_mhz`. Calibration is not changed.
pub fn record_quad_timing<H: Radiant + ?Sized>(
    radiant: &mut H,
    quad: Quad,
    frequency_mhz: f64,
    recordings: usize,
    samples_per_roll: usize,
) -> Result<QuadTiming, SamplerError> {
    radiant.calselect(Some(quad))?;
    radiant.sig_gen_set_frequency(frequency_mhz)?;

    let channels = quad.channels();
    let mut times = Array3::zeros((channels.len(), recordings, SAMPLES_PER_WINDOW));
    for recording in 0..recordings {
        let sample = capture_timing(radiant, frequency_mhz * 1e6, samples_per_roll)?;
        for (idx, channel) in channels.iter().enumerate() {
            times
                .slice_mut(s![idx, recording, ..])
                .assign(&sample.phases(*channel));
        }
        spdlog::debug!("{quad}: recording {} of {recordings} done", recording + 1);
    }

    Ok(QuadTiming {
        quad,
        channels,
        times,
    })
}

/// Record every quad of the board in turn, then switch the generator off again
pub fn record_board_timing<H: Radiant + ?Sized>(
    radiant: &mut H,
    frequency_mhz: f64,
    band: SigGenBand,
    recordings: usize,
    samples_per_roll: usize,
) -> Result<Vec<QuadTiming>, SamplerError> {
    prepare_signal_generator(radiant, band)?;
    let mut timings = Vec::new();
    for quad in Quad::all() {
        spdlog::info!("Recording timing of {quad}");
        timings.push(record_quad_timing(
            radiant,
            quad,
            frequency_mhz,
            recordings,
            samples_per_roll,
        )?);
    }
    radiant.sig_gen_enable(false)?;
    radiant.calselect(None)?;
    Ok(timings)
}
