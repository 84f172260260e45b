use bit_set::BitSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use super::adjuster::{adjust_bulk_trim, adjust_seam_register, TuneMode};
use super::bands::{Band, TuneBands};
use super::calibration::CalibrationState;
use super::channel::{Channel, Quad};
use super::constants::*;
use super::error::TuneError;
use super::interrupt::Interrupt;
use super::radiant::{Radiant, TmonSelect};
use super::sampler::{capture_timing, TimingSample};

/// Where a channel is in its tuning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunePhase {
    Setup,
    WidthTune,
    MeanTune,
    SeamSlowTune,
    Passed,
    Failed,
}

impl Display for TunePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::WidthTune => write!(f, "width"),
            Self::MeanTune => write!(f, "mean"),
            Self::SeamSlowTune => write!(f, "seam/slow"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Knobs of a tuning session
#[derive(Debug, Clone)]
pub struct TuneOptions {
    /// Calibration signal frequency in MHz
    pub frequency_mhz: f64,
    /// Per-channel iteration budget, shared by the mean and seam/slow phases
    pub max_tries: usize,
    /// Channels whose seam sample is unreliable; the middle-phase mean stands in for it
    pub bad_labs: BitSet,
    /// The calibration signal is fed in externally and the onboard generator stays off
    pub external_signal: bool,
    /// Require the mean of the last few seam measurements to be in band as well
    pub rolling_mean: bool,
    pub samples_per_roll: usize,
    pub dll_settle: Duration,
    pub width_settle: Duration,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            frequency_mhz: DEFAULT_FREQUENCY_MHZ,
            max_tries: DEFAULT_MAX_TRIES,
            bad_labs: BitSet::with_capacity(NUM_CHANNELS),
            external_signal: false,
            rolling_mean: false,
            samples_per_roll: DEFAULT_SAMPLES_PER_ROLL,
            dll_settle: Duration::from_millis(500),
            width_settle: Duration::from_millis(100),
        }
    }
}

impl TuneOptions {
    pub fn is_bad_lab(&self, channel: Channel) -> bool {
        self.bad_labs.contains(channel.id())
    }

    fn frequency_hz(&self) -> f64 {
        self.frequency_mhz * 1e6
    }
}

/// The final result of tuning one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub passed: bool,
    /// The phase a failed channel was in when it gave up
    pub failed_in: Option<TunePhase>,
    pub tries: usize,
    pub max_tries: usize,
    pub seam_register: u16,
    pub bounces: usize,
    pub seam_ps: Option<f64>,
    pub slow_ps: Option<f64>,
}

#[derive(Debug)]
struct ChannelTune {
    channel: Channel,
    snapshot: CalibrationState,
    phase: TunePhase,
    failed_in: Option<TunePhase>,
    seam_register: u16,
    bad_lab: bool,
    max_tries: usize,
    tries: usize,
    bounces: usize,
    last_seam: Option<f64>,
    seam_history: VecDeque<f64>,
    seam_ps: Option<f64>,
    slow_ps: Option<f64>,
}

impl ChannelTune {
    fn new(channel: Channel, snapshot: CalibrationState, options: &TuneOptions) -> Self {
        Self {
            channel,
            seam_register: snapshot.seam_tune_register(),
            snapshot,
            phase: TunePhase::Setup,
            failed_in: None,
            bad_lab: options.is_bad_lab(channel),
            max_tries: options.max_tries,
            tries: 0,
            bounces: 0,
            last_seam: None,
            seam_history: VecDeque::with_capacity(ROLLING_MEAN_DEPTH),
            seam_ps: None,
            slow_ps: None,
        }
    }

    fn is_unresolved(&self) -> bool {
        !matches!(self.phase, TunePhase::Passed | TunePhase::Failed)
    }

    fn record_seam(&mut self, seam_ps: f64) {
        if self.seam_history.len() == ROLLING_MEAN_DEPTH {
            self.seam_history.pop_front();
        }
        self.seam_history.push_back(seam_ps);
    }

    fn rolling_seam(&self) -> Option<f64> {
        if self.seam_history.is_empty() {
            None
        } else {
            Some(self.seam_history.iter().sum::<f64>() / self.seam_history.len() as f64)
        }
    }

    /// Count a bounce when the seam crossed from one side of its band to the other
    fn track_bounce(&mut self, seam_ps: f64, band: &Band, nominal_ps: f64) {
        if let Some(last) = self.last_seam {
            let crossed_down = band.is_above(last, nominal_ps) && band.is_below(seam_ps, nominal_ps);
            let crossed_up = band.is_below(last, nominal_ps) && band.is_above(seam_ps, nominal_ps);
            if crossed_down || crossed_up {
                self.bounces += 1;
                spdlog::info!("{}: Bounce {}", self.channel, self.bounces);
            }
        }
        self.last_seam = Some(seam_ps);
    }

    fn outcome(&self) -> ChannelOutcome {
        ChannelOutcome {
            channel: self.channel,
            passed: self.phase == TunePhase::Passed,
            failed_in: self.failed_in,
            tries: self.tries,
            max_tries: self.max_tries,
            seam_register: self.seam_register,
            bounces: self.bounces,
            seam_ps: self.seam_ps,
            slow_ps: self.slow_ps,
        }
    }
}

/// Drives the timing convergence of one or more channels sharing a board.
///
/// All channels of a session advance in lock-step: every iteration takes one
/// capture of the whole board and applies at most one correction per active
/// channel. Each channel keeps its own budget, bounce counter and seam history.
/// A channel which fails is restored to the calibration it had when the session
/// started, without disturbing the others.
pub struct Tuner<'a, H: Radiant + ?Sized, R: Rng = StdRng> {
    radiant: &'a mut H,
    rng: R,
    interrupt: Interrupt,
}

impl<'a, H: Radiant + ?Sized> Tuner<'a, H, StdRng> {
    pub fn from_entropy(radiant: &'a mut H) -> Self {
        Self::new(radiant, StdRng::from_entropy())
    }
}

impl<'a, H: Radiant + ?Sized, R: Rng> Tuner<'a, H, R> {
    pub fn new(radiant: &'a mut H, rng: R) -> Self {
        Self {
            radiant,
            rng,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Tune a single channel. Returns whether it passed.
    pub fn tune_channel(
        &mut self,
        channel: Channel,
        frequency_mhz: f64,
        max_tries: usize,
        bad_lab: bool,
        external_signal: bool,
    ) -> Result<bool, TuneError> {
        let mut options = TuneOptions {
            frequency_mhz,
            max_tries,
            external_signal,
            ..Default::default()
        };
        if bad_lab {
            options.bad_labs.insert(channel.id());
        }
        let outcomes = self.tune_channels(&[channel], &options)?;
        Ok(outcomes.iter().all(|outcome| outcome.passed))
    }

    /// Tune all eight channels of a quad in parallel.
    ///
    /// Returns the channels in quad order together with whether each passed.
    pub fn tune_quad(
        &mut self,
        quad: Quad,
        frequency_mhz: f64,
        max_tries: usize,
        bad_lab: bool,
        external_signal: bool,
        rolling_mean: bool,
    ) -> Result<(Vec<Channel>, Vec<bool>), TuneError> {
        let channels = quad.channels();
        let mut options = TuneOptions {
            frequency_mhz,
            max_tries,
            external_signal,
            rolling_mean,
            ..Default::default()
        };
        if bad_lab {
            for channel in &channels {
                options.bad_labs.insert(channel.id());
            }
        }
        let outcomes = self.tune_channels(&channels, &options)?;
        Ok(outcomes
            .iter()
            .map(|outcome| (outcome.channel, outcome.passed))
            .unzip())
    }

    /// Tune any set of channels in one lock-step session.
    ///
    /// Without an external signal every channel must sit in the same
    /// calibration quad, since only one quad can be fed by the generator.
    pub fn tune_channels(
        &mut self,
        channels: &[Channel],
        options: &TuneOptions,
    ) -> Result<Vec<ChannelOutcome>, TuneError> {
        let sample_rate = self.radiant.sample_rate()?;
        let bands = TuneBands::for_sample_rate(sample_rate)?;
        if !options.external_signal {
            if let Some(first) = channels.first() {
                if let Some(other) = channels.iter().find(|ch| ch.quad() != first.quad()) {
                    return Err(TuneError::MixedQuads(first.id(), other.id()));
                }
            }
        }

        spdlog::info!(
            "Tuning channels {:?}. Sample rate is {sample_rate} MHz (nominal sample length {:.3} ps)",
            channels.iter().map(Channel::id).collect::<Vec<_>>(),
            bands.nominal_sample()
        );

        let mut tunes = Vec::with_capacity(channels.len());
        match self.run_session(channels, options, &bands, &mut tunes) {
            Ok(()) => {
                self.release_calibration_input()?;
                Ok(tunes.iter().map(ChannelTune::outcome).collect())
            }
            Err(TuneError::Interrupted) => {
                spdlog::warn!("Tuning interrupted! Restoring every unresolved channel.");
                for tune in tunes.iter_mut().filter(|tune| tune.is_unresolved()) {
                    self.fail(tune)?;
                }
                self.release_calibration_input()?;
                Err(TuneError::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Take a single capture and check every channel against its bands without
    /// changing any calibration.
    pub fn verify_channels(
        &mut self,
        channels: &[Channel],
        options: &TuneOptions,
    ) -> Result<Vec<(Channel, bool)>, TuneError> {
        let bands = TuneBands::for_sample_rate(self.radiant.sample_rate()?)?;
        let nominal = bands.nominal_sample();
        self.select_calibration_input(channels, options)?;
        let sample = self.capture(options);
        self.release_calibration_input()?;
        let sample = sample?;

        Ok(channels
            .iter()
            .map(|&channel| {
                let seam_ok = if options.is_bad_lab(channel) {
                    bands.mean.contains(sample.mid_mean(channel), nominal)
                } else {
                    bands.seam.contains(sample.seam(channel), nominal)
                };
                let slow_ok = bands.slow.contains(sample.slow(channel), nominal);
                spdlog::info!(
                    "{channel}: seam {:.2} ps, slow {:.2} ps, mean {:.3} ps",
                    sample.seam(channel),
                    sample.slow(channel),
                    sample.mid_mean(channel)
                );
                (channel, seam_ok && slow_ok)
            })
            .collect())
    }

    fn run_session(
        &mut self,
        channels: &[Channel],
        options: &TuneOptions,
        bands: &TuneBands,
        tunes: &mut Vec<ChannelTune>,
    ) -> Result<(), TuneError> {
        for &channel in channels {
            self.check_interrupt()?;
            let snapshot = self.radiant.calibration_get(channel)?;
            let mut tune = ChannelTune::new(channel, snapshot, options);
            let result = self.setup_channel(&mut tune, options, bands);
            tunes.push(tune);
            result?;
        }

        if !tunes.iter().any(|tune| tune.phase == TunePhase::MeanTune) {
            return Ok(());
        }
        self.select_calibration_input(channels, options)?;
        self.tune_mean(tunes, options, bands)?;
        self.tune_seam_slow(tunes, options, bands)
    }

    fn check_interrupt(&self) -> Result<(), TuneError> {
        if self.interrupt.is_raised() {
            Err(TuneError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, tune: &mut ChannelTune) -> Result<(), TuneError> {
        self.radiant.calibration_restore(&tune.snapshot)?;
        tune.failed_in = Some(tune.phase);
        tune.phase = TunePhase::Failed;
        spdlog::error!(
            "{}: Initial tune failed in {} phase! Restored initial state.",
            tune.channel,
            tune.failed_in.unwrap_or(TunePhase::Setup)
        );
        Ok(())
    }

    fn capture(&mut self, options: &TuneOptions) -> Result<TimingSample, TuneError> {
        Ok(capture_timing(
            &mut *self.radiant,
            options.frequency_hz(),
            options.samples_per_roll,
        )?)
    }

    /// VadjP auto-tune, DLL sanity check and bulk trim width search
    fn setup_channel(
        &mut self,
        tune: &mut ChannelTune,
        options: &TuneOptions,
        bands: &TuneBands,
    ) -> Result<(), TuneError> {
        let channel = tune.channel;
        if tune.snapshot.dll_enabled() {
            spdlog::info!("{channel}: Defaults say to use the DLL");
        } else {
            spdlog::info!("{channel}: Defaults say to NOT use the DLL");
        }
        self.radiant.controller_update(channel)?;

        let initial_vadjp = tune.snapshot.get(VADJP_REGISTER)?;
        match self
            .radiant
            .controller_autotune_vadjp(channel, initial_vadjp)?
        {
            Some(vadjp) => {
                spdlog::info!("{channel}: VadjP auto-tuned to {vadjp}");
                self.radiant
                    .calibration_set(channel, VADJP_REGISTER, vadjp)?;
            }
            None => {
                spdlog::error!("{channel}: VadjP auto-tune found no working value");
                return self.fail(tune);
            }
        }
        self.radiant.controller_update(channel)?;
        self.radiant.monselect(channel)?;
        self.radiant.controller_set_tmon(channel, TmonSelect::SSPin)?;

        tune.phase = TunePhase::WidthTune;
        let scan_group = channel.scan_group();
        let mut width = self.radiant.controller_scan_width(scan_group)?;
        spdlog::info!("{channel}: Initial SSPin width: {width}");
        if width > BROKEN_DLL_WIDTH {
            spdlog::warn!("{channel}: DLL seems broken, disabling");
            self.radiant
                .controller_write_register(channel, DLL_REGISTER, DLL_DISABLED)?;
            std::thread::sleep(options.dll_settle);
            width = self.radiant.controller_scan_width(scan_group)?;
            self.radiant
                .calibration_set(channel, DLL_REGISTER, DLL_DISABLED)?;
            self.radiant.controller_update(channel)?;
            spdlog::info!("{channel}: SSPin width after disabling DLL: {width}");
            tune.seam_register = VADJN_REGISTER;
            tune.max_tries *= BROKEN_DLL_TRIES_FACTOR;
            spdlog::info!(
                "{channel}: Switching to VadjN, allowing {} tries",
                tune.max_tries
            );
        } else {
            spdlog::info!("{channel}: DLL is okay");
        }

        let mut width_tries = 0;
        while width > bands.target_width && width_tries < tune.max_tries {
            self.check_interrupt()?;
            let current = self.radiant.calibration_get(channel)?;
            let mut trim_sum = 0;
            for register in BULK_TRIM_FIRST..BULK_TRIM_END {
                let trim = current.get(register)? + WIDTH_TRIM_STEP;
                self.radiant.calibration_set(channel, register, trim)?;
                trim_sum += trim;
            }
            self.radiant.controller_update(channel)?;
            std::thread::sleep(options.width_settle);
            width = self.radiant.controller_scan_width(scan_group)?;
            spdlog::debug!(
                "{channel}: New SSPin width (avg trim {:.2}): {width}",
                trim_sum as f64 / BULK_TRIM_COUNT as f64
            );
            width_tries += 1;
        }
        if width > bands.target_width {
            spdlog::error!(
                "{channel}: SSPin width {width} still above target {} after {width_tries} tries",
                bands.target_width
            );
            return self.fail(tune);
        }

        let average = self
            .radiant
            .calibration_get(channel)?
            .bulk_trim_average()?;
        spdlog::info!("{channel}: Starting average trim: {average:.2}");
        tune.phase = TunePhase::MeanTune;
        Ok(())
    }

    fn select_calibration_input(
        &mut self,
        channels: &[Channel],
        options: &TuneOptions,
    ) -> Result<(), TuneError> {
        if options.external_signal {
            self.radiant.calselect(None)?;
            return Ok(());
        }
        let quad = channels.first().map(Channel::quad);
        self.radiant.calselect(quad)?;
        self.radiant.sig_gen_enable(false)?;
        self.radiant.pedestal_update()?;
        self.radiant.sig_gen_enable(true)?;
        self.radiant.sig_gen_select_band(options.frequency_mhz)?;
        self.radiant.sig_gen_set_frequency(options.frequency_mhz)?;
        Ok(())
    }

    fn release_calibration_input(&mut self) -> Result<(), TuneError> {
        self.radiant.calselect(None)?;
        self.radiant.sig_gen_enable(false)?;
        Ok(())
    }

    /// Coarse seam tuning on the middle-phase mean, which is far less noisy
    /// than the seam sample
    fn tune_mean(
        &mut self,
        tunes: &mut [ChannelTune],
        options: &TuneOptions,
        bands: &TuneBands,
    ) -> Result<(), TuneError> {
        let nominal = bands.nominal_sample();
        spdlog::info!(
            "Start optimizing seam sample using \"mean\" mode. Target range: {}",
            bands.mean.describe(nominal)
        );
        loop {
            self.check_interrupt()?;
            if !tunes.iter().any(|tune| tune.phase == TunePhase::MeanTune) {
                return Ok(());
            }
            let sample = self.capture(options)?;
            for tune in tunes
                .iter_mut()
                .filter(|tune| tune.phase == TunePhase::MeanTune)
            {
                let channel = tune.channel;
                sample.seam_feedback_wrapped(channel, nominal);
                let mean = sample.mid_mean(channel);
                spdlog::info!("{channel}: Mean of middle sample timings now: {mean:.3} ps");
                if bands.mean.contains(mean, nominal) {
                    tune.phase = TunePhase::SeamSlowTune;
                    continue;
                }
                if tune.tries >= tune.max_tries {
                    self.fail(tune)?;
                    continue;
                }
                adjust_seam_register(
                    &mut *self.radiant,
                    &mut self.rng,
                    channel,
                    mean,
                    nominal,
                    tune.seam_register,
                    TuneMode::Mean,
                )?;
                self.radiant.controller_update(channel)?;
                tune.tries += 1;
            }
        }
    }

    fn tune_seam_slow(
        &mut self,
        tunes: &mut [ChannelTune],
        options: &TuneOptions,
        bands: &TuneBands,
    ) -> Result<(), TuneError> {
        let nominal = bands.nominal_sample();
        spdlog::info!(
            "Start optimizing seam and slow sample. Target range for seam {}, for slow sample {}",
            bands.seam.describe(nominal),
            bands.slow.describe(nominal)
        );
        for tune in tunes
            .iter()
            .filter(|tune| tune.phase == TunePhase::SeamSlowTune && tune.bad_lab)
        {
            spdlog::warn!(
                "{}: Bad LAB, tuning on the middle sample mean instead of the seam",
                tune.channel
            );
        }

        loop {
            self.check_interrupt()?;
            if !tunes
                .iter()
                .any(|tune| tune.phase == TunePhase::SeamSlowTune)
            {
                return Ok(());
            }
            let sample = self.capture(options)?;
            for tune in tunes
                .iter_mut()
                .filter(|tune| tune.phase == TunePhase::SeamSlowTune)
            {
                let channel = tune.channel;
                let (mode, seam_band) = if tune.bad_lab {
                    (TuneMode::Mean, bands.mean)
                } else {
                    (TuneMode::Seam, bands.seam)
                };
                let wrapped = sample.seam_feedback_wrapped(channel, nominal);
                let seam = match mode {
                    TuneMode::Mean => sample.mid_mean(channel),
                    TuneMode::Seam => sample.seam(channel),
                };
                let slow = sample.slow(channel);
                spdlog::info!(
                    "{channel}: Seam/slow sample timing now (tune mode = \"{mode}\"): {seam:.2} / {slow:.2} ps, total diff: {:.2} ps",
                    nominal * SLOW_PHASE as f64 - sample.sum_after_seam(channel)
                );

                if tune.last_seam.is_none() {
                    tune.last_seam = Some(seam);
                }
                if options.rolling_mean {
                    tune.record_seam(seam);
                }
                let seam_in_band = seam_band.contains(seam, nominal);
                let seam_settled = seam_in_band
                    && (!options.rolling_mean
                        || tune
                            .rolling_seam()
                            .is_some_and(|mean| seam_band.contains(mean, nominal)));
                let slow_in_band = bands.slow.contains(slow, nominal);

                if seam_settled && slow_in_band {
                    let value = self
                        .radiant
                        .calibration_get(channel)?
                        .get(tune.seam_register)?;
                    let reported = if wrapped && mode == TuneMode::Seam {
                        -seam
                    } else {
                        seam
                    };
                    spdlog::info!(
                        "{channel}: Ending seam sample: {reported:.2} ps, using register {} with value {value}",
                        tune.seam_register
                    );
                    spdlog::info!("{channel}: Ending slow sample: {slow:.2} ps");
                    tune.seam_ps = Some(seam);
                    tune.slow_ps = Some(slow);
                    tune.phase = TunePhase::Passed;
                    continue;
                }
                if tune.tries >= tune.max_tries {
                    self.fail(tune)?;
                    continue;
                }

                if !seam_in_band && tune.bounces < MAX_BOUNCES {
                    spdlog::debug!("{channel}: ----------- SEAM off ----------");
                    adjust_seam_register(
                        &mut *self.radiant,
                        &mut self.rng,
                        channel,
                        seam,
                        nominal,
                        tune.seam_register,
                        mode,
                    )?;
                    tune.track_bounce(seam, &seam_band, nominal);
                } else if !slow_in_band {
                    spdlog::debug!("{channel}: ----------- SLOW off ----------");
                    adjust_bulk_trim(
                        &mut *self.radiant,
                        channel,
                        slow,
                        SLOW_TRIM_STEP,
                        nominal,
                        bands.slow.slow,
                        bands.slow.fast,
                    )?;
                    tune.bounces = 0;
                }
                self.radiant.controller_update(channel)?;
                tune.tries += 1;
            }
        }
    }
}
