use std::sync::mpsc::Sender;
use time::OffsetDateTime;

use super::bands::TuneBands;
use super::channel::Channel;
use super::config::{TuneConfig, TuneTarget};
use super::error::{ProcessorError, TuneError};
use super::interrupt::Interrupt;
use super::radiant::Radiant;
use super::remote_control::RemoteControl;
use super::report::TuneReport;
use super::tune_status::{StatusKind, TuneStatus};
use super::tuner::Tuner;
use super::zmq_transport::ZmqTransport;

/// Either start from factory defaults or from the calibration stored on the station
fn prepare_calibration<H: Radiant + ?Sized>(
    config: &TuneConfig,
    radiant: &mut H,
    channels: &[Channel],
) -> Result<(), ProcessorError> {
    if config.reset {
        for channel in channels {
            spdlog::info!("Resetting calibration of {channel}");
            radiant.calibration_reset(*channel)?;
            radiant.controller_default(*channel)?;
            radiant.controller_automatch_phab(*channel)?;
        }
    } else {
        spdlog::info!("Loading stored calibration");
        radiant.calibration_load()?;
    }
    Ok(())
}

/// Split the requested channels into the groups tuned in one session each
fn tuning_groups(config: &TuneConfig, channels: &[Channel]) -> Vec<Vec<Channel>> {
    match config.mode {
        TuneTarget::Channel => channels.iter().map(|channel| vec![*channel]).collect(),
        TuneTarget::Quad => config
            .requested_quads()
            .iter()
            .map(|quad| {
                quad.channels()
                    .into_iter()
                    .filter(|channel| channels.contains(channel))
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect(),
    }
}

/// The main loop of a station tuning run.
///
/// Tunes every requested channel, saves the calibration and leaves the
/// calibration input and signal generator switched off. An interrupt stops the
/// run after the current session has been rolled back; the calibration of the
/// channels resolved so far is still saved.
pub fn run_tuning<H: Radiant + ?Sized>(
    config: &TuneConfig,
    radiant: &mut H,
    tx: &Sender<TuneStatus>,
    interrupt: &Interrupt,
) -> Result<TuneReport, ProcessorError> {
    config.validate()?;
    let channels = config.requested_channels();
    let started = OffsetDateTime::now_utc();
    let sample_rate = radiant.sample_rate()?;
    // refuse unknown boards before resetting anything
    TuneBands::for_sample_rate(sample_rate)?;
    spdlog::info!(
        "Tuning {} channels at {sample_rate} MHz sampling with a {} MHz calibration signal",
        channels.len(),
        config.frequency
    );
    let mut report = TuneReport::new(started, sample_rate, config.frequency);
    tx.send(TuneStatus::new(0.0, StatusKind::Started))?;

    prepare_calibration(config, radiant, &channels)?;

    let options = config.tune_options();
    let total = channels.len().max(1) as f32;
    {
        let mut tuner = Tuner::from_entropy(&mut *radiant).with_interrupt(interrupt.clone());
        for group in tuning_groups(config, &channels) {
            match tuner.tune_channels(&group, &options) {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        let kind = if outcome.passed {
                            StatusKind::Passed(outcome.channel)
                        } else {
                            StatusKind::Failed(outcome.channel)
                        };
                        report.channels.push(outcome);
                        tx.send(TuneStatus::new(report.channels.len() as f32 / total, kind))?;
                    }
                }
                Err(TuneError::Interrupted) => {
                    spdlog::warn!("Tuning run interrupted, skipping remaining channels");
                    report.interrupted = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    radiant.calibration_save()?;
    radiant.sig_gen_enable(false)?;
    radiant.calselect(None)?;

    report.finished = OffsetDateTime::now_utc();
    tx.send(TuneStatus::new(1.0, StatusKind::Finished))?;
    for line in report.summary_lines() {
        spdlog::info!("{line}");
    }
    if let Some(directory) = &config.report_path {
        let path = report.write_yaml(directory)?;
        spdlog::info!("Wrote tuning report to {}", path.display());
    }
    Ok(report)
}

/// Connect to the station described by the config
pub fn connect_station(config: &TuneConfig) -> Result<RemoteControl<ZmqTransport>, ProcessorError> {
    let transport = ZmqTransport::connect(&config.host, config.port, config.reply_timeout())?;
    Ok(RemoteControl::new(transport))
}

/// The function to be called by a separate thread (typically the CLI).
/// Connects to the station and runs the tuning
pub fn process(
    config: TuneConfig,
    tx: Sender<TuneStatus>,
    interrupt: Interrupt,
) -> Result<TuneReport, ProcessorError> {
    config.validate()?;
    let mut station = connect_station(&config)?;
    run_tuning(&config, &mut station, &tx, &interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Quad;
    use crate::test_support::SimRadiant;
    use std::sync::mpsc::channel;

    #[test]
    fn test_channel_mode_run() {
        let mut sim = SimRadiant::new(2400);
        let config = TuneConfig {
            mode: TuneTarget::Channel,
            channels: vec![Channel::new(2).unwrap(), Channel::new(14).unwrap()],
            ..Default::default()
        };
        let (tx, rx) = channel();
        let report = run_tuning(&config, &mut sim, &tx, &Interrupt::new()).unwrap();
        drop(tx);

        assert!(report.all_passed());
        assert!(!report.interrupted);
        assert_eq!(report.sample_rate_mhz, 2400);
        assert_eq!(report.summary_lines(), vec!["ch. 02 - OK", "ch. 14 - OK"]);
        assert_eq!(sim.loads(), 1);
        assert_eq!(sim.saves(), 1);
        assert!(!sim.sig_gen_on());

        let statuses: Vec<TuneStatus> = rx.iter().collect();
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses[0].kind, StatusKind::Started);
        assert_eq!(statuses[1].kind, StatusKind::Passed(Channel::new(2).unwrap()));
        assert_eq!(statuses[2].progress, 1.0);
        assert_eq!(statuses[3].kind, StatusKind::Finished);
    }

    #[test]
    fn test_quad_mode_with_reset_and_exclusion() {
        let mut sim = SimRadiant::new(2400);
        let failing = Channel::new(12).unwrap();
        sim.channel_mut(failing).vadjp = None;
        let config = TuneConfig {
            quads: vec![Quad::new(0).unwrap()],
            exclude_channels: vec![Channel::new(1).unwrap()],
            reset: true,
            ..Default::default()
        };
        let (tx, _rx) = channel();
        let report = run_tuning(&config, &mut sim, &tx, &Interrupt::new()).unwrap();

        assert_eq!(report.channels.len(), 7);
        assert_eq!(report.failed_channels(), vec![failing]);
        assert_eq!(sim.loads(), 0);
        assert_eq!(sim.saves(), 1);
    }

    #[test]
    fn test_repeated_quad_tuned_once() {
        let mut sim = SimRadiant::new(2400);
        let config = TuneConfig {
            quads: vec![Quad::new(1).unwrap(), Quad::new(1).unwrap()],
            ..Default::default()
        };
        let (tx, rx) = channel();
        let report = run_tuning(&config, &mut sim, &tx, &Interrupt::new()).unwrap();
        drop(tx);

        assert_eq!(report.channels.len(), 8);
        let statuses: Vec<TuneStatus> = rx.iter().collect();
        assert!(statuses.iter().all(|status| status.progress <= 1.0));
        assert_eq!(statuses.len(), 10);
    }

    #[test]
    fn test_interrupted_run_still_saves() {
        let mut sim = SimRadiant::new(2400);
        let interrupt = Interrupt::new();
        interrupt.raise();
        let (tx, _rx) = channel();
        let report = run_tuning(&TuneConfig::default(), &mut sim, &tx, &interrupt).unwrap();

        assert!(report.interrupted);
        assert!(report.channels.is_empty());
        assert_eq!(sim.saves(), 1);
        assert_eq!(sim.captures(), 0);
    }

    #[test]
    fn test_unsupported_rate_is_fatal() {
        let mut sim = SimRadiant::new(1600);
        let (tx, _rx) = channel();
        let result = run_tuning(&TuneConfig::default(), &mut sim, &tx, &Interrupt::new());
        assert!(matches!(
            result,
            Err(ProcessorError::TuneError(TuneError::UnsupportedSampleRate(1600)))
        ));
        assert_eq!(sim.saves(), 0);
        assert_eq!(sim.loads(), 0);
    }
}
