use serde::Serialize;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

use super::channel::Channel;
use super::error::ProcessorError;
use super::tuner::ChannelOutcome;

/// Summary of a station tuning run
#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished: OffsetDateTime,
    pub sample_rate_mhz: i64,
    pub frequency_mhz: f64,
    pub interrupted: bool,
    pub channels: Vec<ChannelOutcome>,
}

impl TuneReport {
    pub fn new(started: OffsetDateTime, sample_rate_mhz: i64, frequency_mhz: f64) -> Self {
        Self {
            started,
            finished: started,
            sample_rate_mhz,
            frequency_mhz,
            interrupted: false,
            channels: Vec::new(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.channels.iter().all(|outcome| outcome.passed)
    }

    pub fn failed_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|outcome| !outcome.passed)
            .map(|outcome| outcome.channel)
            .collect()
    }

    /// One "ch. NN - OK/FAILED" line per tuned channel, sorted by channel
    pub fn summary_lines(&self) -> Vec<String> {
        let mut outcomes: Vec<&ChannelOutcome> = self.channels.iter().collect();
        outcomes.sort_by_key(|outcome| outcome.channel);
        outcomes
            .iter()
            .map(|outcome| {
                format!(
                    "ch. {:02} - {}",
                    outcome.channel.id(),
                    if outcome.passed { "OK" } else { "FAILED" }
                )
            })
            .collect()
    }

    /// Write the report as YAML into `directory`, named after the start time
    pub fn write_yaml(&self, directory: &Path) -> Result<PathBuf, ProcessorError> {
        let stamp = self
            .started
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::create_dir_all(directory)?;
        let path = directory.join(format!("tune_report_{stamp}.yaml"));
        std::fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::TunePhase;
    use time::macros::datetime;

    fn outcome(id: usize, passed: bool) -> ChannelOutcome {
        ChannelOutcome {
            channel: Channel::new(id).unwrap(),
            passed,
            failed_in: (!passed).then_some(TunePhase::SeamSlowTune),
            tries: 4,
            max_tries: 50,
            seam_register: 11,
            bounces: 0,
            seam_ps: passed.then_some(417.2),
            slow_ps: passed.then_some(410.9),
        }
    }

    fn report() -> TuneReport {
        let mut report = TuneReport::new(datetime!(2024-07-09 13:05:22 UTC), 2400, 510.0);
        report.channels = vec![outcome(12, true), outcome(3, false), outcome(0, true)];
        report
    }

    #[test]
    fn test_summary_lines_are_sorted() {
        let report = report();
        assert_eq!(
            report.summary_lines(),
            vec!["ch. 00 - OK", "ch. 03 - FAILED", "ch. 12 - OK"]
        );
        assert!(!report.all_passed());
        assert_eq!(report.failed_channels(), vec![Channel::new(3).unwrap()]);
    }

    #[test]
    fn test_write_yaml() {
        let directory = std::env::temp_dir().join("stationrc_report_test");
        let path = report().write_yaml(&directory).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "tune_report_20240709_130522.yaml"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("2024-07-09T13:05:22Z"));
        assert!(text.contains("failed_in: seam_slow_tune"));
        std::fs::remove_file(path).unwrap();
    }
}
