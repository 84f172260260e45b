use bit_set::BitSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::channel::{Channel, Quad};
use super::constants::{
    DEFAULT_FREQUENCY_MHZ, DEFAULT_MAX_TRIES, DEFAULT_SAMPLES_PER_ROLL, NUM_CHANNELS, NUM_QUADS,
};
use super::error::ConfigError;
use super::sampler::seam_rescale;
use super::tuner::TuneOptions;

const DEFAULT_TIMEOUT_S: f64 = 60.0;

/// Whether channels are tuned one at a time or a full quad in lock-step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuneTarget {
    Channel,
    #[default]
    Quad,
}

/// Structure representing the tuning configuration. Contains the station address
/// and the channel selection. Configs are serializable and deserializable to YAML
/// using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    pub host: String,
    pub port: u16,
    /// Reply timeout in seconds
    pub timeout: f64,
    /// Calibration signal frequency in MHz
    pub frequency: f64,
    pub max_tries: usize,
    pub mode: TuneTarget,
    /// Channels to tune in channel mode. Empty means every channel.
    pub channels: Vec<Channel>,
    /// Quads to tune in quad mode. Empty means every quad.
    pub quads: Vec<Quad>,
    pub exclude_channels: Vec<Channel>,
    pub bad_labs: Vec<Channel>,
    pub external_signal: bool,
    pub rolling_mean: bool,
    /// Reset the calibration to defaults instead of loading the stored one
    pub reset: bool,
    pub samples_per_roll: usize,
    pub report_path: Option<PathBuf>,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 8000,
            timeout: DEFAULT_TIMEOUT_S,
            frequency: DEFAULT_FREQUENCY_MHZ,
            max_tries: DEFAULT_MAX_TRIES,
            mode: TuneTarget::Quad,
            channels: Vec::new(),
            quads: Vec::new(),
            exclude_channels: Vec::new(),
            bad_labs: Vec::new(),
            external_signal: false,
            rolling_mean: false,
            reset: false,
            samples_per_roll: DEFAULT_SAMPLES_PER_ROLL,
            report_path: None,
        }
    }
}

impl TuneConfig {
    /// Read the configuration in a YAML file
    /// Returns a TuneConfig if successful and valid
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tries == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_tries must be at least 1",
            )));
        }
        if !(self.frequency > 0.0 && self.frequency.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "frequency must be positive and finite, got {}",
                self.frequency
            )));
        }
        if seam_rescale(self.samples_per_roll).is_err() {
            return Err(ConfigError::Invalid(format!(
                "samples_per_roll must be 1, 2, 4 or 8, got {}",
                self.samples_per_roll
            )));
        }
        if !(self.timeout > 0.0 && self.timeout.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "timeout must be positive and finite, got {}",
                self.timeout
            )));
        }
        Ok(())
    }

    /// Reply timeout of the station; falls back to the default for values
    /// `validate` rejects
    pub fn reply_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_S))
    }

    /// The quads to tune in quad mode, each once
    pub fn requested_quads(&self) -> Vec<Quad> {
        if self.quads.is_empty() {
            return Quad::all().collect();
        }
        let mut seen = BitSet::with_capacity(NUM_QUADS);
        self.quads
            .iter()
            .copied()
            .filter(|quad| seen.insert(quad.id()))
            .collect()
    }

    /// Every channel this configuration will tune, in tuning order, with the
    /// exclusions removed
    pub fn requested_channels(&self) -> Vec<Channel> {
        let requested: Vec<Channel> = match self.mode {
            TuneTarget::Channel if self.channels.is_empty() => Channel::all().collect(),
            TuneTarget::Channel => self.channels.clone(),
            TuneTarget::Quad => self
                .requested_quads()
                .iter()
                .flat_map(|quad| quad.channels())
                .collect(),
        };
        let mut seen = BitSet::with_capacity(NUM_CHANNELS);
        requested
            .into_iter()
            .filter(|channel| !self.exclude_channels.contains(channel))
            .filter(|channel| seen.insert(channel.id()))
            .collect()
    }

    pub fn bad_lab_set(&self) -> BitSet {
        let mut set = BitSet::with_capacity(NUM_CHANNELS);
        for channel in &self.bad_labs {
            set.insert(channel.id());
        }
        set
    }

    pub fn tune_options(&self) -> TuneOptions {
        TuneOptions {
            frequency_mhz: self.frequency,
            max_tries: self.max_tries,
            bad_labs: self.bad_lab_set(),
            external_signal: self.external_signal,
            rolling_mean: self.rolling_mean,
            samples_per_roll: self.samples_per_roll,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults_fill_in() {
        let yaml = "host: station11\nmode: channel\nchannels: [0, 5, 13]\nbad_labs: [5]\n";
        let config: TuneConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.host, "station11");
        assert_eq!(config.frequency, DEFAULT_FREQUENCY_MHZ);
        assert_eq!(config.max_tries, DEFAULT_MAX_TRIES);
        assert_eq!(config.mode, TuneTarget::Channel);
        let ids: Vec<usize> = config.requested_channels().iter().map(Channel::id).collect();
        assert_eq!(ids, vec![0, 5, 13]);
        let options = config.tune_options();
        assert!(options.bad_labs.contains(5));
        assert!(!options.bad_labs.contains(0));
    }

    #[test]
    fn test_out_of_range_channel_rejected() {
        let result = serde_yaml::from_str::<TuneConfig>("channels: [3, 24]\n");
        assert!(result.is_err());
        let result = serde_yaml::from_str::<TuneConfig>("quads: [3]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_quad_mode_exclusions() {
        let config = TuneConfig {
            quads: vec![Quad::new(2).unwrap()],
            exclude_channels: vec![Channel::new(9).unwrap(), Channel::new(21).unwrap()],
            ..Default::default()
        };
        let ids: Vec<usize> = config.requested_channels().iter().map(Channel::id).collect();
        assert_eq!(ids, vec![8, 10, 11, 20, 22, 23]);

        let all = TuneConfig::default();
        assert_eq!(all.requested_channels().len(), NUM_CHANNELS);
    }

    #[test]
    fn test_validation() {
        let mut config = TuneConfig::default();
        config.validate().unwrap();
        config.max_tries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.max_tries = 10;
        config.samples_per_roll = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.samples_per_roll = 2;
        config.frequency = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_infinite_timeout_rejected() {
        let config: TuneConfig = serde_yaml::from_str("timeout: .inf\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.reply_timeout(), Duration::from_secs(60));

        let config: TuneConfig = serde_yaml::from_str("frequency: .inf\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_repeated_entries_tuned_once() {
        let config: TuneConfig = serde_yaml::from_str("quads: [0, 0]\n").unwrap();
        assert_eq!(config.requested_quads(), vec![Quad::new(0).unwrap()]);
        assert_eq!(config.requested_channels().len(), 8);

        let config: TuneConfig =
            serde_yaml::from_str("mode: channel\nchannels: [7, 3, 7, 3]\n").unwrap();
        let ids: Vec<usize> = config.requested_channels().iter().map(Channel::id).collect();
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/definitely/not/a/config.yaml");
        assert!(matches!(
            TuneConfig::read_config_file(path),
            Err(ConfigError::BadFilePath(_))
        ));
    }
}
