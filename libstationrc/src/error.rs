use std::path::PathBuf;
use thiserror::Error;

use super::constants::{NUM_CHANNELS, NUM_QUADS};
use super::tune_status::TuneStatus;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Invalid channel id {0}; RADIANT channels are 0..{max}", max=NUM_CHANNELS)]
    InvalidChannel(usize),
    #[error("Invalid quad id {0}; RADIANT quads are 0..{max}", max=NUM_QUADS)]
    InvalidQuad(usize),
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Communication with the station failed due to ZeroMQ error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("Failed to decode reply from the station: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Station does not know command {cmd} on device {device}")]
    UnknownCommand { device: String, cmd: String },
    #[error("Command {cmd} on device {device} failed with status {status}")]
    CommandFailed {
        device: String,
        cmd: String,
        status: String,
    },
    #[error("Command {cmd} on device {device} returned no data")]
    MissingData { device: String, cmd: String },
    #[error("Station returned a calibration key {0} which is not a register index")]
    BadCalibrationKey(String),
    #[error("Calibration of channel {channel} is missing register {register}")]
    MissingRegister { channel: usize, register: u16 },
    #[error("Hardware access rejected due to channel error: {0}")]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Timing capture failed due to hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("DMA returned {actual} bytes of calibration RAM; expected {expected}")]
    ShortDmaRead { expected: usize, actual: usize },
    #[error("Timing capture failed to reshape calibration RAM: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Unsupported number of samples per roll {0}; expected 1, 2, 4 or 8")]
    BadSamplesPerRoll(usize),
    #[error("Timing array has shape {actual:?}; expected {expected:?}")]
    WrongShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Calibration RAM reported zero rolls; no timing information was accumulated")]
    NoRolls,
}

#[derive(Debug, Error)]
pub enum TuneError {
    #[error("Tuning failed due to hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Tuning failed due to timing capture error: {0}")]
    Sampler(#[from] SamplerError),
    #[error("Tuning failed due to channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Sample rate of {0} MHz is not supported; expected 2400 or 3200 MHz")]
    UnsupportedSampleRate(i64),
    #[error("Channels {0} and {1} do not share a calibration quad; tune them separately or use an external signal")]
    MixedQuads(usize, usize),
    #[error("Tuning was interrupted; unresolved channels were restored to their initial calibration")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to tuning error: {0}")]
    TuneError(#[from] TuneError),
    #[error("Processor failed due to hardware error: {0}")]
    HardwareError(#[from] HardwareError),
    #[error("Processor failed due to timing capture error: {0}")]
    SamplerError(#[from] SamplerError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<TuneStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}
