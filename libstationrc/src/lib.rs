//! # stationrc
//!
//! stationrc is the remote control and timing self-calibration tool for the
//! RADIANT digitizer of an RNO-G station, written in Rust. It talks to the station
//! daemon over the network and tunes the sampling timing of the 24 LAB4D channels
//! so that the seam sample and the slow sample match the nominal sample length.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before,
//! see the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions. To build and install the CLI use
//! `cargo install --path ./stationrc_cli` from the top level repository.
//!
//! ## Tuning
//!
//! Each LAB4D samples a 128-sample window. The first sample of a window (the
//! seam) is set by the DLL seam trim, or by VadjN when the DLL is broken, and the
//! last one (the slow sample) by the 126 bulk trims. Timing is measured by
//! counting zero crossings of a sine wave from the onboard signal generator in
//! the calibration RAM and reading it out over DMA.
//!
//! A tuning session per channel goes through:
//!
//! - setup: VadjP auto-tune, DLL sanity check, bulk trim search until the SSPin
//! width is below target
//! - mean tuning: coarse seam correction on the mean of the middle samples
//! - seam/slow tuning: seam trim and bulk trim until both are inside their band
//!
//! Channels of one calibration quad are tuned in lock-step from the same
//! captures. Channels that do not converge are restored to the calibration they
//! had before the session.
//!
//! ## Configuration
//!
//! The YAML format of a configuration file is as follows:
//!
//! ```yml
//! host: localhost
//! port: 8000
//! timeout: 60.0
//! frequency: 510.0
//! max_tries: 50
//! mode: quad
//! channels: []
//! quads: []
//! exclude_channels: []
//! bad_labs: []
//! external_signal: false
//! rolling_mean: false
//! reset: false
//! samples_per_roll: 4
//! report_path: null
//! ```
//!
//! In `channel` mode `channels` are tuned one at a time, in `quad` mode the
//! listed `quads` are tuned eight channels at a time. Empty lists mean all.
//! `bad_labs` are channels whose seam can not be measured; the middle sample
//! mean is used instead.
//!
//! ## Output
//!
//! A log file and, if `report_path` is set, a YAML report with the per-channel
//! result of the run.
pub mod adjuster;
pub mod bands;
pub mod calibration;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod inspect;
pub mod interrupt;
pub mod process;
pub mod radiant;
pub mod remote_control;
pub mod report;
pub mod sampler;
pub mod tune_status;
pub mod tuner;
pub mod zmq_transport;

#[cfg(test)]
mod test_support;
