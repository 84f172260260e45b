//! # stationrc_cli
//!
//! Command line front end of stationrc.
//!
//! ```bash
//! stationrc_cli new -p config.yaml
//! stationrc_cli tune -p config.yaml
//! stationrc_cli timing -p config.yaml -n 5
//! ```
//!
//! Ctrl-C during `tune` stops the run after the channels being tuned have been
//! restored.
use clap::{value_parser, Arg, ArgAction, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use libstationrc::config::TuneConfig;
use libstationrc::error::ProcessorError;
use libstationrc::inspect::record_board_timing;
use libstationrc::interrupt::Interrupt;
use libstationrc::process::{connect_station, process};
use libstationrc::radiant::SigGenBand;
use libstationrc::tune_status::{StatusKind, TuneStatus};

fn make_template_config(path: &Path) -> Result<(), ProcessorError> {
    let config = TuneConfig::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn init_logging(verbose: bool) -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./stationrc.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let level = if verbose {
        spdlog::Level::Debug
    } else {
        spdlog::Level::Info
    };
    let logger = Arc::new(
        spdlog::Logger::builder()
            .sinks(spdlog::default_logger().sinks().iter().cloned())
            .sink(file_sink)
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(level))
            .flush_level_filter(spdlog::LevelFilter::All)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn run_tune(config: TuneConfig) {
    let interrupt = Interrupt::new();
    let handler_interrupt = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_interrupt.raise()) {
        spdlog::warn!("Could not install Ctrl-C handler: {e}");
    }

    let n_channels = config.requested_channels().len() as u64;
    let pb = ProgressBar::new(n_channels);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} channels {msg}")
    {
        pb.set_style(style);
    }

    let (tx, rx) = mpsc::channel::<TuneStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(config, tx, interrupt));

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => {
                pb.set_position((status.progress * n_channels as f32).round() as u64);
                match status.kind {
                    StatusKind::Passed(channel) => pb.set_message(format!("{channel} OK")),
                    StatusKind::Failed(channel) => pb.set_message(format!("{channel} FAILED")),
                    _ => (),
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => (),
        }

        if handle.is_finished() {
            break;
        }
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(report)) => {
            for line in report.summary_lines() {
                println!("{line}");
            }
            if report.interrupted {
                spdlog::warn!("Tuning was interrupted before every channel was tuned");
            }
        }
        Ok(Err(e)) => spdlog::error!("Tuning failed with error: {e}"),
        Err(_) => spdlog::error!("Failed to join tuning task!"),
    }
}

fn run_timing(config: &TuneConfig, recordings: usize) -> Result<(), ProcessorError> {
    let mut station = connect_station(config)?;
    let timings = record_board_timing(
        &mut station,
        config.frequency,
        SigGenBand::for_frequency(config.frequency),
        recordings,
        config.samples_per_roll,
    )?;
    for quad_timing in &timings {
        for channel in quad_timing.channels() {
            if let Some(summary) = quad_timing.summary(*channel) {
                spdlog::info!(
                    "{channel}: seam {:.2} ps, slow {:.2} ps, middle mean {:.3} ps",
                    summary.seam_ps,
                    summary.slow_ps,
                    summary.mid_mean_ps
                );
            }
        }
    }
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("stationrc_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("tune").about("Tune the sample timing of the RADIANT"))
        .subcommand(
            Command::new("timing")
                .about("Record the sample timing of every quad")
                .arg(
                    Arg::new("recordings")
                        .short('n')
                        .long("recordings")
                        .value_parser(value_parser!(usize))
                        .default_value("1")
                        .help("Number of recordings per quad"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .get_matches();

    // Initialize feedback
    if let Err(e) = init_logging(matches.get_flag("verbose")) {
        eprintln!("Could not create log file: {e}");
        return;
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        spdlog::error!("A config path is required (--path)");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => spdlog::info!("Done."),
            Err(e) => spdlog::error!("{e}"),
        }
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match TuneConfig::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Station: {}:{}", config.host, config.port);
    spdlog::info!(
        "Frequency: {} MHz Max tries: {} Mode: {:?}",
        config.frequency,
        config.max_tries,
        config.mode
    );

    match matches.subcommand() {
        Some(("tune", _)) => run_tune(config),
        Some(("timing", sub)) => {
            let recordings = sub.get_one::<usize>("recordings").copied().unwrap_or(1);
            if let Err(e) = run_timing(&config, recordings) {
                spdlog::error!("Timing recording failed with error: {e}");
            }
        }
        _ => spdlog::error!("Unknown subcommand"),
    }

    spdlog::info!("Done.");
}
