// RADIANT board layout
pub const NUM_CHANNELS: usize = 24;
pub const NUM_QUADS: usize = 3;

// LAB4D sampling geometry
pub const SAMPLES_PER_WINDOW: usize = 128;
pub const CALRAM_DEPTH: usize = 4096;
pub const WINDOWS_PER_ROLL: usize = CALRAM_DEPTH / SAMPLES_PER_WINDOW;
pub const CALRAM_WORD_SIZE: usize = 4;
pub const DEFAULT_SAMPLES_PER_ROLL: usize = 4;

// Timing phases of interest
pub const SEAM_PHASE: usize = 0;
pub const SLOW_PHASE: usize = SAMPLES_PER_WINDOW - 1;

// Calibration register indices
pub const DLL_REGISTER: u16 = 2;
pub const DLL_DISABLED: i64 = 1024;
pub const VADJN_REGISTER: u16 = 3;
pub const VADJP_REGISTER: u16 = 8;
pub const DLL_SEAM_REGISTER: u16 = 11;
pub const BULK_TRIM_FIRST: u16 = 257;
pub const BULK_TRIM_END: u16 = 383; // exclusive
pub const BULK_TRIM_COUNT: usize = (BULK_TRIM_END - BULK_TRIM_FIRST) as usize;

// Board manager register map
pub const BOARD_MANAGER_BASE_ADDRESS: u32 = 0x400000;
pub const SAMPLE_RATE_OFFSET: u32 = 0xF0;

// Tuning parameters
pub const BROKEN_DLL_WIDTH: i64 = 1800;
pub const BROKEN_DLL_TRIES_FACTOR: usize = 3;
pub const WIDTH_TRIM_STEP: i64 = 25;
pub const SLOW_TRIM_STEP: i64 = 10;
pub const MAX_BOUNCES: usize = 3;
pub const ROLLING_MEAN_DEPTH: usize = 5;
pub const FEEDBACK_WRAP_FACTOR: f64 = 127.68;
pub const DEFAULT_FREQUENCY_MHZ: f64 = 510.0;
pub const DEFAULT_MAX_TRIES: usize = 50;
