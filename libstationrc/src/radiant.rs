use serde::{Deserialize, Serialize};

use super::calibration::CalibrationState;
use super::channel::{Channel, Quad};
use super::constants::{BOARD_MANAGER_BASE_ADDRESS, SAMPLE_RATE_OFFSET};
use super::error::HardwareError;

/// Calibration RAM accumulation modes of the LAB4D
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalMode {
    None,
    Pedestal,
    Zerocrossing,
}

/// DMA engine modes. Calibration mode reads from the calibration RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    Event,
    Calibration,
}

impl DmaMode {
    pub fn code(&self) -> u8 {
        match self {
            Self::Event => 0,
            Self::Calibration => 1,
        }
    }
}

/// Inputs of the LAB4D timing monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmonSelect {
    SSPin,
    SSPout,
    Phab,
}

impl TmonSelect {
    pub fn code(&self) -> u8 {
        match self {
            Self::Phab => 5,
            Self::SSPin => 6,
            Self::SSPout => 68,
        }
    }
}

/// Filter band of the onboard signal generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigGenBand(pub u8);

impl SigGenBand {
    /// Pick the filter band for a generator frequency in MHz
    pub fn for_frequency(frequency_mhz: f64) -> Self {
        if frequency_mhz > 600.0 {
            Self(3)
        } else if frequency_mhz > 300.0 {
            Self(2)
        } else if frequency_mhz > 100.0 {
            Self(1)
        } else {
            Self(0)
        }
    }
}

/// A register addressed either by its symbolic name or its raw address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterAddress {
    Name(String),
    Address(u32),
}

/// One DMA descriptor. Descriptor `num` transfers `length` 32-bit words from `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaDescriptor {
    pub num: usize,
    pub address: u32,
    pub length: usize,
    pub increment: bool,
    pub is_final: bool,
}

/// The hardware register interface of a RADIANT board.
///
/// Every call is a synchronous request/response exchange with the board. The
/// tuning code borrows an implementor mutably for the whole session, which is
/// what keeps the capture mode and DMA engine exclusive to that session.
pub trait Radiant {
    fn read_register(&mut self, register: &RegisterAddress) -> Result<i64, HardwareError>;

    // LAB4D controller
    fn controller_start(&mut self) -> Result<(), HardwareError>;
    fn controller_stop(&mut self) -> Result<(), HardwareError>;
    fn controller_update(&mut self, channel: Channel) -> Result<(), HardwareError>;
    fn controller_default(&mut self, channel: Channel) -> Result<(), HardwareError>;
    fn controller_force_trigger(
        &mut self,
        num_trig: usize,
        block: bool,
        safe: bool,
    ) -> Result<(), HardwareError>;
    fn controller_scan_width(&mut self, scan_group: u8) -> Result<i64, HardwareError>;
    fn controller_write_register(
        &mut self,
        channel: Channel,
        address: u16,
        value: i64,
    ) -> Result<(), HardwareError>;
    fn controller_set_tmon(&mut self, channel: Channel, tmon: TmonSelect)
        -> Result<(), HardwareError>;
    /// Returns None when the auto-tune could not find a working VadjP
    fn controller_autotune_vadjp(
        &mut self,
        channel: Channel,
        initial: i64,
    ) -> Result<Option<i64>, HardwareError>;
    fn controller_automatch_phab(&mut self, channel: Channel) -> Result<(), HardwareError>;

    // Calibration RAM
    fn calram_zero(&mut self, zerocross_only: bool) -> Result<(), HardwareError>;
    fn calram_mode(&mut self, mode: CalMode) -> Result<(), HardwareError>;
    fn calram_num_rolls(&mut self) -> Result<i64, HardwareError>;
    fn calram_base(&mut self) -> Result<u32, HardwareError>;

    // DMA engine
    fn dma_enable(&mut self, mode: DmaMode) -> Result<(), HardwareError>;
    fn dma_disable(&mut self) -> Result<(), HardwareError>;
    fn dma_set_descriptor(&mut self, descriptor: &DmaDescriptor) -> Result<(), HardwareError>;
    fn dma_begin(&mut self) -> Result<(), HardwareError>;
    fn dma_read(&mut self, length: usize) -> Result<Vec<u8>, HardwareError>;

    // Calibration specifics
    fn calibration_get(&mut self, channel: Channel) -> Result<CalibrationState, HardwareError>;
    fn calibration_set(
        &mut self,
        channel: Channel,
        register: u16,
        value: i64,
    ) -> Result<(), HardwareError>;
    fn calibration_reset(&mut self, channel: Channel) -> Result<(), HardwareError>;
    fn calibration_load(&mut self) -> Result<(), HardwareError>;
    fn calibration_save(&mut self) -> Result<(), HardwareError>;

    // Board level
    fn calselect(&mut self, quad: Option<Quad>) -> Result<(), HardwareError>;
    fn monselect(&mut self, channel: Channel) -> Result<(), HardwareError>;
    fn pedestal_update(&mut self) -> Result<(), HardwareError>;
    fn sig_gen_enable(&mut self, on: bool) -> Result<(), HardwareError>;
    fn sig_gen_configure(&mut self, pulse: bool, band: SigGenBand) -> Result<(), HardwareError>;
    fn sig_gen_set_frequency(&mut self, frequency_mhz: f64) -> Result<(), HardwareError>;

    /// Sample rate in MHz, read from the board manager
    fn sample_rate(&mut self) -> Result<i64, HardwareError> {
        self.read_register(&RegisterAddress::Address(
            BOARD_MANAGER_BASE_ADDRESS + SAMPLE_RATE_OFFSET,
        ))
    }

    fn sig_gen_select_band(&mut self, frequency_mhz: f64) -> Result<(), HardwareError> {
        self.sig_gen_configure(false, SigGenBand::for_frequency(frequency_mhz))
    }

    /// Write every register of a snapshot back to its channel and latch it
    fn calibration_restore(&mut self, snapshot: &CalibrationState) -> Result<(), HardwareError> {
        let channel = snapshot.channel();
        for (register, value) in snapshot.iter() {
            self.calibration_set(channel, *register, *value)?;
        }
        self.controller_update(channel)
    }
}
