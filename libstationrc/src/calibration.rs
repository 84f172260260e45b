use fxhash::FxHashMap;

use super::channel::Channel;
use super::constants::{
    BULK_TRIM_COUNT, BULK_TRIM_END, BULK_TRIM_FIRST, DLL_DISABLED, DLL_REGISTER,
    DLL_SEAM_REGISTER, VADJN_REGISTER,
};
use super::error::HardwareError;

/// A read-back of the per-channel LAB4D calibration specifics.
///
/// The hardware owns the real state; this is only a mirror of what the station
/// reported at the time of the read. It doubles as the rollback snapshot of a
/// tuning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationState {
    channel: Channel,
    registers: FxHashMap<u16, i64>,
}

impl CalibrationState {
    pub fn new(channel: Channel, registers: FxHashMap<u16, i64>) -> Self {
        Self { channel, registers }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Value of a register, failing if the station did not report it
    pub fn get(&self, register: u16) -> Result<i64, HardwareError> {
        self.registers
            .get(&register)
            .copied()
            .ok_or(HardwareError::MissingRegister {
                channel: self.channel.id(),
                register,
            })
    }

    pub fn set(&mut self, register: u16, value: i64) {
        self.registers.insert(register, value);
    }

    /// Register 2 holds 1024 when the defaults say not to use the DLL
    pub fn dll_enabled(&self) -> bool {
        self.registers.get(&DLL_REGISTER).copied() != Some(DLL_DISABLED)
    }

    /// The register used to move the seam sample: VadjN without a DLL, the
    /// DLL seam trim otherwise
    pub fn seam_tune_register(&self) -> u16 {
        if self.dll_enabled() {
            DLL_SEAM_REGISTER
        } else {
            VADJN_REGISTER
        }
    }

    /// Average of the 126 bulk trims (the "early sample" range)
    pub fn bulk_trim_average(&self) -> Result<f64, HardwareError> {
        let mut sum = 0;
        for register in BULK_TRIM_FIRST..BULK_TRIM_END {
            sum += self.get(register)?;
        }
        Ok(sum as f64 / BULK_TRIM_COUNT as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &i64)> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
