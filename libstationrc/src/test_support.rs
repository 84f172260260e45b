//! A simulated RADIANT for unit tests.
//!
//! Each channel models its seam and slow sample lengths as linear functions of
//! the seam tune registers and of the average bulk trim. The remaining 126
//! phases share whatever is left of the 128-sample window, so moving the seam
//! moves the mean of the middle phases the other way, as on hardware. Captures
//! are rendered into raw calibration RAM words so that the real reduction path
//! is exercised.
use byteorder::{ByteOrder, LittleEndian};
use fxhash::FxHashMap;
use std::collections::VecDeque;

use crate::calibration::CalibrationState;
use crate::channel::{Channel, Quad};
use crate::constants::*;
use crate::error::HardwareError;
use crate::interrupt::Interrupt;
use crate::radiant::{
    CalMode, DmaDescriptor, DmaMode, Radiant, RegisterAddress, SigGenBand, TmonSelect,
};

const CALRAM_BASE: u32 = 0x0010_0000;
const SIM_NUM_ROLLS: i64 = 384;
// valid seam windows out of 32 for 4 records per roll
const SIM_SEAM_RESCALE: f64 = 0.375;
// roll 2 is the first roll holding a valid seam
const SIM_SEAM_POSITION: usize = 2 * SAMPLES_PER_WINDOW;

pub(crate) const SEAM_REFERENCE: i64 = 1500;
pub(crate) const VADJN_REFERENCE: i64 = 2000;
pub(crate) const VADJP_REFERENCE: i64 = 2500;
pub(crate) const BULK_REFERENCE: i64 = 1800;

fn default_registers() -> FxHashMap<u16, i64> {
    let mut registers = FxHashMap::default();
    for register in 0..=BULK_TRIM_END {
        let value = match register {
            DLL_REGISTER => 0,
            VADJN_REGISTER => VADJN_REFERENCE,
            VADJP_REGISTER => VADJP_REFERENCE,
            DLL_SEAM_REGISTER => SEAM_REFERENCE,
            r if (BULK_TRIM_FIRST..BULK_TRIM_END).contains(&r) => BULK_REFERENCE,
            r => 1000 + r as i64,
        };
        registers.insert(register, value);
    }
    registers
}

#[derive(Debug, Clone)]
pub(crate) struct SimChannel {
    pub registers: FxHashMap<u16, i64>,
    /// Seam offset from nominal (ps) at the reference registers
    pub seam_offset: f64,
    /// Slow sample offset from nominal (ps) at the reference bulk trim
    pub slow_offset: f64,
    /// ps of seam per count of the seam tune registers
    pub seam_gain: f64,
    /// ps of slow sample per count of average bulk trim
    pub slow_gain: f64,
    pub width: i64,
    pub width_without_dll: i64,
    /// width counts per count of average bulk trim
    pub width_gain: f64,
    pub vadjp: Option<i64>,
    /// Offsets added to the measured seam only, one per capture
    pub seam_noise: VecDeque<f64>,
    pub dll_forced_off: bool,
    /// True slow sample at every capture
    pub slow_history: Vec<f64>,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            registers: default_registers(),
            seam_offset: 0.0,
            slow_offset: 0.0,
            seam_gain: 2.0,
            slow_gain: 0.5,
            width: 1100,
            width_without_dll: 1100,
            width_gain: 2.0,
            vadjp: Some(VADJP_REFERENCE),
            seam_noise: VecDeque::new(),
            dll_forced_off: false,
            slow_history: Vec::new(),
        }
    }
}

impl SimChannel {
    fn register(&self, register: u16) -> i64 {
        self.registers.get(&register).copied().unwrap_or(0)
    }

    fn bulk_shift(&self) -> f64 {
        let sum: i64 = (BULK_TRIM_FIRST..BULK_TRIM_END)
            .map(|r| self.register(r))
            .sum();
        sum as f64 / BULK_TRIM_COUNT as f64 - BULK_REFERENCE as f64
    }

    /// The true per-phase timing of this channel
    fn timing(&self, nominal: f64) -> Vec<f64> {
        let seam_shift = (self.register(DLL_SEAM_REGISTER) - SEAM_REFERENCE) as f64;
        let vadjn_shift = (self.register(VADJN_REGISTER) - VADJN_REFERENCE) as f64;
        let seam = nominal + self.seam_offset - self.seam_gain * seam_shift
            + self.seam_gain * vadjn_shift;
        let slow = nominal + self.slow_offset - self.slow_gain * self.bulk_shift();
        let mid = (SAMPLES_PER_WINDOW as f64 * nominal - seam - slow)
            / (SAMPLES_PER_WINDOW - 2) as f64;

        let mut times = vec![mid; SAMPLES_PER_WINDOW];
        times[SEAM_PHASE] = seam;
        times[SLOW_PHASE] = slow;
        times
    }

    fn scan_width(&self) -> i64 {
        let base = if self.dll_forced_off {
            self.width_without_dll
        } else {
            self.width
        };
        base - (self.width_gain * self.bulk_shift()).round() as i64
    }
}

#[derive(Debug)]
pub(crate) struct SimRadiant {
    sample_rate: i64,
    channels: Vec<SimChannel>,
    frequency_mhz: f64,
    monitored: Option<Channel>,
    controller_running: bool,
    cal_mode: CalMode,
    dma_mode: Option<DmaMode>,
    descriptors: Vec<DmaDescriptor>,
    calselect_history: Vec<Option<Quad>>,
    sig_gen_on: bool,
    sig_gen_ever_on: bool,
    captures: usize,
    writes: usize,
    l4_writes: Vec<(Channel, u16, i64)>,
    saves: usize,
    loads: usize,
    interrupt_after: Option<(usize, Interrupt)>,
}

impl SimRadiant {
    pub fn new(sample_rate: i64) -> Self {
        Self {
            sample_rate,
            channels: vec![SimChannel::default(); NUM_CHANNELS],
            frequency_mhz: DEFAULT_FREQUENCY_MHZ,
            monitored: None,
            controller_running: false,
            cal_mode: CalMode::None,
            dma_mode: None,
            descriptors: Vec::new(),
            calselect_history: Vec::new(),
            sig_gen_on: false,
            sig_gen_ever_on: false,
            captures: 0,
            writes: 0,
            l4_writes: Vec::new(),
            saves: 0,
            loads: 0,
            interrupt_after: None,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut SimChannel {
        &mut self.channels[channel.id()]
    }

    pub fn register(&self, channel: Channel, register: u16) -> i64 {
        self.channels[channel.id()].register(register)
    }

    pub fn nominal(&self) -> f64 {
        1e6 / self.sample_rate as f64
    }

    pub fn model_timing(&self, channel: Channel) -> Vec<f64> {
        self.channels[channel.id()].timing(self.nominal())
    }

    pub fn descriptors(&self) -> &[DmaDescriptor] {
        &self.descriptors
    }

    pub fn controller_running(&self) -> bool {
        self.controller_running
    }

    pub fn captures(&self) -> usize {
        self.captures
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn l4_writes(&self) -> &[(Channel, u16, i64)] {
        &self.l4_writes
    }

    pub fn calselect_history(&self) -> &[Option<Quad>] {
        &self.calselect_history
    }

    pub fn sig_gen_on(&self) -> bool {
        self.sig_gen_on
    }

    pub fn sig_gen_ever_on(&self) -> bool {
        self.sig_gen_ever_on
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Raise the interrupt once the given number of captures has been read out
    pub fn interrupt_after(&mut self, captures: usize, interrupt: Interrupt) {
        self.interrupt_after = Some((captures, interrupt));
    }

    fn render_calram(&mut self) -> Vec<u8> {
        let nominal = self.nominal();
        let conversion =
            (1e12 / (self.frequency_mhz * 1e6)) / (SIM_NUM_ROLLS as f64 * WINDOWS_PER_ROLL as f64);
        let mut words = vec![0u32; NUM_CHANNELS * CALRAM_DEPTH];
        for (lab, channel) in self.channels.iter_mut().enumerate() {
            let mut times = channel.timing(nominal);
            channel.slow_history.push(times[SLOW_PHASE]);
            if let Some(noise) = channel.seam_noise.pop_front() {
                times[SEAM_PHASE] += noise;
            }
            let row = &mut words[lab * CALRAM_DEPTH..(lab + 1) * CALRAM_DEPTH];
            row[SIM_SEAM_POSITION] =
                (times[SEAM_PHASE] * SIM_SEAM_RESCALE / conversion).max(0.0).round() as u32;
            for phase in 1..SAMPLES_PER_WINDOW {
                row[phase] = (times[phase] / conversion).max(0.0).round() as u32;
            }
        }
        let mut raw = vec![0u8; words.len() * CALRAM_WORD_SIZE];
        LittleEndian::write_u32_into(&words, &mut raw);
        raw
    }
}

impl Radiant for SimRadiant {
    fn read_register(&mut self, register: &RegisterAddress) -> Result<i64, HardwareError> {
        match register {
            RegisterAddress::Address(addr)
                if *addr == BOARD_MANAGER_BASE_ADDRESS + SAMPLE_RATE_OFFSET =>
            {
                Ok(self.sample_rate)
            }
            _ => Ok(0),
        }
    }

    fn controller_start(&mut self) -> Result<(), HardwareError> {
        self.controller_running = true;
        Ok(())
    }

    fn controller_stop(&mut self) -> Result<(), HardwareError> {
        self.controller_running = false;
        Ok(())
    }

    fn controller_update(&mut self, _channel: Channel) -> Result<(), HardwareError> {
        Ok(())
    }

    fn controller_default(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.channels[channel.id()].dll_forced_off = false;
        Ok(())
    }

    fn controller_force_trigger(
        &mut self,
        _num_trig: usize,
        _block: bool,
        _safe: bool,
    ) -> Result<(), HardwareError> {
        Ok(())
    }

    fn controller_scan_width(&mut self, scan_group: u8) -> Result<i64, HardwareError> {
        match self.monitored {
            Some(channel) if channel.scan_group() == scan_group => {
                Ok(self.channels[channel.id()].scan_width())
            }
            _ => Ok(0),
        }
    }

    fn controller_write_register(
        &mut self,
        channel: Channel,
        address: u16,
        value: i64,
    ) -> Result<(), HardwareError> {
        if address == DLL_REGISTER && value == DLL_DISABLED {
            self.channels[channel.id()].dll_forced_off = true;
        }
        self.l4_writes.push((channel, address, value));
        Ok(())
    }

    fn controller_set_tmon(
        &mut self,
        _channel: Channel,
        _tmon: TmonSelect,
    ) -> Result<(), HardwareError> {
        Ok(())
    }

    fn controller_autotune_vadjp(
        &mut self,
        channel: Channel,
        _initial: i64,
    ) -> Result<Option<i64>, HardwareError> {
        Ok(self.channels[channel.id()].vadjp)
    }

    fn controller_automatch_phab(&mut self, _channel: Channel) -> Result<(), HardwareError> {
        Ok(())
    }

    fn calram_zero(&mut self, _zerocross_only: bool) -> Result<(), HardwareError> {
        Ok(())
    }

    fn calram_mode(&mut self, mode: CalMode) -> Result<(), HardwareError> {
        self.cal_mode = mode;
        Ok(())
    }

    fn calram_num_rolls(&mut self) -> Result<i64, HardwareError> {
        Ok(SIM_NUM_ROLLS)
    }

    fn calram_base(&mut self) -> Result<u32, HardwareError> {
        Ok(CALRAM_BASE)
    }

    fn dma_enable(&mut self, mode: DmaMode) -> Result<(), HardwareError> {
        self.dma_mode = Some(mode);
        self.descriptors.clear();
        Ok(())
    }

    fn dma_disable(&mut self) -> Result<(), HardwareError> {
        self.dma_mode = None;
        Ok(())
    }

    fn dma_set_descriptor(&mut self, descriptor: &DmaDescriptor) -> Result<(), HardwareError> {
        self.descriptors.push(descriptor.clone());
        Ok(())
    }

    fn dma_begin(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn dma_read(&mut self, length: usize) -> Result<Vec<u8>, HardwareError> {
        let mut raw = self.render_calram();
        raw.truncate(length);
        self.captures += 1;
        if let Some((after, interrupt)) = &self.interrupt_after {
            if self.captures >= *after {
                interrupt.raise();
            }
        }
        Ok(raw)
    }

    fn calibration_get(&mut self, channel: Channel) -> Result<CalibrationState, HardwareError> {
        Ok(CalibrationState::new(
            channel,
            self.channels[channel.id()].registers.clone(),
        ))
    }

    fn calibration_set(
        &mut self,
        channel: Channel,
        register: u16,
        value: i64,
    ) -> Result<(), HardwareError> {
        self.writes += 1;
        self.channels[channel.id()].registers.insert(register, value);
        Ok(())
    }

    fn calibration_reset(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.channels[channel.id()].registers = default_registers();
        Ok(())
    }

    fn calibration_load(&mut self) -> Result<(), HardwareError> {
        self.loads += 1;
        Ok(())
    }

    fn calibration_save(&mut self) -> Result<(), HardwareError> {
        self.saves += 1;
        Ok(())
    }

    fn calselect(&mut self, quad: Option<Quad>) -> Result<(), HardwareError> {
        self.calselect_history.push(quad);
        Ok(())
    }

    fn monselect(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.monitored = Some(channel);
        Ok(())
    }

    fn pedestal_update(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn sig_gen_enable(&mut self, on: bool) -> Result<(), HardwareError> {
        self.sig_gen_on = on;
        self.sig_gen_ever_on |= on;
        Ok(())
    }

    fn sig_gen_configure(&mut self, _pulse: bool, _band: SigGenBand) -> Result<(), HardwareError> {
        Ok(())
    }

    fn sig_gen_set_frequency(&mut self, frequency_mhz: f64) -> Result<(), HardwareError> {
        self.frequency_mhz = frequency_mhz;
        Ok(())
    }
}
