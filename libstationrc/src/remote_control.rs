use fxhash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;

use super::calibration::CalibrationState;
use super::channel::{Channel, Quad};
use super::error::HardwareError;
use super::radiant::{
    CalMode, DmaDescriptor, DmaMode, Radiant, RegisterAddress, SigGenBand, TmonSelect,
};

pub const STATUS_OK: &str = "OK";
pub const STATUS_UNKNOWN: &str = "UNKNOWN";

/// Devices the station daemon dispatches commands to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Device {
    RadiantBoard,
    RadiantCalib,
    RadiantCalram,
    RadiantDma,
    RadiantLabc,
    RadiantSigGen,
    Station,
    ControllerBoard,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RadiantBoard => "radiant-board",
            Self::RadiantCalib => "radiant-calib",
            Self::RadiantCalram => "radiant-calram",
            Self::RadiantDma => "radiant-dma",
            Self::RadiantLabc => "radiant-labc",
            Self::RadiantSigGen => "radiant-sig-gen",
            Self::Station => "station",
            Self::ControllerBoard => "controller-board",
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One command to the station. The keyword arguments travel as a JSON encoded
/// string inside the JSON message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub device: Device,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Reply {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            status: Some(STATUS_OK.to_string()),
            data,
        }
    }
}

/// A request/reply channel to the station daemon
pub trait Transport {
    fn request(&mut self, request: &Request) -> Result<Reply, HardwareError>;
    fn reconnect(&mut self) -> Result<(), HardwareError>;
}

/// Client side of the station remote control.
///
/// Implements the RADIANT register interface on top of a [`Transport`].
pub struct RemoteControl<T: Transport> {
    transport: T,
}

impl<T: Transport> RemoteControl<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a command and return the data of the reply, if any.
    ///
    /// A reply that fails to decode usually means the stream is out of step, so
    /// the transport is reconnected and the command sent once more.
    pub fn send_command(
        &mut self,
        device: Device,
        cmd: &str,
        data: Option<Value>,
    ) -> Result<Option<Value>, HardwareError> {
        let request = Request {
            device,
            cmd: cmd.to_string(),
            data: data.map(|d| serde_json::to_string(&d)).transpose()?,
        };
        spdlog::debug!("Sending command: {request:?}");
        let reply = match self.transport.request(&request) {
            Err(HardwareError::Decode(e)) => {
                spdlog::warn!("Could not decode reply to {device}/{cmd} ({e}), reconnecting");
                self.transport.reconnect()?;
                self.transport.request(&request)?
            }
            other => other?,
        };
        spdlog::debug!("Received reply: {reply:?}");

        match reply.status.as_deref() {
            Some(STATUS_OK) => Ok(reply.data.filter(|data| !data.is_null())),
            Some(STATUS_UNKNOWN) => Err(HardwareError::UnknownCommand {
                device: device.to_string(),
                cmd: request.cmd,
            }),
            status => {
                spdlog::error!("Sent: {request:?}. Received: {reply:?}");
                Err(HardwareError::CommandFailed {
                    device: device.to_string(),
                    cmd: request.cmd,
                    status: status.unwrap_or("<none>").to_string(),
                })
            }
        }
    }

    /// Send a command whose reply must carry data of type `R`
    fn query<R: DeserializeOwned>(
        &mut self,
        device: Device,
        cmd: &str,
        data: Option<Value>,
    ) -> Result<R, HardwareError> {
        let value = self
            .send_command(device, cmd, data)?
            .ok_or_else(|| HardwareError::MissingData {
                device: device.to_string(),
                cmd: cmd.to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    fn command(
        &mut self,
        device: Device,
        cmd: &str,
        data: Option<Value>,
    ) -> Result<(), HardwareError> {
        self.send_command(device, cmd, data)?;
        Ok(())
    }
}

impl<T: Transport> Radiant for RemoteControl<T> {
    fn read_register(&mut self, register: &RegisterAddress) -> Result<i64, HardwareError> {
        self.query(Device::RadiantBoard, "readReg", Some(json!({ "name": register })))
    }

    fn controller_start(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantLabc, "start", None)
    }

    fn controller_stop(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantLabc, "stop", None)
    }

    fn controller_update(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "update",
            Some(json!({ "lab4": channel.id() })),
        )
    }

    fn controller_default(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "default",
            Some(json!({ "lab4": channel.id() })),
        )
    }

    fn controller_force_trigger(
        &mut self,
        num_trig: usize,
        block: bool,
        safe: bool,
    ) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "force_trigger",
            Some(json!({ "block": block, "numTrig": num_trig, "safe": safe })),
        )
    }

    fn controller_scan_width(&mut self, scan_group: u8) -> Result<i64, HardwareError> {
        self.query(
            Device::RadiantLabc,
            "scan_width",
            Some(json!({ "scanNum": scan_group, "trials": 1 })),
        )
    }

    fn controller_write_register(
        &mut self,
        channel: Channel,
        address: u16,
        value: i64,
    ) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "l4reg",
            Some(json!({
                "lab": channel.id(),
                "addr": address,
                "value": value,
                "verbose": false,
            })),
        )
    }

    fn controller_set_tmon(
        &mut self,
        channel: Channel,
        tmon: TmonSelect,
    ) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "set_tmon",
            Some(json!({ "lab": channel.id(), "value": tmon.code() })),
        )
    }

    fn controller_autotune_vadjp(
        &mut self,
        channel: Channel,
        initial: i64,
    ) -> Result<Option<i64>, HardwareError> {
        let reply = self.send_command(
            Device::RadiantLabc,
            "autotune_vadjp",
            Some(json!({ "lab": channel.id(), "initial": initial })),
        )?;
        Ok(reply.map(serde_json::from_value).transpose()?)
    }

    fn controller_automatch_phab(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantLabc,
            "automatch_phab",
            Some(json!({ "lab": channel.id() })),
        )
    }

    fn calram_zero(&mut self, zerocross_only: bool) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantCalram,
            "zero",
            Some(json!({ "zerocrossOnly": zerocross_only })),
        )
    }

    fn calram_mode(&mut self, mode: CalMode) -> Result<(), HardwareError> {
        self.command(Device::RadiantCalram, "mode_str", Some(json!({ "mode": mode })))
    }

    fn calram_num_rolls(&mut self) -> Result<i64, HardwareError> {
        self.query(Device::RadiantCalram, "numRolls", None)
    }

    fn calram_base(&mut self) -> Result<u32, HardwareError> {
        self.query(Device::RadiantCalram, "get_base", None)
    }

    fn dma_enable(&mut self, mode: DmaMode) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantDma,
            "enable",
            Some(json!({ "onoff": true, "mode": mode.code() })),
        )
    }

    fn dma_disable(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantDma, "enable", Some(json!({ "onoff": false })))
    }

    fn dma_set_descriptor(&mut self, descriptor: &DmaDescriptor) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantDma,
            "setDescriptor",
            Some(json!({
                "num": descriptor.num,
                "addr": descriptor.address,
                "length": descriptor.length,
                "increment": descriptor.increment,
                "final": descriptor.is_final,
            })),
        )
    }

    fn dma_begin(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantDma, "beginDMA", None)
    }

    fn dma_read(&mut self, length: usize) -> Result<Vec<u8>, HardwareError> {
        self.query(Device::RadiantDma, "dmaread", Some(json!({ "length": length })))
    }

    fn calibration_get(&mut self, channel: Channel) -> Result<CalibrationState, HardwareError> {
        // JSON object keys are always strings on the wire
        let raw: FxHashMap<String, i64> = self.query(
            Device::RadiantCalib,
            "lab4_specifics",
            Some(json!({ "lab": channel.id() })),
        )?;
        let mut registers = FxHashMap::default();
        for (key, value) in raw {
            let register = key
                .parse::<u16>()
                .map_err(|_| HardwareError::BadCalibrationKey(key.clone()))?;
            registers.insert(register, value);
        }
        Ok(CalibrationState::new(channel, registers))
    }

    fn calibration_set(
        &mut self,
        channel: Channel,
        register: u16,
        value: i64,
    ) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantCalib,
            "lab4_specifics_set",
            Some(json!({ "lab": channel.id(), "key": register, "value": value })),
        )
    }

    fn calibration_reset(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantCalib,
            "lab4_resetSpecifics",
            Some(json!({ "lab": channel.id() })),
        )
    }

    fn calibration_load(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantCalib, "load", None)
    }

    fn calibration_save(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantCalib, "save", None)
    }

    fn calselect(&mut self, quad: Option<Quad>) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantBoard,
            "calSelect",
            Some(json!({ "quad": quad.map(|q| q.id()) })),
        )
    }

    fn monselect(&mut self, channel: Channel) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantBoard,
            "monSelect",
            Some(json!({ "lab": channel.id() })),
        )
    }

    fn pedestal_update(&mut self) -> Result<(), HardwareError> {
        self.command(Device::RadiantCalib, "updatePedestals", None)
    }

    fn sig_gen_enable(&mut self, on: bool) -> Result<(), HardwareError> {
        self.command(Device::RadiantSigGen, "enable", Some(json!({ "onoff": on })))
    }

    fn sig_gen_configure(&mut self, pulse: bool, band: SigGenBand) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantSigGen,
            "signal",
            Some(json!({ "pulse": pulse, "band": band.0 })),
        )
    }

    fn sig_gen_set_frequency(&mut self, frequency_mhz: f64) -> Result<(), HardwareError> {
        self.command(
            Device::RadiantSigGen,
            "setFrequency",
            Some(json!({ "freq": frequency_mhz })),
        )
    }
}
