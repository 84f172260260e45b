// The 24 LAB4D channels of a RADIANT are split across three calibration
// quads. The split is not contiguous: each quad owns one block of four from
// the lower half of the board and one block of four from the upper half, i.e.
// quad q = {4q..4q+3} + {12+4q..12+4q+3}.
// A quad shares a calibration signal path, so it is the natural unit for
// parallel tuning.
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::constants::{NUM_CHANNELS, NUM_QUADS};
use super::error::ChannelError;

const CHANNELS_PER_BLOCK: usize = 4;
const UPPER_HALF_START: usize = 12;

/// A validated RADIANT channel (LAB4D) id in [0, 24)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Channel(usize);

impl Channel {
    pub fn new(id: usize) -> Result<Self, ChannelError> {
        if id < NUM_CHANNELS {
            Ok(Self(id))
        } else {
            Err(ChannelError::InvalidChannel(id))
        }
    }

    pub fn id(&self) -> usize {
        self.0
    }

    /// The quad whose calibration path feeds this channel
    pub fn quad(&self) -> Quad {
        Quad((self.0 % UPPER_HALF_START) / CHANNELS_PER_BLOCK)
    }

    /// The DLL phase scan group used for width measurements
    pub fn scan_group(&self) -> u8 {
        if self.0 >= UPPER_HALF_START {
            1
        } else {
            0
        }
    }

    /// Iterate over every channel of the board
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..NUM_CHANNELS).map(Channel)
    }
}

impl TryFrom<usize> for Channel {
    type Error = ChannelError;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Channel> for usize {
    fn from(value: Channel) -> Self {
        value.0
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LAB{}", self.0)
    }
}

/// A validated calibration quad id in [0, 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Quad(usize);

impl Quad {
    pub fn new(id: usize) -> Result<Self, ChannelError> {
        if id < NUM_QUADS {
            Ok(Self(id))
        } else {
            Err(ChannelError::InvalidQuad(id))
        }
    }

    pub fn id(&self) -> usize {
        self.0
    }

    /// The eight channels belonging to this quad, lower block first
    pub fn channels(&self) -> Vec<Channel> {
        let lower = self.0 * CHANNELS_PER_BLOCK;
        let upper = UPPER_HALF_START + lower;
        (lower..lower + CHANNELS_PER_BLOCK)
            .chain(upper..upper + CHANNELS_PER_BLOCK)
            .map(Channel)
            .collect()
    }

    pub fn all() -> impl Iterator<Item = Quad> {
        (0..NUM_QUADS).map(Quad)
    }
}

impl TryFrom<usize> for Quad {
    type Error = ChannelError;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quad> for usize {
    fn from(value: Quad) -> Self {
        value.0
    }
}

impl Display for Quad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "quad {}", self.0)
    }
}

/// Get the channels for a quad id
pub fn get_channels_for_quad(quad: usize) -> Result<Vec<Channel>, ChannelError> {
    Ok(Quad::new(quad)?.channels())
}

/// Get the quad id for a channel id
pub fn quad_for_channel(channel: usize) -> Result<Quad, ChannelError> {
    Ok(Channel::new(channel)?.quad())
}
