//! Common Types for the O-RAN fronthaul
//! 
//! Defines fundamental types shared by the C-Plane codec and the scheduler

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Data direction as carried in the `dataDirection` bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Uplink (O-RU receive)
    Ul = 0,
    /// Downlink (O-RU transmit)
    #[default]
    Dl = 1,
}

impl Direction {
    /// Both directions, in database index order
    pub const ALL: [Direction; 2] = [Direction::Ul, Direction::Dl];

    /// Decode the 1-bit wire value
    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 1 {
            Direction::Dl
        } else {
            Direction::Ul
        }
    }

    /// Index used for per-direction tables
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Spacing in kHz
    pub fn khz(&self) -> u32 {
        *self as u32
    }
}

/// User-plane IQ compression method (`udCompMeth`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompMethod {
    /// No compression
    #[default]
    None = 0,
    /// Block floating point
    BlockFloatingPoint = 1,
    /// Block scaling
    BlockScaling = 2,
    /// Mu-law
    ULaw = 3,
    /// Modulation compression
    Modulation = 4,
}

impl CompMethod {
    /// Decode the 4-bit wire value
    pub fn from_wire(value: u8) -> Option<Self> {
        Self::from_u8(value & 0x0f)
    }
}

/// Map an IQ sample width to its 4-bit wire value (16 is carried as 0)
pub fn iq_width_to_wire(width: u8) -> u8 {
    if width >= 16 {
        0
    } else {
        width & 0x0f
    }
}

/// Map a 4-bit wire value back to an IQ sample width (0 means 16)
pub fn iq_width_from_wire(value: u8) -> u8 {
    match value & 0x0f {
        0 => 16,
        v => v,
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplexMode {
    /// Frequency Division Duplex
    #[default]
    Fdd,
    /// Time Division Duplex
    Tdd,
}
