//! Modulation Compression Extensions (types 4 and 5)

use bytes::{BufMut, BytesMut};
use common::{align_up, BitReader, BitWriter};

use super::{ensure_len, EXT_ALIGN};
use crate::FhError;

/// Most parameter sets in one extension 5
pub const MAX_MOD_COMP_SETS: usize = 6;

const SET_BITS: u32 = 28;

/// Extension 4: modulation compression parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModCompParams {
    /// Constellation shift flag
    pub csf: bool,
    /// Scaler (15 bits)
    pub mod_comp_scaler: u16,
}

impl ModCompParams {
    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        if self.mod_comp_scaler > 0x7fff {
            return Err(FhError::InvalidParam(format!("modCompScaler {:#x} exceeds 15 bits", self.mod_comp_scaler)));
        }
        buf.put_u16(((self.csf as u16) << 15) | self.mod_comp_scaler);
        Ok(())
    }

    pub(crate) fn parse_body(body: &[u8]) -> Result<Self, FhError> {
        ensure_len(body, 2, "extension 4")?;
        let word = u16::from_be_bytes([body[0], body[1]]);
        Ok(Self {
            csf: word & 0x8000 != 0,
            mod_comp_scaler: word & 0x7fff,
        })
    }
}

/// One parameter set of extension 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModCompSet {
    /// Resource elements the set applies to (12 bits)
    pub mc_scale_re_mask: u16,
    /// Constellation shift flag
    pub csf: bool,
    /// Scale offset (15 bits)
    pub mc_scale_offset: u16,
}

/// Encoded length of an extension 5 with `num_sets` sets
///
/// Sets are packed in pairs into 8-byte words (56 bits and a reserved
/// byte); an odd last set takes 4 bytes.
pub fn sets_wire_len(num_sets: usize) -> usize {
    align_up(2 + 8 * (num_sets / 2) + 4 * (num_sets % 2), EXT_ALIGN)
}

pub(crate) fn write_sets(buf: &mut BytesMut, sets: &[ModCompSet]) -> Result<(), FhError> {
    if sets.is_empty() || sets.len() > MAX_MOD_COMP_SETS {
        return Err(FhError::InvalidParam(format!("{} modulation compression sets", sets.len())));
    }
    let mut writer = BitWriter::with_capacity(sets_wire_len(sets.len()));
    for pair in sets.chunks(2) {
        for set in pair {
            if set.mc_scale_re_mask > 0x0fff || set.mc_scale_offset > 0x7fff {
                return Err(FhError::InvalidParam(format!("modulation compression set {:?} out of range", set)));
            }
            writer.write(set.mc_scale_re_mask as u32, 12);
            writer.write(set.csf as u32, 1);
            writer.write(set.mc_scale_offset as u32, 15);
        }
        // reserved bits closing the pair or the odd set
        writer.write(0, if pair.len() == 2 { 8 } else { 4 });
    }
    buf.put_slice(&writer.finish());
    Ok(())
}

pub(crate) fn parse_sets(body: &[u8]) -> Result<Vec<ModCompSet>, FhError> {
    let count = 2 * (body.len() / 8) + usize::from(body.len() % 8 >= 4);
    if count == 0 {
        return Err(FhError::InvalidPacket("extension 5 without parameter sets".into()));
    }
    let count = count.min(MAX_MOD_COMP_SETS);

    let mut reader = BitReader::new(body);
    let mut sets = Vec::with_capacity(count);
    let truncated = || FhError::InvalidPacket("truncated extension 5".into());
    for index in 0..count {
        let word = reader.read(SET_BITS).ok_or_else(truncated)?;
        sets.push(ModCompSet {
            mc_scale_re_mask: (word >> 16) as u16,
            csf: (word >> 15) & 1 == 1,
            mc_scale_offset: (word & 0x7fff) as u16,
        });
        let closes_pair = index % 2 == 1;
        let is_last_odd = index + 1 == count && index % 2 == 0;
        if closes_pair {
            reader.read(8).ok_or_else(truncated)?;
        } else if is_last_odd {
            reader.read(4).ok_or_else(truncated)?;
        }
    }
    Ok(sets)
}
