//! Beam Attribute Extensions (types 2 and 10)

use bytes::{BufMut, BytesMut};
use common::{BitReader, BitWriter};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{check_beam_id, ensure_len};
use crate::FhError;

/// Extension 2: beamforming attributes
///
/// Each `*_width` is a 3-bit code: 0 leaves the parameter out, otherwise
/// the parameter takes `code + 1` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BfAttributes {
    pub az_pt_width: u8,
    pub ze_pt_width: u8,
    pub az3dd_width: u8,
    pub ze3dd_width: u8,
    /// Beam azimuth pointing parameter
    pub az_pt: u8,
    /// Beam zenith pointing parameter
    pub ze_pt: u8,
    /// Beam azimuth beamwidth parameter
    pub az3dd: u8,
    /// Beam zenith beamwidth parameter
    pub ze3dd: u8,
    /// Azimuth sidelobe suppression (3 bits)
    pub az_si: u8,
    /// Zenith sidelobe suppression (3 bits)
    pub ze_si: u8,
}

fn param_bits(code: u8) -> u32 {
    if code == 0 {
        0
    } else {
        code as u32 + 1
    }
}

impl BfAttributes {
    fn params(&self) -> [(u8, u8); 4] {
        [
            (self.az_pt_width, self.az_pt),
            (self.ze_pt_width, self.ze_pt),
            (self.az3dd_width, self.az3dd),
            (self.ze3dd_width, self.ze3dd),
        ]
    }

    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        for (code, value) in self.params() {
            if code > 7 {
                return Err(FhError::InvalidParam(format!("bfa width code {} exceeds 3 bits", code)));
            }
            let bits = param_bits(code);
            if bits < 8 && (value as u32) >> bits != 0 {
                return Err(FhError::InvalidParam(format!("bfa parameter {} does not fit {} bits", value, bits)));
            }
        }
        if self.az_si > 7 || self.ze_si > 7 {
            return Err(FhError::InvalidParam("sidelobe suppression exceeds 3 bits".into()));
        }

        buf.put_u8((self.az_pt_width << 3) | self.ze_pt_width);
        buf.put_u8((self.az3dd_width << 3) | self.ze3dd_width);
        let mut writer = BitWriter::with_capacity(4);
        for (code, value) in self.params() {
            writer.write(value as u32, param_bits(code));
        }
        buf.put_slice(&writer.finish());
        buf.put_u8((self.az_si << 3) | self.ze_si);
        Ok(())
    }

    pub(crate) fn parse_body(body: &[u8]) -> Result<(Self, usize), FhError> {
        ensure_len(body, 2, "extension 2")?;
        let mut attrs = Self {
            az_pt_width: (body[0] >> 3) & 0x07,
            ze_pt_width: body[0] & 0x07,
            az3dd_width: (body[1] >> 3) & 0x07,
            ze3dd_width: body[1] & 0x07,
            ..Self::default()
        };

        let mut reader = BitReader::new(&body[2..]);
        let mut values = [0u8; 4];
        for (slot, (code, _)) in values.iter_mut().zip(attrs.params()) {
            *slot = reader
                .read(param_bits(code))
                .ok_or_else(|| FhError::InvalidPacket("truncated extension 2 parameters".into()))? as u8;
        }
        [attrs.az_pt, attrs.ze_pt, attrs.az3dd, attrs.ze3dd] = values;

        let si_offset = 2 + reader.bytes_consumed();
        ensure_len(body, si_offset + 1, "extension 2 sidelobe byte")?;
        attrs.az_si = (body[si_offset] >> 3) & 0x07;
        attrs.ze_si = body[si_offset] & 0x07;
        Ok((attrs, si_offset + 1))
    }
}

/// Beam group type of extension 10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
pub enum BeamGroupType {
    /// Same beam id on every port
    #[default]
    Common = 0,
    /// Consecutive beam ids per port
    Matrix = 1,
    /// Explicit beam id list
    VectorList = 2,
}

/// Extension 10: beam groups across eAxC ports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeamGroup {
    pub group_type: BeamGroupType,
    /// Number of additional ports (6 bits)
    pub num_portc: u8,
    /// Beam ids of the additional ports; vector list only
    pub beam_ids: Vec<u16>,
}

impl BeamGroup {
    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        if self.num_portc > 0x3f {
            return Err(FhError::InvalidParam(format!("numPortc {} exceeds 6 bits", self.num_portc)));
        }
        buf.put_u8(((self.group_type as u8) << 6) | self.num_portc);

        match self.group_type {
            BeamGroupType::VectorList => {
                if self.beam_ids.len() != self.num_portc as usize {
                    return Err(FhError::InvalidParam(format!(
                        "{} beam ids for {} ports",
                        self.beam_ids.len(),
                        self.num_portc
                    )));
                }
                for &beam_id in &self.beam_ids {
                    check_beam_id(beam_id)?;
                    buf.put_u16(beam_id);
                }
            }
            BeamGroupType::Common | BeamGroupType::Matrix => {
                if !self.beam_ids.is_empty() {
                    return Err(FhError::InvalidParam("beam ids only go with a vector list".into()));
                }
                buf.put_u8(0);
            }
        }
        Ok(())
    }

    pub(crate) fn parse_body(body: &[u8]) -> Result<(Self, usize), FhError> {
        ensure_len(body, 2, "extension 10")?;
        let raw_type = body[0] >> 6;
        let group_type = BeamGroupType::from_u8(raw_type)
            .ok_or_else(|| FhError::InvalidPacket(format!("beam group type {}", raw_type)))?;
        let num_portc = body[0] & 0x3f;

        if group_type != BeamGroupType::VectorList {
            return Ok((Self { group_type, num_portc, beam_ids: Vec::new() }, 2));
        }

        let len = 1 + num_portc as usize * 2;
        ensure_len(body, len, "extension 10 beam ids")?;
        let beam_ids = body[1..len]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]) & 0x7fff)
            .collect();
        Ok((Self { group_type, num_portc, beam_ids }, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cplane::ext::{decode_ext, SectionExtension};
    use bytes::Bytes;
    
    fn roundtrip(ext: SectionExtension) -> usize {
        let mut buf = BytesMut::new();
        ext.encode(&mut buf, false).unwrap();
        let decoded = decode_ext(&buf.clone().freeze(), None).unwrap();
        assert_eq!(decoded.ext, ext);
        assert!(!decoded.len_mismatch());
        buf.len()
    }
    
    #[test]
    fn test_ext2_partial_parameters() {
        let attrs = BfAttributes {
            az_pt_width: 3,
            ze_pt_width: 0,
            az3dd_width: 7,
            ze3dd_width: 1,
            az_pt: 0xb,
            az3dd: 0xff,
            ze3dd: 0x2,
            az_si: 5,
            ze_si: 2,
            ..BfAttributes::default()
        };
        // 4 + 8 + 2 bits of parameters -> 2 bytes, then the SI byte
        assert_eq!(roundtrip(SectionExtension::BfAttributes(attrs)), 8);
    }
    
    #[test]
    fn test_ext2_all_absent() {
        let attrs = BfAttributes { az_si: 1, ..BfAttributes::default() };
        assert_eq!(roundtrip(SectionExtension::BfAttributes(attrs)), 8);
    }
    
    #[test]
    fn test_ext2_value_too_wide() {
        let attrs = BfAttributes { az_pt_width: 1, az_pt: 4, ..BfAttributes::default() };
        let mut buf = BytesMut::new();
        assert!(SectionExtension::BfAttributes(attrs).encode(&mut buf, false).is_err());
    }
    
    #[test]
    fn test_ext10_vector_list() {
        let group = BeamGroup {
            group_type: BeamGroupType::VectorList,
            num_portc: 3,
            beam_ids: vec![10, 11, 0x7fff],
        };
        // prefix 2 + type byte + 3 beam ids = 9 -> 12
        assert_eq!(roundtrip(SectionExtension::BeamGroup(group)), 12);
    }
    
    #[test]
    fn test_ext10_common_and_matrix() {
        for group_type in [BeamGroupType::Common, BeamGroupType::Matrix] {
            let group = BeamGroup { group_type, num_portc: 7, beam_ids: Vec::new() };
            assert_eq!(roundtrip(SectionExtension::BeamGroup(group)), 4);
        }
    }
    
    #[test]
    fn test_ext10_reserved_type_rejected() {
        let data = Bytes::from_static(&[0x0a, 0x01, 0xc1, 0x00]);
        assert!(matches!(decode_ext(&data, None), Err(FhError::InvalidPacket(_))));
    }
}
