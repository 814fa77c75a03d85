//! Section Extensions
//! 
//! Every extension starts with `ef(1) | extType(7)` and an `extLen` counted
//! in 4-byte words (16 bits wide for extension 11, 8 bits otherwise), and is
//! zero-padded to a 4-byte boundary.

pub mod beam;
pub mod bfw;
pub mod dss;
pub mod modcomp;
pub mod prb_bundle;
pub mod precoding;
pub mod scalar;

pub use beam::{BeamGroup, BeamGroupType, BfAttributes};
pub use bfw::{estimate_max_sets_for_mtu, BfwBundle, BfwComp, BfwCompMethod, BfwWeights, FlexBfw};
pub use dss::{DssPattern, Technology};
pub use modcomp::{ModCompParams, ModCompSet};
pub use prb_bundle::NonContigPrb;
pub use precoding::PrecodingExt;

use bytes::{BufMut, Bytes, BytesMut};
use common::align_up;
use interfaces::buffer::SharedExtBuffer;
use nom::number::complete::{be_u16, be_u8};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::FhError;

/// Extension alignment in bytes
pub const EXT_ALIGN: usize = 4;

/// Section extension type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ExtType {
    Bfw = 1,
    BfAttributes = 2,
    Precoding = 3,
    ModComp = 4,
    ModCompMulti = 5,
    NonContigPrb = 6,
    EaxcMask = 7,
    Regularization = 8,
    Dss = 9,
    BeamGroup = 10,
    FlexBfw = 11,
}

impl ExtType {
    /// Width of the `extLen` field in bytes
    pub fn len_field_size(&self) -> usize {
        if *self == ExtType::FlexBfw {
            2
        } else {
            1
        }
    }
}

/// One section extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionExtension {
    /// Type 1: beamforming weights
    Bfw(BfwWeights),
    /// Type 2: beamforming attributes
    BfAttributes(BfAttributes),
    /// Type 3: LTE precoding
    Precoding(PrecodingExt),
    /// Type 4: modulation compression parameters
    ModComp(ModCompParams),
    /// Type 5: modulation compression additional parameters
    ModCompMulti(Vec<ModCompSet>),
    /// Type 6: non-contiguous PRB allocation
    NonContigPrb(NonContigPrb),
    /// Type 7: multiple-eAxC designation
    EaxcMask(u16),
    /// Type 8: regularization factor
    Regularization(i16),
    /// Type 9: dynamic spectrum sharing technology
    Dss(Technology),
    /// Type 10: beam grouping
    BeamGroup(BeamGroup),
    /// Type 11: flexible beamforming weights in an external buffer
    FlexBfw(FlexBfw),
}

/// How an encoded extension landed in the packet
#[derive(Debug)]
pub enum EncodedExt {
    /// Fully written into the packet buffer
    Inline(usize),
    /// Header written inline; `buffer` must be attached next, then `pad` zero bytes
    External {
        /// Payload to attach without copying
        buffer: SharedExtBuffer,
        /// Zero bytes closing the extension
        pad: usize,
    },
}

/// One extension read from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedExt {
    /// Parsed extension
    pub ext: SectionExtension,
    /// Another extension follows
    pub more: bool,
    /// Length announced by `extLen`, in bytes
    pub ext_len: usize,
    /// Length implied by the parsed contents, in bytes
    pub consumed: usize,
}

impl DecodedExt {
    /// Whether `extLen` disagrees with the parsed contents
    pub fn len_mismatch(&self) -> bool {
        self.ext_len != self.consumed
    }
}

/// First byte of an extension
pub(crate) fn prefix_byte(ext_type: ExtType, more: bool) -> u8 {
    ((more as u8) << 7) | (ext_type as u8 & 0x7f)
}

/// Write a short-form extension
///
/// The prefix and a placeholder `extLen` are written first, then `body`;
/// the result is zero-padded and `extLen` back-patched. On error nothing is
/// left in `buf`.
pub(crate) fn write_ext<F>(buf: &mut BytesMut, ext_type: ExtType, more: bool, body: F) -> Result<usize, FhError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), FhError>,
{
    let start = buf.len();
    buf.put_u8(prefix_byte(ext_type, more));
    buf.put_u8(0);

    if let Err(err) = body(buf) {
        buf.truncate(start);
        return Err(err);
    }

    let len = align_up(buf.len() - start, EXT_ALIGN);
    let words = len / EXT_ALIGN;
    if words > u8::MAX as usize {
        buf.truncate(start);
        return Err(FhError::InvalidParam(format!("extension {:?} too long ({} bytes)", ext_type, len)));
    }
    buf.resize(start + len, 0);
    buf[start + 1] = words as u8;
    Ok(len)
}

/// Extension prefix fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExtPrefix {
    pub more: bool,
    pub ext_type: ExtType,
    /// Announced length in bytes
    pub ext_len: usize,
    /// Bytes taken by the prefix
    pub hdr_len: usize,
}

pub(crate) fn parse_prefix(data: &[u8]) -> Result<ExtPrefix, FhError> {
    let (rest, first) = be_u8::<_, nom::error::Error<&[u8]>>(data)
        .map_err(|_| FhError::InvalidPacket("truncated extension".into()))?;
    let raw_type = first & 0x7f;
    let ext_type = ExtType::from_u8(raw_type)
        .ok_or_else(|| FhError::InvalidPacket(format!("unknown extension type {}", raw_type)))?;

    let (words, hdr_len) = if ext_type.len_field_size() == 2 {
        let (_, words) = be_u16::<_, nom::error::Error<&[u8]>>(rest)
            .map_err(|_| FhError::InvalidPacket("truncated extension length".into()))?;
        (words as usize, 3)
    } else {
        let (_, words) = be_u8::<_, nom::error::Error<&[u8]>>(rest)
            .map_err(|_| FhError::InvalidPacket("truncated extension length".into()))?;
        (words as usize, 2)
    };

    if words == 0 {
        return Err(FhError::InvalidPacket(format!("extension {:?} with zero extLen", ext_type)));
    }

    Ok(ExtPrefix {
        more: first & 0x80 != 0,
        ext_type,
        ext_len: words * EXT_ALIGN,
        hdr_len,
    })
}

/// Fail unless `data` holds `needed` bytes
pub(crate) fn ensure_len(data: &[u8], needed: usize, what: &str) -> Result<(), FhError> {
    if data.len() < needed {
        return Err(FhError::InvalidPacket(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            data.len()
        )));
    }
    Ok(())
}

/// Check a 15-bit beam id
pub(crate) fn check_beam_id(beam_id: u16) -> Result<(), FhError> {
    if beam_id > 0x7fff {
        return Err(FhError::InvalidParam(format!("beamId {} exceeds 15 bits", beam_id)));
    }
    Ok(())
}

impl SectionExtension {
    /// Wire type code
    pub fn ext_type(&self) -> ExtType {
        match self {
            SectionExtension::Bfw(_) => ExtType::Bfw,
            SectionExtension::BfAttributes(_) => ExtType::BfAttributes,
            SectionExtension::Precoding(_) => ExtType::Precoding,
            SectionExtension::ModComp(_) => ExtType::ModComp,
            SectionExtension::ModCompMulti(_) => ExtType::ModCompMulti,
            SectionExtension::NonContigPrb(_) => ExtType::NonContigPrb,
            SectionExtension::EaxcMask(_) => ExtType::EaxcMask,
            SectionExtension::Regularization(_) => ExtType::Regularization,
            SectionExtension::Dss(_) => ExtType::Dss,
            SectionExtension::BeamGroup(_) => ExtType::BeamGroup,
            SectionExtension::FlexBfw(_) => ExtType::FlexBfw,
        }
    }

    /// Append the extension to `buf`; `more` sets the chain bit
    pub fn encode(&self, buf: &mut BytesMut, more: bool) -> Result<EncodedExt, FhError> {
        let ext_type = self.ext_type();
        let len = match self {
            SectionExtension::Bfw(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::BfAttributes(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::Precoding(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::ModComp(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::ModCompMulti(sets) => {
                write_ext(buf, ext_type, more, |b| modcomp::write_sets(b, sets))?
            }
            SectionExtension::NonContigPrb(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::EaxcMask(mask) => write_ext(buf, ext_type, more, |b| scalar::write_eaxc_mask(b, *mask))?,
            SectionExtension::Regularization(factor) => {
                write_ext(buf, ext_type, more, |b| scalar::write_regularization(b, *factor))?
            }
            SectionExtension::Dss(tech) => write_ext(buf, ext_type, more, |b| dss::write_body(b, *tech))?,
            SectionExtension::BeamGroup(ext) => write_ext(buf, ext_type, more, |b| ext.write_body(b))?,
            SectionExtension::FlexBfw(ext) => return ext.encode(buf, more),
        };
        Ok(EncodedExt::Inline(len))
    }
}

/// Decode the extension at the start of `data`
///
/// `num_bfw_weights` sizes beamforming weight vectors. Extension 1 cannot be
/// decoded without it; extension 11 keeps the whole padded payload.
pub fn decode_ext(data: &Bytes, num_bfw_weights: Option<u16>) -> Result<DecodedExt, FhError> {
    let prefix = parse_prefix(data)?;
    ensure_len(data, prefix.ext_len, "extension")?;

    let body = &data[prefix.hdr_len..prefix.ext_len];
    let short = |body_len: usize| align_up(2 + body_len, EXT_ALIGN);

    let (ext, consumed) = match prefix.ext_type {
        ExtType::Bfw => {
            let (ext, body_len) = BfwWeights::parse_body(body, num_bfw_weights)?;
            (SectionExtension::Bfw(ext), short(body_len))
        }
        ExtType::BfAttributes => {
            let (ext, body_len) = BfAttributes::parse_body(body)?;
            (SectionExtension::BfAttributes(ext), short(body_len))
        }
        ExtType::Precoding => {
            let ext = PrecodingExt::parse_body(body, prefix.ext_len)?;
            let consumed = ext.wire_len();
            (SectionExtension::Precoding(ext), consumed)
        }
        ExtType::ModComp => (SectionExtension::ModComp(ModCompParams::parse_body(body)?), short(2)),
        ExtType::ModCompMulti => {
            let sets = modcomp::parse_sets(body)?;
            let consumed = modcomp::sets_wire_len(sets.len());
            (SectionExtension::ModCompMulti(sets), consumed)
        }
        ExtType::NonContigPrb => (SectionExtension::NonContigPrb(NonContigPrb::parse_body(body)?), short(6)),
        ExtType::EaxcMask => (SectionExtension::EaxcMask(scalar::parse_eaxc_mask(body)?), short(2)),
        ExtType::Regularization => (SectionExtension::Regularization(scalar::parse_regularization(body)?), short(2)),
        ExtType::Dss => (SectionExtension::Dss(dss::parse_body(body)?), short(2)),
        ExtType::BeamGroup => {
            let (ext, body_len) = BeamGroup::parse_body(body)?;
            (SectionExtension::BeamGroup(ext), short(body_len))
        }
        ExtType::FlexBfw => {
            let (ext, consumed) = FlexBfw::decode(data, prefix.ext_len, num_bfw_weights)?;
            (SectionExtension::FlexBfw(ext), consumed)
        }
    };

    Ok(DecodedExt {
        ext,
        more: prefix.more,
        ext_len: prefix.ext_len,
        consumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    
    fn roundtrip(ext: SectionExtension) -> DecodedExt {
        let mut buf = BytesMut::new();
        let encoded = ext.encode(&mut buf, true).unwrap();
        let len = match encoded {
            EncodedExt::Inline(len) => len,
            EncodedExt::External { .. } => panic!("unexpected external extension"),
        };
        assert_eq!(len % EXT_ALIGN, 0);
        assert_eq!(len, buf.len());
        let decoded = decode_ext(&buf.freeze(), None).unwrap();
        assert!(decoded.more);
        assert!(!decoded.len_mismatch());
        assert_eq!(decoded.ext, ext);
        decoded
    }
    
    #[test]
    fn test_prefix_byte() {
        assert_eq!(prefix_byte(ExtType::NonContigPrb, false), 0x06);
        assert_eq!(prefix_byte(ExtType::NonContigPrb, true), 0x86);
    }
    
    #[test]
    fn test_scalar_extensions() {
        assert_eq!(roundtrip(SectionExtension::EaxcMask(0xa5f0)).ext_len, 4);
        assert_eq!(roundtrip(SectionExtension::Regularization(-1234)).ext_len, 4);
        assert_eq!(roundtrip(SectionExtension::Dss(Technology::Lte)).ext_len, 4);
        assert_eq!(
            roundtrip(SectionExtension::ModComp(ModCompParams { csf: true, mod_comp_scaler: 0x1234 })).ext_len,
            4
        );
    }
    
    #[test]
    fn test_unknown_extension_type() {
        let data = Bytes::from_static(&[0x0c, 0x01, 0x00, 0x00]);
        assert!(matches!(decode_ext(&data, None), Err(FhError::InvalidPacket(_))));
    }
    
    #[test]
    fn test_truncated_extension() {
        // extLen announces 8 bytes, only 4 present
        let data = Bytes::from_static(&[0x07, 0x02, 0x00, 0x00]);
        assert!(matches!(decode_ext(&data, None), Err(FhError::InvalidPacket(_))));
    }
    
    #[test]
    fn test_ext_len_mismatch_detected() {
        // Extension 7 announcing two words instead of one
        let data = Bytes::from_static(&[0x07, 0x02, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00]);
        let decoded = decode_ext(&data, None).unwrap();
        assert_eq!(decoded.ext, SectionExtension::EaxcMask(0x1234));
        assert!(decoded.len_mismatch());
        assert_eq!(decoded.consumed, 4);
    }
    
    #[test]
    fn test_write_ext_error_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&[0xaau8, 0xbb][..]);
        let result = write_ext(&mut buf, ExtType::EaxcMask, false, |b| {
            b.put_u16(1);
            Err(FhError::InvalidParam("rejected".into()))
        });
        assert!(result.is_err());
        assert_eq!(buf.as_ref(), &[0xaa, 0xbb]);
    }
}
