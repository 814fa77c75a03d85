//! Beamforming Weight Extensions (types 1 and 11)

use bytes::{BufMut, Bytes, BytesMut};
use common::{align_up, iq_width_from_wire, iq_width_to_wire, BitReader, BitWriter};
use interfaces::buffer::SharedExtBuffer;
use interfaces::ecpri::ECPRI_HDR_LEN;
use num_complex::Complex;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{check_beam_id, ensure_len, prefix_byte, EncodedExt, ExtType, EXT_ALIGN};
use crate::FhError;

/// Ethernet header length accounted against the MTU
pub const ETH_HDR_LEN: usize = 14;
/// Fixed part of extension 11
pub const FLEX_BFW_HDR_LEN: usize = 8;

/// Beamforming weight compression method (`bfwCompMeth`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
pub enum BfwCompMethod {
    #[default]
    None = 0,
    BlockFloatingPoint = 1,
    BlockScaling = 2,
    ULaw = 3,
    Beamspace = 4,
}

impl BfwCompMethod {
    /// Bytes of `bfwCompParam` preceding the weights
    pub fn param_len(&self) -> Result<usize, FhError> {
        match self {
            BfwCompMethod::None => Ok(0),
            BfwCompMethod::BlockFloatingPoint | BfwCompMethod::BlockScaling | BfwCompMethod::ULaw => Ok(1),
            BfwCompMethod::Beamspace => Err(FhError::Unsupported("beamspace weight compression".into())),
        }
    }

    fn from_wire(value: u8) -> Result<Self, FhError> {
        Self::from_u8(value & 0x0f)
            .ok_or_else(|| FhError::InvalidPacket(format!("unknown bfwCompMeth {}", value & 0x0f)))
    }
}

/// Weight compression of one extension 1 weight vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BfwComp {
    #[default]
    None,
    /// Shared exponent of the block
    BlockFloatingPoint { exponent: u8 },
    BlockScaling,
    ULaw,
    Beamspace,
}

impl BfwComp {
    /// Compression method without its parameter
    pub fn method(&self) -> BfwCompMethod {
        match self {
            BfwComp::None => BfwCompMethod::None,
            BfwComp::BlockFloatingPoint { .. } => BfwCompMethod::BlockFloatingPoint,
            BfwComp::BlockScaling => BfwCompMethod::BlockScaling,
            BfwComp::ULaw => BfwCompMethod::ULaw,
            BfwComp::Beamspace => BfwCompMethod::Beamspace,
        }
    }
}

fn comp_hdr(iq_width: u8, meth: BfwCompMethod) -> u8 {
    (iq_width_to_wire(iq_width) << 4) | meth as u8
}

fn check_iq_width(iq_width: u8) -> Result<(), FhError> {
    if !(1..=16).contains(&iq_width) {
        return Err(FhError::InvalidParam(format!("bfwIqWidth {} out of range", iq_width)));
    }
    Ok(())
}

/// Bytes taken by `num_weights` packed I/Q pairs
pub fn weights_len(num_weights: usize, iq_width: u8) -> usize {
    (num_weights * 2 * iq_width as usize + 7) / 8
}

fn pack_weights(writer: &mut BitWriter, weights: &[Complex<i16>], iq_width: u8) -> Result<(), FhError> {
    let bits = iq_width as u32;
    let min = -(1i32 << (bits - 1));
    let max = (1i32 << (bits - 1)) - 1;
    for w in weights {
        for part in [w.re as i32, w.im as i32] {
            if part < min || part > max {
                return Err(FhError::InvalidParam(format!("weight {} does not fit {} bits", part, bits)));
            }
            writer.write_signed(part, bits);
        }
    }
    Ok(())
}

fn unpack_weights(data: &[u8], num_weights: usize, iq_width: u8) -> Result<Vec<Complex<i16>>, FhError> {
    let bits = iq_width as u32;
    let mut reader = BitReader::new(data);
    let mut weights = Vec::with_capacity(num_weights);
    for _ in 0..num_weights {
        let re = reader.read_signed(bits);
        let im = reader.read_signed(bits);
        match (re, im) {
            (Some(re), Some(im)) => weights.push(Complex::new(re as i16, im as i16)),
            _ => return Err(FhError::InvalidPacket("truncated beamforming weights".into())),
        }
    }
    Ok(weights)
}

/// Extension 1: one beamforming weight vector for the section
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BfwWeights {
    /// Bits per I or Q component
    pub iq_width: u8,
    /// Compression applied to the weights
    pub comp: BfwComp,
    /// Weights, one per antenna element
    pub weights: Vec<Complex<i16>>,
}

impl BfwWeights {
    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        check_iq_width(self.iq_width)?;
        buf.put_u8(comp_hdr(self.iq_width, self.comp.method()));
        match self.comp {
            BfwComp::None => {}
            BfwComp::BlockFloatingPoint { exponent } => {
                if exponent > 0x0f {
                    return Err(FhError::InvalidParam(format!("exponent {} exceeds 4 bits", exponent)));
                }
                buf.put_u8(exponent);
            }
            other => {
                return Err(FhError::Fail(format!("weight compression {:?} cannot be encoded", other)));
            }
        }
        let mut writer = BitWriter::with_capacity(weights_len(self.weights.len(), self.iq_width));
        pack_weights(&mut writer, &self.weights, self.iq_width)?;
        buf.put_slice(&writer.finish());
        Ok(())
    }

    /// Parse the body after the prefix; returns the parsed length in bytes
    pub(crate) fn parse_body(body: &[u8], num_weights: Option<u16>) -> Result<(Self, usize), FhError> {
        ensure_len(body, 1, "extension 1")?;
        let iq_width = iq_width_from_wire(body[0] >> 4);
        let comp = match BfwCompMethod::from_wire(body[0])? {
            BfwCompMethod::None => BfwComp::None,
            BfwCompMethod::BlockFloatingPoint => {
                ensure_len(body, 2, "extension 1 exponent")?;
                BfwComp::BlockFloatingPoint { exponent: body[1] & 0x0f }
            }
            other => {
                return Err(FhError::Unsupported(format!("weight compression {:?}", other)));
            }
        };
        // Trailing padding reads as zero weights
        let count = num_weights
            .ok_or_else(|| FhError::InvalidParam("extension 1 needs the number of weights".into()))?
            as usize;
        let offset = 1 + comp.method().param_len()?;
        let len = weights_len(count, iq_width);
        ensure_len(&body[offset..], len, "extension 1 weights")?;
        let weights = unpack_weights(&body[offset..offset + len], count, iq_width)?;
        Ok((Self { iq_width, comp, weights }, offset + len))
    }
}

/// One bundle of extension 11
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BfwBundle {
    /// Beam id of the bundle
    pub beam_id: u16,
    /// Block floating point exponent
    pub exponent: Option<u8>,
    /// Weights; empty when weights are disabled
    pub weights: Vec<Complex<i16>>,
}

/// Extension 11: flexible beamforming weights
///
/// The bundles live in an external buffer that is attached to the packet
/// without copying and must close the last section of a message. Each
/// bundle is `[bfwCompParam] beamId(16) weights`, or just `beamId(16)` when
/// weights are disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBfw {
    /// Bundles carry beam ids only
    pub disable_bfws: bool,
    /// Reset after PRB bundle
    pub rad: bool,
    /// PRBs per bundle
    pub num_bund_prb: u8,
    /// Weight compression method
    pub comp_meth: BfwCompMethod,
    /// Bits per I or Q component
    pub iq_width: u8,
    /// Number of bundles in `payload`
    pub num_sets: u16,
    /// Packed bundles
    pub payload: SharedExtBuffer,
}

impl FlexBfw {
    /// Wrap an application-owned bundle buffer
    pub fn with_buffer(
        num_bund_prb: u8,
        iq_width: u8,
        comp_meth: BfwCompMethod,
        num_sets: u16,
        payload: SharedExtBuffer,
    ) -> Self {
        Self {
            disable_bfws: false,
            rad: false,
            num_bund_prb,
            comp_meth,
            iq_width,
            num_sets,
            payload,
        }
    }

    /// Pack `bundles` into a fresh buffer
    pub fn from_bundles(
        num_bund_prb: u8,
        iq_width: u8,
        comp_meth: BfwCompMethod,
        bundles: &[BfwBundle],
    ) -> Result<Self, FhError> {
        let num_sets = u16::try_from(bundles.len())
            .map_err(|_| FhError::InvalidParam(format!("{} weight sets", bundles.len())))?;
        let payload = Self::pack(bundles, iq_width, comp_meth)?;
        Ok(Self::with_buffer(num_bund_prb, iq_width, comp_meth, num_sets, SharedExtBuffer::new(payload)))
    }

    /// Beam ids only, weights disabled
    pub fn beams_only(num_bund_prb: u8, beam_ids: &[u16]) -> Result<Self, FhError> {
        let mut buf = BytesMut::with_capacity(beam_ids.len() * 2);
        for &beam_id in beam_ids {
            check_beam_id(beam_id)?;
            buf.put_u16(beam_id);
        }
        let num_sets = u16::try_from(beam_ids.len())
            .map_err(|_| FhError::InvalidParam(format!("{} beam ids", beam_ids.len())))?;
        Ok(Self {
            disable_bfws: true,
            rad: false,
            num_bund_prb,
            comp_meth: BfwCompMethod::None,
            iq_width: 16,
            num_sets,
            payload: SharedExtBuffer::new(buf.freeze()),
        })
    }

    /// Length of one bundle with `num_weights` weights
    pub fn bundle_len(num_weights: usize, iq_width: u8, comp_meth: BfwCompMethod) -> Result<usize, FhError> {
        Ok(comp_meth.param_len()? + 2 + weights_len(num_weights, iq_width))
    }

    /// Pack bundles into the wire layout
    pub fn pack(bundles: &[BfwBundle], iq_width: u8, comp_meth: BfwCompMethod) -> Result<Bytes, FhError> {
        check_iq_width(iq_width)?;
        if !matches!(comp_meth, BfwCompMethod::None | BfwCompMethod::BlockFloatingPoint) {
            return Err(FhError::Fail(format!("weight compression {:?} cannot be encoded", comp_meth)));
        }
        let mut buf = BytesMut::new();
        for bundle in bundles {
            if comp_meth == BfwCompMethod::BlockFloatingPoint {
                buf.put_u8(bundle.exponent.unwrap_or(0) & 0x0f);
            }
            check_beam_id(bundle.beam_id)?;
            buf.put_u16(bundle.beam_id);
            let mut writer = BitWriter::with_capacity(weights_len(bundle.weights.len(), iq_width));
            pack_weights(&mut writer, &bundle.weights, iq_width)?;
            buf.put_slice(&writer.finish());
        }
        Ok(buf.freeze())
    }

    /// Unpack the payload assuming `num_weights` weights per bundle
    pub fn bundles(&self, num_weights: usize) -> Result<Vec<BfwBundle>, FhError> {
        let data = self.payload.bytes();
        let mut bundles = Vec::with_capacity(self.num_sets as usize);

        if self.disable_bfws {
            ensure_len(data, self.num_sets as usize * 2, "extension 11 beam ids")?;
            for chunk in data.chunks_exact(2).take(self.num_sets as usize) {
                bundles.push(BfwBundle {
                    beam_id: u16::from_be_bytes([chunk[0], chunk[1]]) & 0x7fff,
                    ..BfwBundle::default()
                });
            }
            return Ok(bundles);
        }

        let param_len = self.comp_meth.param_len()?;
        if !matches!(self.comp_meth, BfwCompMethod::None | BfwCompMethod::BlockFloatingPoint) {
            return Err(FhError::Unsupported(format!("weight compression {:?}", self.comp_meth)));
        }
        let bundle_len = Self::bundle_len(num_weights, self.iq_width, self.comp_meth)?;
        ensure_len(data, bundle_len * self.num_sets as usize, "extension 11 bundles")?;

        for chunk in data.chunks_exact(bundle_len).take(self.num_sets as usize) {
            let exponent = (param_len == 1).then(|| chunk[0] & 0x0f);
            let beam_id = u16::from_be_bytes([chunk[param_len], chunk[param_len + 1]]) & 0x7fff;
            let weights = unpack_weights(&chunk[param_len + 2..], num_weights, self.iq_width)?;
            bundles.push(BfwBundle { beam_id, exponent, weights });
        }
        Ok(bundles)
    }

    /// Write the fixed header and hand back the payload to attach
    pub(crate) fn encode(&self, buf: &mut BytesMut, more: bool) -> Result<EncodedExt, FhError> {
        check_iq_width(self.iq_width)?;
        let total = align_up(FLEX_BFW_HDR_LEN + self.payload.len(), EXT_ALIGN);
        let words = u16::try_from(total / EXT_ALIGN)
            .map_err(|_| FhError::InvalidParam(format!("extension 11 of {} bytes", total)))?;

        buf.put_u8(prefix_byte(ExtType::FlexBfw, more));
        buf.put_u16(words);
        buf.put_u8(((self.disable_bfws as u8) << 7) | ((self.rad as u8) << 6));
        buf.put_u8(self.num_bund_prb);
        buf.put_u8(comp_hdr(self.iq_width, self.comp_meth));
        buf.put_u16(self.num_sets);

        Ok(EncodedExt::External {
            buffer: self.payload.clone(),
            pad: total - FLEX_BFW_HDR_LEN - self.payload.len(),
        })
    }

    /// Decode from the start of the extension; the payload is a zero-copy
    /// slice of `data`
    pub(crate) fn decode(data: &Bytes, ext_len: usize, num_weights: Option<u16>) -> Result<(Self, usize), FhError> {
        ensure_len(data, FLEX_BFW_HDR_LEN.max(ext_len), "extension 11")?;
        if ext_len < FLEX_BFW_HDR_LEN {
            return Err(FhError::InvalidPacket(format!("extension 11 extLen {} bytes", ext_len)));
        }
        let disable_bfws = data[3] & 0x80 != 0;
        let rad = data[3] & 0x40 != 0;
        let num_bund_prb = data[4];
        let iq_width = iq_width_from_wire(data[5] >> 4);
        let comp_meth = BfwCompMethod::from_wire(data[5])?;
        let num_sets = u16::from_be_bytes([data[6], data[7]]);

        let region = ext_len - FLEX_BFW_HDR_LEN;
        let payload_len = if disable_bfws {
            num_sets as usize * 2
        } else if let Some(n) = num_weights {
            num_sets as usize * Self::bundle_len(n as usize, iq_width, comp_meth)?
        } else {
            region
        };
        if payload_len > region {
            return Err(FhError::InvalidPacket(format!(
                "extension 11 payload of {} bytes exceeds extLen region of {}",
                payload_len, region
            )));
        }

        let payload = data.slice(FLEX_BFW_HDR_LEN..FLEX_BFW_HDR_LEN + payload_len);
        let ext = Self {
            disable_bfws,
            rad,
            num_bund_prb,
            comp_meth,
            iq_width,
            num_sets,
            payload: SharedExtBuffer::new(payload),
        };
        Ok((ext, align_up(FLEX_BFW_HDR_LEN + payload_len, EXT_ALIGN)))
    }
}

/// Largest number of extension 11 bundles that fit one message within `mtu`
pub fn estimate_max_sets_for_mtu(
    num_weights: usize,
    iq_width: u8,
    comp_meth: BfwCompMethod,
    mtu: usize,
) -> Result<usize, FhError> {
    const SECTION_LEN: usize = 8;
    const APP_HDR_LEN: usize = 8;
    let overhead = ETH_HDR_LEN + ECPRI_HDR_LEN + APP_HDR_LEN + SECTION_LEN + FLEX_BFW_HDR_LEN + (EXT_ALIGN - 1);
    let bundle_len = FlexBfw::bundle_len(num_weights, iq_width, comp_meth)?;
    Ok(mtu.saturating_sub(overhead) / bundle_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cplane::ext::{decode_ext, SectionExtension};
    use rand::Rng;
    
    fn random_weights(n: usize, iq_width: u8) -> Vec<Complex<i16>> {
        let mut rng = rand::thread_rng();
        let max = (1i32 << (iq_width - 1)) - 1;
        let min = -(1i32 << (iq_width - 1));
        (0..n)
            .map(|_| Complex::new(rng.gen_range(min..=max) as i16, rng.gen_range(min..=max) as i16))
            .collect()
    }
    
    #[test]
    fn test_ext1_bfp_roundtrip() {
        let ext = BfwWeights {
            iq_width: 9,
            comp: BfwComp::BlockFloatingPoint { exponent: 5 },
            weights: random_weights(32, 9),
        };
        let mut buf = BytesMut::new();
        SectionExtension::Bfw(ext.clone()).encode(&mut buf, false).unwrap();
        // prefix 2 + hdr 1 + exponent 1 + 32*18 bits = 72 bytes -> 76
        assert_eq!(buf.len(), 76);
        assert_eq!(buf[1], 19);
        
        let decoded = decode_ext(&buf.freeze(), Some(32)).unwrap();
        assert_eq!(decoded.ext, SectionExtension::Bfw(ext));
        assert!(!decoded.len_mismatch());
    }
    
    #[test]
    fn test_ext1_uncompressed_roundtrip() {
        let ext = BfwWeights {
            iq_width: 16,
            comp: BfwComp::None,
            weights: random_weights(4, 16),
        };
        let mut buf = BytesMut::new();
        SectionExtension::Bfw(ext.clone()).encode(&mut buf, true).unwrap();
        let decoded = decode_ext(&buf.freeze(), Some(4)).unwrap();
        assert_eq!(decoded.ext, SectionExtension::Bfw(ext));
    }
    
    #[test]
    fn test_ext1_single_weight_keeps_count() {
        let ext = BfwWeights {
            iq_width: 8,
            comp: BfwComp::None,
            weights: vec![Complex::new(1, -1)],
        };
        let mut buf = BytesMut::new();
        SectionExtension::Bfw(ext.clone()).encode(&mut buf, false).unwrap();
        // prefix 2 + hdr 1 + 2 bytes of weight, padded to 8
        assert_eq!(buf.len(), 8);
        let wire = buf.freeze();
        
        let decoded = decode_ext(&wire, Some(1)).unwrap();
        assert_eq!(decoded.ext, SectionExtension::Bfw(ext));
        
        // Without the antenna count the padding would read as a second weight
        assert!(matches!(decode_ext(&wire, None), Err(FhError::InvalidParam(_))));
    }
    
    #[test]
    fn test_ext1_unsupported_compression() {
        let ext = BfwWeights {
            iq_width: 8,
            comp: BfwComp::ULaw,
            weights: random_weights(2, 8),
        };
        let mut buf = BytesMut::new();
        let err = SectionExtension::Bfw(ext).encode(&mut buf, false).unwrap_err();
        assert!(matches!(err, FhError::Fail(_)));
        assert!(buf.is_empty());
        
        // bfwCompHdr: 8 bits, u-law
        let packet = Bytes::from_static(&[0x01, 0x01, 0x83, 0x00]);
        assert!(matches!(decode_ext(&packet, None), Err(FhError::Unsupported(_))));
    }
    
    #[test]
    fn test_weight_out_of_range() {
        let ext = BfwWeights {
            iq_width: 4,
            comp: BfwComp::None,
            weights: vec![Complex::new(8, 0)],
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            SectionExtension::Bfw(ext).encode(&mut buf, false),
            Err(FhError::InvalidParam(_))
        ));
    }
    
    #[test]
    fn test_ext11_external_attach() {
        let bundles: Vec<BfwBundle> = (0..4)
            .map(|i| BfwBundle {
                beam_id: 100 + i,
                exponent: Some(3),
                weights: random_weights(8, 9),
            })
            .collect();
        let ext = FlexBfw::from_bundles(4, 9, BfwCompMethod::BlockFloatingPoint, &bundles).unwrap();
        // exponent 1 + beam 2 + 8*18 bits of weights
        assert_eq!(ext.payload.len(), 4 * 21);
        
        let mut buf = BytesMut::new();
        let encoded = SectionExtension::FlexBfw(ext.clone()).encode(&mut buf, false).unwrap();
        assert_eq!(buf.len(), FLEX_BFW_HDR_LEN);
        let pad = match encoded {
            EncodedExt::External { buffer, pad } => {
                assert!(buffer == ext.payload);
                pad
            }
            EncodedExt::Inline(_) => panic!("extension 11 must be external"),
        };
        assert_eq!((FLEX_BFW_HDR_LEN + ext.payload.len() + pad) % EXT_ALIGN, 0);
        assert_eq!(u16::from_be_bytes([buf[1], buf[2]]) as usize * 4, FLEX_BFW_HDR_LEN + ext.payload.len() + pad);
        
        let mut wire = buf;
        wire.put_slice(ext.payload.bytes());
        wire.put_bytes(0, pad);
        let decoded = decode_ext(&wire.freeze(), Some(8)).unwrap();
        match decoded.ext {
            SectionExtension::FlexBfw(flex) => {
                assert_eq!(flex.num_sets, 4);
                assert_eq!(flex.bundles(8).unwrap(), bundles);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    
    #[test]
    fn test_ext11_beams_only() {
        let ext = FlexBfw::beams_only(2, &[1, 2, 3]).unwrap();
        let mut buf = BytesMut::new();
        let pad = match SectionExtension::FlexBfw(ext.clone()).encode(&mut buf, true).unwrap() {
            EncodedExt::External { pad, .. } => pad,
            EncodedExt::Inline(_) => panic!("extension 11 must be external"),
        };
        buf.put_slice(ext.payload.bytes());
        buf.put_bytes(0, pad);
        let decoded = decode_ext(&buf.freeze(), None).unwrap();
        assert!(decoded.more);
        assert_eq!(decoded.ext, SectionExtension::FlexBfw(ext.clone()));
        let beams: Vec<u16> = ext.bundles(0).unwrap().iter().map(|b| b.beam_id).collect();
        assert_eq!(beams, vec![1, 2, 3]);
    }
    
    #[test]
    fn test_ext11_decode_is_zero_copy() {
        let ext = FlexBfw::beams_only(1, &[7, 8]).unwrap();
        let mut buf = BytesMut::new();
        let pad = match ext.encode(&mut buf, false).unwrap() {
            EncodedExt::External { pad, .. } => pad,
            EncodedExt::Inline(_) => unreachable!(),
        };
        buf.put_slice(ext.payload.bytes());
        buf.put_bytes(0, pad);
        let wire = buf.freeze();
        let (flex, _) = FlexBfw::decode(&wire, wire.len(), None).unwrap();
        let payload_ptr = flex.payload.bytes().as_ptr();
        assert_eq!(payload_ptr, wire[FLEX_BFW_HDR_LEN..].as_ptr());
    }
    
    #[test]
    fn test_estimate_max_sets_for_mtu() {
        // 64 weights at 9 bits with BFP: 1 + 2 + 144 bytes per bundle
        let sets = estimate_max_sets_for_mtu(64, 9, BfwCompMethod::BlockFloatingPoint, 9600).unwrap();
        assert_eq!(sets, (9600 - 49) / 147);
        assert_eq!(estimate_max_sets_for_mtu(64, 9, BfwCompMethod::None, 40).unwrap(), 0);
    }
}
