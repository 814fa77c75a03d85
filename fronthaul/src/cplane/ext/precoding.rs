//! LTE Precoding Extension (type 3)

use bytes::{BufMut, BytesMut};

use super::{check_beam_id, ensure_len, EXT_ALIGN};
use crate::FhError;

/// Extension 3: codebook precoding
///
/// The first data layer carries the transmission scheme, CRS description
/// and the beam ids of the other antenna ports; every further layer only
/// repeats the codebook index and layer numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecodingExt {
    FirstLayer {
        codebook_index: u8,
        /// Layer id (4 bits)
        layer_id: u8,
        /// Number of layers (4 bits)
        num_layers: u8,
        /// Transmission scheme (4 bits)
        tx_scheme: u8,
        /// CRS resource element mask (12 bits)
        crs_re_mask: u16,
        /// CRS shift
        crs_shift: bool,
        /// CRS symbol number (4 bits)
        crs_sym_num: u8,
        /// Beam ids of ports 1..: one entry for 2 ports, three for 4 ports
        beam_ids: Vec<u16>,
    },
    NonFirstLayer {
        codebook_index: u8,
        layer_id: u8,
        num_layers: u8,
    },
}

fn check_nibble(value: u8, name: &str) -> Result<(), FhError> {
    if value > 0x0f {
        return Err(FhError::InvalidParam(format!("{} {} exceeds 4 bits", name, value)));
    }
    Ok(())
}

impl PrecodingExt {
    /// Encoded length including prefix and padding
    pub fn wire_len(&self) -> usize {
        match self {
            PrecodingExt::FirstLayer { beam_ids, .. } if beam_ids.len() == 1 => 3 * EXT_ALIGN,
            PrecodingExt::FirstLayer { .. } => 4 * EXT_ALIGN,
            PrecodingExt::NonFirstLayer { .. } => EXT_ALIGN,
        }
    }

    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        match self {
            PrecodingExt::FirstLayer {
                codebook_index,
                layer_id,
                num_layers,
                tx_scheme,
                crs_re_mask,
                crs_shift,
                crs_sym_num,
                beam_ids,
            } => {
                check_nibble(*layer_id, "layerId")?;
                check_nibble(*num_layers, "numLayers")?;
                check_nibble(*tx_scheme, "txScheme")?;
                check_nibble(*crs_sym_num, "crsSymNum")?;
                if *crs_re_mask > 0x0fff {
                    return Err(FhError::InvalidParam(format!("crsReMask {:#x} exceeds 12 bits", crs_re_mask)));
                }
                if beam_ids.len() != 1 && beam_ids.len() != 3 {
                    return Err(FhError::InvalidParam(format!(
                        "{} port beam ids, expected 1 or 3",
                        beam_ids.len()
                    )));
                }

                buf.put_u8(*codebook_index);
                buf.put_u8((layer_id << 4) | num_layers);
                buf.put_u16(((*tx_scheme as u16) << 12) | crs_re_mask);
                buf.put_u8(((*crs_shift as u8) << 7) | crs_sym_num);
                buf.put_u8(0);
                for &beam_id in beam_ids {
                    check_beam_id(beam_id)?;
                    buf.put_u16(beam_id);
                }
            }
            PrecodingExt::NonFirstLayer { codebook_index, layer_id, num_layers } => {
                check_nibble(*layer_id, "layerId")?;
                check_nibble(*num_layers, "numLayers")?;
                buf.put_u8(*codebook_index);
                buf.put_u8((layer_id << 4) | num_layers);
            }
        }
        Ok(())
    }

    /// Parse the body; the shape is told apart by `ext_len`
    pub(crate) fn parse_body(body: &[u8], ext_len: usize) -> Result<Self, FhError> {
        ensure_len(body, 2, "extension 3")?;
        let codebook_index = body[0];
        let layer_id = body[1] >> 4;
        let num_layers = body[1] & 0x0f;

        let num_beams = match ext_len / EXT_ALIGN {
            1 => return Ok(PrecodingExt::NonFirstLayer { codebook_index, layer_id, num_layers }),
            3 => 1,
            4 => 3,
            words => {
                return Err(FhError::InvalidPacket(format!("extension 3 with extLen {}", words)));
            }
        };

        ensure_len(body, 6 + num_beams * 2, "extension 3 first layer")?;
        let word = u16::from_be_bytes([body[2], body[3]]);
        let beam_ids = body[6..6 + num_beams * 2]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]) & 0x7fff)
            .collect();

        Ok(PrecodingExt::FirstLayer {
            codebook_index,
            layer_id,
            num_layers,
            tx_scheme: (word >> 12) as u8,
            crs_re_mask: word & 0x0fff,
            crs_shift: body[4] & 0x80 != 0,
            crs_sym_num: body[4] & 0x0f,
            beam_ids,
        })
    }
}
