//! eCPRI Framing
//! 
//! The 8-byte eCPRI common header plus RTC/PC id that prefixes every
//! C-Plane and U-Plane message on the fronthaul.

use bytes::{BufMut, BytesMut};
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::InterfaceError;

/// eCPRI protocol revision carried in every header
pub const ECPRI_REVISION: u8 = 1;
/// Size of the eCPRI common header
pub const ECPRI_COMMON_HDR_LEN: usize = 4;
/// Size of the common header plus RTC/PC id, sequence id and E bit
pub const ECPRI_HDR_LEN: usize = 8;

/// eCPRI message types used on the fronthaul
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcpriMsgType {
    /// U-Plane IQ data
    IqData,
    /// C-Plane real-time control data
    RtControl,
    /// Any other message type
    Other(u8),
}

impl EcpriMsgType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EcpriMsgType::IqData,
            2 => EcpriMsgType::RtControl,
            other => EcpriMsgType::Other(other),
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            EcpriMsgType::IqData => 0,
            EcpriMsgType::RtControl => 2,
            EcpriMsgType::Other(v) => *v,
        }
    }
}

/// Decoded eCPRI header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcpriHeader {
    /// Protocol revision
    pub revision: u8,
    /// Concatenation indicator
    pub concatenated: bool,
    /// Message type
    pub msg_type: EcpriMsgType,
    /// Payload size in bytes following the common header
    pub payload_size: u16,
    /// ecpriRtcid / ecpriPcid
    pub eaxc_raw: u16,
    /// Sequence id
    pub seq_id: u8,
    /// E bit: last fragment of a message
    pub e_bit: bool,
    /// Sub-sequence id
    pub sub_seq_id: u8,
}

/// Decomposed eAxC identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EaxcId {
    /// DU port id
    pub cu_port: u8,
    /// Band sector id
    pub band_sector: u8,
    /// Component carrier id
    pub cc_id: u8,
    /// RU port (antenna) id
    pub ru_port: u8,
}

/// Bit widths of the eAxC id fields, most significant first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EaxcIdConfig {
    /// DU port bits
    #[serde(default = "default_field_bits")]
    pub cu_port_bits: u8,
    /// Band sector bits
    #[serde(default = "default_field_bits")]
    pub band_sector_bits: u8,
    /// CC id bits
    #[serde(default = "default_field_bits")]
    pub cc_id_bits: u8,
    /// RU port bits
    #[serde(default = "default_field_bits")]
    pub ru_port_bits: u8,
}

fn default_field_bits() -> u8 {
    4
}

impl Default for EaxcIdConfig {
    fn default() -> Self {
        Self {
            cu_port_bits: 4,
            band_sector_bits: 4,
            cc_id_bits: 4,
            ru_port_bits: 4,
        }
    }
}

impl EaxcIdConfig {
    /// Check that the fields fit in 16 bits
    pub fn validate(&self) -> Result<(), InterfaceError> {
        let total = self.cu_port_bits as u32
            + self.band_sector_bits as u32
            + self.cc_id_bits as u32
            + self.ru_port_bits as u32;
        if total > 16 {
            return Err(InterfaceError::InvalidConfig(format!(
                "eAxC id fields use {} bits, at most 16 allowed",
                total
            )));
        }
        Ok(())
    }

    /// Compose the 16-bit wire id
    pub fn compose(&self, id: &EaxcId) -> u16 {
        let mut value = 0u32;
        for (field, bits) in [
            (id.cu_port, self.cu_port_bits),
            (id.band_sector, self.band_sector_bits),
            (id.cc_id, self.cc_id_bits),
            (id.ru_port, self.ru_port_bits),
        ] {
            let mask = (1u32 << bits) - 1;
            value = (value << bits) | (field as u32 & mask);
        }
        value as u16
    }

    /// Split a 16-bit wire id into its fields
    pub fn decompose(&self, raw: u16) -> EaxcId {
        let field = |shift: u8, bits: u8| ((raw as u32 >> shift) & ((1u32 << bits) - 1)) as u8;
        let ru_shift = 0;
        let cc_shift = ru_shift + self.ru_port_bits;
        let bs_shift = cc_shift + self.cc_id_bits;
        let cu_shift = bs_shift + self.band_sector_bits;
        EaxcId {
            cu_port: field(cu_shift, self.cu_port_bits),
            band_sector: field(bs_shift, self.band_sector_bits),
            cc_id: field(cc_shift, self.cc_id_bits),
            ru_port: field(ru_shift, self.ru_port_bits),
        }
    }
}

/// Builds and parses eCPRI headers for one O-DU/O-RU port
#[derive(Debug, Clone, Default)]
pub struct EcpriFramer {
    config: EaxcIdConfig,
    cu_port: u8,
    band_sector: u8,
}

impl EcpriFramer {
    /// Create a framer for the given DU port and band sector
    pub fn new(config: EaxcIdConfig, cu_port: u8, band_sector: u8) -> Result<Self, InterfaceError> {
        config.validate()?;
        Ok(Self { config, cu_port, band_sector })
    }

    /// eAxC id layout
    pub fn config(&self) -> &EaxcIdConfig {
        &self.config
    }

    /// Append a C-Plane eCPRI header for `(cc, ant)` to `buf`
    ///
    /// The payload size is written as 4 (id bytes only) and must be fixed up
    /// with [`update_payload_size`] once the radio application payload is known.
    pub fn build_ecpri_header(&self, buf: &mut BytesMut, cc: u8, ant: u8, seq: u8) {
        let eaxc = self.config.compose(&EaxcId {
            cu_port: self.cu_port,
            band_sector: self.band_sector,
            cc_id: cc,
            ru_port: ant,
        });

        buf.put_u8(ECPRI_REVISION << 4);
        buf.put_u8(EcpriMsgType::RtControl.as_u8());
        buf.put_u16((ECPRI_HDR_LEN - ECPRI_COMMON_HDR_LEN) as u16);
        buf.put_u16(eaxc);
        buf.put_u8(seq);
        // E bit set, sub-sequence 0: C-Plane messages are never fragmented
        buf.put_u8(0x80);

        trace!("eCPRI header cc {} ant {} seq {} eaxc {:#06x}", cc, ant, seq, eaxc);
    }

    /// Parse an eCPRI header, returning it with the decomposed eAxC id
    pub fn parse_ecpri_header(&self, buf: &[u8]) -> Result<(EcpriHeader, EaxcId), InterfaceError> {
        let (_, header) = parse_header(buf).map_err(|_| InterfaceError::ShortBuffer {
            needed: ECPRI_HDR_LEN,
            available: buf.len(),
        })?;

        if header.revision != ECPRI_REVISION {
            return Err(InterfaceError::InvalidMessage(format!(
                "eCPRI revision {} not supported",
                header.revision
            )));
        }

        let available = buf.len() - ECPRI_COMMON_HDR_LEN;
        if (header.payload_size as usize) > available {
            return Err(InterfaceError::ShortBuffer {
                needed: header.payload_size as usize + ECPRI_COMMON_HDR_LEN,
                available: buf.len(),
            });
        }

        Ok((header, self.config.decompose(header.eaxc_raw)))
    }
}

/// Set the payload size of a header at the start of `buf`
///
/// `size` is the radio application payload length; the id bytes are added here.
pub fn update_payload_size(buf: &mut [u8], size: usize) -> Result<(), InterfaceError> {
    if buf.len() < ECPRI_COMMON_HDR_LEN {
        return Err(InterfaceError::ShortBuffer {
            needed: ECPRI_COMMON_HDR_LEN,
            available: buf.len(),
        });
    }
    let total = size + ECPRI_HDR_LEN - ECPRI_COMMON_HDR_LEN;
    let total = u16::try_from(total)
        .map_err(|_| InterfaceError::InvalidMessage(format!("payload size {} exceeds 16 bits", total)))?;
    buf[2..4].copy_from_slice(&total.to_be_bytes());
    Ok(())
}

fn parse_header(input: &[u8]) -> IResult<&[u8], EcpriHeader> {
    let (input, (b0, msg_type, payload_size, eaxc_raw, seq_id, b7)) =
        tuple((be_u8, be_u8, be_u16, be_u16, be_u8, be_u8))(input)?;

    Ok((
        input,
        EcpriHeader {
            revision: b0 >> 4,
            concatenated: b0 & 0x01 != 0,
            msg_type: EcpriMsgType::from_u8(msg_type),
            payload_size,
            eaxc_raw,
            seq_id,
            e_bit: b7 & 0x80 != 0,
            sub_seq_id: b7 & 0x7f,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_eaxc_compose() {
        let config = EaxcIdConfig::default();
        let id = EaxcId { cu_port: 1, band_sector: 2, cc_id: 3, ru_port: 4 };
        assert_eq!(config.compose(&id), 0x1234);
        assert_eq!(config.decompose(0x1234), id);
    }
    
    #[test]
    fn test_eaxc_custom_widths() {
        let config = EaxcIdConfig { cu_port_bits: 2, band_sector_bits: 6, cc_id_bits: 3, ru_port_bits: 5 };
        let id = EaxcId { cu_port: 3, band_sector: 33, cc_id: 5, ru_port: 17 };
        assert_eq!(config.decompose(config.compose(&id)), id);
        
        let too_wide = EaxcIdConfig { cu_port_bits: 8, ..EaxcIdConfig::default() };
        assert!(too_wide.validate().is_err());
    }
    
    #[test]
    fn test_header_build_and_parse() {
        let framer = EcpriFramer::new(EaxcIdConfig::default(), 0, 0).unwrap();
        let mut buf = BytesMut::new();
        framer.build_ecpri_header(&mut buf, 1, 7, 42);
        buf.extend_from_slice(&[0u8; 20]);
        update_payload_size(&mut buf, 20).unwrap();
        
        let (header, eaxc) = framer.parse_ecpri_header(&buf).unwrap();
        assert_eq!(header.revision, ECPRI_REVISION);
        assert_eq!(header.msg_type, EcpriMsgType::RtControl);
        assert_eq!(header.payload_size, 24);
        assert_eq!(header.seq_id, 42);
        assert!(header.e_bit);
        assert_eq!(eaxc.cc_id, 1);
        assert_eq!(eaxc.ru_port, 7);
    }
    
    #[test]
    fn test_parse_rejects_bad_input() {
        let framer = EcpriFramer::default();
        assert!(matches!(
            framer.parse_ecpri_header(&[0x10, 0x02]),
            Err(InterfaceError::ShortBuffer { .. })
        ));
        
        let bad_revision = [0x20, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x80];
        assert!(matches!(
            framer.parse_ecpri_header(&bad_revision),
            Err(InterfaceError::InvalidMessage(_))
        ));
    }
}
