//! Non-contiguous PRB Allocation (extension type 6)

use bytes::{BufMut, BytesMut};

use super::ensure_len;
use crate::FhError;

/// `rbgSize` wire codes 1..=6 in PRBs
const RBG_SIZES: [u8; 6] = [1, 2, 3, 4, 8, 16];

/// Extension 6: resource block groups and symbols of the section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NonContigPrb {
    /// PRBs per group: 1, 2, 3, 4, 8 or 16
    pub rbg_size: u8,
    /// One bit per group starting at `startPrbc`, LSB first (28 bits)
    pub rbg_mask: u32,
    /// One bit per symbol of the slot (14 bits)
    pub symbol_mask: u16,
}

impl NonContigPrb {
    fn rbg_size_code(&self) -> Result<u32, FhError> {
        RBG_SIZES
            .iter()
            .position(|&size| size == self.rbg_size)
            .map(|idx| idx as u32 + 1)
            .ok_or_else(|| FhError::InvalidParam(format!("rbgSize {} not one of {:?}", self.rbg_size, RBG_SIZES)))
    }

    /// PRBs selected by the mask out of `start_prbc .. start_prbc + num_prbc`
    pub fn allocated_prbs(&self, start_prbc: u16, num_prbc: u16) -> impl Iterator<Item = u16> + '_ {
        let end = start_prbc as u32 + num_prbc as u32;
        (start_prbc as u32..end)
            .filter(move |prb| {
                let group = (prb - start_prbc as u32) / self.rbg_size.max(1) as u32;
                group < 28 && self.rbg_mask & (1 << group) != 0
            })
            .map(|prb| prb as u16)
    }

    pub(crate) fn write_body(&self, buf: &mut BytesMut) -> Result<(), FhError> {
        let code = self.rbg_size_code()?;
        if self.rbg_mask > 0x0fff_ffff {
            return Err(FhError::InvalidParam(format!("rbgMask {:#x} exceeds 28 bits", self.rbg_mask)));
        }
        if self.symbol_mask > 0x3fff {
            return Err(FhError::InvalidParam(format!("symbolMask {:#x} exceeds 14 bits", self.symbol_mask)));
        }
        buf.put_u32((code << 28) | self.rbg_mask);
        buf.put_u16(self.symbol_mask);
        Ok(())
    }

    pub(crate) fn parse_body(body: &[u8]) -> Result<Self, FhError> {
        ensure_len(body, 6, "extension 6")?;
        let word = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let code = ((word >> 28) & 0x07) as usize;
        let rbg_size = match code {
            1..=6 => RBG_SIZES[code - 1],
            _ => return Err(FhError::InvalidPacket(format!("rbgSize code {}", code))),
        };
        Ok(Self {
            rbg_size,
            rbg_mask: word & 0x0fff_ffff,
            symbol_mask: u16::from_be_bytes([body[4], body[5]]) & 0x3fff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cplane::ext::{decode_ext, SectionExtension};
    use bytes::Bytes;
    
    #[test]
    fn test_ext6_layout() {
        let ext = NonContigPrb { rbg_size: 2, rbg_mask: 0x0000ffff, symbol_mask: 0x3fff };
        let mut buf = BytesMut::new();
        SectionExtension::NonContigPrb(ext).encode(&mut buf, false).unwrap();
        assert_eq!(buf.as_ref(), &[0x06, 0x02, 0x20, 0x00, 0xff, 0xff, 0x3f, 0xff]);
        let decoded = decode_ext(&buf.freeze(), None).unwrap();
        assert_eq!(decoded.ext, SectionExtension::NonContigPrb(ext));
    }
    
    #[test]
    fn test_every_rbg_size() {
        for size in RBG_SIZES {
            let ext = SectionExtension::NonContigPrb(NonContigPrb { rbg_size: size, rbg_mask: 1, symbol_mask: 1 });
            let mut buf = BytesMut::new();
            ext.encode(&mut buf, false).unwrap();
            assert_eq!(decode_ext(&buf.freeze(), None).unwrap().ext, ext);
        }
    }
    
    #[test]
    fn test_invalid_rbg_size() {
        let mut buf = BytesMut::new();
        let ext = SectionExtension::NonContigPrb(NonContigPrb { rbg_size: 5, rbg_mask: 1, symbol_mask: 1 });
        assert!(matches!(ext.encode(&mut buf, false), Err(FhError::InvalidParam(_))));
        
        // code 7 is reserved
        let data = Bytes::from_static(&[0x06, 0x02, 0x70, 0x00, 0x00, 0x01, 0x00, 0x01]);
        assert!(matches!(decode_ext(&data, None), Err(FhError::InvalidPacket(_))));
        let data = Bytes::from_static(&[0x06, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01]);
        assert!(matches!(decode_ext(&data, None), Err(FhError::InvalidPacket(_))));
    }
    
    #[test]
    fn test_allocated_prbs() {
        let ext = NonContigPrb { rbg_size: 2, rbg_mask: 0b101, symbol_mask: 0x3fff };
        let prbs: Vec<u16> = ext.allocated_prbs(10, 6).collect();
        assert_eq!(prbs, vec![10, 11, 14, 15]);
    }
}
