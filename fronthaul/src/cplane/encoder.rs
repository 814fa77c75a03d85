//! C-Plane Message Encoder

use bytes::{BufMut, BytesMut};
use common::Numerology;
use interfaces::buffer::{BufferPool, CpPacket};
use tracing::trace;

use super::ext::{EncodedExt, SectionExtension};
use super::header::{write_header, write_section};
use super::{CPlaneMessage, SectionIdTagging, MAX_NUM_EXTENSIONS, MAX_SECTIONS_PER_SLOT};
use crate::FhError;

/// Builds the radio application payload of C-Plane messages
///
/// The eCPRI header is not part of the output; the producer prepends it.
#[derive(Debug)]
pub struct CpEncoder {
    mu: Numerology,
    tagging: SectionIdTagging,
    pool: Option<BufferPool>,
}

impl CpEncoder {
    /// Encoder for messages of numerology `mu`
    pub fn new(mu: Numerology, tagging: SectionIdTagging) -> Self {
        Self { mu, tagging, pool: None }
    }

    /// Account every packet against `pool`
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Numerology of the encoded messages
    pub fn numerology(&self) -> Numerology {
        self.mu
    }

    fn validate(&self, msg: &CPlaneMessage) -> Result<(), FhError> {
        if !msg.section_type.is_supported() {
            return Err(FhError::Unsupported(format!("section type {:?}", msg.section_type)));
        }
        if msg.sections.is_empty() || msg.sections.len() > MAX_SECTIONS_PER_SLOT {
            return Err(FhError::InvalidParam(format!(
                "{} sections, expected 1..={}",
                msg.sections.len(),
                MAX_SECTIONS_PER_SLOT
            )));
        }

        let last_section = msg.sections.len() - 1;
        for (sec_idx, section) in msg.sections.iter().enumerate() {
            if section.exts.len() > MAX_NUM_EXTENSIONS {
                return Err(FhError::InvalidParam(format!(
                    "section {} has {} extensions, at most {}",
                    section.info.id,
                    section.exts.len(),
                    MAX_NUM_EXTENSIONS
                )));
            }
            for (ext_idx, ext) in section.exts.iter().enumerate() {
                let is_last = sec_idx == last_section && ext_idx + 1 == section.exts.len();
                if matches!(ext, SectionExtension::FlexBfw(_)) && !is_last {
                    return Err(FhError::InvalidParam(
                        "extension 11 must be the last extension of the last section".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Encode `msg` into a fresh packet
    ///
    /// `ef` of every section follows its extension list. On error nothing
    /// is kept and the pool slot is released.
    pub fn encode(&self, msg: &CPlaneMessage) -> Result<CpPacket, FhError> {
        self.validate(msg)?;

        let mut packet = match &self.pool {
            Some(pool) => CpPacket::from_pool(pool)?,
            None => CpPacket::new(),
        };
        let section_len = msg.section_type.section_len();
        let mut buf = BytesMut::with_capacity(msg.section_type.header_len() + msg.sections.len() * section_len * 2);

        write_header(&mut buf, msg.dir, msg.section_type, &msg.header, msg.sections.len() as u8)?;

        for section in &msg.sections {
            let wire_id = self.tagging.tag(section.info.id, self.mu)?;
            write_section(&mut buf, msg.section_type, &section.info, wire_id, !section.exts.is_empty())?;

            let num_exts = section.exts.len();
            for (idx, ext) in section.exts.iter().enumerate() {
                match ext.encode(&mut buf, idx + 1 < num_exts)? {
                    EncodedExt::Inline(_) => {}
                    EncodedExt::External { buffer, pad } => {
                        packet.append(buf.split().freeze());
                        packet.attach_external(&buffer);
                        buf.put_bytes(0, pad);
                    }
                }
            }
        }
        packet.append(buf.freeze());

        trace!(
            "Encoded {:?} {:?} message, {} sections, {} bytes ({} external)",
            msg.dir,
            msg.section_type,
            msg.sections.len(),
            packet.len(),
            packet.external_count()
        );
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cplane::ext::{BfwCompMethod, FlexBfw, NonContigPrb};
    use crate::cplane::{CpHeader, SectionGenInfo, SectionInfo, SectionType};
    use common::Direction;
    use interfaces::buffer::{Segment, SharedExtBuffer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    
    fn message(exts: Vec<SectionExtension>) -> CPlaneMessage {
        CPlaneMessage {
            dir: Direction::Dl,
            section_type: SectionType::Type1,
            header: CpHeader { iq_width: 16, ..CpHeader::default() },
            sections: vec![SectionGenInfo::new(
                SectionInfo {
                    num_prbc: 10,
                    num_symbol: 14,
                    re_mask: 0xfff,
                    ..SectionInfo::default()
                },
                exts,
            )],
        }
    }
    
    #[test]
    fn test_encode_plain_section() {
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged);
        let packet = encoder.encode(&message(Vec::new())).unwrap();
        assert_eq!(packet.len(), 16);
        assert_eq!(packet.segments().len(), 1);
    }
    
    #[test]
    fn test_unsupported_section_type() {
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged);
        let mut msg = message(Vec::new());
        msg.section_type = SectionType::Type5;
        assert!(matches!(encoder.encode(&msg), Err(FhError::Unsupported(_))));
    }
    
    #[test]
    fn test_too_many_extensions_and_sections() {
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged);
        let msg = message(vec![SectionExtension::EaxcMask(1); MAX_NUM_EXTENSIONS + 1]);
        assert!(matches!(encoder.encode(&msg), Err(FhError::InvalidParam(_))));
        
        let mut msg = message(Vec::new());
        let section = msg.sections[0].clone();
        msg.sections = vec![section; MAX_SECTIONS_PER_SLOT + 1];
        assert!(matches!(encoder.encode(&msg), Err(FhError::InvalidParam(_))));
        
        msg.sections.clear();
        assert!(matches!(encoder.encode(&msg), Err(FhError::InvalidParam(_))));
    }
    
    #[test]
    fn test_flex_bfw_must_be_last() {
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged);
        let flex = FlexBfw::beams_only(1, &[1]).unwrap();
        let msg = message(vec![SectionExtension::FlexBfw(flex), SectionExtension::EaxcMask(1)]);
        assert!(matches!(encoder.encode(&msg), Err(FhError::InvalidParam(_))));
    }
    
    #[test]
    fn test_ext11_zero_copy_refcount() {
        let freed = Arc::new(AtomicUsize::new(0));
        let freed_cb = Arc::clone(&freed);
        let payload = bytes::Bytes::from(vec![0x5au8; 1000]);
        let shared = SharedExtBuffer::with_free_callback(
            payload.clone(),
            Box::new(move |_| {
                freed_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let flex = FlexBfw::with_buffer(4, 9, BfwCompMethod::BlockFloatingPoint, 10, shared.clone());
        let msg = message(vec![
            SectionExtension::NonContigPrb(NonContigPrb { rbg_size: 1, rbg_mask: 1, symbol_mask: 1 }),
            SectionExtension::FlexBfw(flex),
        ]);
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged);
        
        assert_eq!(shared.refcnt(), 0);
        let packet = encoder.encode(&msg).unwrap();
        assert_eq!(shared.refcnt(), 1);
        assert_eq!(packet.external_count(), 1);
        // Only the headers are owned by the packet
        assert_eq!(packet.owned_len(), 8 + 8 + 8 + 8);
        assert_eq!(packet.len(), 8 + 8 + 8 + 8 + 1000);
        let external = packet
            .segments()
            .iter()
            .find_map(|s| match s {
                Segment::External(ext) => Some(ext.bytes().as_ptr()),
                Segment::Owned(_) => None,
            })
            .unwrap();
        assert_eq!(external, payload.as_ptr());
        
        let second = encoder.encode(&msg).unwrap();
        assert_eq!(shared.refcnt(), 2);
        drop(packet);
        assert_eq!(shared.refcnt(), 1);
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(shared.refcnt(), 0);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
    
    #[test]
    fn test_pool_exhaustion() {
        let encoder = CpEncoder::new(Numerology::MU1, SectionIdTagging::Untagged).with_pool(BufferPool::new(1));
        let first = encoder.encode(&message(Vec::new())).unwrap();
        assert!(matches!(encoder.encode(&message(Vec::new())), Err(FhError::Resource(_))));
        drop(first);
        assert!(encoder.encode(&message(Vec::new())).is_ok());
    }
}
