//! C-Plane Message Decoder
//! 
//! Parses received radio application payloads back into messages and
//! records every section in the receiver's section database.

use std::ops::Range;

use bytes::Bytes;
use common::{Numerology, SlotTime};
use tracing::{trace, warn};

use super::ext::{decode_ext, parse_prefix, DssPattern, SectionExtension};
use super::header::{parse_header, parse_section, ParsedHeader, ParsedSection};
use super::prb_map::PrbMap;
use super::{
    CPlaneMessage, CpHeader, SectionGenInfo, SectionIdTagging, SectionInfo, SectionType, MAX_NUM_EXTENSIONS,
    MAX_SECTIONS_PER_SLOT, NUM_PRBC_ALL,
};
use crate::section_db::{ctx_id, SectionDb, SectionKey};
use crate::FhError;

/// What the receiver knows about the flow a packet arrived on
#[derive(Debug, Clone)]
pub struct RecvContext<'a> {
    /// Numerology of the flow
    pub mu: Numerology,
    /// Component carrier
    pub cc_id: u8,
    /// RU port (eAxC) the packet addressed
    pub ru_port: u8,
    /// PRB map of the slot, for stale detection and SRS/CSI-RS ranges
    pub prb_map: Option<&'a PrbMap>,
    /// eAxC window carrying SRS
    pub srs_eaxc: Option<Range<u8>>,
    /// eAxC window carrying CSI-RS
    pub csirs_eaxc: Option<Range<u8>>,
    /// Expected technology per slot for extension 9
    pub dss: Option<&'a DssPattern>,
    /// Weights per beamforming vector (antenna elements)
    pub num_bfw_weights: Option<u16>,
    /// PRBs of the carrier, substituted for the all-PRB sentinel
    pub carrier_prbs: Option<u16>,
    /// Section id numerology tagging
    pub tagging: SectionIdTagging,
}

impl<'a> RecvContext<'a> {
    /// Context with nothing but the flow address
    pub fn new(mu: Numerology, cc_id: u8, ru_port: u8) -> Self {
        Self {
            mu,
            cc_id,
            ru_port,
            prb_map: None,
            srs_eaxc: None,
            csirs_eaxc: None,
            dss: None,
            num_bfw_weights: None,
            carrier_prbs: None,
            tagging: SectionIdTagging::Untagged,
        }
    }

    fn in_window(window: &Option<Range<u8>>, port: u8) -> bool {
        window.as_ref().is_some_and(|w| w.contains(&port))
    }

    fn is_srs(&self) -> bool {
        Self::in_window(&self.srs_eaxc, self.ru_port)
    }

    fn is_csirs(&self) -> bool {
        Self::in_window(&self.csirs_eaxc, self.ru_port)
    }
}

/// Receive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub rx_packets: u64,
    pub sections: u64,
    pub error_packets: u64,
    pub ext_len_mismatch: u64,
    pub dss_mismatch: u64,
    pub srs_sections: u64,
}

/// C-Plane receiver
#[derive(Debug, Default)]
pub struct CpDecoder {
    stats: DecodeStats,
}

fn rest(packet: &Bytes, offset: usize) -> Result<Bytes, FhError> {
    if offset > packet.len() {
        return Err(FhError::InvalidPacket(format!(
            "offset {} past end of {} byte packet",
            offset,
            packet.len()
        )));
    }
    Ok(packet.slice(offset..))
}

impl CpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Parse a message without touching any section database
    pub fn parse(&mut self, packet: &Bytes, ctx: &RecvContext<'_>) -> Result<CPlaneMessage, FhError> {
        self.run(packet, ctx, None)
    }

    /// Parse a message and record its sections in `db`
    ///
    /// Sections are written as they are decoded; a malformed section stops
    /// the packet but keeps whatever was recorded before it.
    pub fn decode(
        &mut self,
        packet: &Bytes,
        ctx: &RecvContext<'_>,
        db: &mut SectionDb,
    ) -> Result<CPlaneMessage, FhError> {
        self.run(packet, ctx, Some(db))
    }

    fn run(
        &mut self,
        packet: &Bytes,
        ctx: &RecvContext<'_>,
        db: Option<&mut SectionDb>,
    ) -> Result<CPlaneMessage, FhError> {
        self.stats.rx_packets += 1;
        match self.decode_packet(packet, ctx, db) {
            Ok(msg) => {
                trace!("Decoded {:?} message with {} sections", msg.dir, msg.sections.len());
                Ok(msg)
            }
            Err(err) => {
                self.stats.error_packets += 1;
                warn!("Dropping C-Plane packet on RU port {}: {}", ctx.ru_port, err);
                Err(err)
            }
        }
    }

    fn decode_packet(
        &mut self,
        packet: &Bytes,
        ctx: &RecvContext<'_>,
        mut db: Option<&mut SectionDb>,
    ) -> Result<CPlaneMessage, FhError> {
        let (parsed, mut offset) = parse_header(packet)?;
        let ParsedHeader { dir, header, num_sections, section_type } = parsed;

        if num_sections == 0 || num_sections as usize > MAX_SECTIONS_PER_SLOT {
            return Err(FhError::InvalidPacket(format!("numOfSections {}", num_sections)));
        }

        let slot = SlotTime {
            frame_id: header.frame_id,
            subframe_id: header.subframe_id,
            slot_id: header.slot_id,
        };
        let tti = ctx.mu.tti_from_slot_time(&slot);
        let key = SectionKey::new(dir, ctx.cc_id, ctx.ru_port, ctx_id(tti));
        let srs = ctx.is_srs();
        let prb_override = srs || ctx.is_csirs();

        let mut sections = Vec::with_capacity(num_sections as usize);
        for sec_idx in 0..num_sections as usize {
            let (ps, len) = parse_section(&rest(packet, offset)?, section_type)?;
            offset += len;

            let mut info = self.section_info(&ps, ctx, &header, section_type);
            if prb_override {
                self.apply_prb_map(&mut info, ctx, sec_idx)?;
                if srs {
                    self.stats.srs_sections += 1;
                }
            }

            let mut exts = Vec::new();
            if ps.ef {
                if srs {
                    offset = skip_extensions(packet, offset)?;
                } else {
                    offset = self.decode_extensions(packet, offset, ctx, tti, &mut exts)?;
                }
            }

            if let Some(db) = db.as_deref_mut() {
                if sec_idx == 0 {
                    if let Some(map) = ctx.prb_map {
                        if map.num_elements() <= db.size(key) {
                            trace!("Stale sections in {:?}, resetting", key);
                            db.reset(key)?;
                        }
                    }
                }
                *db.reserve_next(key)? = info.clone();
            }

            self.stats.sections += 1;
            sections.push(SectionGenInfo { info, exts });
        }

        Ok(CPlaneMessage {
            dir,
            section_type,
            header,
            sections,
        })
    }

    fn section_info(
        &self,
        ps: &ParsedSection,
        ctx: &RecvContext<'_>,
        header: &CpHeader,
        section_type: SectionType,
    ) -> SectionInfo {
        let all_prbs = ps.num_prbc as u16 == NUM_PRBC_ALL;
        SectionInfo {
            section_type,
            id: ctx.tagging.strip(ps.wire_id, ctx.mu),
            rb: ps.rb,
            sym_inc: ps.sym_inc,
            start_prbc: ps.start_prbc,
            num_prbc: if all_prbs { ctx.carrier_prbs.unwrap_or(0) } else { ps.num_prbc as u16 },
            all_prbs,
            start_sym_id: header.start_sym_id,
            num_symbol: ps.num_symbol,
            re_mask: ps.re_mask,
            beam_id: ps.beam_id,
            freq_offset: ps.freq_offset,
            comp_meth: header.comp_meth,
            iq_width: header.iq_width,
            ef: ps.ef,
            ..SectionInfo::default()
        }
    }

    /// SRS and CSI-RS flows take their PRB range from the PRB map
    fn apply_prb_map(&self, info: &mut SectionInfo, ctx: &RecvContext<'_>, sec_idx: usize) -> Result<(), FhError> {
        let elm = ctx
            .prb_map
            .and_then(|map| map.get(sec_idx))
            .ok_or_else(|| FhError::InvalidPacket(format!("no PRB element {} for RU port {}", sec_idx, ctx.ru_port)))?;
        info.start_prbc = elm.rb_start;
        info.num_prbc = elm.rb_size;
        info.all_prbs = false;
        info.sec_desc = elm.sec_desc;
        Ok(())
    }

    fn decode_extensions(
        &mut self,
        packet: &Bytes,
        mut offset: usize,
        ctx: &RecvContext<'_>,
        tti: u32,
        exts: &mut Vec<SectionExtension>,
    ) -> Result<usize, FhError> {
        loop {
            if exts.len() == MAX_NUM_EXTENSIONS {
                return Err(FhError::InvalidPacket(format!("more than {} extensions", MAX_NUM_EXTENSIONS)));
            }
            let decoded = decode_ext(&rest(packet, offset)?, ctx.num_bfw_weights)?;
            if decoded.len_mismatch() {
                self.stats.ext_len_mismatch += 1;
                warn!(
                    "Extension {:?} extLen {} bytes but {} parsed",
                    decoded.ext.ext_type(),
                    decoded.ext_len,
                    decoded.consumed
                );
            }
            if let (SectionExtension::Dss(tech), Some(pattern)) = (&decoded.ext, ctx.dss) {
                let expected = pattern.technology(tti);
                if *tech != expected {
                    self.stats.dss_mismatch += 1;
                    warn!("DSS technology {:?} in slot {}, expected {:?}", tech, tti, expected);
                }
            }
            // extLen frames the extension even when the contents disagree
            offset += decoded.ext_len;
            exts.push(decoded.ext);
            if !decoded.more {
                return Ok(offset);
            }
        }
    }
}

/// Step over an extension chain by `extLen` alone
fn skip_extensions(packet: &Bytes, mut offset: usize) -> Result<usize, FhError> {
    for _ in 0..MAX_NUM_EXTENSIONS {
        let prefix = parse_prefix(&rest(packet, offset)?)?;
        offset += prefix.ext_len;
        if offset > packet.len() {
            return Err(FhError::InvalidPacket("extension chain past end of packet".into()));
        }
        if !prefix.more {
            return Ok(offset);
        }
    }
    Err(FhError::InvalidPacket(format!("more than {} extensions", MAX_NUM_EXTENSIONS)))
}
