//! C-Plane Message Producer
//! 
//! Turns the PRB map of a slot into framed C-Plane packets, one message per
//! PRB element, and records every section it sends.

use std::collections::HashMap;
use std::ops::Range;

use bytes::BytesMut;
use common::{CompMethod, Direction, DuplexMode};
use interfaces::buffer::CpPacket;
use interfaces::ecpri::{update_payload_size, EcpriFramer, ECPRI_HDR_LEN};
use tracing::{debug, error, trace};

use super::encoder::CpEncoder;
use super::ext::bfw::ETH_HDR_LEN;
use super::ext::{estimate_max_sets_for_mtu, BfwWeights, FlexBfw, ModCompParams, SectionExtension};
use super::prb_map::{PrbElement, PrbMap};
use super::{
    CPlaneMessage, Category, CpHeader, SectionGenInfo, SectionInfo, SectionType, FILTER_INDEX_STANDARD,
    MAX_SECTIONS_PER_SLOT,
};
use crate::frame::{FrameStructure, SymbolType};
use crate::section_db::{SectionDb, SectionKey};
use crate::FhError;

/// Producer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub packets: u64,
    pub sections: u64,
    pub skipped_elements: u64,
}

#[derive(Debug, Clone, Copy)]
struct SectionIdCursor {
    tti: u32,
    next: u16,
}

/// Builds the C-Plane packets of one O-DU
#[derive(Debug)]
pub struct CpProducer {
    encoder: CpEncoder,
    framer: EcpriFramer,
    frame: FrameStructure,
    mtu: usize,
    seq_ids: HashMap<(Direction, u8, u8), u8>,
    section_ids: HashMap<(Direction, u8, u8), SectionIdCursor>,
    stats: ProducerStats,
}

impl CpProducer {
    pub fn new(encoder: CpEncoder, framer: EcpriFramer, frame: FrameStructure, mtu: usize) -> Self {
        Self {
            encoder,
            framer,
            frame,
            mtu,
            seq_ids: HashMap::new(),
            section_ids: HashMap::new(),
            stats: ProducerStats::default(),
        }
    }

    /// Frame structure the producer clips symbols against
    pub fn frame(&self) -> &FrameStructure {
        &self.frame
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    /// Next section id for `(dir, cc, ant)` in slot `tti`
    ///
    /// Ids count up from 0 within a slot and restart on a new slot or once
    /// a message worth of ids has been handed out.
    pub fn alloc_section_id(&mut self, dir: Direction, cc: u8, ant: u8, tti: u32) -> u16 {
        let cursor = self
            .section_ids
            .entry((dir, cc, ant))
            .or_insert(SectionIdCursor { tti, next: 0 });
        if cursor.tti != tti || cursor.next as usize >= MAX_SECTIONS_PER_SLOT {
            *cursor = SectionIdCursor { tti, next: 0 };
        }
        let id = cursor.next;
        cursor.next += 1;
        id
    }

    fn next_seq_id(&mut self, dir: Direction, cc: u8, ru_port: u8) -> u8 {
        let seq = self.seq_ids.entry((dir, cc, ru_port)).or_insert(0);
        let id = *seq;
        *seq = seq.wrapping_add(1);
        id
    }

    /// Build one framed message per PRB element of `prb_map`
    ///
    /// Sections are recorded in `db` under rotation context `ctx` once their
    /// packet is complete. Elements without symbols of the right direction
    /// in a special slot are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn create_sections(
        &mut self,
        ru_port: u8,
        dir: Direction,
        tti: u32,
        cc: u8,
        prb_map: &PrbMap,
        category: Category,
        ctx: u8,
        db: &mut SectionDb,
    ) -> Result<Vec<CpPacket>, FhError> {
        let all = 0..prb_map.num_elements();
        self.create_sections_for(ru_port, dir, tti, cc, prb_map, all, category, ctx, db)
    }

    /// Elements of `prb_map` that part `part` of `parts` builds
    pub fn part_range(prb_map: &PrbMap, part: u8, parts: u8) -> Range<usize> {
        let n = prb_map.num_elements();
        let parts = parts.max(1) as usize;
        let part = (part as usize).min(parts - 1);
        (n * part / parts)..(n * (part + 1) / parts)
    }

    /// Like [`CpProducer::create_sections`] for the elements in `elements` only
    ///
    /// Section ids stay the element index, so building a map in parts yields
    /// the same sections as building it at once.
    #[allow(clippy::too_many_arguments)]
    pub fn create_sections_for(
        &mut self,
        ru_port: u8,
        dir: Direction,
        tti: u32,
        cc: u8,
        prb_map: &PrbMap,
        elements: Range<usize>,
        category: Category,
        ctx: u8,
        db: &mut SectionDb,
    ) -> Result<Vec<CpPacket>, FhError> {
        let mu = self.encoder.numerology();
        let slot = mu.slot_time(tti as u64);
        let key = SectionKey::new(dir, cc, ru_port, ctx);
        let special = self.frame.duplex() != DuplexMode::Fdd && self.frame.is_special(tti as i64);
        let sym_type = match dir {
            Direction::Dl => SymbolType::Dl,
            Direction::Ul => SymbolType::Ul,
        };

        let elements = elements.start.min(prb_map.num_elements())..elements.end.min(prb_map.num_elements());
        let mut packets = Vec::with_capacity(elements.len());
        for (idx, elm) in prb_map.elements[elements.clone()].iter().enumerate() {
            let idx = elements.start + idx;
            let (start_sym, num_sym) = if special {
                match self.frame.check_symbol_range(sym_type, tti as i64, elm.start_sym, elm.num_sym) {
                    Some(range) => range,
                    None => {
                        error!(
                            "PRB element {} has no {:?} symbols in special slot {}, skipping",
                            idx, dir, tti
                        );
                        self.stats.skipped_elements += 1;
                        continue;
                    }
                }
            } else {
                (elm.start_sym, elm.num_sym)
            };

            let info = SectionInfo {
                section_type: SectionType::Type1,
                id: idx as u16,
                rb: false,
                sym_inc: false,
                start_prbc: elm.rb_start,
                num_prbc: elm.rb_size,
                start_sym_id: start_sym,
                num_symbol: num_sym,
                re_mask: 0xfff,
                beam_id: elm.beam_index,
                comp_meth: elm.comp_method,
                iq_width: elm.iq_width,
                prb_elem_begin: true,
                prb_elem_end: true,
                sec_desc: elm.sec_desc,
                ..SectionInfo::default()
            };
            let exts = self.extensions(elm, category)?;
            let section = SectionGenInfo::new(info, exts);

            let msg = CPlaneMessage {
                dir,
                section_type: SectionType::Type1,
                header: CpHeader {
                    filter_index: FILTER_INDEX_STANDARD,
                    frame_id: slot.frame_id,
                    subframe_id: slot.subframe_id,
                    slot_id: slot.slot_id,
                    start_sym_id: start_sym,
                    comp_meth: elm.comp_method,
                    iq_width: elm.iq_width,
                    ..CpHeader::default()
                },
                sections: vec![section],
            };

            let packet = self.frame_message(&msg, cc, ru_port)?;
            db.add(key, &msg.sections[0].info)?;

            self.stats.packets += 1;
            self.stats.sections += 1;
            packets.push(packet);
        }

        debug!(
            "Built {} {:?} C-Plane packets for slot {} cc {} port {}",
            packets.len(),
            dir,
            tti,
            cc,
            ru_port
        );
        Ok(packets)
    }

    fn extensions(&self, elm: &PrbElement, category: Category) -> Result<Vec<SectionExtension>, FhError> {
        let mut exts = Vec::new();
        if elm.comp_method == CompMethod::Modulation {
            exts.push(SectionExtension::ModComp(ModCompParams {
                csf: elm.csf,
                mod_comp_scaler: elm.mod_comp_scaler,
            }));
        }

        if category == Category::B && elm.bf_weight_update {
            let bf = &elm.bf_weight;
            if bf.num_bund_prb == 0 {
                exts.push(SectionExtension::Bfw(BfwWeights {
                    iq_width: bf.iq_width,
                    comp: bf.comp,
                    weights: bf.weights.clone(),
                }));
            } else {
                let buffer = bf.flex_buffer.clone().ok_or_else(|| {
                    FhError::InvalidParam("bundled weight update without a weight buffer".into())
                })?;
                let max_sets = estimate_max_sets_for_mtu(bf.num_weights as usize, bf.iq_width, bf.flex_comp_meth, self.mtu)?;
                if bf.num_sets as usize > max_sets {
                    return Err(FhError::Fail(format!(
                        "{} weight sets do not fit MTU {}, at most {}",
                        bf.num_sets, self.mtu, max_sets
                    )));
                }
                exts.push(SectionExtension::FlexBfw(FlexBfw::with_buffer(
                    bf.num_bund_prb,
                    bf.iq_width,
                    bf.flex_comp_meth,
                    bf.num_sets,
                    buffer,
                )));
            }
        }
        Ok(exts)
    }

    /// Encode `msg` and put the eCPRI header in front
    fn frame_message(&mut self, msg: &CPlaneMessage, cc: u8, ru_port: u8) -> Result<CpPacket, FhError> {
        let mut packet = self.encoder.encode(msg)?;
        let payload_len = packet.len();

        let seq = self.next_seq_id(msg.dir, cc, ru_port);
        let mut hdr = BytesMut::with_capacity(ECPRI_HDR_LEN);
        self.framer.build_ecpri_header(&mut hdr, cc, ru_port, seq);
        update_payload_size(&mut hdr, payload_len)?;
        packet.prepend(hdr.freeze());

        if packet.len() + ETH_HDR_LEN > self.mtu {
            return Err(FhError::Fail(format!(
                "packet of {} bytes exceeds MTU {}",
                packet.len() + ETH_HDR_LEN,
                self.mtu
            )));
        }
        trace!("Framed {} byte C-Plane packet seq {}", packet.len(), seq);
        Ok(packet)
    }
}
