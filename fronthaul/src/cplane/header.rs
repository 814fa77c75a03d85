//! Radio Application Header and Section Layout
//! 
//! Every bit field is described by an explicit shift/width pair inside a
//! big-endian word, so layout does not depend on compiler bit-field rules.

use bytes::{BufMut, BytesMut};
use common::{iq_width_from_wire, iq_width_to_wire, sign_extend, CompMethod, Direction};
use nom::number::complete::{be_u16, be_u24, be_u32, be_u64, be_u8};
use nom::IResult;
use num_traits::FromPrimitive;

use super::{CpHeader, SectionInfo, SectionType, PAYLOAD_VERSION};
use crate::FhError;

/// A bit field of a big-endian word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Position of the least significant bit
    pub shift: u32,
    /// Width in bits
    pub width: u32,
}

impl Field {
    /// Field at `shift` with `width` bits
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Unshifted mask of the field
    pub const fn mask(&self) -> u64 {
        (1u64 << self.width) - 1
    }

    /// Extract the field from `word`
    pub fn get(&self, word: u64) -> u64 {
        (word >> self.shift) & self.mask()
    }

    /// Store `value` into `word`, truncated to the field width
    pub fn put(&self, word: u64, value: u64) -> u64 {
        (word & !(self.mask() << self.shift)) | ((value & self.mask()) << self.shift)
    }

    /// Whether `value` fits in the field
    pub fn fits(&self, value: u64) -> bool {
        value <= self.mask()
    }
}

/// First 32-bit word of every C-Plane message
pub mod common_word {
    use super::Field;

    pub const DATA_DIRECTION: Field = Field::new(31, 1);
    pub const PAYLOAD_VER: Field = Field::new(28, 3);
    pub const FILTER_INDEX: Field = Field::new(24, 4);
    pub const FRAME_ID: Field = Field::new(16, 8);
    pub const SUBFRAME_ID: Field = Field::new(12, 4);
    pub const SLOT_ID: Field = Field::new(6, 6);
    pub const START_SYMBOL_ID: Field = Field::new(0, 6);
}

/// 64-bit section word shared by section types 1/3/5
pub mod section_word {
    use super::Field;

    pub const SECTION_ID: Field = Field::new(52, 12);
    pub const RB: Field = Field::new(51, 1);
    pub const SYM_INC: Field = Field::new(50, 1);
    pub const START_PRBC: Field = Field::new(40, 10);
    pub const NUM_PRBC: Field = Field::new(32, 8);
    pub const RE_MASK: Field = Field::new(20, 12);
    pub const NUM_SYMBOL: Field = Field::new(16, 4);
    pub const EF: Field = Field::new(15, 1);
    pub const BEAM_ID: Field = Field::new(0, 15);
}

/// `udCompHdr` byte
pub mod ud_comp_hdr {
    use super::Field;

    pub const IQ_WIDTH: Field = Field::new(4, 4);
    pub const COMP_METH: Field = Field::new(0, 4);
}

/// `frameStructure` byte of section type 3
pub mod frame_structure {
    use super::Field;

    pub const FFT_SIZE: Field = Field::new(4, 4);
    pub const SCS: Field = Field::new(0, 4);
}

/// Common header as parsed from the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Data direction
    pub dir: Direction,
    /// Header fields
    pub header: CpHeader,
    /// Declared number of sections
    pub num_sections: u8,
    /// Section type
    pub section_type: SectionType,
}

/// Pack a `udCompHdr` byte
pub fn pack_comp_hdr(comp_meth: CompMethod, iq_width: u8) -> u8 {
    let byte = ud_comp_hdr::IQ_WIDTH.put(0, iq_width_to_wire(iq_width) as u64);
    ud_comp_hdr::COMP_METH.put(byte, comp_meth as u64) as u8
}

/// Unpack a `udCompHdr` byte
pub fn unpack_comp_hdr(byte: u8) -> Result<(CompMethod, u8), FhError> {
    let meth = ud_comp_hdr::COMP_METH.get(byte as u64) as u8;
    let comp_meth = CompMethod::from_wire(meth)
        .ok_or_else(|| FhError::InvalidPacket(format!("unknown compression method {}", meth)))?;
    Ok((comp_meth, iq_width_from_wire(ud_comp_hdr::IQ_WIDTH.get(byte as u64) as u8)))
}

/// Write the common header and the type-specific header fields
pub fn write_header(
    buf: &mut BytesMut,
    dir: Direction,
    section_type: SectionType,
    header: &CpHeader,
    num_sections: u8,
) -> Result<(), FhError> {
    use common_word::*;

    let checks = [
        (FILTER_INDEX, header.filter_index as u64, "filterIndex"),
        (SUBFRAME_ID, header.subframe_id as u64, "subframeId"),
        (SLOT_ID, header.slot_id as u64, "slotId"),
        (START_SYMBOL_ID, header.start_sym_id as u64, "startSymbolId"),
    ];
    for (field, value, name) in checks {
        if !field.fits(value) {
            return Err(FhError::InvalidParam(format!("{} {} out of range", name, value)));
        }
    }

    let mut word = DATA_DIRECTION.put(0, dir as u64);
    word = PAYLOAD_VER.put(word, PAYLOAD_VERSION as u64);
    word = FILTER_INDEX.put(word, header.filter_index as u64);
    word = FRAME_ID.put(word, header.frame_id as u64);
    word = SUBFRAME_ID.put(word, header.subframe_id as u64);
    word = SLOT_ID.put(word, header.slot_id as u64);
    word = START_SYMBOL_ID.put(word, header.start_sym_id as u64);

    buf.put_u32(word as u32);
    buf.put_u8(num_sections);
    buf.put_u8(section_type as u8);

    match section_type {
        SectionType::Type1 => {
            buf.put_u8(pack_comp_hdr(header.comp_meth, header.iq_width));
            buf.put_u8(0);
        }
        SectionType::Type3 => {
            let fs = frame_structure::FFT_SIZE.put(0, header.fft_size as u64);
            let fs = frame_structure::SCS.put(fs, header.scs as u64);
            buf.put_u16(header.time_offset);
            buf.put_u8(fs as u8);
            buf.put_u16(header.cp_length);
            buf.put_u8(pack_comp_hdr(header.comp_meth, header.iq_width));
        }
        SectionType::Unused | SectionType::Type5 | SectionType::Type6 | SectionType::Type7 => {
            return Err(FhError::Unsupported(format!("section type {:?}", section_type)));
        }
    }

    Ok(())
}

fn parse_common(input: &[u8]) -> IResult<&[u8], (u32, u8, u8)> {
    let (input, word) = be_u32(input)?;
    let (input, num_sections) = be_u8(input)?;
    let (input, section_type) = be_u8(input)?;
    Ok((input, (word, num_sections, section_type)))
}

fn parse_type1_fields(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, comp) = be_u8(input)?;
    let (input, _reserved) = be_u8(input)?;
    Ok((input, comp))
}

fn parse_type3_fields(input: &[u8]) -> IResult<&[u8], (u16, u8, u16, u8)> {
    let (input, time_offset) = be_u16(input)?;
    let (input, fs) = be_u8(input)?;
    let (input, cp_length) = be_u16(input)?;
    let (input, comp) = be_u8(input)?;
    Ok((input, (time_offset, fs, cp_length, comp)))
}

fn truncated(what: &str) -> FhError {
    FhError::InvalidPacket(format!("truncated {}", what))
}

/// Parse the common and type-specific header, returning it with its length
pub fn parse_header(input: &[u8]) -> Result<(ParsedHeader, usize), FhError> {
    use common_word::*;

    let (rest, (word, num_sections, raw_type)) =
        parse_common(input).map_err(|_| truncated("common header"))?;
    let word = word as u64;

    let version = PAYLOAD_VER.get(word) as u8;
    if version != PAYLOAD_VERSION {
        return Err(FhError::InvalidPacket(format!("payload version {}", version)));
    }

    let section_type = SectionType::from_u8(raw_type)
        .ok_or_else(|| FhError::InvalidPacket(format!("unknown section type {}", raw_type)))?;
    if !section_type.is_supported() {
        return Err(FhError::Unsupported(format!("section type {:?}", section_type)));
    }

    let mut header = CpHeader {
        filter_index: FILTER_INDEX.get(word) as u8,
        frame_id: FRAME_ID.get(word) as u8,
        subframe_id: SUBFRAME_ID.get(word) as u8,
        slot_id: SLOT_ID.get(word) as u8,
        start_sym_id: START_SYMBOL_ID.get(word) as u8,
        ..CpHeader::default()
    };

    if section_type == SectionType::Type3 {
        let (_, (time_offset, fs, cp_length, comp)) =
            parse_type3_fields(rest).map_err(|_| truncated("section type 3 header"))?;
        header.time_offset = time_offset;
        header.fft_size = frame_structure::FFT_SIZE.get(fs as u64) as u8;
        header.scs = frame_structure::SCS.get(fs as u64) as u8;
        header.cp_length = cp_length;
        (header.comp_meth, header.iq_width) = unpack_comp_hdr(comp)?;
    } else {
        let (_, comp) = parse_type1_fields(rest).map_err(|_| truncated("section type 1 header"))?;
        (header.comp_meth, header.iq_width) = unpack_comp_hdr(comp)?;
    }

    Ok((
        ParsedHeader {
            dir: Direction::from_bit(DATA_DIRECTION.get(word) as u8),
            header,
            num_sections,
            section_type,
        },
        section_type.header_len(),
    ))
}

/// Write one section body; `wire_id` already carries any numerology tag
pub fn write_section(
    buf: &mut BytesMut,
    section_type: SectionType,
    info: &SectionInfo,
    wire_id: u16,
    ef: bool,
) -> Result<(), FhError> {
    use section_word::*;

    let num_prbc = if info.uses_all_prb_sentinel() {
        super::NUM_PRBC_ALL
    } else {
        info.num_prbc
    };

    let checks = [
        (SECTION_ID, wire_id as u64, "sectionId"),
        (START_PRBC, info.start_prbc as u64, "startPrbc"),
        (RE_MASK, info.re_mask as u64, "reMask"),
        (NUM_SYMBOL, info.num_symbol as u64, "numSymbol"),
        (BEAM_ID, info.beam_id as u64, "beamId"),
    ];
    for (field, value, name) in checks {
        if !field.fits(value) {
            return Err(FhError::InvalidParam(format!("{} {} out of range", name, value)));
        }
    }
    if info.num_symbol == 0 || info.num_symbol as u32 > common::SYMBOLS_PER_SLOT {
        return Err(FhError::InvalidParam(format!("numSymbol {} out of range", info.num_symbol)));
    }

    let mut word = SECTION_ID.put(0, wire_id as u64);
    word = RB.put(word, info.rb as u64);
    word = SYM_INC.put(word, info.sym_inc as u64);
    word = START_PRBC.put(word, info.start_prbc as u64);
    word = NUM_PRBC.put(word, num_prbc as u64);
    word = RE_MASK.put(word, info.re_mask as u64);
    word = NUM_SYMBOL.put(word, info.num_symbol as u64);
    word = EF.put(word, ef as u64);
    word = BEAM_ID.put(word, info.beam_id as u64);
    buf.put_u64(word);

    if section_type == SectionType::Type3 {
        const FREQ_OFFSET_MIN: i32 = -(1 << 23);
        const FREQ_OFFSET_MAX: i32 = (1 << 23) - 1;
        if !(FREQ_OFFSET_MIN..=FREQ_OFFSET_MAX).contains(&info.freq_offset) {
            return Err(FhError::InvalidParam(format!("freqOffset {} out of range", info.freq_offset)));
        }
        // 24-bit two's complement followed by a reserved byte
        buf.put_u32((info.freq_offset as u32) << 8);
    }

    Ok(())
}

/// Section body fields as read from the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSection {
    /// Wire section id, possibly numerology tagged
    pub wire_id: u16,
    /// Every other resource block
    pub rb: bool,
    /// Symbol increment
    pub sym_inc: bool,
    /// First PRB
    pub start_prbc: u16,
    /// Raw `numPrbc`, 0 meaning every PRB
    pub num_prbc: u8,
    /// Resource element mask
    pub re_mask: u16,
    /// Number of symbols
    pub num_symbol: u8,
    /// Extensions follow
    pub ef: bool,
    /// Beam id or ueId
    pub beam_id: u16,
    /// Frequency offset (section type 3)
    pub freq_offset: i32,
}

fn parse_type3_section(input: &[u8]) -> IResult<&[u8], (u64, u32)> {
    let (input, word) = be_u64(input)?;
    let (input, freq_offset) = be_u24(input)?;
    let (input, _reserved) = be_u8(input)?;
    Ok((input, (word, freq_offset)))
}

/// Parse one section body
pub fn parse_section(input: &[u8], section_type: SectionType) -> Result<(ParsedSection, usize), FhError> {
    use section_word::*;

    let (word, freq_offset) = if section_type == SectionType::Type3 {
        let (_, (word, freq)) = parse_type3_section(input).map_err(|_| truncated("section"))?;
        (word, sign_extend(freq, 24))
    } else {
        let (_, word) = be_u64::<_, nom::error::Error<&[u8]>>(input).map_err(|_| truncated("section"))?;
        (word, 0)
    };

    let parsed = ParsedSection {
        wire_id: SECTION_ID.get(word) as u16,
        rb: RB.get(word) == 1,
        sym_inc: SYM_INC.get(word) == 1,
        start_prbc: START_PRBC.get(word) as u16,
        num_prbc: NUM_PRBC.get(word) as u8,
        re_mask: RE_MASK.get(word) as u16,
        num_symbol: NUM_SYMBOL.get(word) as u8,
        ef: EF.get(word) == 1,
        beam_id: BEAM_ID.get(word) as u16,
        freq_offset,
    };

    Ok((parsed, section_type.section_len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_field_put_get() {
        let word = section_word::START_PRBC.put(0, 0x3ff);
        assert_eq!(word, 0x3ffu64 << 40);
        assert_eq!(section_word::START_PRBC.get(word), 0x3ff);
        // Values are truncated to the field width
        let word = section_word::NUM_SYMBOL.put(0, 0x1f);
        assert_eq!(section_word::NUM_SYMBOL.get(word), 0xf);
        assert!(!section_word::BEAM_ID.fits(0x8000));
    }
    
    #[test]
    fn test_common_header_layout() {
        let header = CpHeader {
            filter_index: 0,
            frame_id: 0x12,
            subframe_id: 3,
            slot_id: 1,
            start_sym_id: 2,
            comp_meth: CompMethod::BlockFloatingPoint,
            iq_width: 9,
            ..CpHeader::default()
        };
        let mut buf = BytesMut::new();
        write_header(&mut buf, Direction::Dl, SectionType::Type1, &header, 1).unwrap();
        // dir=1, ver=1, filter=0 -> 0x90; frame 0x12; subframe 3 slot 1 start 2
        assert_eq!(buf.as_ref(), &[0x90, 0x12, 0x30, 0x42, 0x01, 0x01, 0x91, 0x00]);
        
        let (parsed, len) = parse_header(&buf).unwrap();
        assert_eq!(len, 8);
        assert_eq!(parsed.dir, Direction::Dl);
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.num_sections, 1);
        assert_eq!(parsed.section_type, SectionType::Type1);
    }
    
    #[test]
    fn test_iq_width_16_in_comp_hdr() {
        assert_eq!(pack_comp_hdr(CompMethod::None, 16), 0x00);
        assert_eq!(unpack_comp_hdr(0x00).unwrap(), (CompMethod::None, 16));
    }
    
    #[test]
    fn test_unsupported_section_types() {
        // Section type 5 header with a valid common word
        let packet = [0x10, 0, 0, 0, 1, 5, 0, 0];
        assert!(matches!(parse_header(&packet), Err(FhError::Unsupported(_))));
        
        for section_type in [SectionType::Unused, SectionType::Type5, SectionType::Type6, SectionType::Type7] {
            let mut buf = BytesMut::new();
            assert!(matches!(
                write_header(&mut buf, Direction::Ul, section_type, &CpHeader::default(), 1),
                Err(FhError::Unsupported(_))
            ));
        }
    }
    
    #[test]
    fn test_bad_payload_version() {
        let packet = [0x20, 0, 0, 0, 1, 1, 0, 0];
        assert!(matches!(parse_header(&packet), Err(FhError::InvalidPacket(_))));
    }
    
    #[test]
    fn test_type3_freq_offset_sign() {
        let info = SectionInfo {
            num_prbc: 12,
            num_symbol: 1,
            re_mask: 0xfff,
            freq_offset: -792,
            ..SectionInfo::default()
        };
        let mut buf = BytesMut::new();
        write_section(&mut buf, SectionType::Type3, &info, 1, false).unwrap();
        assert_eq!(buf.len(), 12);
        let (parsed, len) = parse_section(&buf, SectionType::Type3).unwrap();
        assert_eq!(len, 12);
        assert_eq!(parsed.freq_offset, -792);
        assert_eq!(parsed.num_prbc, 12);
    }
    
    #[test]
    fn test_truncated_headers() {
        for (section_type, full) in [(SectionType::Type1, 8usize), (SectionType::Type3, 12)] {
            let mut buf = BytesMut::new();
            write_header(&mut buf, Direction::Dl, section_type, &CpHeader::default(), 1).unwrap();
            assert_eq!(buf.len(), full);
            assert_eq!(parse_header(&buf).unwrap().1, full);
            for len in 0..full {
                assert!(
                    matches!(parse_header(&buf[..len]), Err(FhError::InvalidPacket(_))),
                    "{:?} header cut to {} bytes",
                    section_type,
                    len
                );
            }
        }
        // Type 1 header missing only its reserved byte
        assert!(parse_header(&[0x90, 0, 0, 0, 1, 1, 0x91]).is_err());
    }
    
    #[test]
    fn test_section_id_wider_than_field() {
        let info = SectionInfo {
            num_prbc: 12,
            num_symbol: 1,
            re_mask: 0xfff,
            ..SectionInfo::default()
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            write_section(&mut buf, SectionType::Type1, &info, 0x1805, false),
            Err(FhError::InvalidParam(_))
        ));
        assert!(buf.is_empty());
        write_section(&mut buf, SectionType::Type1, &info, 0xfff, false).unwrap();
    }
    
    #[test]
    fn test_truncated_section() {
        assert!(matches!(
            parse_section(&[0u8; 5], SectionType::Type1),
            Err(FhError::InvalidPacket(_))
        ));
    }
}
