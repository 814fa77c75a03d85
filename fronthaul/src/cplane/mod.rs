//! C-Plane Messages
//! 
//! Radio application header, section records and the extension chain of
//! O-RAN CUS C-Plane messages, with the encoder, decoder and the PRB-map
//! driven producer built on top of them.

pub mod decoder;
pub mod encoder;
pub mod ext;
pub mod header;
pub mod prb_map;
pub mod producer;

pub use decoder::{CpDecoder, DecodeStats, RecvContext};
pub use encoder::CpEncoder;
pub use ext::SectionExtension;
pub use prb_map::{PrbElement, PrbMap};
pub use producer::CpProducer;

use common::{CompMethod, Direction, Numerology, SYMBOLS_PER_SLOT};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::FhError;

/// Payload version carried in every common header
pub const PAYLOAD_VERSION: u8 = 1;
/// Maximum sections in one C-Plane message
pub const MAX_SECTIONS_PER_SLOT: usize = 32;
/// Maximum extensions attached to one section
pub const MAX_NUM_EXTENSIONS: usize = 10;
/// Largest 12-bit section id
pub const MAX_SECTION_ID: u16 = 0x0fff;
/// Wire value of `numPrbc` meaning every PRB of the carrier
pub const NUM_PRBC_ALL: u16 = 0;
/// Filter index of standard channel filters
pub const FILTER_INDEX_STANDARD: u8 = 0;

/// C-Plane section types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, ToPrimitive)]
pub enum SectionType {
    /// Unused resource blocks or symbols
    Unused = 0,
    /// Most DL/UL radio channels
    #[default]
    Type1 = 1,
    /// PRACH and mixed-numerology channels
    Type3 = 3,
    /// UE scheduling information
    Type5 = 5,
    /// Channel information
    Type6 = 6,
    /// LAA
    Type7 = 7,
}

impl SectionType {
    /// Whether the codec builds and parses this section type
    pub fn is_supported(&self) -> bool {
        matches!(self, SectionType::Type1 | SectionType::Type3)
    }

    /// Length of the common header plus the type-specific fields
    pub fn header_len(&self) -> usize {
        match self {
            SectionType::Unused | SectionType::Type3 => 12,
            _ => 8,
        }
    }

    /// Length of one section body, excluding extensions
    pub fn section_len(&self) -> usize {
        match self {
            SectionType::Type3 => 12,
            _ => 8,
        }
    }
}

/// C-Plane device category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Precoding in the O-DU, up to 8 spatial streams
    #[default]
    A,
    /// Precoding in the O-RU, beamforming weights on the fronthaul
    B,
}

impl TryFrom<u8> for Category {
    type Error = FhError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Category::A),
            1 => Ok(Category::B),
            other => Err(FhError::InvalidParam(format!("unsupported category {}", other))),
        }
    }
}

/// Per-symbol U-Plane buffer pointer of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionDesc {
    /// Offset of the section IQ data inside the symbol buffer
    pub iq_buffer_offset: u32,
    /// Length of the section IQ data
    pub iq_buffer_len: u32,
}

/// One radio resource allocation
///
/// `numPrbc` larger than 255 cannot be carried on the wire; such sections
/// and any section with `all_prbs` set go out as the all-PRB sentinel. On
/// decode the sentinel sets `all_prbs` and `num_prbc` becomes the carrier
/// PRB count when the receiver knows it, 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionInfo {
    /// Section type of the owning message
    pub section_type: SectionType,
    /// Section id (without numerology tag)
    pub id: u16,
    /// Every other resource block is used
    pub rb: bool,
    /// Symbol number increment command
    pub sym_inc: bool,
    /// First PRB
    pub start_prbc: u16,
    /// Number of PRBs
    pub num_prbc: u16,
    /// Section spans every PRB of the carrier
    pub all_prbs: bool,
    /// First symbol, taken from the message header
    pub start_sym_id: u8,
    /// Number of symbols
    pub num_symbol: u8,
    /// Resource element mask
    pub re_mask: u16,
    /// Beam id (ueId for section type 5)
    pub beam_id: u16,
    /// Frequency offset, section type 3 only
    pub freq_offset: i32,
    /// IQ compression method, taken from the message header
    pub comp_meth: CompMethod,
    /// IQ sample width in bits, taken from the message header
    pub iq_width: u8,
    /// Extensions follow the section
    pub ef: bool,
    /// First section generated from a PRB element
    pub prb_elem_begin: bool,
    /// Last section generated from a PRB element
    pub prb_elem_end: bool,
    /// Per-symbol U-Plane buffer pointers
    pub sec_desc: [SectionDesc; SYMBOLS_PER_SLOT as usize],
}

impl SectionInfo {
    /// Whether the section is carried with the all-PRB sentinel
    pub fn uses_all_prb_sentinel(&self) -> bool {
        self.all_prbs || self.num_prbc > 255
    }
}

/// A section together with its extensions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionGenInfo {
    /// Section fields
    pub info: SectionInfo,
    /// Extensions in wire order
    pub exts: Vec<SectionExtension>,
}

impl SectionGenInfo {
    /// Pair a section with its extensions, keeping `ef` consistent
    pub fn new(mut info: SectionInfo, exts: Vec<SectionExtension>) -> Self {
        info.ef = !exts.is_empty();
        Self { info, exts }
    }

    /// Number of attached extensions
    pub fn num_exts(&self) -> usize {
        self.exts.len()
    }
}

/// Radio application header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpHeader {
    /// Filter index
    pub filter_index: u8,
    /// Frame id (8 bits)
    pub frame_id: u8,
    /// Subframe id
    pub subframe_id: u8,
    /// Slot id within the subframe
    pub slot_id: u8,
    /// First symbol of the message
    pub start_sym_id: u8,
    /// IQ compression method (section types 1/3)
    pub comp_meth: CompMethod,
    /// IQ sample width (section types 1/3)
    pub iq_width: u8,
    /// Time offset in samples (section type 3)
    pub time_offset: u16,
    /// FFT size code (section type 3)
    pub fft_size: u8,
    /// Subcarrier spacing code (section type 3)
    pub scs: u8,
    /// Cyclic prefix length (section type 3)
    pub cp_length: u16,
}

/// A complete C-Plane message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CPlaneMessage {
    /// Data direction
    pub dir: Direction,
    /// Section type shared by every section
    pub section_type: SectionType,
    /// Header fields
    pub header: CpHeader,
    /// Sections in wire order
    pub sections: Vec<SectionGenInfo>,
}

/// How the owning numerology is carried in the section id
///
/// Untagged ids are used as-is. Tagged ids carry mu in the top `mu_bits`
/// bits and the base id below, so mixed-numerology receivers can route a
/// message before parsing it; the split must match the O-RU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SectionIdTagging {
    /// Section id carries no numerology
    #[default]
    Untagged,
    /// Numerology in the top `mu_bits` of the 12-bit id
    MuHighBits {
        /// Width of the numerology tag
        mu_bits: u8,
    },
}

impl SectionIdTagging {
    fn base_bits(&self) -> u32 {
        match self {
            SectionIdTagging::Untagged => 12,
            SectionIdTagging::MuHighBits { mu_bits } => 12 - (*mu_bits as u32).min(11),
        }
    }

    /// Largest base section id that survives tagging
    pub fn max_base_id(&self) -> u16 {
        ((1u32 << self.base_bits()) - 1) as u16
    }

    /// Wire section id for `id` sent on numerology `mu`
    pub fn tag(&self, id: u16, mu: Numerology) -> Result<u16, FhError> {
        if let SectionIdTagging::MuHighBits { mu_bits } = *self {
            if !(1..=11).contains(&mu_bits) {
                return Err(FhError::InvalidParam(format!("numerology tag of {} bits", mu_bits)));
            }
            if mu.value() as u32 >= 1 << mu_bits {
                return Err(FhError::InvalidParam(format!(
                    "mu {} does not fit a {} bit tag",
                    mu.value(),
                    mu_bits
                )));
            }
        }
        if id > self.max_base_id() {
            return Err(FhError::InvalidParam(format!(
                "section id {} exceeds {} for {:?}",
                id,
                self.max_base_id(),
                self
            )));
        }
        match self {
            SectionIdTagging::Untagged => Ok(id),
            SectionIdTagging::MuHighBits { .. } => {
                Ok(((mu.value() as u16) << self.base_bits()) | id)
            }
        }
    }

    /// Base section id of a wire id received on numerology `mu`
    pub fn strip(&self, wire_id: u16, mu: Numerology) -> u16 {
        match self {
            SectionIdTagging::Untagged => wire_id,
            SectionIdTagging::MuHighBits { .. } => {
                let tagged_mu = wire_id >> self.base_bits();
                if tagged_mu != mu.value() as u16 {
                    warn!("Section id {:#05x} tagged for mu {} received on mu {}", wire_id, tagged_mu, mu.value());
                }
                wire_id & self.max_base_id()
            }
        }
    }
}
