//! PRB Map
//! 
//! The scheduler's description of one slot: a list of PRB elements, each a
//! contiguous block of PRBs and symbols with its beam and compression.

use common::{CompMethod, Direction, SYMBOLS_PER_SLOT};
use interfaces::buffer::SharedExtBuffer;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::ext::{BfwComp, BfwCompMethod};
use super::SectionDesc;
use crate::FhError;

/// Most PRB elements in one map
pub const MAX_PRB_ELEMENTS: usize = 275;

fn default_iq_width() -> u8 {
    16
}

fn default_num_sym() -> u8 {
    SYMBOLS_PER_SLOT as u8
}

/// Beamforming weights attached to a PRB element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BfWeight {
    /// PRBs per bundle; 0 sends one weight vector inline (extension 1)
    pub num_bund_prb: u8,
    /// Weights per vector (antenna elements)
    pub num_weights: u16,
    /// Bits per I or Q component
    pub iq_width: u8,
    /// Inline weight compression
    pub comp: BfwComp,
    /// Inline weight vector
    pub weights: Vec<Complex<i16>>,
    /// Bundle weight compression method (extension 11)
    pub flex_comp_meth: BfwCompMethod,
    /// Packed bundles, attached without copying (extension 11)
    pub flex_buffer: Option<SharedExtBuffer>,
    /// Bundles in `flex_buffer`
    pub num_sets: u16,
}

/// One PRB block of a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrbElement {
    /// First PRB
    pub rb_start: u16,
    /// Number of PRBs
    pub rb_size: u16,
    /// First symbol
    #[serde(default)]
    pub start_sym: u8,
    /// Number of symbols
    #[serde(default = "default_num_sym")]
    pub num_sym: u8,
    /// Beam index
    #[serde(default)]
    pub beam_index: u16,
    /// New beamforming weights are sent with the element
    #[serde(default)]
    pub bf_weight_update: bool,
    /// IQ compression method
    #[serde(default)]
    pub comp_method: CompMethod,
    /// IQ sample width
    #[serde(default = "default_iq_width")]
    pub iq_width: u8,
    /// Modulation compression scaler
    #[serde(default)]
    pub mod_comp_scaler: u16,
    /// Modulation compression constellation shift
    #[serde(default)]
    pub csf: bool,
    /// U-Plane buffer pointers per symbol
    #[serde(skip)]
    pub sec_desc: [SectionDesc; SYMBOLS_PER_SLOT as usize],
    /// Beamforming weights
    #[serde(skip)]
    pub bf_weight: BfWeight,
}

impl Default for PrbElement {
    fn default() -> Self {
        Self {
            rb_start: 0,
            rb_size: 0,
            start_sym: 0,
            num_sym: default_num_sym(),
            beam_index: 0,
            bf_weight_update: false,
            comp_method: CompMethod::None,
            iq_width: default_iq_width(),
            mod_comp_scaler: 0,
            csf: false,
            sec_desc: Default::default(),
            bf_weight: BfWeight::default(),
        }
    }
}

impl PrbElement {
    /// Element covering `rb_size` PRBs from `rb_start` on every symbol
    pub fn new(rb_start: u16, rb_size: u16, beam_index: u16) -> Self {
        Self {
            rb_start,
            rb_size,
            beam_index,
            ..Self::default()
        }
    }

    fn validate(&self, idx: usize) -> Result<(), FhError> {
        if self.rb_size == 0 {
            return Err(FhError::InvalidParam(format!("PRB element {} has no PRBs", idx)));
        }
        if self.num_sym == 0 || self.start_sym as u32 + self.num_sym as u32 > SYMBOLS_PER_SLOT {
            return Err(FhError::InvalidParam(format!(
                "PRB element {} symbols {}+{} exceed the slot",
                idx, self.start_sym, self.num_sym
            )));
        }
        Ok(())
    }
}

/// PRB elements of one slot for one eAxC
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrbMap {
    /// Direction
    pub dir: Direction,
    /// Component carrier
    pub cc_id: u8,
    /// RU port
    pub ru_port: u8,
    /// Slot the map applies to
    pub tti: u32,
    /// First symbol of the map
    pub start_sym_id: u8,
    /// Elements in section id order
    pub elements: Vec<PrbElement>,
}

impl PrbMap {
    /// Validated map of `elements`
    pub fn new(dir: Direction, elements: Vec<PrbElement>) -> Result<Self, FhError> {
        if elements.len() > MAX_PRB_ELEMENTS {
            return Err(FhError::InvalidParam(format!("{} PRB elements", elements.len())));
        }
        for (idx, elm) in elements.iter().enumerate() {
            elm.validate(idx)?;
        }
        Ok(Self {
            dir,
            elements,
            ..Self::default()
        })
    }

    /// Number of PRB elements
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Element at `idx`
    pub fn get(&self, idx: usize) -> Option<&PrbElement> {
        self.elements.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_element_defaults_from_toml() {
        let elm: PrbElement = toml::from_str("rb_start = 10\nrb_size = 20\nbeam_index = 2").unwrap();
        assert_eq!(elm.rb_start, 10);
        assert_eq!(elm.num_sym, 14);
        assert_eq!(elm.iq_width, 16);
        assert_eq!(elm.comp_method, CompMethod::None);
        assert!(elm.bf_weight.flex_buffer.is_none());
    }
    
    #[test]
    fn test_map_validation() {
        let map = PrbMap::new(Direction::Dl, vec![PrbElement::new(0, 50, 1), PrbElement::new(50, 56, 2)]).unwrap();
        assert_eq!(map.num_elements(), 2);
        assert_eq!(map.get(1).unwrap().beam_index, 2);
        
        let bad = PrbElement { start_sym: 10, num_sym: 8, ..PrbElement::new(0, 10, 0) };
        assert!(PrbMap::new(Direction::Dl, vec![bad]).is_err());
        assert!(PrbMap::new(Direction::Dl, vec![PrbElement::new(0, 0, 0)]).is_err());
    }
}
