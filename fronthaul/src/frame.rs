//! TDD/FDD Frame Structure
//! 
//! Classifies the slots of a TDD period from their symbol patterns and
//! answers which direction a slot or symbol carries.

use common::{DuplexMode, Numerology, SYMBOLS_PER_SLOT};
use tracing::{debug, info};

use crate::FhError;

/// Longest TDD period in slots
pub const MAX_TDD_PERIOD: usize = 80;

const NUM_SYMBOLS: usize = SYMBOLS_PER_SLOT as usize;

/// Slot classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotType {
    /// Not configured
    #[default]
    Invalid,
    /// Every symbol downlink
    Dl,
    /// Every symbol uplink
    Ul,
    /// Mixed downlink, guard and uplink symbols
    Special,
    /// Paired spectrum
    Fdd,
}

/// Symbol classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolType {
    /// Downlink symbol
    #[default]
    Dl,
    /// Uplink symbol
    Ul,
    /// Guard period
    Guard,
    /// Paired spectrum, both directions
    Fdd,
}

/// Symbol types of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub symbols: [SymbolType; NUM_SYMBOLS],
}

impl SlotConfig {
    /// Every symbol of the same type
    pub fn uniform(symbol_type: SymbolType) -> Self {
        Self { symbols: [symbol_type; NUM_SYMBOLS] }
    }

    /// Parse a 14-character pattern of `D`, `U` and `G`
    pub fn from_pattern(pattern: &str) -> Result<Self, FhError> {
        let chars: Vec<char> = pattern.trim().chars().collect();
        if chars.len() != NUM_SYMBOLS {
            return Err(FhError::InvalidParam(format!(
                "slot pattern '{}' has {} symbols, expected {}",
                pattern,
                chars.len(),
                NUM_SYMBOLS
            )));
        }

        let mut symbols = [SymbolType::Dl; NUM_SYMBOLS];
        for (symbol, c) in symbols.iter_mut().zip(chars) {
            *symbol = match c.to_ascii_uppercase() {
                'D' => SymbolType::Dl,
                'U' => SymbolType::Ul,
                'G' => SymbolType::Guard,
                other => {
                    return Err(FhError::InvalidParam(format!("unknown symbol type '{}' in '{}'", other, pattern)));
                }
            };
        }
        Ok(Self { symbols })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotInfo {
    slot_type: SlotType,
    num_dl_sym: u8,
    num_ul_sym: u8,
    symbols: [SymbolType; NUM_SYMBOLS],
}

impl SlotInfo {
    fn fdd() -> Self {
        Self {
            slot_type: SlotType::Fdd,
            num_dl_sym: 0,
            num_ul_sym: 0,
            symbols: [SymbolType::Fdd; NUM_SYMBOLS],
        }
    }

    fn classify(config: &SlotConfig) -> Self {
        let count = |ty| config.symbols.iter().filter(|&&s| s == ty).count() as u8;
        let num_dl = count(SymbolType::Dl);
        let num_ul = count(SymbolType::Ul);
        let num_guard = count(SymbolType::Guard);

        let slot_type = if num_ul == 0 && num_guard == 0 {
            SlotType::Dl
        } else if num_dl == 0 && num_guard == 0 {
            SlotType::Ul
        } else {
            SlotType::Special
        };

        // Only special slots remember their per-direction symbol counts
        let special = slot_type == SlotType::Special;
        Self {
            slot_type,
            num_dl_sym: if special { num_dl } else { 0 },
            num_ul_sym: if special { num_ul } else { 0 },
            symbols: config.symbols,
        }
    }
}

/// Slot pattern of one carrier
#[derive(Debug, Clone)]
pub struct FrameStructure {
    mu: Numerology,
    duplex: DuplexMode,
    slots: Vec<SlotInfo>,
    dl_rate: f32,
    ul_rate: f32,
}

impl FrameStructure {
    /// Paired spectrum: every slot carries both directions
    pub fn fdd(mu: Numerology) -> Self {
        Self {
            mu,
            duplex: DuplexMode::Fdd,
            slots: vec![SlotInfo::fdd()],
            dl_rate: 1.0,
            ul_rate: 1.0,
        }
    }

    /// TDD with one `SlotConfig` per slot of the period
    pub fn tdd(mu: Numerology, slots: &[SlotConfig]) -> Result<Self, FhError> {
        let mut frame = Self::fdd(mu);
        frame.set_slot_config(DuplexMode::Tdd, slots)?;
        Ok(frame)
    }

    /// Reconfigure the duplex mode and TDD period
    pub fn set_slot_config(&mut self, duplex: DuplexMode, slots: &[SlotConfig]) -> Result<(), FhError> {
        if duplex == DuplexMode::Fdd {
            *self = Self::fdd(self.mu);
            return Ok(());
        }
        if slots.is_empty() || slots.len() > MAX_TDD_PERIOD {
            return Err(FhError::InvalidParam(format!(
                "TDD period {} not in 1..={}",
                slots.len(),
                MAX_TDD_PERIOD
            )));
        }

        let infos: Vec<SlotInfo> = slots.iter().map(SlotInfo::classify).collect();
        let count = |f: fn(&SlotInfo) -> bool| infos.iter().filter(|&s| f(s)).count() as f32;
        let period = infos.len() as f32;
        let dl_slots = count(|s| s.slot_type == SlotType::Dl);
        let ul_slots = count(|s| s.slot_type == SlotType::Ul);
        let sp_dl = count(|s| s.slot_type == SlotType::Special && s.num_dl_sym > 0);
        let sp_ul = count(|s| s.slot_type == SlotType::Special && s.num_ul_sym > 0);

        for (idx, info) in infos.iter().enumerate() {
            debug!(
                "Slot {}: {:?} dl_sym={} ul_sym={}",
                idx, info.slot_type, info.num_dl_sym, info.num_ul_sym
            );
        }

        self.duplex = duplex;
        self.dl_rate = (dl_slots + sp_dl) / period;
        self.ul_rate = (ul_slots + sp_ul) / period;
        self.slots = infos;
        info!(
            "TDD period of {} slots configured, DL rate {:.2}, UL rate {:.2}",
            self.slots.len(),
            self.dl_rate,
            self.ul_rate
        );
        Ok(())
    }

    /// Numerology of the carrier
    pub fn numerology(&self) -> Numerology {
        self.mu
    }

    /// Duplex mode
    pub fn duplex(&self) -> DuplexMode {
        self.duplex
    }

    /// TDD period in slots (1 for FDD)
    pub fn period(&self) -> usize {
        self.slots.len()
    }

    /// Share of slots carrying downlink
    pub fn dl_rate(&self) -> f32 {
        self.dl_rate
    }

    /// Share of slots carrying uplink
    pub fn ul_rate(&self) -> f32 {
        self.ul_rate
    }

    fn slot(&self, tti: i64) -> &SlotInfo {
        let idx = self.mu.slot_limit(tti) as usize % self.slots.len().max(1);
        &self.slots[idx]
    }

    /// Classification of slot `tti`
    pub fn slot_kind(&self, tti: i64) -> SlotType {
        self.slot(tti).slot_type
    }

    /// Whether slot `tti` carries direction `ty`
    ///
    /// True for a matching type, for FDD, and for a special slot holding
    /// at least one symbol of that direction.
    pub fn slot_type(&self, tti: i64, ty: SlotType) -> bool {
        let slot = self.slot(tti);
        match slot.slot_type {
            t if t == ty => true,
            SlotType::Fdd => true,
            SlotType::Special => match ty {
                SlotType::Dl => slot.num_dl_sym > 0,
                SlotType::Ul => slot.num_ul_sym > 0,
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether slot `tti` is a TDD special slot
    pub fn is_special(&self, tti: i64) -> bool {
        self.slot(tti).slot_type == SlotType::Special
    }

    /// Type of symbol `sym` in slot `tti`
    pub fn symbol_type(&self, tti: i64, sym: u8) -> SymbolType {
        self.slot(tti).symbols[sym as usize % NUM_SYMBOLS]
    }

    /// Clip `start .. start + num` to the first run of `sym_type` symbols
    ///
    /// Returns the clipped `(start, num)`, or `None` when the slot has no
    /// such symbol or the clipped range is empty.
    pub fn check_symbol_range(&self, sym_type: SymbolType, tti: i64, start: u8, num: u8) -> Option<(u8, u8)> {
        let symbols = &self.slot(tti).symbols;
        let first = symbols.iter().position(|&s| s == sym_type)?;
        let last = symbols[first..]
            .iter()
            .position(|&s| s != sym_type)
            .map_or(NUM_SYMBOLS, |run| first + run);

        let start_pos = first.max(start as usize);
        let end_pos = last.min(start as usize + num as usize);
        if end_pos <= start_pos {
            return None;
        }
        Some((start_pos as u8, (end_pos - start_pos) as u8))
    }
}
