//! OTA symbol clock

use common::{Numerology, SlotTime, SYMBOLS_PER_SLOT};

use crate::section_db::ctx_id;

/// A position in OTA time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaTime {
    /// Slots since the clock started, never wraps
    pub abs_slot: u64,
    /// Slot index, wraps at the numerology's max slot count
    pub tti: u32,
    /// Symbol within the slot
    pub symbol: u8,
    /// Frame, subframe and slot of `tti`
    pub slot: SlotTime,
}

impl OtaTime {
    /// Section database rotation context of the slot
    pub fn ctx_id(&self) -> u8 {
        ctx_id(self.tti)
    }
}

/// Monotonic symbol counter for one numerology
///
/// Time is injected: every [`OtaClock::tick`] is one OTA symbol.
#[derive(Debug, Clone)]
pub struct OtaClock {
    mu: Numerology,
    symbols: u64,
}

impl OtaClock {
    /// Clock at symbol 0 of slot 0
    pub fn new(mu: Numerology) -> Self {
        Self { mu, symbols: 0 }
    }

    /// Clock at `symbol` of slot `tti`
    pub fn starting_at(mu: Numerology, tti: u32, symbol: u8) -> Self {
        Self {
            mu,
            symbols: tti as u64 * SYMBOLS_PER_SLOT as u64 + symbol as u64 % SYMBOLS_PER_SLOT as u64,
        }
    }

    pub fn numerology(&self) -> Numerology {
        self.mu
    }

    /// Current position
    pub fn now(&self) -> OtaTime {
        let abs_slot = self.symbols / SYMBOLS_PER_SLOT as u64;
        let tti = self.mu.slot_limit(abs_slot as i64);
        OtaTime {
            abs_slot,
            tti,
            symbol: (self.symbols % SYMBOLS_PER_SLOT as u64) as u8,
            slot: self.mu.slot_time(tti as u64),
        }
    }

    /// Advance one symbol and return the new position
    pub fn tick(&mut self) -> OtaTime {
        self.symbols += 1;
        self.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_symbol_and_slot_advance() {
        let mut clock = OtaClock::new(Numerology::MU1);
        assert_eq!(clock.now().symbol, 0);
        for _ in 0..13 {
            clock.tick();
        }
        let t = clock.now();
        assert_eq!((t.tti, t.symbol), (0, 13));
        let t = clock.tick();
        assert_eq!((t.tti, t.symbol), (1, 0));
        assert_eq!(t.slot, SlotTime { frame_id: 0, subframe_id: 0, slot_id: 1 });
        assert_eq!(t.ctx_id(), 1);
    }
    
    #[test]
    fn test_rollover_at_max_slots() {
        let mu = Numerology::MU1;
        let mut clock = OtaClock::starting_at(mu, mu.max_slots() - 1, 13);
        let t = clock.tick();
        assert_eq!(t.tti, 0);
        assert_eq!(t.symbol, 0);
        assert_eq!(t.abs_slot, mu.max_slots() as u64);
        assert_eq!(t.slot.frame_id, 0);
    }
    
    #[test]
    fn test_frame_position() {
        // Slot 45 at mu 1: frame 2, subframe 2, slot 1
        let t = OtaClock::starting_at(Numerology::MU1, 45, 3).now();
        assert_eq!(t.slot, SlotTime { frame_id: 2, subframe_id: 2, slot_id: 1 });
        assert_eq!(t.ctx_id(), 1);
    }
}
