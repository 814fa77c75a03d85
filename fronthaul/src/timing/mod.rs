//! Deadline Scheduler
//! 
//! Converts the O-RAN delay management parameters into the OTA symbols at
//! which C-Plane messages are built and reception windows close, and runs
//! the per-symbol callback buckets that act on them.

pub mod clock;
pub mod scheduler;
pub mod state;

pub use clock::{OtaClock, OtaTime};
pub use scheduler::{
    CallbackKind, DlCpMode, Role, SchedulerStats, SymCbKind, SymbolEvent, SymbolHandler, TimingContext,
    TimingHandlers,
};
pub use state::{InterfaceState, InterfaceStatus};

use common::{Numerology, SYMBOLS_PER_SLOT};
use serde::{Deserialize, Serialize};

const NUM_SYMBOLS: i32 = SYMBOLS_PER_SLOT as i32;

/// Delay management parameters, all in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayBudget {
    /// Extra lead of DL C-Plane over U-Plane
    pub t_adv_cp_dl: u32,
    pub t2a_min_cp_dl: u32,
    pub t2a_max_cp_dl: u32,
    pub t2a_min_cp_ul: u32,
    pub t2a_max_cp_ul: u32,
    pub t2a_min_up: u32,
    pub t2a_max_up: u32,
    pub ta3_min: u32,
    pub ta3_max: u32,
    pub t1a_min_cp_dl: u32,
    pub t1a_max_cp_dl: u32,
    pub t1a_min_cp_ul: u32,
    pub t1a_max_cp_ul: u32,
    pub t1a_min_up: u32,
    pub t1a_max_up: u32,
    pub ta4_min: u32,
    pub ta4_max: u32,
}

impl Default for DelayBudget {
    fn default() -> Self {
        Self {
            t_adv_cp_dl: 25,
            t2a_min_cp_dl: 285,
            t2a_max_cp_dl: 429,
            t2a_min_cp_ul: 285,
            t2a_max_cp_ul: 429,
            t2a_min_up: 71,
            t2a_max_up: 428,
            ta3_min: 20,
            ta3_max: 32,
            t1a_min_cp_dl: 258,
            t1a_max_cp_dl: 429,
            t1a_min_cp_ul: 285,
            t1a_max_cp_ul: 429,
            t1a_min_up: 96,
            t1a_max_up: 196,
            ta4_min: 0,
            ta4_max: 75,
        }
    }
}

/// Rounding of a partial symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Round a partial symbol to the later symbol
    ///
    /// A delay that is a whole number of symbols stays on that symbol; no
    /// extra symbol of margin is added.
    Up,
    /// Round to the earlier symbol
    Down,
}

/// Where in OTA time a callback fires, relative to the slot it serves
///
/// A callback at `symbol` of OTA slot `n` acts on slot `n + slot_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolOffset {
    pub symbol: u8,
    pub slot_offset: i32,
}

impl SymbolOffset {
    pub const fn new(symbol: u8, slot_offset: i32) -> Self {
        Self { symbol, slot_offset }
    }

    /// Symbol position relative to the start of the served slot
    pub fn position(&self) -> i32 {
        self.symbol as i32 - NUM_SYMBOLS * self.slot_offset
    }

    /// Inverse of [`SymbolOffset::position`] for positions before the slot
    pub fn from_position(position: i32) -> Self {
        let slot_offset = (-position + NUM_SYMBOLS - 1).div_euclid(NUM_SYMBOLS);
        Self {
            symbol: (position + NUM_SYMBOLS * slot_offset) as u8,
            slot_offset,
        }
    }
}

fn to_symbol(offset_ns: u64, sym_ns: u64, rounding: Rounding) -> u64 {
    let sym = offset_ns / sym_ns;
    if rounding == Rounding::Up && offset_ns % sym_ns != 0 {
        sym + 1
    } else {
        sym
    }
}

/// Symbol at which an action `delay_us` ahead of the slot start must run
pub fn before_ota(delay_us: u32, mu: Numerology, rounding: Rounding) -> SymbolOffset {
    let interval = mu.tti_interval_us();
    let sym_ns = mu.symbol_duration_ns() as u64;

    let mut remaining = delay_us;
    let mut back = 0i32;
    while remaining > interval {
        remaining -= interval;
        back += 1;
    }

    let offset_ns = (interval - remaining) as u64 * 1000;
    let mut sym = to_symbol(offset_ns, sym_ns, rounding);
    let mut carry = 0;
    if sym >= SYMBOLS_PER_SLOT as u64 {
        sym -= SYMBOLS_PER_SLOT as u64;
        carry = 1;
    }
    SymbolOffset::new(sym as u8, back + 1 - carry)
}

/// Symbol at which an action `delay_us` after the slot start must run
pub fn after_ota(delay_us: u32, mu: Numerology, rounding: Rounding) -> SymbolOffset {
    let interval = mu.tti_interval_us();
    let sym_ns = mu.symbol_duration_ns() as u64;

    let mut remaining = delay_us;
    let mut fwd = 0i32;
    while remaining >= interval {
        remaining -= interval;
        fwd += 1;
    }

    let mut sym = to_symbol(remaining as u64 * 1000, sym_ns, rounding);
    let mut carry = 0;
    if sym >= SYMBOLS_PER_SLOT as u64 {
        sym -= SYMBOLS_PER_SLOT as u64;
        carry = 1;
    }
    SymbolOffset::new(sym as u8, -(fwd + carry))
}

/// One callback per symbol from `max_delay_us` down to `min_delay_us`
/// before the slot start
///
/// The earliest entry equals the burst position; a minimum at or above the
/// maximum leaves only that entry.
pub fn spread_before_ota(max_delay_us: u32, min_delay_us: u32, mu: Numerology) -> Vec<SymbolOffset> {
    let first = before_ota(max_delay_us, mu, Rounding::Up).position();
    let last = before_ota(min_delay_us, mu, Rounding::Down).position().max(first);
    (first..=last).map(SymbolOffset::from_position).collect()
}

/// Whole symbols in `delay_us`
fn symbols_in(delay_us: u32, mu: Numerology, rounding: Rounding) -> i32 {
    to_symbol(delay_us as u64 * 1000, mu.symbol_duration_ns() as u64, rounding) as i32
}

/// Deadline symbols derived from a [`DelayBudget`] for one numerology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineTable {
    pub mu: Numerology,
    /// DL C-Plane generation, burst mode
    pub dl_cp: SymbolOffset,
    /// DL C-Plane generation, spread mode
    pub dl_cp_spread: Vec<SymbolOffset>,
    /// UL C-Plane generation
    pub ul_cp: SymbolOffset,
    /// UL reception deadline, first half of the slot
    pub ul_rx_half: SymbolOffset,
    /// UL reception deadline, whole slot
    pub ul_rx_full: SymbolOffset,
    /// DL U-Plane transmit lead in symbols (negative)
    pub sym_up: i32,
    /// UL U-Plane arrival delay in symbols
    pub sym_up_ul: i32,
    /// O-RU UL U-Plane transmit
    pub ru_ul_up_tx: SymbolOffset,
    /// O-RU DL reception deadline
    pub ru_dl_rx: SymbolOffset,
}

impl DeadlineTable {
    pub fn derive(budget: &DelayBudget, mu: Numerology) -> Self {
        let dl_max = budget.t1a_max_cp_dl + budget.t_adv_cp_dl;
        let dl_min = budget.t1a_min_cp_dl + budget.t_adv_cp_dl;

        let ul_rx = after_ota(budget.ta4_max, mu, Rounding::Up);
        let ul_rx_full = SymbolOffset::new(ul_rx.symbol, ul_rx.slot_offset - 1);
        let half = ul_rx.symbol as i32 + NUM_SYMBOLS / 2;
        let ul_rx_half = if half >= NUM_SYMBOLS {
            SymbolOffset::new((half - NUM_SYMBOLS) as u8, ul_rx.slot_offset - 1)
        } else {
            SymbolOffset::new(half as u8, ul_rx.slot_offset)
        };

        let ru_rx = after_ota(budget.t2a_max_up, mu, Rounding::Up);

        Self {
            mu,
            dl_cp: before_ota(dl_max, mu, Rounding::Up),
            dl_cp_spread: spread_before_ota(dl_max, dl_min, mu),
            ul_cp: before_ota(budget.t1a_max_cp_ul, mu, Rounding::Up),
            ul_rx_half,
            ul_rx_full,
            sym_up: -symbols_in(budget.t1a_max_up, mu, Rounding::Up),
            sym_up_ul: symbols_in(budget.ta4_max, mu, Rounding::Down) + 1,
            ru_ul_up_tx: after_ota(budget.ta3_min, mu, Rounding::Up),
            ru_dl_rx: SymbolOffset::new(ru_rx.symbol, ru_rx.slot_offset - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    const MUS: [Numerology; 4] = [Numerology::MU0, Numerology::MU1, Numerology::MU2, Numerology::MU3];
    
    fn budget() -> DelayBudget {
        DelayBudget {
            t_adv_cp_dl: 0,
            t1a_max_cp_dl: 224,
            t1a_min_cp_dl: 100,
            t1a_max_cp_ul: 285,
            ta4_max: 331,
            ..DelayBudget::default()
        }
    }
    
    #[test]
    fn test_dl_cp_golden() {
        let expected = [(11, 1), (8, 1), (2, 1), (3, 2)];
        for (mu, (sym, off)) in MUS.iter().zip(expected) {
            assert_eq!(before_ota(224, *mu, Rounding::Up), SymbolOffset::new(sym, off), "mu {}", mu.value());
        }
    }
    
    #[test]
    fn test_ul_cp_golden() {
        let expected = [(11, 1), (7, 1), (13, 2), (11, 3)];
        for (mu, (sym, off)) in MUS.iter().zip(expected) {
            assert_eq!(before_ota(285, *mu, Rounding::Up), SymbolOffset::new(sym, off), "mu {}", mu.value());
        }
    }
    
    #[test]
    fn test_ul_rx_deadline_golden() {
        let full = [(5, -1), (10, -1), (5, -2), (10, -3)];
        let half = [(12, 0), (3, -1), (12, -1), (3, -3)];
        for (i, mu) in MUS.iter().enumerate() {
            let table = DeadlineTable::derive(&budget(), *mu);
            assert_eq!(table.ul_rx_full, SymbolOffset::new(full[i].0, full[i].1), "mu {}", mu.value());
            assert_eq!(table.ul_rx_half, SymbolOffset::new(half[i].0, half[i].1), "mu {}", mu.value());
        }
    }
    
    #[test]
    fn test_tadv_moves_dl_cp_earlier() {
        let budget = DelayBudget { t_adv_cp_dl: 125, ..budget() };
        let table = DeadlineTable::derive(&budget, Numerology::MU1);
        assert_eq!(table.dl_cp, SymbolOffset::new(5, 1));
    }
    
    #[test]
    fn test_spread_distribution() {
        let table = DeadlineTable::derive(&budget(), Numerology::MU1);
        let expected: Vec<SymbolOffset> = (8..=11).map(|s| SymbolOffset::new(s, 1)).collect();
        assert_eq!(table.dl_cp_spread, expected);
        assert_eq!(table.dl_cp_spread[0], table.dl_cp);
        
        // At mu 3 the window spans two slots
        let spread = DeadlineTable::derive(&budget(), Numerology::MU3).dl_cp_spread;
        assert_eq!(spread.len(), 14);
        assert_eq!(spread[0], SymbolOffset::new(3, 2));
        assert_eq!(spread[10], SymbolOffset::new(13, 2));
        assert_eq!(spread[11], SymbolOffset::new(0, 1));
        assert_eq!(spread[13], SymbolOffset::new(2, 1));
    }
    
    #[test]
    fn test_spread_collapses_to_burst() {
        let spread = spread_before_ota(224, 300, Numerology::MU1);
        assert_eq!(spread, vec![before_ota(224, Numerology::MU1, Rounding::Up)]);
    }
    
    #[test]
    fn test_position_roundtrip() {
        for position in -40..0 {
            assert_eq!(SymbolOffset::from_position(position).position(), position);
        }
        assert_eq!(SymbolOffset::from_position(-14), SymbolOffset::new(0, 1));
        assert_eq!(SymbolOffset::from_position(-15), SymbolOffset::new(13, 2));
    }
    
    #[test]
    fn test_exact_symbol_boundary() {
        // One whole slot ahead lands on symbol 0 of the previous slot
        assert_eq!(before_ota(500, Numerology::MU1, Rounding::Up), SymbolOffset::new(0, 1));
        assert_eq!(after_ota(500, Numerology::MU1, Rounding::Up), SymbolOffset::new(0, -1));
        assert_eq!(after_ota(0, Numerology::MU1, Rounding::Up), SymbolOffset::new(0, 0));
    }
    
    #[test]
    fn test_round_up_only_partial_symbols() {
        let sym_ns = Numerology::MU0.symbol_duration_ns() as u64;
        assert_eq!(to_symbol(3 * sym_ns, sym_ns, Rounding::Up), 3);
        assert_eq!(to_symbol(3 * sym_ns + 1, sym_ns, Rounding::Up), 4);
        assert_eq!(to_symbol(3 * sym_ns + 1, sym_ns, Rounding::Down), 3);
        // mu3 symbols are 8928 ns, so 1116 us is exactly 125 of them
        assert_eq!(symbols_in(1116, Numerology::MU3, Rounding::Up), 125);
        assert_eq!(symbols_in(1117, Numerology::MU3, Rounding::Up), 126);
    }
    
    #[test]
    fn test_derived_uplane_offsets() {
        let budget = DelayBudget::default();
        let table = DeadlineTable::derive(&budget, Numerology::MU1);
        // 196 us is 5.49 symbols of 35.714 us
        assert_eq!(table.sym_up, -6);
        // 75 us is 2.1 symbols
        assert_eq!(table.sym_up_ul, 3);
        // 20 us rounds up to symbol 1 of the same slot
        assert_eq!(table.ru_ul_up_tx, SymbolOffset::new(1, 0));
        // 428 us is 11.98 symbols
        assert_eq!(table.ru_dl_rx, SymbolOffset::new(12, -1));
    }
    
    #[test]
    fn test_budget_from_toml() {
        let budget: DelayBudget = toml::from_str("t1a_max_cp_dl = 224\nta4_max = 331").unwrap();
        assert_eq!(budget.t1a_max_cp_dl, 224);
        assert_eq!(budget.ta4_max, 331);
        assert_eq!(budget.t1a_max_up, DelayBudget::default().t1a_max_up);
    }
}
