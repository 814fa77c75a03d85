//! Numerology and Frame Model
//! 
//! Maps a numerology index (mu) to subcarrier spacing, TTI length and
//! slot counts, and provides frame/subframe/slot/symbol arithmetic as used
//! on the fronthaul (3GPP TS 38.211 section 4).

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::types::SubcarrierSpacing;

/// OFDM symbols per slot (normal cyclic prefix)
pub const SYMBOLS_PER_SLOT: u32 = 14;
/// Subframes per 10 ms radio frame
pub const SUBFRAMES_PER_FRAME: u32 = 10;
/// Highest numerology with a defined TTI interval
pub const MAX_NUMEROLOGY: u8 = 3;

/// TTI (slot) interval in microseconds per mu
const TTI_INTERVAL_US: [u32; 4] = [1000, 500, 250, 125];

/// Subcarrier spacing in kHz per mu (38.211 Table 4.2-1)
const SCS_KHZ: [u32; 5] = [15, 30, 60, 120, 240];

/// Maximum transmission bandwidth NRB, FR1 (38.101-1 Table 5.3.2-1)
const NUM_RBS_FR1_BW_MHZ: [u32; 13] = [5, 10, 15, 20, 25, 30, 40, 50, 60, 70, 80, 90, 100];
const NUM_RBS_FR1: [[u16; 13]; 3] = [
    [25, 52, 79, 106, 133, 160, 216, 270, 0, 0, 0, 0, 0],
    [11, 24, 38, 51, 65, 78, 106, 133, 162, 0, 217, 245, 273],
    [0, 11, 18, 24, 31, 38, 51, 65, 79, 0, 107, 121, 135],
];

/// Maximum transmission bandwidth NRB, FR2 (38.101-2 Table 5.3.2-1)
const NUM_RBS_FR2_BW_MHZ: [u32; 4] = [50, 100, 200, 400];
const NUM_RBS_FR2: [[u16; 4]; 2] = [
    [66, 132, 264, 0],
    [32, 66, 132, 264],
];

/// Point A frequency (kHz) above which the FR2 table applies
const FR1_MAX_POINT_A_KHZ: u32 = 6_000_000;

/// Numerology index (mu)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Numerology(u8);

impl Numerology {
    /// 15 kHz
    pub const MU0: Self = Self(0);
    /// 30 kHz
    pub const MU1: Self = Self(1);
    /// 60 kHz
    pub const MU2: Self = Self(2);
    /// 120 kHz
    pub const MU3: Self = Self(3);

    /// Create a numerology with validation
    pub fn new(mu: u8) -> Option<Self> {
        if mu <= MAX_NUMEROLOGY {
            Some(Self(mu))
        } else {
            None
        }
    }

    /// Create a numerology, falling back to mu=0 for out-of-range values
    pub fn new_or_default(mu: u8) -> Self {
        Self::new(mu).unwrap_or_else(|| {
            warn!("Numerology {} is not valid, falling back to 0", mu);
            Self::MU0
        })
    }

    /// Numerology index
    pub fn value(&self) -> u8 {
        self.0
    }

    /// TTI (slot) interval in microseconds
    pub fn tti_interval_us(&self) -> u32 {
        TTI_INTERVAL_US[self.0 as usize]
    }

    /// Subcarrier spacing
    pub fn scs(&self) -> SubcarrierSpacing {
        match self.0 {
            0 => SubcarrierSpacing::Scs15,
            1 => SubcarrierSpacing::Scs30,
            2 => SubcarrierSpacing::Scs60,
            _ => SubcarrierSpacing::Scs120,
        }
    }

    /// Number of slots per 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.0
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        self.slots_per_subframe() * SUBFRAMES_PER_FRAME
    }

    /// Symbol duration in nanoseconds (integer, truncated)
    pub fn symbol_duration_ns(&self) -> u32 {
        self.tti_interval_us() * 1000 / SYMBOLS_PER_SLOT
    }

    /// Number of slots in one second, the wrap point of the slot counter
    pub fn max_slots(&self) -> u32 {
        (1000 / self.tti_interval_us()) * 1000
    }

    /// Reduce an arbitrary (possibly negative) slot index into `[0, max_slots)`
    pub fn slot_limit(&self, tti: i64) -> u32 {
        tti.rem_euclid(self.max_slots() as i64) as u32
    }

    /// Split a slot index into its frame/subframe/slot position
    pub fn slot_time(&self, tti: u64) -> SlotTime {
        let sps = self.slots_per_subframe() as u64;
        SlotTime {
            frame_id: ((tti / (sps * SUBFRAMES_PER_FRAME as u64)) & 0xff) as u8,
            subframe_id: ((tti / sps) % SUBFRAMES_PER_FRAME as u64) as u8,
            slot_id: (tti % sps) as u8,
        }
    }

    /// Slot index within the 256-frame wire period for a header position
    pub fn tti_from_slot_time(&self, time: &SlotTime) -> u32 {
        (time.frame_id as u32 * SUBFRAMES_PER_FRAME + time.subframe_id as u32)
            * self.slots_per_subframe()
            + time.slot_id as u32
    }
}

impl TryFrom<u8> for Numerology {
    type Error = String;

    fn try_from(mu: u8) -> Result<Self, Self::Error> {
        Numerology::new(mu).ok_or_else(|| format!("invalid numerology {}", mu))
    }
}

impl From<Numerology> for u8 {
    fn from(mu: Numerology) -> u8 {
        mu.0
    }
}

/// Frame/subframe/slot position of a slot as carried in the C-Plane header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotTime {
    /// 8-bit frame id
    pub frame_id: u8,
    /// Subframe within the frame (0..9)
    pub subframe_id: u8,
    /// Slot within the subframe
    pub slot_id: u8,
}

/// TTI interval in microseconds, falling back to mu=0 for invalid values
pub fn tti_interval_us(mu: u8) -> u32 {
    Numerology::new_or_default(mu).tti_interval_us()
}

/// Subcarrier spacing in kHz for mu 0..4, or `None` when out of range
pub fn subcarrier_spacing_khz(mu: u8) -> Option<u32> {
    SCS_KHZ.get(mu as usize).copied()
}

/// Number of RBs of a carrier (38.101-1/-2 maximum transmission bandwidth)
///
/// Returns 0 when the numerology/bandwidth pair has no table entry.
pub fn num_rbs(mu: u8, bandwidth_mhz: u32, abs_freq_point_a_khz: u32) -> u16 {
    let num_rbs = if abs_freq_point_a_khz <= FR1_MAX_POINT_A_KHZ {
        NUM_RBS_FR1_BW_MHZ
            .iter()
            .position(|&bw| bw == bandwidth_mhz)
            .and_then(|idx| NUM_RBS_FR1.get(mu as usize).map(|row| row[idx]))
    } else if (2..=3).contains(&mu) {
        NUM_RBS_FR2_BW_MHZ
            .iter()
            .position(|&bw| bw == bandwidth_mhz)
            .map(|idx| NUM_RBS_FR2[mu as usize - 2][idx])
    } else {
        None
    };

    match num_rbs {
        Some(n) => {
            trace!("num_rbs: mu {} bw {} MHz point A {} kHz -> {}", mu, bandwidth_mhz, abs_freq_point_a_khz, n);
            n
        }
        None => {
            warn!("No RB table entry for mu {} bw {} MHz point A {} kHz", mu, bandwidth_mhz, abs_freq_point_a_khz);
            0
        }
    }
}

/// NR-ARFCN of a center frequency in kHz (38.104 section 5.4.2.1)
///
/// Returns 0 for frequencies outside the global raster.
pub fn nr_arfcn(center_freq_khz: u32) -> u32 {
    let (delta_f_global, f_offs, n_offs) = match center_freq_khz {
        1..=2_999_999 => (5, 0, 0),
        3_000_000..=24_249_999 => (15, 3_000_000, 600_000),
        24_250_000..=100_000_000 => (60, 24_250_080, 2_016_667),
        _ => {
            warn!("Center frequency {} kHz outside the NR raster", center_freq_khz);
            return 0;
        }
    };

    (center_freq_khz.saturating_sub(f_offs)) / delta_f_global + n_offs
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_tti_interval() {
        assert_eq!(tti_interval_us(0), 1000);
        assert_eq!(tti_interval_us(1), 500);
        assert_eq!(tti_interval_us(2), 250);
        assert_eq!(tti_interval_us(3), 125);
        // Out of range falls back to mu=0
        assert_eq!(tti_interval_us(4), 1000);
    }
    
    #[test]
    fn test_numerology_validation() {
        assert!(Numerology::new(3).is_some());
        assert!(Numerology::new(4).is_none());
        assert_eq!(Numerology::new_or_default(7), Numerology::MU0);
        assert_eq!(subcarrier_spacing_khz(4), Some(240));
        assert_eq!(subcarrier_spacing_khz(5), None);
    }
    
    #[test]
    fn test_symbol_duration() {
        assert_eq!(Numerology::MU0.symbol_duration_ns(), 71428);
        assert_eq!(Numerology::MU1.symbol_duration_ns(), 35714);
        assert_eq!(Numerology::MU2.symbol_duration_ns(), 17857);
        assert_eq!(Numerology::MU3.symbol_duration_ns(), 8928);
    }
    
    #[test]
    fn test_slot_time_round_trip() {
        let mu = Numerology::MU1;
        let time = mu.slot_time(2 * 20 + 2 * 3 + 1);
        assert_eq!(time, SlotTime { frame_id: 2, subframe_id: 3, slot_id: 1 });
        assert_eq!(mu.tti_from_slot_time(&time), 47);
    }
    
    #[test]
    fn test_slot_limit() {
        let mu = Numerology::MU1;
        assert_eq!(mu.max_slots(), 2000);
        assert_eq!(mu.slot_limit(2001), 1);
        assert_eq!(mu.slot_limit(-1), 1999);
    }
    
    #[test]
    fn test_num_rbs() {
        assert_eq!(num_rbs(1, 100, 3_500_000), 273);
        assert_eq!(num_rbs(0, 20, 1_800_000), 106);
        assert_eq!(num_rbs(3, 100, 27_000_000), 66);
        assert_eq!(num_rbs(0, 100, 1_800_000), 0);
        assert_eq!(num_rbs(1, 100, 27_000_000), 0);
    }
    
    #[test]
    fn test_nr_arfcn() {
        assert_eq!(nr_arfcn(1_842_500), 368_500);
        assert_eq!(nr_arfcn(3_500_000), 633_333);
        assert_eq!(nr_arfcn(0), 0);
    }
}
