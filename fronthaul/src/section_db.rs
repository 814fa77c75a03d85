//! Section Information Database
//! 
//! Records every section built or received so the U-Plane path can look up
//! compression and beam parameters it does not carry itself. Buckets are
//! keyed by rotation context, direction, component carrier and eAxC; the
//! rotation context keeps slot N from aliasing entries of a slot still in
//! flight.

use common::{Direction, SYMBOLS_PER_SLOT};
use tracing::{debug, trace};

use crate::cplane::SectionInfo;
use crate::FhError;

/// Sections held by one bucket (PRBs of a full band)
pub const MAX_NUM_SECTIONS: usize = 66;
/// Rotation contexts; slot `tti` uses context `tti % MAX_SECTIONDB_CTX`
pub const MAX_SECTIONDB_CTX: usize = 4;

/// Rotation context of slot `tti`
pub fn ctx_id(tti: u32) -> u8 {
    (tti % MAX_SECTIONDB_CTX as u32) as u8
}

/// Address of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionKey {
    pub dir: Direction,
    pub cc: u8,
    pub eaxc: u8,
    pub ctx: u8,
}

impl SectionKey {
    pub fn new(dir: Direction, cc: u8, eaxc: u8, ctx: u8) -> Self {
        Self { dir, cc, eaxc, ctx }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    entries: Vec<SectionInfo>,
    cur_index: usize,
}

/// Fixed-capacity section records of one instance and numerology
#[derive(Debug, Clone)]
pub struct SectionDb {
    num_cc: usize,
    num_eaxc: usize,
    capacity: usize,
    buckets: Vec<Bucket>,
}

fn alloc_entries(capacity: usize) -> Result<Vec<SectionInfo>, FhError> {
    let mut entries = Vec::new();
    entries
        .try_reserve_exact(capacity)
        .map_err(|e| FhError::Resource(format!("section database allocation: {}", e)))?;
    entries.resize(capacity, SectionInfo::default());
    Ok(entries)
}

impl SectionDb {
    /// One bucket per (ctx, dir, cc, eAxC), each holding `MAX_NUM_SECTIONS`
    pub fn new(num_cc: usize, num_eaxc: usize) -> Result<Self, FhError> {
        Self::with_capacity(num_cc, num_eaxc, MAX_NUM_SECTIONS)
    }

    /// Same as [`SectionDb::new`] with a custom per-bucket capacity
    pub fn with_capacity(num_cc: usize, num_eaxc: usize, capacity: usize) -> Result<Self, FhError> {
        if num_cc == 0 || num_eaxc == 0 || num_cc > u8::MAX as usize || num_eaxc > u8::MAX as usize {
            return Err(FhError::InvalidParam(format!(
                "section database for {} carriers x {} eAxC",
                num_cc, num_eaxc
            )));
        }

        let num_buckets = MAX_SECTIONDB_CTX * Direction::ALL.len() * num_cc * num_eaxc;
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(num_buckets)
            .map_err(|e| FhError::Resource(format!("section database allocation: {}", e)))?;
        for _ in 0..num_buckets {
            buckets.push(Bucket {
                entries: alloc_entries(capacity)?,
                cur_index: 0,
            });
        }

        debug!(
            "Section database: {} buckets of {} sections ({} CC x {} eAxC)",
            num_buckets, capacity, num_cc, num_eaxc
        );
        Ok(Self { num_cc, num_eaxc, capacity, buckets })
    }

    /// Sections per bucket
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, key: SectionKey) -> Result<usize, FhError> {
        if key.ctx as usize >= MAX_SECTIONDB_CTX || key.cc as usize >= self.num_cc || key.eaxc as usize >= self.num_eaxc {
            return Err(FhError::InvalidParam(format!("section database key {:?} out of range", key)));
        }
        let idx = ((key.ctx as usize * Direction::ALL.len() + key.dir.index()) * self.num_cc + key.cc as usize)
            * self.num_eaxc
            + key.eaxc as usize;
        Ok(idx)
    }

    fn bucket(&self, key: SectionKey) -> Option<&Bucket> {
        self.index(key).ok().map(|idx| &self.buckets[idx])
    }

    fn bucket_mut(&mut self, key: SectionKey) -> Result<&mut Bucket, FhError> {
        let idx = self.index(key)?;
        Ok(&mut self.buckets[idx])
    }

    /// Append a copy of `info`; a full bucket is left untouched
    pub fn add(&mut self, key: SectionKey, info: &SectionInfo) -> Result<(), FhError> {
        let slot = self.reserve_next(key)?;
        *slot = info.clone();
        trace!("Section {} recorded for {:?}", info.id, key);
        Ok(())
    }

    /// Claim the next free entry, cleared, and advance the cursor
    pub fn reserve_next(&mut self, key: SectionKey) -> Result<&mut SectionInfo, FhError> {
        let bucket = self.bucket_mut(key)?;
        if bucket.cur_index >= bucket.entries.len() {
            return Err(FhError::Resource(format!(
                "section database bucket {:?} full ({} sections)",
                key,
                bucket.entries.len()
            )));
        }
        let idx = bucket.cur_index;
        bucket.cur_index += 1;
        let entry = &mut bucket.entries[idx];
        *entry = SectionInfo::default();
        Ok(entry)
    }

    /// First live section with `id`
    pub fn find_by_id(&self, key: SectionKey, id: u16) -> Option<&SectionInfo> {
        self.entries(key).iter().find(|info| info.id == id)
    }

    /// Rewind the cursor of one bucket
    pub fn reset(&mut self, key: SectionKey) -> Result<(), FhError> {
        self.bucket_mut(key)?.cur_index = 0;
        Ok(())
    }

    /// Rewind every bucket of rotation context `ctx`
    pub fn reset_ctx(&mut self, ctx: u8) -> Result<(), FhError> {
        for dir in Direction::ALL {
            for cc in 0..self.num_cc as u8 {
                for eaxc in 0..self.num_eaxc as u8 {
                    self.reset(SectionKey::new(dir, cc, eaxc, ctx))?;
                }
            }
        }
        Ok(())
    }

    /// Live section at `*cursor`, advancing the cursor
    pub fn iterate(&self, key: SectionKey, cursor: &mut usize) -> Option<&SectionInfo> {
        let info = self.entries(key).get(*cursor)?;
        *cursor += 1;
        Some(info)
    }

    /// Number of live sections
    pub fn size(&self, key: SectionKey) -> usize {
        self.bucket(key).map_or(0, |b| b.cur_index)
    }

    /// Live section at `index`
    pub fn get(&self, key: SectionKey, index: usize) -> Option<&SectionInfo> {
        self.entries(key).get(index)
    }

    /// Live sections in insertion order
    pub fn entries(&self, key: SectionKey) -> &[SectionInfo] {
        match self.bucket(key) {
            Some(bucket) => &bucket.entries[..bucket.cur_index],
            None => &[],
        }
    }

    /// U-Plane lookup: the live section covering `prb` on `symbol`
    pub fn lookup_prb(&self, key: SectionKey, symbol: u8, prb: u16) -> Option<&SectionInfo> {
        if symbol as u32 >= SYMBOLS_PER_SLOT {
            return None;
        }
        self.entries(key).iter().find(|info| {
            let sym_end = info.start_sym_id as u32 + info.num_symbol as u32;
            let prb_end = info.start_prbc as u32 + info.num_prbc as u32;
            (info.start_sym_id as u32..sym_end).contains(&(symbol as u32))
                && (info.all_prbs || (info.start_prbc as u32..prb_end).contains(&(prb as u32)))
        })
    }
}
