//! Symbol Callback Scheduler
//! 
//! Fourteen buckets, one per OTA symbol, each holding the callbacks due on
//! that symbol. The tick path only looks up the bucket and hands every
//! callback to a worker; nothing runs inline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::{Numerology, SYMBOLS_PER_SLOT};
use interfaces::worker::{JobType, WorkerDispatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::clock::OtaTime;
use super::state::InterfaceState;
use super::{DeadlineTable, DelayBudget, Rounding, SymbolOffset};
use crate::section_db::ctx_id;
use crate::FhError;

const NUM_SYMBOLS: usize = SYMBOLS_PER_SLOT as usize;

/// How DL C-Plane generation is laid out over the symbols of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlCpMode {
    /// Whole slot on one symbol
    #[default]
    Burst,
    /// One part per symbol between the max and min delay
    Spread,
}

/// Side of the fronthaul this instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    ODu,
    ORu,
}

/// Application symbol callback kinds and their time reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymCbKind {
    /// The symbol itself
    Ota,
    /// Ta4_min after the symbol
    RxWinBegin,
    /// Ta4_max after the symbol
    RxWinEnd,
    /// T1a_max_up before the symbol
    TxWinBegin,
    /// T1a_min_up before the symbol
    TxWinEnd,
}

/// What a registered callback is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    DlCp,
    UlCp,
    UlRxHalf,
    UlRxFull,
    RuUlTx,
    RuDlRx,
    User(SymCbKind),
}

/// Context handed to a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEvent {
    pub mu: Numerology,
    /// OTA slot of the tick
    pub tti: u32,
    /// OTA symbol of the tick
    pub symbol: u8,
    /// Slot the callback acts on
    pub target_tti: u32,
    /// Rotation context of `target_tti`
    pub ctx_id: u8,
    pub kind: CallbackKind,
    /// Part of the slot's work, spread mode only
    pub part: u8,
    pub parts: u8,
}

pub type SymbolHandler = Arc<dyn Fn(SymbolEvent) + Send + Sync>;

/// Handlers wired by [`TimingContext::create_cbs`]; a missing handler
/// leaves its deadline unregistered
#[derive(Default, Clone)]
pub struct TimingHandlers {
    pub dl_cp: Option<SymbolHandler>,
    pub ul_cp: Option<SymbolHandler>,
    pub ul_rx_deadline: Option<SymbolHandler>,
    pub ru_ul_tx: Option<SymbolHandler>,
    pub ru_dl_rx: Option<SymbolHandler>,
}

#[derive(Clone)]
struct CallbackEntry {
    id: u64,
    kind: CallbackKind,
    job_type: JobType,
    slot_offset: i32,
    part: u8,
    parts: u8,
    handler: SymbolHandler,
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("slot_offset", &self.slot_offset)
            .field("part", &self.part)
            .field("parts", &self.parts)
            .finish()
    }
}

/// Tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub dispatched: u64,
    /// Callbacks not dispatched because the interface was not running
    pub skipped: u64,
    pub dispatch_errors: u64,
}

/// Per-numerology callback buckets
#[derive(Debug)]
pub struct TimingContext {
    budget: DelayBudget,
    table: DeadlineTable,
    buckets: [Vec<CallbackEntry>; NUM_SYMBOLS],
    user_cbs: HashMap<(SymCbKind, u8), u64>,
    state: InterfaceState,
    next_id: u64,
    stats: SchedulerStats,
}

impl TimingContext {
    pub fn new(mu: Numerology, budget: DelayBudget, state: InterfaceState) -> Self {
        Self {
            table: DeadlineTable::derive(&budget, mu),
            budget,
            buckets: Default::default(),
            user_cbs: HashMap::new(),
            state,
            next_id: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn numerology(&self) -> Numerology {
        self.table.mu
    }

    /// Derived deadline symbols
    pub fn table(&self) -> &DeadlineTable {
        &self.table
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Callbacks registered on `symbol`
    pub fn bucket_len(&self, symbol: u8) -> usize {
        self.buckets.get(symbol as usize).map_or(0, Vec::len)
    }

    /// Kinds and slot offsets registered on `symbol`, in firing order
    pub fn bucket(&self, symbol: u8) -> Vec<(CallbackKind, i32)> {
        self.buckets
            .get(symbol as usize)
            .map(|b| b.iter().map(|e| (e.kind, e.slot_offset)).collect())
            .unwrap_or_default()
    }

    fn ensure_stopped(&self) -> Result<(), FhError> {
        if self.state.is_running() {
            return Err(FhError::InvalidParam("callbacks cannot change while running".into()));
        }
        Ok(())
    }

    fn push(
        &mut self,
        at: SymbolOffset,
        kind: CallbackKind,
        job_type: JobType,
        part: u8,
        parts: u8,
        handler: SymbolHandler,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        debug!("{:?} on symbol {} for slot offset {} (part {}/{})", kind, at.symbol, at.slot_offset, part, parts);
        self.buckets[at.symbol as usize].push(CallbackEntry {
            id,
            kind,
            job_type,
            slot_offset: at.slot_offset,
            part,
            parts,
            handler,
        });
        id
    }

    /// Register the deadline callbacks of `role`
    pub fn create_cbs(&mut self, dl_cp_mode: DlCpMode, role: Role, handlers: TimingHandlers) -> Result<(), FhError> {
        self.ensure_stopped()?;
        let table = self.table.clone();

        match role {
            Role::ODu => {
                if let Some(handler) = handlers.dl_cp {
                    match dl_cp_mode {
                        DlCpMode::Burst => {
                            self.push(table.dl_cp, CallbackKind::DlCp, JobType::CpDl, 0, 1, handler);
                        }
                        DlCpMode::Spread => {
                            let parts = u8::try_from(table.dl_cp_spread.len()).map_err(|_| {
                                FhError::InvalidParam(format!("{} spread symbols", table.dl_cp_spread.len()))
                            })?;
                            for (part, at) in table.dl_cp_spread.iter().enumerate() {
                                self.push(*at, CallbackKind::DlCp, JobType::CpDl, part as u8, parts, handler.clone());
                            }
                        }
                    }
                }
                if let Some(handler) = handlers.ul_cp {
                    self.push(table.ul_cp, CallbackKind::UlCp, JobType::CpUl, 0, 1, handler);
                }
                if let Some(handler) = handlers.ul_rx_deadline {
                    self.push(table.ul_rx_full, CallbackKind::UlRxFull, JobType::Deadline, 0, 1, handler.clone());
                    self.push(table.ul_rx_half, CallbackKind::UlRxHalf, JobType::Deadline, 0, 1, handler);
                }
                info!(
                    "O-DU callbacks: DL C-Plane {:?} from symbol {}, UL C-Plane symbol {}, UL deadline symbol {}",
                    dl_cp_mode, table.dl_cp.symbol, table.ul_cp.symbol, table.ul_rx_full.symbol
                );
            }
            Role::ORu => {
                if let Some(handler) = handlers.ru_ul_tx {
                    self.push(table.ru_ul_up_tx, CallbackKind::RuUlTx, JobType::Deadline, 0, 1, handler);
                }
                if let Some(handler) = handlers.ru_dl_rx {
                    self.push(table.ru_dl_rx, CallbackKind::RuDlRx, JobType::Deadline, 0, 1, handler);
                }
                info!(
                    "O-RU callbacks: UL U-Plane symbol {}, DL reception symbol {}",
                    table.ru_ul_up_tx.symbol, table.ru_dl_rx.symbol
                );
            }
        }
        Ok(())
    }

    /// Remove every registered callback; returns how many were removed
    pub fn destroy_cbs(&mut self) -> usize {
        let removed = self.buckets.iter_mut().map(|bucket| bucket.drain(..).count()).sum();
        self.user_cbs.clear();
        info!("Removed {} symbol callbacks", removed);
        removed
    }

    /// Register an application callback for `symb` of `kind`
    ///
    /// Returns the OTA symbol the callback fires on.
    pub fn register_sym_cb(&mut self, kind: SymCbKind, symb: u8, cb: SymbolHandler) -> Result<u8, FhError> {
        self.ensure_stopped()?;
        if symb as usize >= NUM_SYMBOLS {
            return Err(FhError::InvalidParam(format!("symbol {} out of range", symb)));
        }

        let mu = self.table.mu;
        let sym_ns = mu.symbol_duration_ns() as u64;
        let symbols = |delay_us: u32, rounding: Rounding| -> i32 {
            let ns = delay_us as u64 * 1000;
            let n = ns / sym_ns;
            (if rounding == Rounding::Up && ns % sym_ns != 0 { n + 1 } else { n }) as i32
        };
        let diff = match kind {
            SymCbKind::Ota => 0,
            SymCbKind::RxWinBegin => symbols(self.budget.ta4_min, Rounding::Down),
            SymCbKind::RxWinEnd => symbols(self.budget.ta4_max, Rounding::Up),
            SymCbKind::TxWinBegin => -symbols(self.budget.t1a_max_up, Rounding::Down),
            SymCbKind::TxWinEnd => -symbols(self.budget.t1a_min_up, Rounding::Down),
        };

        let at = symb as i32 + diff;
        let ota = at.rem_euclid(NUM_SYMBOLS as i32) as u8;
        if self.user_cbs.contains_key(&(kind, ota)) {
            return Err(FhError::Resource(format!("{:?} callback already registered on symbol {}", kind, ota)));
        }

        let slot_offset = -at.div_euclid(NUM_SYMBOLS as i32);
        let id = self.push(
            SymbolOffset::new(ota, slot_offset),
            CallbackKind::User(kind),
            JobType::SymCb,
            0,
            1,
            cb,
        );
        self.user_cbs.insert((kind, ota), id);
        info!("Symbol {} {:?} callback fires on OTA symbol {}", symb, kind, ota);
        Ok(ota)
    }

    /// Remove the callback with `id`; returns false when no such callback exists
    pub fn remove_cb(&mut self, id: u64) -> Result<bool, FhError> {
        self.ensure_stopped()?;
        for bucket in self.buckets.iter_mut() {
            if let Some(pos) = bucket.iter().position(|entry| entry.id == id) {
                let entry = bucket.remove(pos);
                self.user_cbs.retain(|_, user_id| *user_id != id);
                debug!("Removed {:?} callback {}", entry.kind, id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove the `kind` application callback firing on OTA symbol `ota`
    pub fn remove_sym_cb(&mut self, kind: SymCbKind, ota: u8) -> Result<(), FhError> {
        let id = *self
            .user_cbs
            .get(&(kind, ota))
            .ok_or_else(|| FhError::InvalidParam(format!("no {:?} callback on symbol {}", kind, ota)))?;
        self.remove_cb(id)?;
        Ok(())
    }

    /// Id of the `kind` application callback firing on OTA symbol `ota`
    pub fn sym_cb_id(&self, kind: SymCbKind, ota: u8) -> Option<u64> {
        self.user_cbs.get(&(kind, ota)).copied()
    }

    /// Dispatch the callbacks due on `ota.symbol`
    ///
    /// Returns the number of callbacks handed to workers.
    pub fn on_symbol_tick(&mut self, ota: &OtaTime, dispatcher: &dyn WorkerDispatch) -> usize {
        self.stats.ticks += 1;
        let Some(bucket) = self.buckets.get(ota.symbol as usize) else {
            return 0;
        };
        if bucket.is_empty() {
            return 0;
        }
        if !self.state.is_running() {
            self.stats.skipped += bucket.len() as u64;
            return 0;
        }

        let mu = self.table.mu;
        let mut dispatched = 0;
        for entry in bucket {
            let target_tti = mu.slot_limit(ota.tti as i64 + entry.slot_offset as i64);
            let event = SymbolEvent {
                mu,
                tti: ota.tti,
                symbol: ota.symbol,
                target_tti,
                ctx_id: ctx_id(target_tti),
                kind: entry.kind,
                part: entry.part,
                parts: entry.parts,
            };
            let handler = entry.handler.clone();
            let worker = dispatcher.schedule_to_worker(entry.job_type);
            match dispatcher.dispatch(worker, Box::new(move || handler(event))) {
                Ok(()) => {
                    trace!("Dispatched {:?} for slot {} to worker {}", entry.kind, target_tti, worker);
                    dispatched += 1;
                }
                Err(e) => {
                    warn!("Failed to dispatch {:?} callback {}: {}", entry.kind, entry.id, e);
                    self.stats.dispatch_errors += 1;
                }
            }
        }
        self.stats.dispatched += dispatched as u64;
        dispatched
    }
}
