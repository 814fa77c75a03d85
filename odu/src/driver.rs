//! Fronthaul Driver
//! 
//! Wires the deadline scheduler to the C-Plane producer and feeds every
//! packet to an emulated O-RU that decodes it into its own section
//! database. OTA time is an injected symbol tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use common::Direction;
use fronthaul::cplane::{CpDecoder, CpEncoder, CpProducer, DecodeStats, PrbMap, RecvContext};
use fronthaul::cplane::producer::ProducerStats;
use fronthaul::frame::{FrameStructure, SlotType};
use fronthaul::section_db::{SectionDb, SectionKey};
use fronthaul::timing::{
    CallbackKind, InterfaceState, OtaClock, SchedulerStats, SymbolEvent, SymbolHandler, TimingContext,
    TimingHandlers,
};
use interfaces::ecpri::{EcpriFramer, ECPRI_HDR_LEN};
use interfaces::worker::WorkerPool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::FronthaulConfig;

/// Totals of one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub slots: u64,
    pub producer: ProducerStats,
    pub scheduler: SchedulerStats,
    pub ru: DecodeStats,
    pub ul_deadlines: u64,
}

/// State shared by the C-Plane callbacks
struct DuShared {
    producer: Mutex<CpProducer>,
    db: Mutex<SectionDb>,
    frame: FrameStructure,
    dl_map: PrbMap,
    ul_map: PrbMap,
    config: FronthaulConfig,
    tx: mpsc::UnboundedSender<Bytes>,
    ul_deadlines: AtomicU64,
}

impl DuShared {
    /// Build the C-Plane messages of one direction for the event's slot
    fn build(&self, dir: Direction, ev: SymbolEvent) {
        let ty = match dir {
            Direction::Dl => SlotType::Dl,
            Direction::Ul => SlotType::Ul,
        };
        if !self.frame.slot_type(ev.target_tti as i64, ty) {
            trace!("Slot {} carries no {:?}", ev.target_tti, dir);
            return;
        }
        let map = match dir {
            Direction::Dl => &self.dl_map,
            Direction::Ul => &self.ul_map,
        };
        let range = CpProducer::part_range(map, ev.part, ev.parts);
        if range.is_empty() && ev.part != 0 {
            return;
        }

        let (Ok(mut producer), Ok(mut db)) = (self.producer.lock(), self.db.lock()) else {
            error!("C-Plane state poisoned, dropping slot {}", ev.target_tti);
            return;
        };
        for cc in 0..self.config.num_cc {
            for port in 0..self.config.num_eaxc {
                let key = SectionKey::new(dir, cc, port, ev.ctx_id);
                if ev.part == 0 {
                    if let Err(e) = db.reset(key) {
                        error!("Section database reset failed: {}", e);
                        continue;
                    }
                }
                if range.is_empty() {
                    continue;
                }
                let built = producer.create_sections_for(
                    port,
                    dir,
                    ev.target_tti,
                    cc,
                    map,
                    range.clone(),
                    self.config.category,
                    ev.ctx_id,
                    &mut db,
                );
                match built {
                    Ok(packets) => {
                        for packet in packets {
                            if self.tx.send(packet.to_contiguous()).is_err() {
                                warn!("O-RU emulator gone, dropping C-Plane packet");
                            }
                        }
                    }
                    Err(e) => error!("{:?} C-Plane for slot {} cc {} port {} failed: {}", dir, ev.target_tti, cc, port, e),
                }
            }
        }
    }

    fn ul_deadline(&self, ev: SymbolEvent) {
        self.ul_deadlines.fetch_add(1, Ordering::Relaxed);
        let half = ev.kind == CallbackKind::UlRxHalf;
        trace!("UL reception deadline for slot {} (half slot: {})", ev.target_tti, half);
    }
}

/// Emulated O-RU: decode every C-Plane packet into its own database
async fn run_ru(config: FronthaulConfig, mut rx: mpsc::UnboundedReceiver<Bytes>) -> Result<DecodeStats> {
    let framer = EcpriFramer::new(config.eaxc_id, 0, 0)?;
    let dl_map = config.prb_map(Direction::Dl)?;
    let ul_map = config.prb_map(Direction::Ul)?;
    let carrier_prbs = config.carrier_prbs();
    let mut db = SectionDb::new(config.num_cc as usize, config.num_eaxc as usize)?;
    let mut decoder = CpDecoder::new();

    while let Some(packet) = rx.recv().await {
        let (_, eaxc) = match framer.parse_ecpri_header(&packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Bad eCPRI header: {}", e);
                continue;
            }
        };
        let payload = packet.slice(ECPRI_HDR_LEN..);
        let dir = Direction::from_bit(payload.first().map_or(0, |b| b >> 7));
        let ctx = RecvContext {
            prb_map: Some(match dir {
                Direction::Dl => &dl_map,
                Direction::Ul => &ul_map,
            }),
            dss: config.dss.as_ref(),
            carrier_prbs,
            tagging: config.section_id_tagging,
            ..RecvContext::new(config.numerology, eaxc.cc_id, eaxc.ru_port)
        };
        // Errors are counted and logged by the decoder
        let _ = decoder.decode(&payload, &ctx, &mut db);
    }

    debug!("O-RU emulator finished");
    Ok(*decoder.stats())
}

/// Run the fronthaul for `config.run_slots` slots or until Ctrl-C
pub async fn run(config: FronthaulConfig) -> Result<RunSummary> {
    let mu = config.numerology;
    let frame = config.frame_structure()?;
    let framer = EcpriFramer::new(config.eaxc_id, 0, 0)?;
    let encoder = CpEncoder::new(mu, config.section_id_tagging);
    let producer = CpProducer::new(encoder, framer, frame.clone(), config.mtu);
    let db = SectionDb::new(config.num_cc as usize, config.num_eaxc as usize)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let ru = tokio::spawn(run_ru(config.clone(), rx));

    let shared = Arc::new(DuShared {
        producer: Mutex::new(producer),
        db: Mutex::new(db),
        frame,
        dl_map: config.prb_map(Direction::Dl)?,
        ul_map: config.prb_map(Direction::Ul)?,
        config: config.clone(),
        tx,
        ul_deadlines: AtomicU64::new(0),
    });

    let dl: SymbolHandler = {
        let shared = shared.clone();
        Arc::new(move |ev| shared.build(Direction::Dl, ev))
    };
    let ul: SymbolHandler = {
        let shared = shared.clone();
        Arc::new(move |ev| shared.build(Direction::Ul, ev))
    };
    let deadline: SymbolHandler = {
        let shared = shared.clone();
        Arc::new(move |ev| shared.ul_deadline(ev))
    };

    let state = InterfaceState::new();
    let mut timing = TimingContext::new(mu, config.delay_budget, state.clone());
    timing.create_cbs(
        config.dl_cp_mode,
        config.role,
        TimingHandlers {
            dl_cp: Some(dl),
            ul_cp: Some(ul),
            ul_rx_deadline: Some(deadline),
            ..TimingHandlers::default()
        },
    )?;

    let pool = WorkerPool::spawn(config.workers)?;
    let mut clock = OtaClock::new(mu);
    let mut pacing = (config.tick_interval_us > 0)
        .then(|| tokio::time::interval(Duration::from_micros(config.tick_interval_us)));

    state.start()?;
    info!("Fronthaul running for {} slots at mu {}", config.run_slots, mu.value());

    loop {
        let now = clock.now();
        if now.abs_slot >= config.run_slots {
            break;
        }
        timing.on_symbol_tick(&now, &pool);
        clock.tick();

        match pacing.as_mut() {
            Some(interval) => {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }
            None => tokio::task::yield_now().await,
        }
    }

    state.stop();
    timing.destroy_cbs();
    pool.shutdown().await;

    let slots = clock.now().abs_slot;
    let ul_deadlines = shared.ul_deadlines.load(Ordering::Relaxed);
    let producer = match shared.producer.lock() {
        Ok(producer) => *producer.stats(),
        Err(_) => ProducerStats::default(),
    };
    // Last sender goes with the shared state
    drop(shared);
    let ru = ru.await??;

    let summary = RunSummary {
        slots,
        producer,
        scheduler: *timing.stats(),
        ru,
        ul_deadlines,
    };
    info!(
        "Ran {} slots: {} C-Plane packets sent, {} sections decoded by the O-RU, {} errors",
        summary.slots, summary.producer.packets, summary.ru.sections, summary.ru.error_packets
    );
    Ok(summary)
}
