//! O-DU Fronthaul Driver
//! 
//! Runs the O-RAN 7.2x C-Plane against an emulated O-RU on an injected
//! OTA symbol clock.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod driver;

use config::FronthaulConfig;

/// O-RAN fronthaul C-Plane driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "fronthaul.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Slots to run, overriding the configuration
    #[arg(long)]
    run_slots: Option<u64>,

    /// Symbol tick pacing in microseconds, overriding the configuration
    #[arg(long)]
    tick_interval_us: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting O-DU fronthaul driver");
    info!("Configuration file: {}", args.config);

    let mut config = FronthaulConfig::load(&args.config)?;
    if let Some(slots) = args.run_slots {
        config.run_slots = slots;
    }
    if let Some(us) = args.tick_interval_us {
        config.tick_interval_us = us;
    }

    info!("Fronthaul configuration:");
    info!("  Numerology: {}", config.numerology.value());
    info!("  Carriers: {}, eAxC per carrier: {}", config.num_cc, config.num_eaxc);
    info!("  Category: {:?}, role: {:?}", config.category, config.role);
    info!("  Duplex: {:?}", config.duplex());
    info!("  DL C-Plane mode: {:?}", config.dl_cp_mode);
    info!("  MTU: {} bytes", config.mtu);

    match driver::run(config).await {
        Ok(summary) => {
            info!("Scheduler: {} ticks, {} callbacks dispatched, {} skipped",
                  summary.scheduler.ticks, summary.scheduler.dispatched, summary.scheduler.skipped);
            info!("O-RU: {} packets, {} sections, {} extension length mismatches, {} DSS mismatches",
                  summary.ru.rx_packets, summary.ru.sections, summary.ru.ext_len_mismatch, summary.ru.dss_mismatch);
            info!("UL reception deadlines: {}", summary.ul_deadlines);
        }
        Err(e) => {
            error!("Fronthaul driver failed: {:#}", e);
            return Err(e);
        }
    }

    info!("O-DU fronthaul driver shutdown complete");
    Ok(())
}
