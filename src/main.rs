use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use datarec::args::{convert_filter, Args};
use datarec::capture::{self, StopReason};
use datarec::config::CaptureConfig;
use datarec::receiver;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    // Config must parse completely before any hardware is opened
    let cfg = CaptureConfig::from_ini(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    info!(
        "storing all files under {}, sample rate {:.2} Msps, gain {} dB",
        cfg.filepath, cfg.samplerate_msps, cfg.gain_db
    );
    for (i, chan) in cfg.channels.iter().enumerate() {
        info!(
            "channel {i}: device [{}] recording to {} at {:.2} MHz",
            chan.deviceaddr,
            cfg.output_path(i).display(),
            chan.centerfrq_mhz
        );
    }

    let mut rx = receiver::open(&cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    if cfg.continuous() {
        let flag = stop.clone();
        ctrlc::set_handler(move || {
            // Just raise the flag; the loop notices at its next iteration
            flag.store(true, Ordering::Relaxed);
        })
        .context("failed to install interrupt handler")?;
        info!("continuous capture, press ctrl-c to stop");
    }

    let report = capture::run(rx.as_mut(), &cfg, &stop)?;

    for chan in &report.channels {
        match &chan.result {
            Ok(bytes) => info!("{}: {} bytes", chan.path.display(), bytes),
            Err(e) => error!("{}", e),
        }
    }
    if report.stop == StopReason::Timeout {
        anyhow::bail!("stream timed out before completing; partial files were drained and closed");
    }
    Ok(())
}
