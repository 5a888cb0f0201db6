//! The acquisition loop and channel pipeline lifecycle.
//!
//! One thread (the caller of [`run`]) talks to the hardware; N writer threads
//! drain the per-channel queues. The loop moves through configure, sync,
//! stream, drain. Queues are closed only after the loop has stopped producing,
//! and every writer is joined before [`run`] returns, so nothing in flight is
//! ever truncated.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::queue::{block_queue, BlockSender};
use crate::receiver::{Receiver, RxError, RxStatus, StreamMode};
use crate::writer::{self, WriterError};
use crate::SampleBlock;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Rx(#[from] RxError),
    #[error("failed to spawn writer thread: {0}")]
    Spawn(std::io::Error),
}

/// Why streaming ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Cancelled,
    /// The hardware went silent; treated as fatal for the run
    Timeout,
}

#[derive(Debug)]
pub struct ChannelReport {
    pub path: PathBuf,
    pub result: Result<u64, WriterError>,
}

#[derive(Debug)]
pub struct CaptureReport {
    /// Samples per channel accumulated from Ok blocks only
    pub total_samps: u64,
    /// Blocks lost to hardware overflow (dropped, never written)
    pub overflow_blocks: u64,
    pub stop: StopReason,
    pub channels: Vec<ChannelReport>,
}

struct ChannelPipeline {
    sender: BlockSender,
    handle: JoinHandle<Result<u64, WriterError>>,
    path: PathBuf,
    push_warned: bool,
}

/// Run a full capture: configure and sync the receiver, spin up one pipeline
/// per channel, stream until done, then drain and join everything.
///
/// A mid-stream receive timeout does not surface as an `Err` here - the drain
/// still has to happen - it comes back as [`StopReason::Timeout`] in the
/// report for the caller to turn into a failing exit.
pub fn run(
    rx: &mut dyn Receiver,
    cfg: &CaptureConfig,
    stop: &Arc<AtomicBool>,
) -> Result<CaptureReport, CaptureError> {
    // Configure every channel before touching time
    for (i, chan) in cfg.channels.iter().enumerate() {
        let actual_hz = rx.tune(i, chan.centerfrq_hz())?;
        info!(
            chan = i,
            requested_mhz = chan.centerfrq_mhz,
            actual_mhz = actual_hz / 1e6,
            "tuned"
        );
    }
    rx.set_gain(cfg.gain_db)?;

    // Sync must complete before any pipeline exists
    info!(mode = %cfg.sync, "synchronizing device time");
    rx.synchronize(cfg.sync)?;

    let mut pipelines = Vec::with_capacity(cfg.channels.len());
    for i in 0..cfg.channels.len() {
        let (sender, receiver) = block_queue();
        let path = cfg.output_path(i);
        let task_path = path.clone();
        let handle = thread::Builder::new()
            .name(format!("writer{i}"))
            .spawn(move || writer::write_channel(receiver, &task_path))
            .map_err(CaptureError::Spawn)?;
        pipelines.push(ChannelPipeline {
            sender,
            handle,
            path,
            push_warned: false,
        });
    }

    let mode = if cfg.continuous() {
        StreamMode::Continuous
    } else {
        StreamMode::FixedCount(cfg.total_num_samps)
    };
    rx.start_stream(mode)?;
    info!(
        "streaming started at {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let started = Instant::now();
    let (total_samps, overflow_blocks, stop_reason) =
        streaming(rx, &mut pipelines, cfg.total_num_samps, stop);
    rx.stop_stream();

    // Drain: production has stopped, so close every queue first, then wait
    // for every writer to finish flushing
    for (i, pipe) in pipelines.iter_mut().enumerate() {
        debug!(chan = i, depth = pipe.sender.depth(), "draining channel queue");
        pipe.sender.close();
    }
    let mut channels = Vec::with_capacity(pipelines.len());
    for (i, pipe) in pipelines.into_iter().enumerate() {
        let result = match pipe.handle.join() {
            Ok(res) => res,
            Err(_) => {
                error!(chan = i, "writer thread panicked");
                Err(WriterError::Io {
                    path: pipe.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "writer thread panicked",
                    ),
                })
            }
        };
        channels.push(ChannelReport {
            path: pipe.path,
            result,
        });
    }
    info!(
        total_samps,
        overflow_blocks,
        reason = ?stop_reason,
        elapsed = ?started.elapsed(),
        "capture drained"
    );

    Ok(CaptureReport {
        total_samps,
        overflow_blocks,
        stop: stop_reason,
        channels,
    })
}

/// The streaming state proper. Returns (accumulated samples, overflow blocks,
/// stop reason).
fn streaming(
    rx: &mut dyn Receiver,
    pipelines: &mut [ChannelPipeline],
    target_samps: u64,
    stop: &AtomicBool,
) -> (u64, u64, StopReason) {
    let max_samps = rx.max_samps();
    let mut buffers: Vec<Vec<f32>> = vec![vec![0.0; 2 * max_samps]; rx.num_channels()];
    let mut total = 0u64;
    let mut overflow_blocks = 0u64;
    let mut overflow_warned = false;

    loop {
        // Cooperative stop: only checked here, so a receive already in
        // flight always runs to completion
        if stop.load(Ordering::Relaxed) {
            info!("stop requested, leaving streaming");
            return (total, overflow_blocks, StopReason::Cancelled);
        }

        let meta = rx.recv(&mut buffers);
        match meta.status {
            RxStatus::Timeout => {
                error!("receive timed out mid-stream, aborting capture");
                return (total, overflow_blocks, StopReason::Timeout);
            }
            RxStatus::Overflow => {
                // The hardware couldn't deliver this block in time; it is
                // gone and does not count toward the target
                overflow_blocks += 1;
                if !overflow_warned {
                    overflow_warned = true;
                    warn!(
                        samples = meta.num_samps,
                        "hardware overflow, block dropped (further overflows counted silently)"
                    );
                }
            }
            RxStatus::Other(code) => {
                warn!(code, samples = meta.num_samps, "stream error, block dropped");
            }
            RxStatus::Ok => {
                for (pipe, buf) in pipelines.iter_mut().zip(buffers.iter()) {
                    let block =
                        SampleBlock::from_interleaved(buf[..2 * meta.num_samps].to_vec());
                    if !pipe.sender.push(block) && !pipe.push_warned {
                        pipe.push_warned = true;
                        warn!(
                            path = %pipe.path.display(),
                            "channel writer is gone, its samples are being dropped"
                        );
                    }
                }
                total += meta.num_samps as u64;
                if target_samps > 0 && total >= target_samps {
                    return (total, overflow_blocks, StopReason::TargetReached);
                }
            }
        }
    }
}
