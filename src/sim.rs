//! Simulated receiver backend.
//!
//! Selected when every configured device address starts with `sim`. Each
//! channel produces a unit-amplitude complex tone, paced at the configured
//! sample rate so the blocking behavior of `recv` (and therefore cancellation
//! latency) looks like the real thing. Useful for exercising the whole
//! pipeline on a machine with no radios attached.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::receiver::{Receiver, RecvMeta, RxError, RxStatus, StreamMode, SyncMode};

/// Samples per channel delivered by one recv call
const BLOCK_SAMPS: usize = 4096;

pub struct SimReceiver {
    num_channels: usize,
    samp_rate_hz: f64,
    /// Tone phase and per-sample phase step, one pair per channel
    phases: Vec<f32>,
    steps: Vec<f32>,
    /// Samples left to deliver in a fixed-count stream; `None` while continuous
    remaining: Option<u64>,
    time_secs: f64,
}

impl SimReceiver {
    pub fn open(cfg: &CaptureConfig) -> Self {
        let n = cfg.channels.len();
        info!(channels = n, "opened simulated receiver");
        // Tone at a different sub-multiple of the rate per channel so the
        // outputs are distinguishable
        let steps = (0..n)
            .map(|i| (i + 1) as f32 * std::f32::consts::TAU / 64.0)
            .collect();
        Self {
            num_channels: n,
            samp_rate_hz: cfg.samplerate_hz(),
            phases: vec![0.0; n],
            steps,
            remaining: None,
            time_secs: 0.0,
        }
    }
}

impl Receiver for SimReceiver {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_samps(&self) -> usize {
        BLOCK_SAMPS
    }

    fn tune(&mut self, chan: usize, freq_hz: f64) -> Result<f64, RxError> {
        debug!(chan, freq_hz, "sim tune (no-op)");
        Ok(freq_hz)
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<(), RxError> {
        Ok(())
    }

    fn synchronize(&mut self, mode: SyncMode) -> Result<(), RxError> {
        // Mimic the reference-edge wait of real hardware
        if mode != SyncMode::Now {
            thread::sleep(Duration::from_secs(1));
        }
        self.time_secs = 0.0;
        Ok(())
    }

    fn start_stream(&mut self, mode: StreamMode) -> Result<(), RxError> {
        self.remaining = match mode {
            StreamMode::FixedCount(n) => Some(n),
            StreamMode::Continuous => None,
        };
        Ok(())
    }

    fn recv(&mut self, buffers: &mut [Vec<f32>]) -> RecvMeta {
        let n = match self.remaining {
            // A finite stream that has delivered everything goes silent,
            // which the hardware reports as a timeout
            Some(0) => {
                return RecvMeta {
                    num_samps: 0,
                    status: RxStatus::Timeout,
                    time_secs: self.time_secs,
                }
            }
            Some(left) => (left as usize).min(BLOCK_SAMPS),
            None => BLOCK_SAMPS,
        };

        for (chan, buf) in buffers.iter_mut().enumerate() {
            let step = self.steps[chan];
            let mut phase = self.phases[chan];
            for k in 0..n {
                buf[2 * k] = phase.cos();
                buf[2 * k + 1] = phase.sin();
                phase = (phase + step) % std::f32::consts::TAU;
            }
            self.phases[chan] = phase;
        }

        // Pace delivery at the configured rate
        thread::sleep(Duration::from_secs_f64(n as f64 / self.samp_rate_hz));
        let meta = RecvMeta {
            num_samps: n,
            status: RxStatus::Ok,
            time_secs: self.time_secs,
        };
        self.time_secs += n as f64 / self.samp_rate_hz;
        if let Some(left) = self.remaining.as_mut() {
            *left -= n as u64;
        }
        meta
    }

    fn stop_stream(&mut self) {
        self.remaining = Some(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, ChannelConfig};

    fn sim_config(chans: usize, total: u64) -> CaptureConfig {
        CaptureConfig {
            filepath: String::new(),
            samplerate_msps: 10.0,
            gain_db: 0.0,
            total_num_samps: total,
            sync: SyncMode::Now,
            channels: (0..chans)
                .map(|i| ChannelConfig {
                    deviceaddr: "sim".into(),
                    filename: format!("chan{i}.dat"),
                    centerfrq_mhz: 100.0,
                })
                .collect(),
        }
    }

    #[test]
    fn fixed_stream_delivers_exact_count_then_times_out() {
        let cfg = sim_config(2, 6000);
        let mut rx = SimReceiver::open(&cfg);
        rx.start_stream(StreamMode::FixedCount(6000)).unwrap();
        let mut bufs = vec![vec![0.0f32; 2 * rx.max_samps()]; 2];

        let a = rx.recv(&mut bufs);
        assert_eq!((a.num_samps, a.status), (4096, RxStatus::Ok));
        let b = rx.recv(&mut bufs);
        assert_eq!((b.num_samps, b.status), (6000 - 4096, RxStatus::Ok));
        let c = rx.recv(&mut bufs);
        assert_eq!(c.status, RxStatus::Timeout);
    }

    #[test]
    fn tone_has_unit_amplitude() {
        let cfg = sim_config(1, 0);
        let mut rx = SimReceiver::open(&cfg);
        rx.start_stream(StreamMode::Continuous).unwrap();
        let mut bufs = vec![vec![0.0f32; 2 * rx.max_samps()]];
        let meta = rx.recv(&mut bufs);
        assert_eq!(meta.status, RxStatus::Ok);
        for iq in bufs[0][..2 * meta.num_samps].chunks_exact(2) {
            let mag = (iq[0] * iq[0] + iq[1] * iq[1]).sqrt();
            assert!((mag - 1.0).abs() < 1e-3);
        }
    }
}
