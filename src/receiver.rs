//! The receiver control boundary.
//!
//! Everything the acquisition loop needs from the hardware goes through the
//! [`Receiver`] trait: configuration calls before streaming starts, then a
//! blocking `recv` that yields one status-classified block per call. Backends
//! implement this for real hardware (the `uhd` feature) or for the built-in
//! simulator; tests substitute their own.

use std::fmt;

use thiserror::Error;

use crate::config::CaptureConfig;

#[derive(Debug, Error)]
pub enum RxError {
    #[error("device error: {0}")]
    Device(String),
    #[error("timed out waiting for a time reference edge")]
    SyncTimeout,
}

/// How the device clock and time are disciplined before streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Free-running: set device time immediately from the host
    Now,
    /// Discipline to an external PPS edge
    Pps,
    /// Slave to the MIMO cable of another unit
    Mimo,
}

impl SyncMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "now" => Some(Self::Now),
            "pps" => Some(Self::Pps),
            "mimo" => Some(Self::Mimo),
            _ => None,
        }
    }

    /// Clock source the hardware runs from in this mode
    pub fn clock_source(self) -> &'static str {
        match self {
            Self::Now => "internal",
            Self::Pps => "external",
            Self::Mimo => "mimo",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Now => "now",
            Self::Pps => "pps",
            Self::Mimo => "mimo",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Deliver exactly this many samples per channel, then stop
    FixedCount(u64),
    /// Stream until told otherwise
    Continuous,
}

/// Classification of one receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    Ok,
    /// The hardware produced nothing within its timeout - fatal for the run
    Timeout,
    /// The hardware could not deliver this block in time; it is gone
    Overflow,
    /// Any other per-block error, carried as the backend's raw code
    Other(i32),
}

#[derive(Debug, Clone, Copy)]
pub struct RecvMeta {
    /// Samples delivered per channel in this call
    pub num_samps: usize,
    pub status: RxStatus,
    /// Device time of the first sample, seconds
    pub time_secs: f64,
}

/// Blocking control and streaming interface to a multi-channel receiver.
///
/// Order of operations: `tune`/`set_gain`, then `synchronize`, then
/// `start_stream`, then `recv` in a loop, then `stop_stream`. Calls never
/// overlap; the acquisition loop is the only caller.
pub trait Receiver: Send {
    fn num_channels(&self) -> usize;

    /// Largest per-channel sample count a single `recv` can deliver
    fn max_samps(&self) -> usize;

    /// Tune one channel; returns the actually-tuned frequency in Hz
    fn tune(&mut self, chan: usize, freq_hz: f64) -> Result<f64, RxError>;

    /// Set receive gain on every channel
    fn set_gain(&mut self, gain_db: f64) -> Result<(), RxError>;

    /// Block until device time is valid for `mode`. For `pps` and `mimo` this
    /// waits on a real reference edge (on the order of a second) and fails
    /// with [`RxError::SyncTimeout`] if none arrives.
    fn synchronize(&mut self, mode: SyncMode) -> Result<(), RxError>;

    fn start_stream(&mut self, mode: StreamMode) -> Result<(), RxError>;

    /// Blocking receive into per-channel interleaved-IQ buffers. Every buffer
    /// must hold at least `2 * max_samps()` floats; `num_samps` in the
    /// returned meta says how many leading samples of each are valid.
    fn recv(&mut self, buffers: &mut [Vec<f32>]) -> RecvMeta;

    fn stop_stream(&mut self);
}

/// Open the backend the config asks for. Addresses starting with `sim`
/// select the simulator; anything else needs real hardware support.
pub fn open(cfg: &CaptureConfig) -> Result<Box<dyn Receiver>, RxError> {
    if cfg
        .channels
        .iter()
        .all(|c| c.deviceaddr.starts_with("sim"))
    {
        return Ok(Box::new(crate::sim::SimReceiver::open(cfg)));
    }
    #[cfg(feature = "uhd")]
    {
        Ok(Box::new(crate::uhd::UhdReceiver::open(cfg)?))
    }
    #[cfg(not(feature = "uhd"))]
    {
        Err(RxError::Device(
            "hardware device addresses given, but this build has no UHD support \
             (rebuild with --features uhd)"
                .into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_mode_parsing() {
        assert_eq!(SyncMode::parse("now"), Some(SyncMode::Now));
        assert_eq!(SyncMode::parse("pps"), Some(SyncMode::Pps));
        assert_eq!(SyncMode::parse("mimo"), Some(SyncMode::Mimo));
        assert_eq!(SyncMode::parse("external"), None);
    }

    #[test]
    fn sync_mode_selects_clock() {
        assert_eq!(SyncMode::Pps.clock_source(), "external");
        assert_eq!(SyncMode::Now.clock_source(), "internal");
        assert_eq!(SyncMode::Mimo.clock_source(), "mimo");
    }
}
