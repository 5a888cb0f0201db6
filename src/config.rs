//! Capture configuration, read once at startup from an INI file.
//!
//! The file has a `[Global]` section (storage directory, sample rate, gain,
//! total sample count, time-sync mode) and one `[USRP<n>]` section per
//! channel, numbered from zero. Everything here is immutable after load;
//! components that need settings get a reference to the parsed value.

use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use thiserror::Error;

use crate::receiver::SyncMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] config::ConfigError),
    #[error("no channel sections found (expected at least [USRP0])")]
    NoChannels,
    #[error("total_num_samps must not be negative, got {0}")]
    NegativeSamps(i64),
    #[error("unknown sync mode '{0}' (expected now, pps or mimo)")]
    BadSyncMode(String),
}

/// One receive path: which device, where its samples go, where it's tuned
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub deviceaddr: String,
    pub filename: String,
    pub centerfrq_mhz: f64,
}

impl ChannelConfig {
    pub fn centerfrq_hz(&self) -> f64 {
        self.centerfrq_mhz * 1e6
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Storage directory prefix, concatenated directly with each filename
    pub filepath: String,
    pub samplerate_msps: f64,
    pub gain_db: f64,
    /// Samples to capture per channel; 0 means stream until interrupted
    pub total_num_samps: u64,
    pub sync: SyncMode,
    pub channels: Vec<ChannelConfig>,
}

impl CaptureConfig {
    pub fn from_ini(path: &Path) -> Result<Self, ConfigError> {
        let table = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;

        let filepath = table.get_string("Global.filepath")?;
        let samplerate_msps = table.get_float("Global.samplerate")?;
        let gain_db = table.get_float("Global.gain")?;
        let total = table.get_int("Global.total_num_samps")?;
        let total_num_samps =
            u64::try_from(total).map_err(|_| ConfigError::NegativeSamps(total))?;
        let sync_str = table.get_string("Global.sync")?;
        let sync = SyncMode::parse(&sync_str).ok_or(ConfigError::BadSyncMode(sync_str))?;

        // Channel sections are numbered from zero; stop at the first gap
        let mut channels = Vec::new();
        loop {
            let section = format!("USRP{}", channels.len());
            let deviceaddr = match table.get_string(&format!("{section}.deviceaddr")) {
                Ok(addr) => addr,
                Err(config::ConfigError::NotFound(_)) => break,
                Err(e) => return Err(e.into()),
            };
            channels.push(ChannelConfig {
                deviceaddr,
                filename: table.get_string(&format!("{section}.filename"))?,
                centerfrq_mhz: table.get_float(&format!("{section}.centerfrq"))?,
            });
        }
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        Ok(Self {
            filepath,
            samplerate_msps,
            gain_db,
            total_num_samps,
            sync,
            channels,
        })
    }

    pub fn samplerate_hz(&self) -> f64 {
        self.samplerate_msps * 1e6
    }

    pub fn continuous(&self) -> bool {
        self.total_num_samps == 0
    }

    /// Output file for a channel: filepath prefix + filename, as-is
    pub fn output_path(&self, chan: usize) -> PathBuf {
        PathBuf::from(format!("{}{}", self.filepath, self.channels[chan].filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const GOOD: &str = "\
[Global]
filepath = /data/
samplerate = 12.5
gain = 30
total_num_samps = 0
sync = pps

[USRP0]
deviceaddr = addr=192.168.10.2
filename = chan0.dat
centerfrq = 915.0

[USRP1]
deviceaddr = addr=192.168.10.3
filename = chan1.dat
centerfrq = 433.5
";

    #[test]
    fn parses_two_channels() {
        let f = write_ini(GOOD);
        let cfg = CaptureConfig::from_ini(f.path()).unwrap();
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.samplerate_hz(), 12.5e6);
        assert_eq!(cfg.sync, SyncMode::Pps);
        assert!(cfg.continuous());
        assert_eq!(cfg.output_path(1), PathBuf::from("/data/chan1.dat"));
        assert_eq!(cfg.channels[1].centerfrq_hz(), 433.5e6);
    }

    #[test]
    fn missing_key_is_fatal() {
        let f = write_ini("[Global]\nfilepath = /data/\n");
        assert!(matches!(
            CaptureConfig::from_ini(f.path()),
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn rejects_unknown_sync_mode() {
        let body = GOOD.replace("sync = pps", "sync = gps");
        let f = write_ini(&body);
        assert!(matches!(
            CaptureConfig::from_ini(f.path()),
            Err(ConfigError::BadSyncMode(_))
        ));
    }

    #[test]
    fn requires_at_least_one_channel() {
        let body = "\
[Global]
filepath = /data/
samplerate = 1
gain = 0
total_num_samps = 100
sync = now
";
        let f = write_ini(body);
        assert!(matches!(
            CaptureConfig::from_ini(f.path()),
            Err(ConfigError::NoChannels)
        ));
    }

    #[test]
    fn channel_numbering_stops_at_gap() {
        // A USRP2 section with no USRP1 is ignored, matching the numbering
        // contract rather than silently renumbering
        let body = format!(
            "{}\n[USRP3]\ndeviceaddr = a\nfilename = f\ncenterfrq = 1\n",
            GOOD
        );
        let f = write_ini(&body);
        let cfg = CaptureConfig::from_ini(f.path()).unwrap();
        assert_eq!(cfg.channels.len(), 2);
    }
}
