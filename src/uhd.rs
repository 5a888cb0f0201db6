//! UHD hardware backend (enabled with the `uhd` cargo feature).
//!
//! Minimal hand-written bindings to the UHD C API, enough to open a
//! multi-device receiver, discipline its time, and stream fc32 samples from
//! every channel in lockstep. `build.rs` adds the libuhd link flag when the
//! feature is on.

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::config::CaptureConfig;
use crate::receiver::{Receiver, RecvMeta, RxError, RxStatus, StreamMode, SyncMode};

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;

type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;

const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;

const UHD_STREAM_MODE_START_CONTINUOUS: c_int = 97;
const UHD_STREAM_MODE_NUM_SAMPS_AND_DONE: c_int = 100;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;

const UHD_RX_METADATA_ERROR_CODE_NONE: c_int = 0x0;
const UHD_RX_METADATA_ERROR_CODE_TIMEOUT: c_int = 0x1;
const UHD_RX_METADATA_ERROR_CODE_OVERFLOW: c_int = 0x8;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_set_clock_source(
        h: UhdUsrpHandle,
        source: *const c_char,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_set_time_source(
        h: UhdUsrpHandle,
        source: *const c_char,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_set_rx_gain(
        h: UhdUsrpHandle,
        gain: c_double,
        chan: usize,
        gain_name: *const c_char,
    ) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_set_time_now(
        h: UhdUsrpHandle,
        full_secs: i64,
        frac_secs: c_double,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_set_time_unknown_pps(
        h: UhdUsrpHandle,
        full_secs: i64,
        frac_secs: c_double,
    ) -> UhdError;
    fn uhd_usrp_get_time_last_pps(
        h: UhdUsrpHandle,
        mboard: usize,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
    fn uhd_usrp_get_rx_stream(
        h: UhdUsrpHandle,
        stream_args: *mut UhdStreamArgs,
        h_out: UhdRxStreamerHandle,
    ) -> UhdError;

    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_max_num_samps(
        h: UhdRxStreamerHandle,
        max_num_samps_out: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(
        h: UhdRxStreamerHandle,
        stream_cmd: *const UhdStreamCmd,
    ) -> UhdError;

    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_error_code(
        h: UhdRxMetadataHandle,
        error_code_out: *mut c_int,
    ) -> UhdError;
    fn uhd_rx_metadata_time_spec(
        h: UhdRxMetadataHandle,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
}

fn check(err: UhdError, what: &str) -> Result<(), RxError> {
    if err == UHD_ERROR_NONE {
        Ok(())
    } else {
        Err(RxError::Device(format!("{what} failed: error {err}")))
    }
}

pub struct UhdReceiver {
    usrp: UhdUsrpHandle,
    rx_streamer: UhdRxStreamerHandle,
    md: UhdRxMetadataHandle,
    max_samps: usize,
    num_channels: usize,
}

// The raw handles are only ever touched from the acquisition thread; they are
// moved there once and never shared.
unsafe impl Send for UhdReceiver {}

impl UhdReceiver {
    /// Open every configured device as one multi-channel receiver, set the
    /// clock source implied by the sync mode, and set the sample rate.
    pub fn open(cfg: &CaptureConfig) -> Result<Self, RxError> {
        let dev_args = cfg
            .channels
            .iter()
            .enumerate()
            .map(|(i, c)| format!("addr{i}={}", c.deviceaddr))
            .collect::<Vec<_>>()
            .join(",");
        let dev_args = CString::new(dev_args)
            .map_err(|e| RxError::Device(format!("bad device address: {e}")))?;
        let num_channels = cfg.channels.len();

        unsafe {
            let mut usrp: UhdUsrpHandle = ptr::null_mut();
            check(uhd_usrp_make(&mut usrp, dev_args.as_ptr()), "uhd_usrp_make")?;
            info!(channels = num_channels, "opened UHD receiver");

            let clock = CString::new(cfg.sync.clock_source()).expect("static str");
            for mboard in 0..num_channels {
                let err = uhd_usrp_set_clock_source(usrp, clock.as_ptr(), mboard);
                if err != UHD_ERROR_NONE {
                    uhd_usrp_free(&mut usrp);
                    return Err(RxError::Device(format!(
                        "uhd_usrp_set_clock_source failed: error {err}"
                    )));
                }
            }

            for chan in 0..num_channels {
                let err = uhd_usrp_set_rx_rate(usrp, cfg.samplerate_hz(), chan);
                if err != UHD_ERROR_NONE {
                    uhd_usrp_free(&mut usrp);
                    return Err(RxError::Device(format!(
                        "uhd_usrp_set_rx_rate failed: error {err}"
                    )));
                }
            }

            // Streamer, metadata and the fc32 stream itself
            let mut rx_streamer: UhdRxStreamerHandle = ptr::null_mut();
            let err = uhd_rx_streamer_make(&mut rx_streamer);
            if err != UHD_ERROR_NONE {
                uhd_usrp_free(&mut usrp);
                return Err(RxError::Device(format!(
                    "uhd_rx_streamer_make failed: error {err}"
                )));
            }
            let mut md: UhdRxMetadataHandle = ptr::null_mut();
            let err = uhd_rx_metadata_make(&mut md);
            if err != UHD_ERROR_NONE {
                uhd_rx_streamer_free(&mut rx_streamer);
                uhd_usrp_free(&mut usrp);
                return Err(RxError::Device(format!(
                    "uhd_rx_metadata_make failed: error {err}"
                )));
            }

            let mut rx = Self {
                usrp,
                rx_streamer,
                md,
                max_samps: 0,
                num_channels,
            };

            let cpu_fmt = CString::new("fc32").expect("static str");
            let otw_fmt = CString::new("sc16").expect("static str");
            let stream_args_str = CString::new("").expect("static str");
            let mut channel_list: Vec<usize> = (0..num_channels).collect();
            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu_fmt.as_ptr() as *mut c_char,
                otw_format: otw_fmt.as_ptr() as *mut c_char,
                args: stream_args_str.as_ptr() as *mut c_char,
                channel_list: channel_list.as_mut_ptr(),
                n_channels: num_channels as c_int,
            };
            check(
                uhd_usrp_get_rx_stream(rx.usrp, &mut stream_args, rx.rx_streamer),
                "uhd_usrp_get_rx_stream",
            )?;

            let mut max_samps = 0usize;
            check(
                uhd_rx_streamer_max_num_samps(rx.rx_streamer, &mut max_samps),
                "uhd_rx_streamer_max_num_samps",
            )?;
            rx.max_samps = max_samps;
            Ok(rx)
        }
    }
}

impl Receiver for UhdReceiver {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_samps(&self) -> usize {
        self.max_samps
    }

    fn tune(&mut self, chan: usize, freq_hz: f64) -> Result<f64, RxError> {
        let mut req = UhdTuneRequest {
            target_freq: freq_hz,
            rf_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            rf_freq: 0.0,
            dsp_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            dsp_freq: 0.0,
            args: ptr::null_mut(),
        };
        let mut result = UhdTuneResult {
            clipped_rf_freq: 0.0,
            target_rf_freq: 0.0,
            actual_rf_freq: 0.0,
            target_dsp_freq: 0.0,
            actual_dsp_freq: 0.0,
        };
        unsafe {
            check(
                uhd_usrp_set_rx_freq(self.usrp, &mut req, chan, &mut result),
                "uhd_usrp_set_rx_freq",
            )?;
        }
        Ok(result.actual_rf_freq + result.actual_dsp_freq)
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<(), RxError> {
        let empty = CString::new("").expect("static str");
        for chan in 0..self.num_channels {
            unsafe {
                check(
                    uhd_usrp_set_rx_gain(self.usrp, gain_db, chan, empty.as_ptr()),
                    "uhd_usrp_set_rx_gain",
                )?;
            }
        }
        Ok(())
    }

    fn synchronize(&mut self, mode: SyncMode) -> Result<(), RxError> {
        unsafe {
            match mode {
                SyncMode::Now => {
                    for mboard in 0..self.num_channels {
                        check(
                            uhd_usrp_set_time_now(self.usrp, 0, 0.0, mboard),
                            "uhd_usrp_set_time_now",
                        )?;
                    }
                }
                SyncMode::Pps => {
                    // Aligns all motherboards to the edge after next; blocks
                    // internally for up to two PPS periods
                    check(
                        uhd_usrp_set_time_unknown_pps(self.usrp, 0, 0.0),
                        "uhd_usrp_set_time_unknown_pps",
                    )?;
                    // Verify an edge is actually arriving: the last-PPS time
                    // must advance over a one-second-plus window
                    let mut before_full = 0i64;
                    let mut frac = 0.0f64;
                    check(
                        uhd_usrp_get_time_last_pps(self.usrp, 0, &mut before_full, &mut frac),
                        "uhd_usrp_get_time_last_pps",
                    )?;
                    thread::sleep(Duration::from_millis(1100));
                    let mut after_full = 0i64;
                    check(
                        uhd_usrp_get_time_last_pps(self.usrp, 0, &mut after_full, &mut frac),
                        "uhd_usrp_get_time_last_pps",
                    )?;
                    if after_full == before_full {
                        return Err(RxError::SyncTimeout);
                    }
                }
                SyncMode::Mimo => {
                    // Board 0 is the time master; the others follow the MIMO
                    // cable
                    let mimo = CString::new("mimo").expect("static str");
                    for mboard in 1..self.num_channels {
                        check(
                            uhd_usrp_set_time_source(self.usrp, mimo.as_ptr(), mboard),
                            "uhd_usrp_set_time_source",
                        )?;
                    }
                    check(
                        uhd_usrp_set_time_now(self.usrp, 0, 0.0, 0),
                        "uhd_usrp_set_time_now",
                    )?;
                    // Give the slaves a moment to latch the master's time
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
        Ok(())
    }

    fn start_stream(&mut self, mode: StreamMode) -> Result<(), RxError> {
        let cmd = match mode {
            StreamMode::FixedCount(n) => UhdStreamCmd {
                stream_mode: UHD_STREAM_MODE_NUM_SAMPS_AND_DONE,
                num_samps: n as usize,
                stream_now: true,
                time_spec_full_secs: 0,
                time_spec_frac_secs: 0.0,
            },
            StreamMode::Continuous => UhdStreamCmd {
                stream_mode: UHD_STREAM_MODE_START_CONTINUOUS,
                num_samps: 0,
                stream_now: true,
                time_spec_full_secs: 0,
                time_spec_frac_secs: 0.0,
            },
        };
        unsafe {
            check(
                uhd_rx_streamer_issue_stream_cmd(self.rx_streamer, &cmd),
                "uhd_rx_streamer_issue_stream_cmd",
            )
        }
    }

    fn recv(&mut self, buffers: &mut [Vec<f32>]) -> RecvMeta {
        let mut buff_ptrs: Vec<*mut c_void> = buffers
            .iter_mut()
            .map(|b| b.as_mut_ptr() as *mut c_void)
            .collect();
        let mut num_rx = 0usize;

        unsafe {
            let err = uhd_rx_streamer_recv(
                self.rx_streamer,
                buff_ptrs.as_mut_ptr(),
                self.max_samps,
                &mut self.md,
                3.0,
                false,
                &mut num_rx,
            );
            if err != UHD_ERROR_NONE {
                return RecvMeta {
                    num_samps: num_rx,
                    status: RxStatus::Other(err),
                    time_secs: 0.0,
                };
            }

            let mut code: c_int = 0;
            uhd_rx_metadata_error_code(self.md, &mut code);
            let mut full = 0i64;
            let mut frac = 0.0f64;
            uhd_rx_metadata_time_spec(self.md, &mut full, &mut frac);

            let status = match code {
                UHD_RX_METADATA_ERROR_CODE_NONE => RxStatus::Ok,
                UHD_RX_METADATA_ERROR_CODE_TIMEOUT => RxStatus::Timeout,
                UHD_RX_METADATA_ERROR_CODE_OVERFLOW => RxStatus::Overflow,
                other => RxStatus::Other(other),
            };
            RecvMeta {
                num_samps: num_rx,
                status,
                time_secs: full as f64 + frac,
            }
        }
    }

    fn stop_stream(&mut self) {
        let cmd = UhdStreamCmd {
            stream_mode: UHD_STREAM_MODE_STOP_CONTINUOUS,
            num_samps: 0,
            stream_now: true,
            time_spec_full_secs: 0,
            time_spec_frac_secs: 0.0,
        };
        unsafe {
            let _ = uhd_rx_streamer_issue_stream_cmd(self.rx_streamer, &cmd);
        }
    }
}

impl Drop for UhdReceiver {
    fn drop(&mut self) {
        unsafe {
            uhd_rx_metadata_free(&mut self.md);
            uhd_rx_streamer_free(&mut self.rx_streamer);
            uhd_usrp_free(&mut self.usrp);
        }
    }
}
