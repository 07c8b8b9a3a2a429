//! Durable sweep storage.
//!
//! The persister talks to storage through one capability, [`PulseSink`]: record the modes in
//! effect, record occasional geographic fixes and parameter changes, write completed sweeps,
//! and flush. Two implementations exist, chosen by `storage.backend`:
//!
//! - [`capture_db::CaptureDb`]: SQLite, one row per pulse, batched transactions, bounded
//!   retention by sweep count.
//! - [`sweep_file::SweepFileWriter`]: one self-describing binary file per sweep.
//!
//! Storage errors are always fatal to the capture session: a capture that cannot persist
//! must stop rather than discard samples.

pub mod capture_db;
pub mod sweep_file;

use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec::SampleFormat;
use crate::config::CaptureConfig;
use crate::error::{AppResult, CaptureError};
use crate::sweep::Sweep;

/// Which storage implementation receives sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite database.
    #[default]
    Database,
    /// One binary file per sweep.
    SweepFile,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Database => "database",
            Self::SweepFile => "sweep_file",
        })
    }
}

/// Radar transmitter mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarMode {
    /// Pulse power, watts.
    pub power: f64,
    /// Pulse length, nanoseconds.
    pub plen: f64,
    /// Nominal pulse repetition frequency, Hz.
    pub prf: f64,
    /// Antenna rotation rate, RPM.
    pub rpm: f64,
}

/// Digitizer mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigitizeMode {
    /// Stored sample rate, Hz.
    pub rate: f64,
    /// Sample width and packing.
    pub format: SampleFormat,
    /// Samples per pulse.
    pub ns: usize,
}

impl DigitizeMode {
    /// Bytes of one stored pulse.
    pub fn bytes_per_pulse(&self) -> usize {
        self.format.bytes_per_pulse(self.ns)
    }
}

/// Which samples of each pulse are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainMode {
    /// Every sample of every pulse.
    #[default]
    Full,
}

impl RetainMode {
    /// Name stored in the `retain_modes` table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "full",
        }
    }
}

impl FromStr for RetainMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            other => Err(CaptureError::Configuration(format!(
                "non-existent retain mode '{other}'"
            ))),
        }
    }
}

/// Geographic fix of the radar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    /// Time of the fix, seconds since the epoch.
    pub ts: f64,
    /// Latitude, degrees north.
    pub lat: f64,
    /// Longitude, degrees east.
    pub lon: f64,
    /// Altitude, metres above sea level.
    pub alt: f64,
    /// Heading offset, degrees clockwise from true north.
    pub heading: f64,
}

/// A timestamped parameter change, e.g. a gain setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSetting {
    /// Time the setting took effect, seconds since the epoch.
    pub ts: f64,
    /// Parameter name.
    pub param: String,
    /// New value.
    pub val: f64,
}

/// Accepts decoded sweeps plus the metadata needed to interpret them.
pub trait PulseSink {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Record the radar mode in effect for subsequent pulses.
    fn set_radar_mode(&mut self, mode: &RadarMode) -> AppResult<()>;

    /// Record the digitizer mode in effect for subsequent pulses.
    fn set_digitize_mode(&mut self, mode: &DigitizeMode) -> AppResult<()>;

    /// Record the retain mode in effect for subsequent pulses.
    fn set_retain_mode(&mut self, mode: RetainMode) -> AppResult<()>;

    /// Record a geographic fix. Backends without a place for it ignore it.
    fn record_geo(&mut self, fix: &GeoFix) -> AppResult<()> {
        let _ = fix;
        Ok(())
    }

    /// Record a parameter setting. Backends without a place for it ignore it.
    fn record_param(&mut self, setting: &ParamSetting) -> AppResult<()> {
        let _ = setting;
        Ok(())
    }

    /// Persist a completed sweep.
    fn write_sweep(&mut self, sweep: &Sweep) -> AppResult<()>;

    /// Make everything written so far durable.
    fn flush(&mut self) -> AppResult<()>;

    /// Flush and release the backend. Nothing may be written afterwards.
    fn close(&mut self) -> AppResult<()> {
        self.flush()
    }
}

impl<S: PulseSink + ?Sized> PulseSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn set_radar_mode(&mut self, mode: &RadarMode) -> AppResult<()> {
        (**self).set_radar_mode(mode)
    }

    fn set_digitize_mode(&mut self, mode: &DigitizeMode) -> AppResult<()> {
        (**self).set_digitize_mode(mode)
    }

    fn set_retain_mode(&mut self, mode: RetainMode) -> AppResult<()> {
        (**self).set_retain_mode(mode)
    }

    fn record_geo(&mut self, fix: &GeoFix) -> AppResult<()> {
        (**self).record_geo(fix)
    }

    fn record_param(&mut self, setting: &ParamSetting) -> AppResult<()> {
        (**self).record_param(setting)
    }

    fn write_sweep(&mut self, sweep: &Sweep) -> AppResult<()> {
        (**self).write_sweep(sweep)
    }

    fn flush(&mut self) -> AppResult<()> {
        (**self).flush()
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }
}

/// Open the backend selected by `config.storage.backend`.
pub fn open_sink(config: &CaptureConfig) -> AppResult<Box<dyn PulseSink>> {
    match config.storage.backend {
        StorageBackend::Database => Ok(Box::new(capture_db::CaptureDb::open(
            &config.storage.database.path,
            capture_db::CaptureDbOptions::from_config(&config.storage.database),
        )?)),
        StorageBackend::SweepFile => Ok(Box::new(sweep_file::SweepFileWriter::new(
            sweep_file::SweepFileConfig::from_capture_config(config)?,
        ))),
    }
}

/// Current wall-clock time in seconds since the epoch, to microseconds.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 * 1.0e-6
}
