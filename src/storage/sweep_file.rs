//! One binary file per sweep.
//!
//! Each file starts with two `\n`-terminated text lines: a fixed tag and a compact JSON
//! [`SweepFileHeader`]. Four little-endian arrays follow, each with one entry per pulse:
//!
//! | array    | type          | content                                        |
//! |----------|---------------|------------------------------------------------|
//! | clocks   | `np × u32`    | digitizer clocks since the rotation reference  |
//! | azi      | `np × f32`    | fraction of a revolution, `0..1`               |
//! | trigs    | `np × u32`    | trigger pulses since the rotation reference    |
//! | samples  | `np·ns × u16` | samples, nearest first, earliest pulse first   |
//!
//! Files land at `FOLDER/[YYYY-MM-DD/HH/]SITE-YYYY-MM-DDTHH-MM-SS.UUUUUU.dat`, named after the
//! UTC time of the sweep's first pulse. They are written under a `.tmp` name and renamed, so
//! a reader watching the folder never sees a half-written sweep. An existing file is never
//! replaced: a sweep whose name is taken gets a `-N` suffix before `.dat`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{DigitizeMode, PulseSink, RadarMode, RetainMode};
use crate::codec::SampleFormat;
use crate::config::CaptureConfig;
use crate::error::{AppResult, CaptureError};
use crate::sweep::Sweep;

/// First line of every sweep file.
pub const SWEEP_FILE_TAG: &str = "DIGDAR sweep file; version = 1.0";

/// Value of the header's `version` field.
pub const SWEEP_FILE_VERSION: &str = "1.0.0";

/// Bytes per pulse in the binary section, excluding samples.
const PULSE_METADATA_BYTES: usize = 4 + 4 + 4;

/// Suffixes tried before giving up on a taken sweep file name.
const MAX_NAME_SUFFIX: u32 = 999;

/// How digitizer clock samples were combined into one stored sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimationMode {
    /// Keep the first clock sample of each group.
    #[default]
    First,
    /// Average of the group.
    Mean,
    /// Sum of the group.
    Sum,
}

impl DecimationMode {
    /// Name written to the file header.
    pub fn name(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Mean => "mean",
            Self::Sum => "sum",
        }
    }
}

impl std::fmt::Display for DecimationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecimationMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(Self::First),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            other => Err(CaptureError::Configuration(format!(
                "unknown decimation mode '{other}', expected first, mean or sum"
            ))),
        }
    }
}

/// Settings for [`SweepFileWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFileConfig {
    /// Root folder.
    pub folder: PathBuf,
    /// Site code used in file names.
    pub site: String,
    /// Pulses kept per file.
    pub max_pulses: usize,
    /// Nest files under `YYYY-MM-DD/HH/`.
    pub date_dirs: bool,
    /// Append each written path here.
    pub log_file: Option<PathBuf>,
    /// Range of the first sample, metres.
    pub range0: f64,
    /// Clock samples per stored sample.
    pub decim: u32,
    /// How clock samples were combined.
    pub decim_mode: DecimationMode,
}

impl SweepFileConfig {
    /// Settings from `[storage.sweep_file]` and the digitizer section.
    pub fn from_capture_config(config: &CaptureConfig) -> AppResult<Self> {
        let files = &config.storage.sweep_file;
        Ok(Self {
            folder: files.folder.clone(),
            site: files.site.clone(),
            max_pulses: files.max_pulses.max(1),
            date_dirs: files.date_dirs,
            log_file: files.log_file.clone(),
            range0: files.range0,
            decim: config.digitizer.decimation.max(1),
            decim_mode: config.digitizer.decimation_mode.parse()?,
        })
    }
}

/// JSON header line of a sweep file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFileHeader {
    /// Format version.
    pub version: String,
    /// Rotation reference count of the sweep.
    pub arp: u32,
    /// Pulses in the file.
    pub np: usize,
    /// Samples per pulse.
    pub ns: usize,
    /// Sample format word.
    pub fmt: u32,
    /// Timestamp of the first pulse.
    pub ts0: f64,
    /// Timestamp of the last pulse.
    pub tsn: f64,
    /// Range of the first sample, metres.
    pub range0: f64,
    /// Digitizing clock rate, MHz.
    pub clock: f64,
    /// Clock samples per stored sample.
    pub decim: u32,
    /// Decimation mode.
    pub mode: DecimationMode,
    /// Length of the binary section.
    pub bytes: usize,
}

impl SweepFileHeader {
    /// Binary section length for `np` pulses of `ns` samples.
    pub fn binary_len(np: usize, ns: usize) -> AppResult<usize> {
        ns.checked_mul(2)
            .and_then(|n| n.checked_add(PULSE_METADATA_BYTES))
            .and_then(|per_pulse| per_pulse.checked_mul(np))
            .ok_or_else(|| {
                CaptureError::Storage(format!("{np} pulses of {ns} samples overflow a sweep file"))
            })
    }
}

/// A sweep file read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFile {
    /// Parsed header.
    pub header: SweepFileHeader,
    /// Per-pulse clock counts.
    pub clocks: Vec<u32>,
    /// Per-pulse azimuth fractions.
    pub azimuths: Vec<f32>,
    /// Per-pulse trigger counts.
    pub trigger_counts: Vec<u32>,
    /// All samples, pulse after pulse.
    pub samples: Vec<u16>,
}

impl SweepFile {
    /// Read and parse the file at `path`.
    pub fn read(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
            .map_err(|e| CaptureError::Storage(format!("{}: {e}", path.display())))
    }

    /// Parse a complete sweep file image.
    pub fn parse(bytes: &[u8]) -> AppResult<Self> {
        let (tag, rest) = split_line(bytes)?;
        if tag != SWEEP_FILE_TAG.as_bytes() {
            return Err(CaptureError::Storage(
                "not a sweep file: unexpected first line".to_string(),
            ));
        }
        let (json, body) = split_line(rest)?;
        let header: SweepFileHeader = serde_json::from_slice(json)?;

        let (np, ns) = (header.np, header.ns);
        let expected = SweepFileHeader::binary_len(np, ns)?;
        if header.bytes != expected || body.len() != expected {
            return Err(CaptureError::Storage(format!(
                "binary section is {} bytes, header says {} and {np}x{ns} needs {expected}",
                body.len(),
                header.bytes
            )));
        }

        let (clocks, body) = body.split_at(4 * np);
        let (azimuths, body) = body.split_at(4 * np);
        let (trigs, samples) = body.split_at(4 * np);

        Ok(Self {
            clocks: clocks
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            azimuths: azimuths
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            trigger_counts: trigs
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            samples: samples
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
            header,
        })
    }

    /// Samples of pulse `i`.
    pub fn pulse_samples(&self, i: usize) -> &[u16] {
        let ns = self.header.ns;
        &self.samples[i * ns..(i + 1) * ns]
    }
}

fn split_line(bytes: &[u8]) -> AppResult<(&[u8], &[u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| CaptureError::Storage("truncated sweep file header".to_string()))?;
    Ok((&bytes[..end], &bytes[end + 1..]))
}

/// Path of the file for a sweep whose first pulse is at `ts0`.
pub fn sweep_path(config: &SweepFileConfig, ts0: f64) -> AppResult<PathBuf> {
    let mut secs = ts0.floor() as i64;
    let mut micros = ((ts0 - ts0.floor()) * 1.0e6).round() as u32;
    if micros >= 1_000_000 {
        secs += 1;
        micros -= 1_000_000;
    }
    let time: DateTime<Utc> = DateTime::from_timestamp(secs, micros * 1000)
        .ok_or_else(|| CaptureError::Storage(format!("timestamp {ts0} is out of range")))?;

    let mut path = config.folder.clone();
    if config.date_dirs {
        path.push(time.format("%Y-%m-%d").to_string());
        path.push(time.format("%H").to_string());
    }
    path.push(format!(
        "{}-{}.{micros:06}.dat",
        config.site,
        time.format("%Y-%m-%dT%H-%M-%S")
    ));
    Ok(path)
}

/// Counters kept by [`SweepFileWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepFileStats {
    /// Files written.
    pub files_written: u64,
    /// Pulses written across all files.
    pub pulses_written: u64,
    /// Pulses dropped because a sweep exceeded `max_pulses`.
    pub truncated_pulses: u64,
    /// Files written under a suffixed name because the plain name was taken.
    pub name_collisions: u64,
}

/// [`PulseSink`] writing one file per sweep.
#[derive(Debug)]
pub struct SweepFileWriter {
    config: SweepFileConfig,
    digitize: Option<DigitizeMode>,
    log: Option<File>,
    last_path: Option<PathBuf>,
    stats: SweepFileStats,
}

impl SweepFileWriter {
    /// Writer with no digitize mode yet.
    pub fn new(config: SweepFileConfig) -> Self {
        info!(folder = %config.folder.display(), site = %config.site, "writing sweep files");
        Self {
            config,
            digitize: None,
            log: None,
            last_path: None,
            stats: SweepFileStats::default(),
        }
    }

    /// Writer counters.
    pub fn stats(&self) -> SweepFileStats {
        self.stats
    }

    /// Path of the most recently written file.
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    fn encode(&self, digitize: &DigitizeMode, sweep: &Sweep, np: usize) -> AppResult<Vec<u8>> {
        let ns = sweep.samples_per_pulse;
        let stored = SampleFormat::new(digitize.format.bits, false)?;
        let header = SweepFileHeader {
            version: SWEEP_FILE_VERSION.to_string(),
            arp: sweep.rotation_ref_count,
            np,
            ns,
            fmt: stored.word(),
            ts0: sweep.ts0,
            tsn: sweep.timestamps[np - 1],
            range0: self.config.range0,
            clock: digitize.rate * f64::from(self.config.decim) / 1.0e6,
            decim: self.config.decim,
            mode: self.config.decim_mode,
            bytes: SweepFileHeader::binary_len(np, ns)?,
        };

        let json = serde_json::to_string(&header)?;
        let mut out = Vec::with_capacity(SWEEP_FILE_TAG.len() + json.len() + 2 + header.bytes);
        out.extend_from_slice(SWEEP_FILE_TAG.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(json.as_bytes());
        out.push(b'\n');
        for clock in &sweep.clocks[..np] {
            out.extend_from_slice(&clock.to_le_bytes());
        }
        for azi in &sweep.azimuths[..np] {
            out.extend_from_slice(&azi.to_le_bytes());
        }
        for trigs in &sweep.trigger_counts[..np] {
            out.extend_from_slice(&trigs.to_le_bytes());
        }
        for sample in &sweep.samples[..np * ns] {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }

    /// Write `contents` at `path`, or at the first free suffixed name. Returns the path used.
    fn publish(&mut self, path: &Path, contents: &[u8]) -> AppResult<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp)
            .map_err(|e| CaptureError::Storage(format!("cannot create {}: {e}", tmp.display())))?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        let target = free_path(path)?;
        if target.as_path() != path {
            self.stats.name_collisions += 1;
            warn!(
                taken = %path.display(),
                path = %target.display(),
                "sweep file name already taken; writing under a suffixed name"
            );
        }
        fs::rename(&tmp, &target)?;

        if let Some(log_path) = &self.config.log_file {
            if self.log.is_none() {
                self.log = Some(
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(log_path)?,
                );
            }
            if let Some(log) = self.log.as_mut() {
                writeln!(log, "{}", target.display())?;
                log.flush()?;
            }
        }
        Ok(target)
    }
}

/// `path` if nothing exists there, otherwise the first `STEM-N.dat` that is free.
fn free_path(path: &Path) -> AppResult<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| CaptureError::Storage(format!("{} has no file name", path.display())))?;
    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = path.with_file_name(format!("{stem}-{n}.dat"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(CaptureError::Storage(format!(
        "{} and {MAX_NAME_SUFFIX} suffixed names are all taken",
        path.display()
    )))
}

impl PulseSink for SweepFileWriter {
    fn name(&self) -> &'static str {
        "sweep_file"
    }

    fn set_radar_mode(&mut self, mode: &RadarMode) -> AppResult<()> {
        debug!(?mode, "radar mode not recorded in sweep files");
        Ok(())
    }

    fn set_digitize_mode(&mut self, mode: &DigitizeMode) -> AppResult<()> {
        self.digitize = Some(*mode);
        Ok(())
    }

    fn set_retain_mode(&mut self, mode: RetainMode) -> AppResult<()> {
        match mode {
            RetainMode::Full => Ok(()),
        }
    }

    fn write_sweep(&mut self, sweep: &Sweep) -> AppResult<()> {
        let digitize = self.digitize.ok_or_else(|| {
            CaptureError::Storage("pulse received before a digitize mode was set".to_string())
        })?;
        if sweep.is_empty() {
            return Ok(());
        }

        let np = sweep.len().min(self.config.max_pulses);
        if np < sweep.len() {
            let dropped = (sweep.len() - np) as u64;
            self.stats.truncated_pulses += dropped;
            warn!(
                arp = sweep.rotation_ref_count,
                pulses = sweep.len(),
                max_pulses = self.config.max_pulses,
                dropped,
                "sweep longer than max_pulses; truncated"
            );
        }

        let contents = self.encode(&digitize, sweep, np)?;
        let path = sweep_path(&self.config, sweep.ts0)?;
        let path = self.publish(&path, &contents)?;

        self.stats.files_written += 1;
        self.stats.pulses_written += np as u64;
        debug!(path = %path.display(), np, "sweep file written");
        self.last_path = Some(path);
        Ok(())
    }

    fn flush(&mut self) -> AppResult<()> {
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }
}
