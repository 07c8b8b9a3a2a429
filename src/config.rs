//! Capture configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `RADAR_CAPTURE_`, nested keys separated by `__`
//!
//! Every section carries serde defaults, so an empty file is a complete configuration.
//!
//! # Example
//! ```no_run
//! use radar_capture::config::CaptureConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // RADAR_CAPTURE_NETWORK__PORT=23456 overrides `[network] port`
//! let config = CaptureConfig::load_from("config/capture.toml")?;
//! println!("listening on {}:{}", config.network.interface, config.network.port);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, CaptureError};
use crate::frame::MAX_SAMPLES_PER_PULSE;
use crate::storage::sweep_file::DecimationMode;
use crate::storage::{RetainMode, StorageBackend};
use crate::validation::{
    is_in_range, is_not_empty, is_one_of, is_valid_ip, is_valid_path, is_valid_port,
};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RADAR_CAPTURE_";

/// Accepted `application.log_level` values.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Accepted `application.log_format` values.
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level capture configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// TCP endpoint the digitizer connects to
    #[serde(default)]
    pub network: NetworkConfig,
    /// Ring buffer sizing
    #[serde(default)]
    pub ring: RingConfig,
    /// Digitizer geometry and clock
    #[serde(default)]
    pub digitizer: DigitizerConfig,
    /// Sweep segmentation
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Radar transmitter parameters recorded with every pulse
    #[serde(default)]
    pub radar: RadarConfig,
    /// Geographic fix of the radar site
    #[serde(default)]
    pub site: SiteConfig,
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Network ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface address to bind
    #[serde(default = "default_interface")]
    pub interface: String,
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Accept port 0 (OS-assigned); only useful when the peer learns the port some other way
    #[serde(default)]
    pub allow_ephemeral_port: bool,
}

/// Ring buffer sizing; the chunk size is always one Pulse Frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Number of chunks in the ring (at least 2)
    #[serde(default = "default_num_chunks")]
    pub num_chunks: usize,
}

/// Digitizer settings agreed with the producer before streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitizerConfig {
    /// Samples carried by each Pulse Frame
    #[serde(default = "default_samples_per_pulse")]
    pub samples_per_pulse: usize,
    /// Digitizer base clock in Hz; one trigger clock tick is `1 / clock_hz` seconds
    #[serde(default = "default_clock_hz")]
    pub clock_hz: f64,
    /// Significant bits per sample
    #[serde(default = "default_sample_bits")]
    pub sample_bits: u8,
    /// Whether samples are stored bit-packed
    #[serde(default)]
    pub packed: bool,
    /// Clock samples combined into one stored sample
    #[serde(default = "default_decimation")]
    pub decimation: u32,
    /// How decimated clock samples are combined (first, mean, sum)
    #[serde(default = "default_decimation_mode")]
    pub decimation_mode: String,
}

/// Sweep segmentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Pulses after which an open sweep is flushed even without a rotation reference
    #[serde(default = "default_sweep_max_pulses")]
    pub max_pulses: usize,
    /// Azimuth reference pulses per antenna rotation
    #[serde(default = "default_azimuth_refs")]
    pub azimuth_refs_per_rotation: u32,
    /// Persister sleep when no chunk is ready, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Radar transmitter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarConfig {
    /// Pulse power, watts
    #[serde(default = "default_power")]
    pub power: f64,
    /// Pulse length, nanoseconds
    #[serde(default = "default_plen")]
    pub plen: f64,
    /// Nominal pulse repetition frequency, Hz
    #[serde(default = "default_prf")]
    pub prf: f64,
    /// Antenna rotation rate, RPM
    #[serde(default = "default_rpm")]
    pub rpm: f64,
}

/// Radar site location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Latitude, degrees north
    #[serde(default = "default_lat")]
    pub lat: f64,
    /// Longitude, degrees east
    #[serde(default = "default_lon")]
    pub lon: f64,
    /// Altitude, metres above sea level
    #[serde(default = "default_alt")]
    pub alt: f64,
    /// Heading offset of the antenna zero, degrees clockwise from north
    #[serde(default)]
    pub heading: f64,
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend receives sweeps
    #[serde(default)]
    pub backend: StorageBackend,
    /// Retain mode name; only "full" is implemented
    #[serde(default = "default_retain_mode")]
    pub retain_mode: String,
    /// SQLite backend settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Sweep file backend settings
    #[serde(default)]
    pub sweep_file: SweepFileSettings,
}

/// SQLite backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Pulses written per transaction
    #[serde(default = "default_pulses_per_transaction")]
    pub pulses_per_transaction: usize,
    /// Keep at most this many sweeps; unbounded when absent
    #[serde(default)]
    pub max_sweeps: Option<u64>,
    /// Force a WAL checkpoint after this many commits (0 disables)
    #[serde(default = "default_checkpoint_every_commits")]
    pub checkpoint_every_commits: u64,
}

/// Sweep file backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFileSettings {
    /// Root folder for sweep files
    #[serde(default = "default_sweep_folder")]
    pub folder: PathBuf,
    /// Site code embedded in file names
    #[serde(default = "default_site")]
    pub site: String,
    /// Pulses kept per file; longer sweeps are truncated
    #[serde(default = "default_file_max_pulses")]
    pub max_pulses: usize,
    /// Place files under `YYYY-MM-DD/HH/` subdirectories
    #[serde(default = "default_date_dirs")]
    pub date_dirs: bool,
    /// Append each written path to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Range of the first sample, metres
    #[serde(default)]
    pub range0: f64,
}

// Default value functions
fn default_name() -> String {
    "radar-capture".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_num_chunks() -> usize {
    1000
}

fn default_samples_per_pulse() -> usize {
    512
}

fn default_clock_hz() -> f64 {
    125.0e6
}

fn default_sample_bits() -> u8 {
    14
}

fn default_decimation() -> u32 {
    1
}

fn default_decimation_mode() -> String {
    "first".to_string()
}

fn default_sweep_max_pulses() -> usize {
    4096
}

fn default_azimuth_refs() -> u32 {
    2048
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_power() -> f64 {
    25.0e3
}

fn default_plen() -> f64 {
    50.0
}

fn default_prf() -> f64 {
    1800.0
}

fn default_rpm() -> f64 {
    28.0
}

fn default_lat() -> f64 {
    45.371907
}

fn default_lon() -> f64 {
    -64.402584
}

fn default_alt() -> f64 {
    30.0
}

fn default_retain_mode() -> String {
    "full".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("capture_data.sqlite")
}

fn default_pulses_per_transaction() -> usize {
    100
}

fn default_checkpoint_every_commits() -> u64 {
    10
}

fn default_sweep_folder() -> PathBuf {
    PathBuf::from("sweeps")
}

fn default_site() -> String {
    "FORCE".to_string()
}

fn default_file_max_pulses() -> usize {
    4096
}

fn default_date_dirs() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
            allow_ephemeral_port: false,
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            num_chunks: default_num_chunks(),
        }
    }
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            samples_per_pulse: default_samples_per_pulse(),
            clock_hz: default_clock_hz(),
            sample_bits: default_sample_bits(),
            packed: false,
            decimation: default_decimation(),
            decimation_mode: default_decimation_mode(),
        }
    }
}

impl DigitizerConfig {
    /// Duration of one trigger clock tick, in seconds.
    pub fn tick_seconds(&self) -> f64 {
        1.0 / self.clock_hz
    }

    /// Rate at which stored samples are produced, in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.clock_hz / f64::from(self.decimation.max(1))
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_pulses: default_sweep_max_pulses(),
            azimuth_refs_per_rotation: default_azimuth_refs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            power: default_power(),
            plen: default_plen(),
            prf: default_prf(),
            rpm: default_rpm(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            lat: default_lat(),
            lon: default_lon(),
            alt: default_alt(),
            heading: 0.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            retain_mode: default_retain_mode(),
            database: DatabaseConfig::default(),
            sweep_file: SweepFileSettings::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pulses_per_transaction: default_pulses_per_transaction(),
            max_sweeps: None,
            checkpoint_every_commits: default_checkpoint_every_commits(),
        }
    }
}

impl Default for SweepFileSettings {
    fn default() -> Self {
        Self {
            folder: default_sweep_folder(),
            site: default_site(),
            max_pulses: default_file_max_pulses(),
            date_dirs: default_date_dirs(),
            log_file: None,
            range0: 0.0,
        }
    }
}

impl CaptureConfig {
    /// Load configuration from a TOML file and `RADAR_CAPTURE_` environment variables,
    /// then validate it.
    ///
    /// A missing file is not an error: defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::string(text))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Configuration(format!("cannot render configuration: {e}")))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        is_one_of(
            "application.log_level",
            &self.application.log_level.to_lowercase(),
            &LOG_LEVELS,
        )?;
        is_one_of(
            "application.log_format",
            &self.application.log_format.to_lowercase(),
            &LOG_FORMATS,
        )?;

        is_valid_ip("network.interface", &self.network.interface)?;
        is_valid_port(
            "network.port",
            self.network.port,
            self.network.allow_ephemeral_port,
        )?;

        is_in_range("ring.num_chunks", self.ring.num_chunks, 2..=usize::MAX)?;

        is_in_range(
            "digitizer.samples_per_pulse",
            self.digitizer.samples_per_pulse,
            1..=MAX_SAMPLES_PER_PULSE,
        )?;
        is_in_range("digitizer.sample_bits", self.digitizer.sample_bits, 1..=16)?;
        is_in_range("digitizer.decimation", self.digitizer.decimation, 1..=65535)?;
        if !(self.digitizer.clock_hz.is_finite() && self.digitizer.clock_hz > 0.0) {
            return Err(CaptureError::Configuration(format!(
                "digitizer.clock_hz: {} is not a positive frequency",
                self.digitizer.clock_hz
            )));
        }
        self.digitizer
            .decimation_mode
            .parse::<DecimationMode>()
            .map_err(|e| CaptureError::Configuration(format!("digitizer.decimation_mode: {e}")))?;

        is_in_range("sweep.max_pulses", self.sweep.max_pulses, 1..=usize::MAX)?;
        is_in_range(
            "sweep.azimuth_refs_per_rotation",
            self.sweep.azimuth_refs_per_rotation,
            1..=u32::MAX,
        )?;

        self.storage
            .retain_mode
            .parse::<RetainMode>()
            .map_err(|e| CaptureError::Configuration(format!("storage.retain_mode: {e}")))?;

        match self.storage.backend {
            StorageBackend::Database => {
                let db = &self.storage.database;
                is_valid_path("storage.database.path", &db.path.to_string_lossy())?;
                is_in_range(
                    "storage.database.pulses_per_transaction",
                    db.pulses_per_transaction,
                    1..=usize::MAX,
                )?;
                if let Some(max_sweeps) = db.max_sweeps {
                    is_in_range("storage.database.max_sweeps", max_sweeps, 1..=u64::MAX)?;
                }
            }
            StorageBackend::SweepFile => {
                let files = &self.storage.sweep_file;
                is_valid_path("storage.sweep_file.folder", &files.folder.to_string_lossy())?;
                is_not_empty("storage.sweep_file.site", &files.site)?;
                is_in_range(
                    "storage.sweep_file.max_pulses",
                    files.max_pulses,
                    1..=usize::MAX,
                )?;
                if let Some(log_file) = &files.log_file {
                    is_valid_path("storage.sweep_file.log_file", &log_file.to_string_lossy())?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_a_valid_configuration() {
        let config = CaptureConfig::from_toml_str("").unwrap();
        assert_eq!(config, CaptureConfig::default());
        assert_eq!(config.digitizer.samples_per_pulse, 512);
        assert_eq!(config.storage.backend, StorageBackend::Database);
    }

    #[test]
    fn sections_override_defaults() {
        let config = CaptureConfig::from_toml_str(
            r#"
            [network]
            port = 23456

            [digitizer]
            samples_per_pulse = 4
            decimation = 4

            [storage]
            backend = "sweep_file"

            [storage.sweep_file]
            site = "TEST"
            date_dirs = false
            "#,
        )
        .unwrap();

        assert_eq!(config.network.port, 23456);
        assert_eq!(config.digitizer.samples_per_pulse, 4);
        assert_eq!(config.storage.backend, StorageBackend::SweepFile);
        assert_eq!(config.storage.sweep_file.site, "TEST");
        assert!(!config.storage.sweep_file.date_dirs);
        assert!((config.digitizer.sample_rate() - 31.25e6).abs() < 1e-3);
    }

    #[test]
    fn fewer_than_two_chunks_is_rejected() {
        let mut config = CaptureConfig::default();
        config.ring.num_chunks = 1;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("ring.num_chunks"));
    }

    #[test]
    fn invalid_log_level() {
        let mut config = CaptureConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_retain_mode_is_rejected() {
        let mut config = CaptureConfig::default();
        config.storage.retain_mode = "thinned".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.retain_mode"));
    }

    #[test]
    fn unknown_decimation_mode_is_rejected() {
        let mut config = CaptureConfig::default();
        config.digitizer.decimation_mode = "median".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_zero_needs_opt_in() {
        let mut config = CaptureConfig::default();
        config.network.port = 0;
        assert!(config.validate().is_err());
        config.network.allow_ephemeral_port = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_transaction_batch_is_rejected() {
        let mut config = CaptureConfig::default();
        config.storage.database.pulses_per_transaction = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_site_is_rejected_for_sweep_files() {
        let mut config = CaptureConfig::default();
        config.storage.backend = StorageBackend::SweepFile;
        config.storage.sweep_file.site = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rendered_toml_parses_back() {
        let mut config = CaptureConfig::default();
        config.storage.database.max_sweeps = Some(30);
        let text = config.to_toml().unwrap();
        assert_eq!(CaptureConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn file_and_environment_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "[ring]\nnum_chunks = 64\n").unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("RADAR_CAPTURE_NETWORK__PORT", "4000");
            let config = CaptureConfig::load_from(&path).map_err(|e| e.to_string())?;
            assert_eq!(config.ring.num_chunks, 64);
            assert_eq!(config.network.port, 4000);
            Ok(())
        });
    }
}
