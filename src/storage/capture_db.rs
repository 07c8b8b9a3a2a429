//! SQLite capture database.
//!
//! One row per pulse, referencing the combined radar/digitize/retain mode in effect when it
//! was captured. Pulses are written in explicit transactions of
//! `pulses_per_transaction` rows, which bounds both commit overhead and the amount of data a
//! crash can lose. The database runs in WAL mode while capturing; every
//! `checkpoint_every_commits` commits the WAL is checkpointed and truncated so it cannot grow
//! without bound, and closing the database switches it back to a rollback journal so the
//! file is self-contained.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{DigitizeMode, GeoFix, ParamSetting, PulseSink, RadarMode, RetainMode};
use crate::codec::{clipped_samples, encode_samples};
use crate::config::DatabaseConfig;
use crate::error::{AppResult, CaptureError};
use crate::sweep::Sweep;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pulses (
    pulse_key INTEGER NOT NULL PRIMARY KEY,
    sweep_key INTEGER NOT NULL,                -- groups pulses of one sweep
    mode_key INTEGER REFERENCES modes (mode_key),
    ts DOUBLE,                                 -- seconds since the epoch
    trigs INTEGER,                             -- trigger count
    clock INTEGER,                             -- digitizer clock ticks since rotation reference
    azi DOUBLE,                                -- fraction of a revolution since rotation reference
    elev DOUBLE,                               -- elevation angle, radians
    rot DOUBLE,                                -- waveguide rotation (polarization), radians
    samples BLOB                               -- stored in the digitize mode's format
);
CREATE UNIQUE INDEX IF NOT EXISTS pulses_ts ON pulses (ts);
CREATE INDEX IF NOT EXISTS pulses_sweep ON pulses (sweep_key);

CREATE TABLE IF NOT EXISTS geo (
    ts DOUBLE,
    lat DOUBLE,                                -- degrees N
    lon DOUBLE,                                -- degrees E
    alt DOUBLE,                                -- metres ASL
    heading DOUBLE                             -- degrees clockwise from true north
);
CREATE UNIQUE INDEX IF NOT EXISTS geo_ts ON geo (ts);

CREATE TABLE IF NOT EXISTS modes (
    mode_key INTEGER NOT NULL PRIMARY KEY,
    radar_mode_key INTEGER REFERENCES radar_modes (radar_mode_key),
    digitize_mode_key INTEGER REFERENCES digitize_modes (digitize_mode_key),
    retain_mode_key INTEGER REFERENCES retain_modes (retain_mode_key)
);
CREATE UNIQUE INDEX IF NOT EXISTS i_modes ON modes (radar_mode_key, digitize_mode_key, retain_mode_key);

CREATE TABLE IF NOT EXISTS radar_modes (
    radar_mode_key INTEGER NOT NULL PRIMARY KEY,
    power DOUBLE,                              -- watts
    plen DOUBLE,                               -- pulse length, nanoseconds
    prf DOUBLE,                                -- nominal PRF, Hz
    rpm DOUBLE                                 -- rotations per minute
);
CREATE UNIQUE INDEX IF NOT EXISTS i_radar_modes ON radar_modes (power, plen, prf, rpm);

CREATE TABLE IF NOT EXISTS digitize_modes (
    digitize_mode_key INTEGER NOT NULL PRIMARY KEY,
    rate DOUBLE,                               -- samples per second
    format INTEGER,                            -- low 8 bits: bits per sample; 256: packed
    ns INTEGER                                 -- samples per pulse
);
CREATE UNIQUE INDEX IF NOT EXISTS i_digitize_modes ON digitize_modes (rate, format, ns);

CREATE TABLE IF NOT EXISTS retain_modes (
    retain_mode_key INTEGER NOT NULL PRIMARY KEY,
    name TEXT NOT NULL
);
INSERT OR REPLACE INTO retain_modes (retain_mode_key, name) VALUES (1, 'full');

CREATE TABLE IF NOT EXISTS param_settings (
    ts DOUBLE,                                 -- time the setting took effect
    param TEXT,
    val DOUBLE
);
CREATE INDEX IF NOT EXISTS i_param_setting_ts ON param_settings (ts);
CREATE INDEX IF NOT EXISTS i_param_setting_param ON param_settings (param);
"#;

const INSERT_PULSE_SQL: &str = "INSERT OR IGNORE INTO pulses \
     (sweep_key, mode_key, ts, trigs, clock, azi, elev, rot, samples) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Write policy for [`CaptureDb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDbOptions {
    /// Pulses per transaction.
    pub pulses_per_transaction: usize,
    /// Keep at most this many sweeps.
    pub max_sweeps: Option<u64>,
    /// Checkpoint the WAL after this many commits; 0 leaves it to SQLite.
    pub checkpoint_every_commits: u64,
}

impl Default for CaptureDbOptions {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default())
    }
}

impl CaptureDbOptions {
    /// Options from the `[storage.database]` section.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            pulses_per_transaction: config.pulses_per_transaction.max(1),
            max_sweeps: config.max_sweeps,
            checkpoint_every_commits: config.checkpoint_every_commits,
        }
    }
}

/// Counters kept by [`CaptureDb`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Pulse rows inserted.
    pub pulses_written: u64,
    /// Pulses dropped because a row with the same timestamp already existed.
    pub duplicate_pulses: u64,
    /// Samples with bits the digitize mode's stored format cannot hold.
    pub clipped_samples: u64,
    /// Sweeps written.
    pub sweeps_written: u64,
    /// Sweeps deleted by retention.
    pub sweeps_deleted: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Forced WAL checkpoints.
    pub checkpoints: u64,
}

/// SQLite-backed [`PulseSink`].
pub struct CaptureDb {
    conn: Connection,
    path: PathBuf,
    options: CaptureDbOptions,
    radar_mode_key: Option<i64>,
    digitize_mode_key: Option<i64>,
    retain_mode_key: Option<i64>,
    mode_key: Option<i64>,
    digitize: Option<DigitizeMode>,
    next_sweep_key: i64,
    in_transaction: bool,
    pulses_this_transaction: usize,
    commits_since_checkpoint: u64,
    latest_uncommitted_ts: Option<f64>,
    latest_committed_ts: Option<f64>,
    stats: DbStats,
    closed: bool,
}

impl std::fmt::Debug for CaptureDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDb")
            .field("path", &self.path)
            .field("mode_key", &self.mode_key)
            .field("next_sweep_key", &self.next_sweep_key)
            .field("in_transaction", &self.in_transaction)
            .field("stats", &self.stats)
            .finish()
    }
}

impl CaptureDb {
    /// Open or create the database at `path` and make sure the schema exists.
    ///
    /// Sweep keys continue after the largest one already stored, and the retain mode starts
    /// as `full`.
    pub fn open(path: impl AsRef<Path>, options: CaptureDbOptions) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| {
            CaptureError::Storage(format!(
                "couldn't open database {} for output: {e}",
                path.display()
            ))
        })?;

        let journal: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA_SQL)?;

        let next_sweep_key: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sweep_key), -1) + 1 FROM pulses",
            [],
            |row| row.get(0),
        )?;
        let latest_committed_ts: Option<f64> =
            conn.query_row("SELECT MAX(ts) FROM pulses", [], |row| row.get(0))?;

        info!(
            path = %path.display(),
            journal = %journal,
            next_sweep_key,
            "capture database open"
        );

        let mut db = Self {
            conn,
            path,
            options,
            radar_mode_key: None,
            digitize_mode_key: None,
            retain_mode_key: None,
            mode_key: None,
            digitize: None,
            next_sweep_key,
            in_transaction: false,
            pulses_this_transaction: 0,
            commits_since_checkpoint: 0,
            latest_uncommitted_ts: None,
            latest_committed_ts,
            stats: DbStats::default(),
            closed: false,
        };
        db.set_retain_mode(RetainMode::Full)?;
        Ok(db)
    }

    /// Timestamp of the newest committed pulse.
    pub fn latest_committed_ts(&self) -> Option<f64> {
        self.latest_committed_ts
    }

    /// Key of the combined mode new pulses reference.
    pub fn mode_key(&self) -> Option<i64> {
        self.mode_key
    }

    /// Database counters.
    pub fn stats(&self) -> DbStats {
        self.stats
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn finish(&mut self) -> AppResult<()> {
        self.commit()?;
        self.checkpoint()?;
        let journal: String =
            self.conn
                .query_row("PRAGMA journal_mode = TRUNCATE", [], |row| row.get(0))?;
        debug!(journal = %journal, "capture database closed");
        Ok(())
    }

    fn begin_if_needed(&mut self) -> AppResult<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_transaction = true;
            self.pulses_this_transaction = 0;
        }
        Ok(())
    }

    fn commit(&mut self) -> AppResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        self.pulses_this_transaction = 0;
        self.stats.commits += 1;
        if self.latest_uncommitted_ts.is_some() {
            self.latest_committed_ts = self.latest_uncommitted_ts.take();
        }

        self.commits_since_checkpoint += 1;
        let every = self.options.checkpoint_every_commits;
        if every > 0 && self.commits_since_checkpoint >= every {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> AppResult<()> {
        let (busy, log, checkpointed): (i64, i64, i64) =
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
        if busy != 0 {
            warn!(log, checkpointed, "WAL checkpoint could not complete");
        } else {
            debug!(log, checkpointed, "WAL checkpoint");
        }
        self.commits_since_checkpoint = 0;
        self.stats.checkpoints += 1;
        Ok(())
    }

    fn update_mode(&mut self) -> AppResult<()> {
        let (Some(radar), Some(digitize), Some(retain)) = (
            self.radar_mode_key,
            self.digitize_mode_key,
            self.retain_mode_key,
        ) else {
            return Ok(());
        };
        self.conn.execute(
            "INSERT OR IGNORE INTO modes (radar_mode_key, digitize_mode_key, retain_mode_key) \
             VALUES (?1, ?2, ?3)",
            params![radar, digitize, retain],
        )?;
        let key: i64 = self.conn.query_row(
            "SELECT mode_key FROM modes \
             WHERE radar_mode_key = ?1 AND digitize_mode_key = ?2 AND retain_mode_key = ?3",
            params![radar, digitize, retain],
            |row| row.get(0),
        )?;
        debug!(mode_key = key, "capture mode updated");
        self.mode_key = Some(key);
        Ok(())
    }

    fn enforce_retention(&mut self) -> AppResult<()> {
        let Some(max_sweeps) = self.options.max_sweeps else {
            return Ok(());
        };
        loop {
            let stored: i64 = self.conn.query_row(
                "SELECT COUNT(DISTINCT sweep_key) FROM pulses",
                [],
                |row| row.get(0),
            )?;
            if u64::try_from(stored).unwrap_or(0) <= max_sweeps {
                return Ok(());
            }
            let deleted = self.conn.execute(
                "DELETE FROM pulses WHERE sweep_key = (SELECT MIN(sweep_key) FROM pulses)",
                [],
            )?;
            self.stats.sweeps_deleted += 1;
            debug!(pulses = deleted, "oldest sweep deleted by retention");
        }
    }
}

impl PulseSink for CaptureDb {
    fn name(&self) -> &'static str {
        "database"
    }

    fn set_radar_mode(&mut self, mode: &RadarMode) -> AppResult<()> {
        let values = params![mode.power, mode.plen, mode.prf, mode.rpm];
        self.conn.execute(
            "INSERT OR IGNORE INTO radar_modes (power, plen, prf, rpm) VALUES (?1, ?2, ?3, ?4)",
            values,
        )?;
        let key: i64 = self.conn.query_row(
            "SELECT radar_mode_key FROM radar_modes \
             WHERE power = ?1 AND plen = ?2 AND prf = ?3 AND rpm = ?4",
            values,
            |row| row.get(0),
        )?;
        self.radar_mode_key = Some(key);
        self.update_mode()
    }

    fn set_digitize_mode(&mut self, mode: &DigitizeMode) -> AppResult<()> {
        let ns = i64::try_from(mode.ns)
            .map_err(|_| CaptureError::Storage(format!("{} samples per pulse", mode.ns)))?;
        let format = i64::from(mode.format.word());
        let values = params![mode.rate, format, ns];
        self.conn.execute(
            "INSERT OR IGNORE INTO digitize_modes (rate, format, ns) VALUES (?1, ?2, ?3)",
            values,
        )?;
        let key: i64 = self.conn.query_row(
            "SELECT digitize_mode_key FROM digitize_modes \
             WHERE rate = ?1 AND format = ?2 AND ns = ?3",
            values,
            |row| row.get(0),
        )?;
        self.digitize_mode_key = Some(key);
        self.digitize = Some(*mode);
        self.update_mode()
    }

    fn set_retain_mode(&mut self, mode: RetainMode) -> AppResult<()> {
        let key: Option<i64> = self
            .conn
            .query_row(
                "SELECT retain_mode_key FROM retain_modes WHERE name = ?1",
                params![mode.name()],
                |row| row.get(0),
            )
            .optional()?;
        let key = key.ok_or_else(|| {
            CaptureError::Configuration(format!("non-existent retain mode '{}'", mode.name()))
        })?;
        self.retain_mode_key = Some(key);
        self.update_mode()
    }

    fn record_geo(&mut self, fix: &GeoFix) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO geo (ts, lat, lon, alt, heading) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fix.ts, fix.lat, fix.lon, fix.alt, fix.heading],
        )?;
        Ok(())
    }

    fn record_param(&mut self, setting: &ParamSetting) -> AppResult<()> {
        self.conn.execute(
            "INSERT INTO param_settings (ts, param, val) VALUES (?1, ?2, ?3)",
            params![setting.ts, setting.param, setting.val],
        )?;
        Ok(())
    }

    fn write_sweep(&mut self, sweep: &Sweep) -> AppResult<()> {
        if self.closed {
            return Err(CaptureError::Storage("capture database is closed".to_string()));
        }
        let digitize = self.digitize.ok_or_else(|| {
            CaptureError::Storage("pulse received before a digitize mode was set".to_string())
        })?;
        let mode_key = self.mode_key.ok_or_else(|| {
            CaptureError::Storage("pulse received before the capture mode was complete".to_string())
        })?;
        if sweep.is_empty() {
            return Ok(());
        }
        if sweep.samples_per_pulse != digitize.ns {
            return Err(CaptureError::Storage(format!(
                "sweep has {} samples per pulse, digitize mode says {}",
                sweep.samples_per_pulse, digitize.ns
            )));
        }
        let sweep_key = self.next_sweep_key;
        self.next_sweep_key += 1;
        let mut duplicates = 0u64;
        let mut clipped = 0usize;

        for i in 0..sweep.len() {
            self.begin_if_needed()?;
            let samples = sweep.pulse_samples(i);
            clipped += clipped_samples(digitize.format, samples);
            let blob = encode_samples(digitize.format, samples);
            let inserted = self.conn.prepare_cached(INSERT_PULSE_SQL)?.execute(params![
                sweep_key,
                mode_key,
                sweep.timestamps[i],
                sweep.trigger_counts[i],
                sweep.clocks[i],
                f64::from(sweep.azimuths[i]),
                // fixed elevation and polarization antenna
                0.0f64,
                0.0f64,
                blob,
            ])?;
            if inserted == 0 {
                duplicates += 1;
            } else {
                self.stats.pulses_written += 1;
                let ts = sweep.timestamps[i];
                if self.latest_uncommitted_ts.map_or(true, |latest| ts > latest) {
                    self.latest_uncommitted_ts = Some(ts);
                }
            }

            self.pulses_this_transaction += 1;
            if self.pulses_this_transaction >= self.options.pulses_per_transaction {
                self.commit()?;
            }
        }

        if duplicates > 0 {
            self.stats.duplicate_pulses += duplicates;
            warn!(
                sweep_key,
                duplicates, "pulses with an already stored timestamp were ignored"
            );
        }
        if clipped > 0 {
            self.stats.clipped_samples += clipped as u64;
            warn!(
                sweep_key,
                clipped,
                bits = digitize.format.bits,
                packed = digitize.format.packed,
                "samples wider than the stored format were clipped"
            );
        }
        self.stats.sweeps_written += 1;
        debug!(sweep_key, pulses = sweep.len(), "sweep written to database");

        self.enforce_retention()
    }

    fn flush(&mut self) -> AppResult<()> {
        self.commit()
    }

    /// Commit, checkpoint and leave the file with a rollback journal.
    fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish()
    }
}

impl Drop for CaptureDb {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(error = %e, path = %self.path.display(), "capture database did not close cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SampleFormat;
    use crate::sweep::{Pulse, SweepSegmenter};

    fn digitize_mode(ns: usize) -> DigitizeMode {
        DigitizeMode {
            rate: 125.0e6,
            format: SampleFormat::new(12, true).unwrap(),
            ns,
        }
    }

    fn radar_mode() -> RadarMode {
        RadarMode {
            power: 25.0e3,
            plen: 50.0,
            prf: 1800.0,
            rpm: 28.0,
        }
    }

    fn sweep_of(first_ts: f64, n: u32, ns: usize) -> Sweep {
        let mut seg = SweepSegmenter::new(ns, n as usize);
        let mut done = None;
        for i in 0..n {
            done = seg.push(Pulse {
                ts: first_ts + f64::from(i) * 1e-3,
                trigger_count: i,
                trigger_clock: i * 100,
                azimuth: i as f32 / n as f32,
                rotation_ref_count: 0,
                samples: vec![(i & 0xfff) as u16; ns],
            });
        }
        done.unwrap()
    }

    fn open_db(dir: &tempfile::TempDir, options: CaptureDbOptions) -> CaptureDb {
        let mut db = CaptureDb::open(dir.path().join("capture.sqlite"), options).unwrap();
        db.set_radar_mode(&radar_mode()).unwrap();
        db.set_digitize_mode(&digitize_mode(4)).unwrap();
        db
    }

    #[test]
    fn pulse_before_digitize_mode_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = CaptureDb::open(dir.path().join("c.sqlite"), CaptureDbOptions::default())
            .unwrap();
        db.set_radar_mode(&radar_mode()).unwrap();
        let err = db.write_sweep(&sweep_of(1.0, 2, 4)).unwrap_err();
        assert!(matches!(err, CaptureError::Storage(_)));
    }

    #[test]
    fn mode_key_needs_all_three_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = CaptureDb::open(dir.path().join("c.sqlite"), CaptureDbOptions::default())
            .unwrap();
        assert!(db.mode_key().is_none());
        db.set_radar_mode(&radar_mode()).unwrap();
        assert!(db.mode_key().is_none());
        db.set_digitize_mode(&digitize_mode(4)).unwrap();
        assert!(db.mode_key().is_some());
    }

    #[test]
    fn transactions_commit_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let options = CaptureDbOptions {
            pulses_per_transaction: 4,
            max_sweeps: None,
            checkpoint_every_commits: 0,
        };
        let mut db = open_db(&dir, options);
        db.write_sweep(&sweep_of(10.0, 10, 4)).unwrap();

        assert_eq!(db.stats().commits, 2);
        assert!(db.in_transaction());
        assert!((db.latest_committed_ts().unwrap() - 10.007).abs() < 1e-9);

        db.flush().unwrap();
        assert!(!db.in_transaction());
        assert!((db.latest_committed_ts().unwrap() - 10.009).abs() < 1e-9);
    }

    #[test]
    fn duplicate_timestamps_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir, CaptureDbOptions::default());
        let sweep = sweep_of(5.0, 3, 4);
        db.write_sweep(&sweep).unwrap();
        db.write_sweep(&sweep).unwrap();
        assert_eq!(db.stats().pulses_written, 3);
        assert_eq!(db.stats().duplicate_pulses, 3);
    }

    #[test]
    fn wide_samples_are_stored_unchanged_when_unpacked() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = CaptureDb::open(dir.path().join("c.sqlite"), CaptureDbOptions::default())
            .unwrap();
        db.set_radar_mode(&radar_mode()).unwrap();
        db.set_digitize_mode(&DigitizeMode {
            rate: 125.0e6,
            format: SampleFormat::new(14, false).unwrap(),
            ns: 2,
        })
        .unwrap();

        let mut seg = SweepSegmenter::new(2, 1);
        let sweep = seg
            .push(Pulse {
                ts: 1.0,
                trigger_count: 0,
                trigger_clock: 0,
                azimuth: 0.0,
                rotation_ref_count: 0,
                samples: vec![0xFFFF, 0x8001],
            })
            .unwrap();
        db.write_sweep(&sweep).unwrap();
        db.flush().unwrap();

        let blob: Vec<u8> = db
            .conn
            .query_row("SELECT samples FROM pulses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(blob, vec![0xFF, 0xFF, 0x01, 0x80]);
        assert_eq!(db.stats().clipped_samples, 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn clipped_samples_are_counted_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open_db(&dir, CaptureDbOptions::default());
        let mut seg = SweepSegmenter::new(4, 1);
        let sweep = seg
            .push(Pulse {
                ts: 1.0,
                trigger_count: 0,
                trigger_clock: 0,
                azimuth: 0.0,
                rotation_ref_count: 0,
                samples: vec![0x0FFF, 0x1000, 0xFFFF, 0x0001],
            })
            .unwrap();
        db.write_sweep(&sweep).unwrap();

        assert_eq!(db.stats().clipped_samples, 2);
        assert_eq!(db.stats().pulses_written, 1);
        assert!(logs_contain("samples wider than the stored format were clipped"));
    }

    #[test]
    fn checkpoints_follow_commit_count() {
        let dir = tempfile::tempdir().unwrap();
        let options = CaptureDbOptions {
            pulses_per_transaction: 1,
            max_sweeps: None,
            checkpoint_every_commits: 2,
        };
        let mut db = open_db(&dir, options);
        db.write_sweep(&sweep_of(1.0, 4, 4)).unwrap();
        assert_eq!(db.stats().commits, 4);
        assert_eq!(db.stats().checkpoints, 2);
    }

    #[test]
    fn sweep_keys_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = open_db(&dir, CaptureDbOptions::default());
            db.write_sweep(&sweep_of(1.0, 2, 4)).unwrap();
            db.write_sweep(&sweep_of(2.0, 2, 4)).unwrap();
            db.close().unwrap();
        }
        let mut db = open_db(&dir, CaptureDbOptions::default());
        db.write_sweep(&sweep_of(3.0, 2, 4)).unwrap();
        db.flush().unwrap();
        assert_eq!(db.next_sweep_key, 3);
        assert!((db.latest_committed_ts().unwrap() - 3.001).abs() < 1e-9);
    }
}
