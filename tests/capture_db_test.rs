//! SQLite backend behaviour as seen from a second connection.

use radar_capture::codec::{decode_samples, SampleFormat};
use radar_capture::storage::capture_db::{CaptureDb, CaptureDbOptions};
use radar_capture::storage::{DigitizeMode, GeoFix, ParamSetting, PulseSink, RadarMode};
use radar_capture::sweep::{Pulse, Sweep, SweepSegmenter};
use rusqlite::Connection;
use std::path::Path;

const NS: usize = 4;

fn radar(power: f64) -> RadarMode {
    RadarMode {
        power,
        plen: 50.0,
        prf: 1800.0,
        rpm: 28.0,
    }
}

fn digitize(bits: u8, packed: bool) -> DigitizeMode {
    DigitizeMode {
        rate: 125.0e6,
        format: SampleFormat::new(bits, packed).unwrap(),
        ns: NS,
    }
}

fn sweep(first_ts: f64, pulses: u32, rotation_ref_count: u32) -> Sweep {
    let mut seg = SweepSegmenter::new(NS, 10_000);
    for i in 0..pulses {
        seg.push(Pulse {
            ts: first_ts + f64::from(i) * 1e-3,
            trigger_count: i,
            trigger_clock: i * 69_444,
            azimuth: i as f32 / pulses as f32,
            rotation_ref_count,
            samples: vec![0xCBA, 0xFED, 0x123, (i & 0xfff) as u16],
        });
    }
    seg.finish().unwrap()
}

fn options(pulses_per_transaction: usize, max_sweeps: Option<u64>) -> CaptureDbOptions {
    CaptureDbOptions {
        pulses_per_transaction,
        max_sweeps,
        checkpoint_every_commits: 0,
    }
}

fn open(path: &Path, options: CaptureDbOptions) -> CaptureDb {
    let mut db = CaptureDb::open(path, options).unwrap();
    db.set_radar_mode(&radar(25.0e3)).unwrap();
    db.set_digitize_mode(&digitize(12, true)).unwrap();
    db
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_radar_modes_are_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modes.sqlite");
    let mut db = open(&path, options(100, None));
    let first = db.mode_key().unwrap();

    db.set_radar_mode(&radar(25.0e3)).unwrap();
    assert_eq!(db.mode_key(), Some(first));

    db.set_radar_mode(&radar(12.0e3)).unwrap();
    let second = db.mode_key().unwrap();
    assert_ne!(second, first);

    db.set_radar_mode(&radar(25.0e3)).unwrap();
    assert_eq!(db.mode_key(), Some(first));
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM radar_modes"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM digitize_modes"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM modes"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM retain_modes"), 1);
}

#[test]
fn test_pulses_with_identical_radar_parameters_share_a_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.sqlite");
    let mut db = open(&path, options(100, None));
    db.write_sweep(&sweep(10.0, 1, 0)).unwrap();

    // same parameters set again between pulses
    db.set_radar_mode(&radar(25.0e3)).unwrap();
    db.write_sweep(&sweep(20.0, 1, 1)).unwrap();
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM pulses"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(DISTINCT mode_key) FROM pulses"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM radar_modes"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM modes"), 1);
}

#[test]
fn test_only_committed_batches_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batches.sqlite");
    let mut db = open(&path, options(2, None));
    db.write_sweep(&sweep(100.0, 3, 0)).unwrap();

    let conn = Connection::open(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM pulses"), 2);

    db.flush().unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM pulses"), 3);
}

#[test]
fn test_retention_keeps_newest_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retention.sqlite");
    let mut db = open(&path, options(100, Some(2)));
    for k in 0..5u32 {
        db.write_sweep(&sweep(f64::from(k) * 10.0 + 1.0, 3, k)).unwrap();
    }
    db.close().unwrap();
    assert_eq!(stored_sweep_keys(&path), vec![3, 4]);
}

fn stored_sweep_keys(path: &Path) -> Vec<i64> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT DISTINCT sweep_key FROM pulses ORDER BY sweep_key")
        .unwrap();
    let keys = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap();
    keys
}

#[test]
fn test_packed_samples_are_stored_lsb_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed.sqlite");
    let mut db = open(&path, options(100, None));
    db.write_sweep(&sweep(7.0, 1, 0)).unwrap();
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    let blob: Vec<u8> = conn
        .query_row("SELECT samples FROM pulses", [], |row| row.get(0))
        .unwrap();
    assert_eq!(blob.len(), 6);
    assert_eq!(&blob[..3], &[0xBA, 0xDC, 0xFE]);
    assert_eq!(
        decode_samples(SampleFormat::new(12, true).unwrap(), &blob, NS).unwrap(),
        vec![0xCBA, 0xFED, 0x123, 0]
    );
}

#[test]
fn test_geo_and_params_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.sqlite");
    let mut db = open(&path, options(100, None));
    let fix = GeoFix {
        ts: 1.0,
        lat: 45.371907,
        lon: -64.402584,
        alt: 30.0,
        heading: 0.0,
    };
    db.record_geo(&fix).unwrap();
    db.record_geo(&fix).unwrap();
    db.record_param(&ParamSetting {
        ts: 1.0,
        param: "decimation".to_string(),
        val: 4.0,
    })
    .unwrap();
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM geo"), 1);
    let val: f64 = conn
        .query_row(
            "SELECT val FROM param_settings WHERE param = 'decimation'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(val, 4.0);
}

#[test]
fn test_close_leaves_no_wal_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.sqlite");
    let mut db = open(&path, options(1, None));
    db.write_sweep(&sweep(3.0, 4, 0)).unwrap();
    assert!(dir.path().join("wal.sqlite-wal").exists());
    db.close().unwrap();
    drop(db);
    assert!(!dir.path().join("wal.sqlite-wal").exists());
}
