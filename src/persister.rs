//! Sweep persister: the only reader of the chunk ring.
//!
//! Runs on the calling thread. Each completed chunk is decoded in place, turned into a
//! [`Pulse`], and fed to the [`SweepSegmenter`]; completed sweeps go to the [`PulseSink`].
//! When nothing is ready the persister sleeps for `poll_interval`. Once the stream is declared
//! done it drains every chunk still completed in the ring, flushes the open sweep and
//! returns.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::error::{AppResult, CaptureError};
use crate::frame::{Frame, FrameLayout};
use crate::ring_buffer::ChunkReader;
use crate::storage::PulseSink;
use crate::sweep::{Pulse, Sweep, SweepSegmenter};

/// Tunables for [`SweepPersister`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersisterSettings {
    /// Duration of one digitizer clock tick, seconds.
    pub tick_seconds: f64,
    /// Azimuth reference pulses per antenna rotation.
    pub azimuth_refs_per_rotation: u32,
    /// Pulse cap per sweep.
    pub max_pulses: usize,
    /// Sleep between polls of an empty ring.
    pub poll_interval: Duration,
}

impl PersisterSettings {
    /// Settings from the digitizer and sweep sections.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            tick_seconds: config.digitizer.tick_seconds(),
            azimuth_refs_per_rotation: config.sweep.azimuth_refs_per_rotation,
            max_pulses: config.sweep.max_pulses,
            poll_interval: Duration::from_millis(config.sweep.poll_interval_ms),
        }
    }
}

/// Totals for one persister run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Pulses decoded.
    pub pulses: u64,
    /// Sweeps handed to the sink.
    pub sweeps: u64,
    /// Sweeps closed by the pulse cap rather than a rotation change.
    pub early_flushes: u64,
    /// Pulses whose timestamp was earlier than the previous pulse's.
    pub clock_regressions: u64,
    /// Chunks lost to ring overrun.
    pub chunks_skipped: u64,
}

enum Step {
    Continue,
    EndOfStream,
}

/// Turns ring chunks into persisted sweeps.
#[derive(Debug)]
pub struct SweepPersister<S: PulseSink> {
    layout: FrameLayout,
    settings: PersisterSettings,
    sink: S,
    segmenter: SweepSegmenter,
    last_ts: Option<f64>,
    stats: PersistStats,
}

impl<S: PulseSink> SweepPersister<S> {
    /// Persister decoding frames of `layout` into `sink`.
    pub fn new(layout: FrameLayout, settings: PersisterSettings, sink: S) -> Self {
        Self {
            segmenter: SweepSegmenter::new(layout.samples_per_pulse(), settings.max_pulses),
            layout,
            settings,
            sink,
            last_ts: None,
            stats: PersistStats::default(),
        }
    }

    /// Consume chunks until the stream ends.
    ///
    /// Returns normally after an end-of-stream frame, or once the ring is done and drained.
    /// A framing error flushes the open sweep and is returned; a storage error is returned
    /// as is. The ring is marked done on every exit path.
    pub fn run(&mut self, reader: &mut ChunkReader) -> AppResult<PersistStats> {
        info!(
            frame_len = self.layout.frame_len(),
            sink = self.sink.name(),
            "persister started"
        );
        let result = self.poll(reader);
        reader.done();
        self.stats.chunks_skipped = reader.stats().chunks_skipped;

        match result {
            Ok(()) => {
                self.finish()?;
                info!(
                    pulses = self.stats.pulses,
                    sweeps = self.stats.sweeps,
                    chunks_skipped = self.stats.chunks_skipped,
                    "persister finished"
                );
                Ok(self.stats())
            }
            Err(e @ CaptureError::Framing { .. }) => {
                error!(error = %e, "stream desynchronized; stopping capture");
                if let Err(flush_err) = self.finish() {
                    warn!(error = %flush_err, "open sweep could not be saved after framing error");
                }
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "storage failed; stopping capture");
                Err(e)
            }
        }
    }

    fn poll(&mut self, reader: &mut ChunkReader) -> AppResult<()> {
        loop {
            let done = reader.is_done();
            let step = match reader.read_chunk() {
                Some(chunk) => self.process(&chunk, chunk.seq())?,
                None if done => {
                    debug!("ring done and drained");
                    return Ok(());
                }
                None => {
                    thread::sleep(self.settings.poll_interval);
                    continue;
                }
            };
            if let Step::EndOfStream = step {
                info!("end of stream received");
                return Ok(());
            }
        }
    }

    fn process(&mut self, bytes: &[u8], sequence: u64) -> AppResult<Step> {
        let (header, raw_samples) = match Frame::decode(&self.layout, bytes, sequence)? {
            Frame::Pulse {
                header,
                raw_samples,
            } => (header, raw_samples),
            Frame::EndOfStream => return Ok(Step::EndOfStream),
        };

        let pulse = Pulse::from_frame(
            &header,
            raw_samples,
            self.settings.tick_seconds,
            self.settings.azimuth_refs_per_rotation,
        );
        if let Some(previous) = self.last_ts {
            if pulse.ts < previous {
                self.stats.clock_regressions += 1;
                warn!(previous, current = pulse.ts, "pulse timestamp regressed");
            }
        }
        self.last_ts = Some(pulse.ts);
        self.stats.pulses += 1;

        if let Some(sweep) = self.segmenter.push(pulse) {
            self.persist(&sweep)?;
        }
        Ok(Step::Continue)
    }

    fn persist(&mut self, sweep: &Sweep) -> AppResult<()> {
        self.sink.write_sweep(sweep)?;
        self.stats.sweeps += 1;
        debug!(
            index = sweep.index,
            arp = sweep.rotation_ref_count,
            pulses = sweep.len(),
            closed_by = ?sweep.closed_by,
            "sweep persisted"
        );
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        if let Some(sweep) = self.segmenter.finish() {
            self.persist(&sweep)?;
        }
        self.sink.flush()
    }

    /// Counters so far.
    pub fn stats(&self) -> PersistStats {
        PersistStats {
            early_flushes: self.segmenter.stats().early_flushes,
            ..self.stats
        }
    }

    /// The sink sweeps are written to.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Give back the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{end_of_stream_to_vec, pulse_to_vec, PulseHeader};
    use crate::ring_buffer::{ChunkRingBuffer, ChunkWriter};
    use crate::storage::{DigitizeMode, RadarMode, RetainMode};
    use crate::sweep::SweepClose;
    use tracing_test::traced_test;

    #[derive(Debug, Default)]
    struct RecordingSink {
        sweeps: Vec<Sweep>,
        flushes: usize,
        fail_writes: bool,
    }

    impl PulseSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn set_radar_mode(&mut self, _mode: &RadarMode) -> AppResult<()> {
            Ok(())
        }

        fn set_digitize_mode(&mut self, _mode: &DigitizeMode) -> AppResult<()> {
            Ok(())
        }

        fn set_retain_mode(&mut self, _mode: RetainMode) -> AppResult<()> {
            Ok(())
        }

        fn write_sweep(&mut self, sweep: &Sweep) -> AppResult<()> {
            if self.fail_writes {
                return Err(CaptureError::Storage("disk full".to_string()));
            }
            self.sweeps.push(sweep.clone());
            Ok(())
        }

        fn flush(&mut self) -> AppResult<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    const NS: usize = 2;

    fn settings(max_pulses: usize) -> PersisterSettings {
        PersisterSettings {
            tick_seconds: 1.0e-3,
            azimuth_refs_per_rotation: 4,
            max_pulses,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn write(writer: &mut ChunkWriter, bytes: &[u8]) {
        let mut chunk = writer.chunk_for_writing().unwrap();
        chunk.copy_from_slice(bytes);
        chunk.commit();
    }

    fn pulse(layout: &FrameLayout, clock: u32, rotation_ref_count: u32) -> Vec<u8> {
        let header = PulseHeader {
            trigger_count: clock,
            trigger_clock: clock,
            rotation_ref_sec: 100,
            rotation_ref_count,
            azimuth_ref_count: clock,
            ..PulseHeader::pulse()
        };
        pulse_to_vec(layout, &header, &[clock as u16; NS])
    }

    fn persister(max_pulses: usize) -> (SweepPersister<RecordingSink>, ChunkWriter, ChunkReader) {
        let layout = FrameLayout::new(NS).unwrap();
        let (writer, reader) = ChunkRingBuffer::new(layout.frame_len(), 32)
            .unwrap()
            .split();
        let persister = SweepPersister::new(layout, settings(max_pulses), RecordingSink::default());
        (persister, writer, reader)
    }

    #[test]
    fn sweeps_follow_rotation_count_and_end_of_stream() {
        let (mut persister, mut writer, mut reader) = persister(100);
        let layout = FrameLayout::new(NS).unwrap();
        for (clock, rot) in [(0, 0), (1, 0), (2, 1), (3, 1), (4, 1)] {
            write(&mut writer, &pulse(&layout, clock, rot));
        }
        write(&mut writer, &end_of_stream_to_vec(&layout));

        let stats = persister.run(&mut reader).unwrap();
        assert!(writer.is_done());
        assert_eq!(stats.pulses, 5);
        assert_eq!(stats.sweeps, 2);

        let sink = persister.into_sink();
        assert_eq!(sink.sweeps[0].len(), 2);
        assert_eq!(sink.sweeps[0].closed_by, Some(SweepClose::Rotation));
        assert_eq!(sink.sweeps[1].len(), 3);
        assert_eq!(sink.sweeps[1].closed_by, Some(SweepClose::EndOfStream));
        assert_eq!(sink.sweeps[1].azimuths, vec![0.5, 0.75, 0.0]);
        assert!((sink.sweeps[1].ts0 - 100.002).abs() < 1e-9);
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn done_without_sentinel_drains_the_ring() {
        let (mut persister, mut writer, mut reader) = persister(100);
        let layout = FrameLayout::new(NS).unwrap();
        for clock in 0..3 {
            write(&mut writer, &pulse(&layout, clock, 7));
        }
        writer.done();

        let stats = persister.run(&mut reader).unwrap();
        assert_eq!(stats.pulses, 3);
        assert_eq!(persister.sink().sweeps.len(), 1);
        assert_eq!(persister.sink().sweeps[0].len(), 3);
    }

    #[test]
    fn capped_sweeps_are_counted_as_early_flushes() {
        let (mut persister, mut writer, mut reader) = persister(2);
        let layout = FrameLayout::new(NS).unwrap();
        for clock in 0..5 {
            write(&mut writer, &pulse(&layout, clock, 1));
        }
        write(&mut writer, &end_of_stream_to_vec(&layout));

        let stats = persister.run(&mut reader).unwrap();
        assert_eq!(stats.sweeps, 3);
        assert_eq!(stats.early_flushes, 2);
        let lens: Vec<_> = persister.sink().sweeps.iter().map(Sweep::len).collect();
        assert_eq!(lens, vec![2, 2, 1]);
    }

    #[test]
    fn bad_magic_flushes_and_fails() {
        let (mut persister, mut writer, mut reader) = persister(100);
        let layout = FrameLayout::new(NS).unwrap();
        write(&mut writer, &pulse(&layout, 0, 0));
        write(&mut writer, &pulse(&layout, 1, 0));
        let mut garbage = pulse(&layout, 2, 0);
        garbage[..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        write(&mut writer, &garbage);
        write(&mut writer, &pulse(&layout, 3, 0));

        let err = persister.run(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Framing {
                sequence: 2,
                magic: 0xDEAD_BEEF
            }
        ));
        assert!(writer.is_done());
        assert_eq!(persister.sink().sweeps.len(), 1);
        assert_eq!(persister.sink().sweeps[0].len(), 2);
    }

    #[test]
    fn storage_failure_stops_the_capture() {
        let (mut persister, mut writer, mut reader) = persister(1);
        persister.sink_mut().fail_writes = true;
        let layout = FrameLayout::new(NS).unwrap();
        write(&mut writer, &pulse(&layout, 0, 0));

        let err = persister.run(&mut reader).unwrap_err();
        assert!(matches!(err, CaptureError::Storage(_)));
        assert!(writer.is_done());
        assert!(writer.chunk_for_writing().is_none());
    }

    #[test]
    #[traced_test]
    fn timestamp_regression_is_reported() {
        let (mut persister, mut writer, mut reader) = persister(100);
        let layout = FrameLayout::new(NS).unwrap();
        write(&mut writer, &pulse(&layout, 5, 0));
        write(&mut writer, &pulse(&layout, 3, 0));
        write(&mut writer, &end_of_stream_to_vec(&layout));

        let stats = persister.run(&mut reader).unwrap();
        assert_eq!(stats.clock_regressions, 1);
        assert!(logs_contain("pulse timestamp regressed"));
        assert_eq!(persister.sink().sweeps[0].len(), 2);
    }
}
