//! Sweep accumulation and sweep-boundary detection.
//!
//! A sweep is one antenna rotation. The digitizer counts rotation reference pulses, so a
//! change in `rotation_ref_count` between consecutive pulses marks the start of a new sweep.
//! The segmenter also caps the number of pulses per sweep, so a radar that stops emitting
//! rotation references cannot grow an accumulator without bound.

use crate::frame::{self, PulseHeader};

/// Upper bound on pulses reserved up front for a new sweep.
const PREALLOC_PULSES: usize = 8192;

/// One decoded pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    /// Wall-clock time of the pulse, seconds since the epoch.
    pub ts: f64,
    /// Trigger count since the rotation reference reset.
    pub trigger_count: u32,
    /// Digitizer clock ticks since the rotation reference.
    pub trigger_clock: u32,
    /// Fraction of a revolution since the rotation reference, in `[0, 1)`.
    pub azimuth: f32,
    /// Rotation reference count identifying the sweep.
    pub rotation_ref_count: u32,
    /// Samples, earliest first.
    pub samples: Vec<u16>,
}

impl Pulse {
    /// Build a pulse from a decoded header and its raw little-endian samples.
    pub fn from_frame(
        header: &PulseHeader,
        raw_samples: &[u8],
        tick_seconds: f64,
        azimuth_refs_per_rotation: u32,
    ) -> Self {
        Self {
            ts: header.timestamp(tick_seconds),
            trigger_count: header.trigger_count,
            trigger_clock: header.trigger_clock,
            azimuth: azimuth_fraction(header.azimuth_ref_count, azimuth_refs_per_rotation),
            rotation_ref_count: header.rotation_ref_count,
            samples: frame::samples(raw_samples).collect(),
        }
    }
}

/// Azimuth as a fraction of a revolution from the azimuth reference count.
pub fn azimuth_fraction(azimuth_ref_count: u32, refs_per_rotation: u32) -> f32 {
    let n = refs_per_rotation.max(1);
    ((f64::from(azimuth_ref_count % n)) / f64::from(n)) as f32
}

/// Why a sweep was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepClose {
    /// The rotation reference count changed.
    Rotation,
    /// The sweep reached the configured maximum pulse count.
    Capacity,
    /// The stream ended with the sweep still open.
    EndOfStream,
}

/// Columnar accumulator for one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    /// Position of this sweep in the session, starting at 0.
    pub index: u64,
    /// Rotation reference count shared by every pulse.
    pub rotation_ref_count: u32,
    /// Samples per pulse.
    pub samples_per_pulse: usize,
    /// Timestamp of the first pulse.
    pub ts0: f64,
    /// Timestamp of the last pulse.
    pub tsn: f64,
    /// Per-pulse timestamps.
    pub timestamps: Vec<f64>,
    /// Per-pulse digitizer clock counts.
    pub clocks: Vec<u32>,
    /// Per-pulse azimuth fractions.
    pub azimuths: Vec<f32>,
    /// Per-pulse trigger counts.
    pub trigger_counts: Vec<u32>,
    /// Samples of every pulse, concatenated in pulse order.
    pub samples: Vec<u16>,
    /// How the sweep ended; `None` while open.
    pub closed_by: Option<SweepClose>,
}

impl Sweep {
    fn open(index: u64, first: &Pulse, samples_per_pulse: usize, capacity: usize) -> Self {
        let capacity = capacity.min(PREALLOC_PULSES);
        Self {
            index,
            rotation_ref_count: first.rotation_ref_count,
            samples_per_pulse,
            ts0: first.ts,
            tsn: first.ts,
            timestamps: Vec::with_capacity(capacity),
            clocks: Vec::with_capacity(capacity),
            azimuths: Vec::with_capacity(capacity),
            trigger_counts: Vec::with_capacity(capacity),
            samples: Vec::with_capacity(capacity * samples_per_pulse),
            closed_by: None,
        }
    }

    fn push(&mut self, pulse: Pulse) {
        debug_assert_eq!(pulse.samples.len(), self.samples_per_pulse);
        self.tsn = pulse.ts;
        self.timestamps.push(pulse.ts);
        self.clocks.push(pulse.trigger_clock);
        self.azimuths.push(pulse.azimuth);
        self.trigger_counts.push(pulse.trigger_count);
        self.samples.extend_from_slice(&pulse.samples);
    }

    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Whether the sweep has no pulses.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Samples of pulse `i`.
    pub fn pulse_samples(&self, i: usize) -> &[u16] {
        let start = i * self.samples_per_pulse;
        &self.samples[start..start + self.samples_per_pulse]
    }
}

/// Counters kept by the segmenter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmenterStats {
    /// Sweeps closed by a rotation reference change.
    pub rotation_flushes: u64,
    /// Sweeps closed because they reached the pulse cap.
    pub early_flushes: u64,
    /// Sweeps closed by `finish`.
    pub final_flushes: u64,
}

/// Splits a pulse stream into sweeps.
#[derive(Debug)]
pub struct SweepSegmenter {
    samples_per_pulse: usize,
    max_pulses: usize,
    open: Option<Sweep>,
    next_index: u64,
    stats: SegmenterStats,
}

impl SweepSegmenter {
    /// Segmenter for pulses of `samples_per_pulse` samples, capping sweeps at `max_pulses`.
    pub fn new(samples_per_pulse: usize, max_pulses: usize) -> Self {
        Self {
            samples_per_pulse,
            max_pulses: max_pulses.max(1),
            open: None,
            next_index: 0,
            stats: SegmenterStats::default(),
        }
    }

    /// Add a pulse and return the sweep it completed, if any.
    ///
    /// A new rotation reference count closes the open sweep before the pulse is added. A
    /// sweep reaching the pulse cap is closed right after the pulse that filled it; the next
    /// pulse opens a fresh sweep under the same rotation reference count. Since a capped sweep
    /// never stays open, one pulse closes at most one sweep.
    pub fn push(&mut self, pulse: Pulse) -> Option<Sweep> {
        let rotated = self
            .open
            .as_ref()
            .is_some_and(|open| open.rotation_ref_count != pulse.rotation_ref_count);
        let mut completed = None;
        if rotated {
            self.stats.rotation_flushes += 1;
            completed = self.close(SweepClose::Rotation);
        }

        let (samples_per_pulse, capacity) = (self.samples_per_pulse, self.max_pulses);
        let next_index = &mut self.next_index;
        let sweep = self.open.get_or_insert_with(|| {
            let index = *next_index;
            *next_index += 1;
            Sweep::open(index, &pulse, samples_per_pulse, capacity)
        });
        sweep.push(pulse);

        if sweep.len() >= self.max_pulses {
            self.stats.early_flushes += 1;
            debug_assert!(completed.is_none());
            completed = self.close(SweepClose::Capacity);
        }

        completed
    }

    /// Close and return the open sweep, if any.
    pub fn finish(&mut self) -> Option<Sweep> {
        let sweep = self.close(SweepClose::EndOfStream);
        if sweep.is_some() {
            self.stats.final_flushes += 1;
        }
        sweep
    }

    /// The sweep currently accumulating.
    pub fn open_sweep(&self) -> Option<&Sweep> {
        self.open.as_ref()
    }

    /// Segmenter counters.
    pub fn stats(&self) -> SegmenterStats {
        self.stats
    }

    fn close(&mut self, reason: SweepClose) -> Option<Sweep> {
        self.open.take().map(|mut sweep| {
            sweep.closed_by = Some(reason);
            sweep
        })
    }
}
