//! Pulse Frame wire format.
//!
//! Every pulse arrives as one fixed-size frame: a 28-byte header of seven little-endian
//! `u32` words followed by `samples_per_pulse` little-endian `u16` samples.
//!
//! ```text
//! offset  field
//!      0  magic
//!      4  trigger_count        triggers since the rotation reference reset
//!      8  trigger_clock        digitizer clock ticks since the rotation reference
//!     12  rotation_ref_sec     wall clock of the latest rotation reference
//!     16  rotation_ref_nsec
//!     20  rotation_ref_count   rotation references seen since start
//!     24  azimuth_ref_count    azimuth references since the latest rotation reference
//!     28  samples[N]           earliest sample first
//! ```
//!
//! `N` is not carried in the frame; producer and consumer agree on it before streaming
//! starts, so the frame length doubles as the ring buffer chunk size.

use crate::error::{AppResult, CaptureError};

/// Magic number of a valid pulse frame.
pub const PULSE_MAGIC: u32 = 0xF0F0_F0F0;

/// Magic number of the frame that terminates a stream.
pub const END_OF_STREAM_MAGIC: u32 = 0x0F0F_0F0F;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 7 * 4;

/// Width of one sample on the wire, in bytes.
pub const SAMPLE_WIDTH: usize = 2;

/// Largest number of samples per pulse the digitizer can deliver.
pub const MAX_SAMPLES_PER_PULSE: usize = 16384;

/// Session-wide frame geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    samples_per_pulse: usize,
}

impl FrameLayout {
    /// Create a layout for `samples_per_pulse` samples per frame.
    pub fn new(samples_per_pulse: usize) -> AppResult<Self> {
        if samples_per_pulse == 0 || samples_per_pulse > MAX_SAMPLES_PER_PULSE {
            return Err(CaptureError::Configuration(format!(
                "samples per pulse must be in 1..={MAX_SAMPLES_PER_PULSE}, got {samples_per_pulse}"
            )));
        }
        Ok(Self { samples_per_pulse })
    }

    /// Number of samples carried by each frame.
    pub fn samples_per_pulse(&self) -> usize {
        self.samples_per_pulse
    }

    /// Total frame length in bytes.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.samples_per_pulse * SAMPLE_WIDTH
    }
}

/// Decoded pulse header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseHeader {
    /// [`PULSE_MAGIC`] or [`END_OF_STREAM_MAGIC`] in a well-formed stream.
    pub magic: u32,
    /// Triggers since the rotation reference reset.
    pub trigger_count: u32,
    /// Digitizer clock ticks since the rotation reference.
    pub trigger_clock: u32,
    /// Whole seconds of the latest rotation reference's wall-clock time.
    pub rotation_ref_sec: u32,
    /// Nanoseconds of the latest rotation reference's wall-clock time.
    pub rotation_ref_nsec: u32,
    /// Rotation references seen since start; a change starts a new sweep.
    pub rotation_ref_count: u32,
    /// Azimuth references since the latest rotation reference.
    pub azimuth_ref_count: u32,
}

impl PulseHeader {
    /// Header for a valid pulse with every counter zeroed.
    pub fn pulse() -> Self {
        Self {
            magic: PULSE_MAGIC,
            ..Self::default()
        }
    }

    /// Wall-clock time of the rotation reference, in seconds since the epoch.
    pub fn rotation_ref_time(&self) -> f64 {
        f64::from(self.rotation_ref_sec) + f64::from(self.rotation_ref_nsec) * 1.0e-9
    }

    /// Wall-clock time of this pulse: the rotation reference time plus the elapsed
    /// digitizer ticks.
    pub fn timestamp(&self, tick_seconds: f64) -> f64 {
        self.rotation_ref_time() + f64::from(self.trigger_clock) * tick_seconds
    }

    fn read(bytes: &[u8]) -> Self {
        let word = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Self {
            magic: word(0),
            trigger_count: word(1),
            trigger_clock: word(2),
            rotation_ref_sec: word(3),
            rotation_ref_nsec: word(4),
            rotation_ref_count: word(5),
            azimuth_ref_count: word(6),
        }
    }

    fn write(&self, out: &mut [u8]) {
        let words = [
            self.magic,
            self.trigger_count,
            self.trigger_clock,
            self.rotation_ref_sec,
            self.rotation_ref_nsec,
            self.rotation_ref_count,
            self.azimuth_ref_count,
        ];
        for (slot, word) in out.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// A frame borrowed from chunk memory.
#[derive(Debug)]
pub enum Frame<'a> {
    /// A digitized pulse.
    Pulse {
        /// Decoded header words.
        header: PulseHeader,
        /// Raw little-endian sample bytes.
        raw_samples: &'a [u8],
    },
    /// The producer has no more pulses.
    EndOfStream,
}

impl<'a> Frame<'a> {
    /// Decode a chunk. `sequence` is only used to label a framing error.
    ///
    /// A chunk shorter than the layout's frame means the ring and the layout disagree, which
    /// is a configuration error.
    pub fn decode(layout: &FrameLayout, bytes: &'a [u8], sequence: u64) -> AppResult<Self> {
        if bytes.len() < layout.frame_len() {
            return Err(CaptureError::Configuration(format!(
                "chunk {sequence} holds {} bytes, frame needs {}",
                bytes.len(),
                layout.frame_len()
            )));
        }
        let header = PulseHeader::read(&bytes[..HEADER_LEN]);
        match header.magic {
            PULSE_MAGIC => Ok(Frame::Pulse {
                header,
                raw_samples: &bytes[HEADER_LEN..layout.frame_len()],
            }),
            END_OF_STREAM_MAGIC => Ok(Frame::EndOfStream),
            magic => Err(CaptureError::Framing { sequence, magic }),
        }
    }
}

/// Iterate the samples of a raw sample block, earliest first.
pub fn samples(raw: &[u8]) -> impl Iterator<Item = u16> + '_ {
    raw.chunks_exact(SAMPLE_WIDTH)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
}

/// Encode a pulse frame into `out`, which must be exactly one frame long.
pub fn encode_pulse(layout: &FrameLayout, header: &PulseHeader, samples: &[u16], out: &mut [u8]) {
    debug_assert_eq!(out.len(), layout.frame_len());
    debug_assert_eq!(samples.len(), layout.samples_per_pulse());
    header.write(&mut out[..HEADER_LEN]);
    for (slot, sample) in out[HEADER_LEN..].chunks_exact_mut(SAMPLE_WIDTH).zip(samples) {
        slot.copy_from_slice(&sample.to_le_bytes());
    }
}

/// Encode an end-of-stream frame into `out`.
pub fn encode_end_of_stream(layout: &FrameLayout, out: &mut [u8]) {
    debug_assert_eq!(out.len(), layout.frame_len());
    out.fill(0);
    let header = PulseHeader {
        magic: END_OF_STREAM_MAGIC,
        ..PulseHeader::default()
    };
    header.write(&mut out[..HEADER_LEN]);
}

/// Allocate and encode a pulse frame.
pub fn pulse_to_vec(layout: &FrameLayout, header: &PulseHeader, samples: &[u16]) -> Vec<u8> {
    let mut out = vec![0u8; layout.frame_len()];
    encode_pulse(layout, header, samples, &mut out);
    out
}

/// Allocate and encode an end-of-stream frame.
pub fn end_of_stream_to_vec(layout: &FrameLayout) -> Vec<u8> {
    let mut out = vec![0u8; layout.frame_len()];
    encode_end_of_stream(layout, &mut out);
    out
}
