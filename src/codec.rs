//! Sample format word and bit-packing codec.
//!
//! A sample format is recorded as one integer: the low 8 bits hold the number of significant
//! bits per sample, bit 8 (`0x100`) flags bit-packed storage.
//!
//! Packed samples form a little-endian, least-significant-bit-first stream. For 12-bit
//! samples every three bytes carry two samples; numbering nibbles low-then-high within each
//! byte:
//!
//! ```text
//! bytes:    byte0    byte1    byte2
//! nibbles:  A   B    C   D    E   F
//! samples:  A B C = sample0   D E F = sample1
//! ```
//!
//! Unpacked samples take a whole number of bytes each (one byte up to 8 bits, two
//! little-endian bytes up to 16 bits) with the value in the low bits. Every bit that fits in
//! those bytes is kept, so a wide unpacked format stores any `u16` sample unchanged.
//! Packed and one-byte formats can only hold [`SampleFormat::stored_mask`]; callers count
//! samples that do not fit with [`clipped_samples`].

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, CaptureError};

/// Format word flag marking bit-packed samples.
pub const FORMAT_PACKED_FLAG: u32 = 0x100;

const BITS_MASK: u32 = 0xff;

/// Bits per sample plus packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Significant bits per sample, 1..=16.
    pub bits: u8,
    /// Whether samples are stored as a continuous bit stream.
    pub packed: bool,
}

impl SampleFormat {
    /// Create a format, rejecting widths outside 1..=16.
    pub fn new(bits: u8, packed: bool) -> AppResult<Self> {
        if !(1..=16).contains(&bits) {
            return Err(CaptureError::Configuration(format!(
                "sample width must be 1..=16 bits, got {bits}"
            )));
        }
        Ok(Self { bits, packed })
    }

    /// Decode a stored format word.
    pub fn from_word(word: u32) -> AppResult<Self> {
        let bits = u8::try_from(word & BITS_MASK).unwrap_or(0);
        Self::new(bits, word & FORMAT_PACKED_FLAG != 0)
    }

    /// The stored format word.
    pub fn word(&self) -> u32 {
        let flags = if self.packed { FORMAT_PACKED_FLAG } else { 0 };
        u32::from(self.bits) | flags
    }

    /// Bits of a sample that survive encoding in this format.
    pub fn stored_mask(&self) -> u16 {
        match (self.packed, self.bits) {
            (true, bits) => low_mask(bits) as u16,
            (false, bits) if bits <= 8 => 0x00ff,
            (false, _) => 0xffff,
        }
    }

    /// Bytes needed to store one pulse of `ns` samples.
    pub fn bytes_per_pulse(&self, ns: usize) -> usize {
        let bits = usize::from(self.bits);
        if self.packed {
            (ns * bits).div_ceil(8)
        } else {
            ns * bits.div_ceil(8)
        }
    }
}

/// Pack samples into an LSB-first bit stream of `bits` bits each.
///
/// Bits above `bits` in each sample are discarded.
pub fn pack(samples: &[u16], bits: u8) -> Vec<u8> {
    let width = u32::from(bits);
    let mask = low_mask(bits);
    let mut out = Vec::with_capacity((samples.len() * usize::from(bits)).div_ceil(8));
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    for &sample in samples {
        acc |= (u32::from(sample) & mask) << filled;
        filled += width;
        while filled >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        out.push((acc & 0xff) as u8);
    }
    out
}

/// Unpack `ns` samples of `bits` bits each from an LSB-first bit stream.
pub fn unpack(bytes: &[u8], bits: u8, ns: usize) -> AppResult<Vec<u16>> {
    let needed = (ns * usize::from(bits)).div_ceil(8);
    if bytes.len() < needed {
        return Err(CaptureError::Storage(format!(
            "packed block of {} bytes is too short for {ns} {bits}-bit samples",
            bytes.len()
        )));
    }
    let width = u32::from(bits);
    let mask = low_mask(bits);
    let mut out = Vec::with_capacity(ns);
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    let mut input = bytes.iter();
    while out.len() < ns {
        while filled < width {
            // Length was checked above.
            let byte = input.next().copied().unwrap_or(0);
            acc |= u32::from(byte) << filled;
            filled += 8;
        }
        out.push((acc & mask) as u16);
        acc >>= width;
        filled -= width;
    }
    Ok(out)
}

/// Number of samples with bits outside `format`'s [`SampleFormat::stored_mask`].
pub fn clipped_samples(format: SampleFormat, samples: &[u16]) -> usize {
    let lost = !format.stored_mask();
    samples.iter().filter(|&&s| s & lost != 0).count()
}

/// Encode one pulse's samples in the stored representation of `format`.
///
/// Bits outside [`SampleFormat::stored_mask`] are discarded.
pub fn encode_samples(format: SampleFormat, samples: &[u16]) -> Vec<u8> {
    if format.packed {
        return pack(samples, format.bits);
    }
    if format.bits <= 8 {
        samples.iter().map(|&s| (s & 0xff) as u8).collect()
    } else {
        samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
    }
}

/// Decode `ns` samples stored in the representation of `format`.
pub fn decode_samples(format: SampleFormat, bytes: &[u8], ns: usize) -> AppResult<Vec<u16>> {
    if format.packed {
        return unpack(bytes, format.bits, ns);
    }
    let needed = format.bytes_per_pulse(ns);
    if bytes.len() < needed {
        return Err(CaptureError::Storage(format!(
            "sample block of {} bytes is too short for {ns} samples",
            bytes.len()
        )));
    }
    if format.bits <= 8 {
        Ok(bytes[..ns].iter().map(|&b| u16::from(b)).collect())
    } else {
        Ok(bytes[..needed]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

fn low_mask(bits: u8) -> u32 {
    (1u32 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_word_round_trips() {
        let packed12 = SampleFormat::new(12, true).unwrap();
        assert_eq!(packed12.word(), 12 + 256);
        assert_eq!(SampleFormat::from_word(268).unwrap(), packed12);
        assert!(!SampleFormat::from_word(14).unwrap().packed);
        assert!(SampleFormat::from_word(0x100).is_err());
        assert!(SampleFormat::new(17, false).is_err());
    }

    #[test]
    fn bytes_per_pulse_rounds_per_mode() {
        let packed = SampleFormat::new(12, true).unwrap();
        assert_eq!(packed.bytes_per_pulse(3), 5);
        assert_eq!(packed.bytes_per_pulse(4), 6);

        let unpacked = SampleFormat::new(12, false).unwrap();
        assert_eq!(unpacked.bytes_per_pulse(3), 6);

        let narrow = SampleFormat::new(8, false).unwrap();
        assert_eq!(narrow.bytes_per_pulse(3), 3);
    }

    #[test]
    fn twelve_bit_nibble_order() {
        // sample0 = 0xCBA, sample1 = 0xFED
        let bytes = pack(&[0x0CBA, 0x0FED], 12);
        assert_eq!(bytes, vec![0xBA, 0xDC, 0xFE]);
        assert_eq!(unpack(&bytes, 12, 2).unwrap(), vec![0x0CBA, 0x0FED]);
    }

    #[test]
    fn pack_discards_high_bits() {
        let bytes = pack(&[0xFFFF], 4);
        assert_eq!(bytes, vec![0x0F]);
    }

    #[test]
    fn odd_widths_survive_packing() {
        let samples: Vec<u16> = (0..37).map(|i| (i * 977) as u16 & 0x7ff).collect();
        let bytes = pack(&samples, 11);
        assert_eq!(bytes.len(), (37 * 11 + 7) / 8);
        assert_eq!(unpack(&bytes, 11, samples.len()).unwrap(), samples);
    }

    #[test]
    fn unpack_rejects_short_input() {
        assert!(unpack(&[0u8; 2], 12, 2).is_err());
    }

    #[test]
    fn unpacked_encoding_matches_width() {
        let wide = SampleFormat::new(14, false).unwrap();
        assert_eq!(encode_samples(wide, &[0x1234]), vec![0x34, 0x12]);
        let narrow = SampleFormat::new(8, false).unwrap();
        assert_eq!(encode_samples(narrow, &[0x1234]), vec![0x34]);
        assert_eq!(
            decode_samples(wide, &[0x34, 0x12], 1).unwrap(),
            vec![0x1234]
        );
    }

    #[test]
    fn wide_unpacked_samples_keep_every_bit() {
        let wide = SampleFormat::new(14, false).unwrap();
        let bytes = encode_samples(wide, &[0xFFFF, 0x8001]);
        assert_eq!(decode_samples(wide, &bytes, 2).unwrap(), vec![0xFFFF, 0x8001]);
        assert_eq!(clipped_samples(wide, &[0xFFFF, 0x8001]), 0);
    }

    #[test]
    fn clipped_samples_follow_the_stored_width() {
        let packed = SampleFormat::new(12, true).unwrap();
        assert_eq!(packed.stored_mask(), 0x0fff);
        assert_eq!(clipped_samples(packed, &[0x0fff, 0x1000, 0xffff]), 2);

        let narrow = SampleFormat::new(6, false).unwrap();
        assert_eq!(narrow.stored_mask(), 0x00ff);
        assert_eq!(clipped_samples(narrow, &[0x00ff, 0x0100]), 1);
    }
}
