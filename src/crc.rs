//! CRC-8 checksum codec for clock frames.
//!
//! Every frame ends in a CRC-8 (polynomial `0x07`, initial value 0, no
//! reflection, no final xor) over all preceding bytes, including the leading
//! address byte which is never physically transmitted by the bus master but
//! is known to both sides.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use ::crc::{CRC_8_SMBUS, Crc};

/// CRC-8/SMBUS: polynomial 0x07, init 0, no reflection, no xorout.
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// CRC-8 over every byte of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

/// CRC-8 over `frame[0..length - 1]`, i.e. everything before the trailer of a
/// frame that is `length` bytes long.
///
/// `length` is clamped to the slice, so a short buffer never panics.
pub fn compute(frame: &[u8], length: usize) -> u8 {
    let end = length.min(frame.len()).saturating_sub(1);
    checksum(&frame[..end])
}

/// Check the trailing CRC byte of `frame`.
///
/// On mismatch the trailer is rewritten with the computed value, which is
/// what a sender preparing a frame wants, and leaves the expected CRC visible
/// in receive dumps.  Returns `true` only when the stored byte was already
/// correct.  An empty frame never verifies.
pub fn verify(frame: &mut [u8]) -> bool {
    let Some((trailer, body)) = frame.split_last_mut() else {
        return false;
    };
    let computed = checksum(body);
    if *trailer == computed {
        true
    } else {
        *trailer = computed;
        false
    }
}

/// Write the correct trailer into `frame`.
pub fn seal(frame: &mut [u8]) {
    verify(frame);
}
