//! CCITT CRC-16 engine
//!
//! Polynomial `0x1021`, MSB first, one bit at a time. No lookup table: the
//! link runs on parts where 512 bytes of flash matter more than a few
//! cycles per byte.
//!
//! Seed a fresh computation with `CRC_SEED`. Running the same computation
//! over a block followed by its own CRC (high byte first) leaves the
//! register at zero, which is how received frames are checked.

use crate::error::LinkError;

/// Initial register value for a fresh computation
pub const CRC_SEED: u16 = 0xFFFF;

/// Generator polynomial (x^16 + x^12 + x^5 + 1)
pub const CRC_POLYNOMIAL: u16 = 0x1021;

/// Conformance message: the body of a one-byte frame on
/// `SpiRadio2`/`ExtensionData0` carrying `0x36`
pub const CRC_KNOWN_MESSAGE: [u8; 3] = [0x01, 0xD7, 0x36];

/// CRC of `CRC_KNOWN_MESSAGE` from `CRC_SEED`
pub const CRC_KNOWN_CHECKSUM: u16 = 0x2189;

/// Fold one byte into the CRC register
#[inline]
pub fn compute_crc(byte: u8, crc: &mut u16) {
    *crc ^= u16::from(byte) << 8;
    for _ in 0..8 {
        if *crc & 0x8000 != 0 {
            *crc = (*crc << 1) ^ CRC_POLYNOMIAL;
        } else {
            *crc <<= 1;
        }
    }
}

/// Fold every byte of `data` into the CRC register
///
/// The caller supplies the starting register (normally `CRC_SEED`), so a
/// block may be processed in pieces.
///
/// # Errors
///
/// Returns `LinkError::NullOrMissingParameter` if `data` is empty.
pub fn block_compute_crc(data: &[u8], crc: &mut u16) -> Result<(), LinkError> {
    if data.is_empty() {
        return Err(LinkError::NullOrMissingParameter);
    }
    for &byte in data {
        compute_crc(byte, crc);
    }
    Ok(())
}

/// Power-on self check of the CRC engine
///
/// Verifies the known checksum and that appending it reduces the register
/// to zero.
pub fn self_test() -> bool {
    let mut crc = CRC_SEED;
    if block_compute_crc(&CRC_KNOWN_MESSAGE, &mut crc).is_err() || crc != CRC_KNOWN_CHECKSUM {
        return false;
    }
    block_compute_crc(&crc.to_be_bytes(), &mut crc).is_ok() && crc == 0
}
