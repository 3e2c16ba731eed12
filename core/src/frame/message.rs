//! Outbound frame construction

use heapless::Vec;

use super::plane::{CommsPlane, PlaneAddress, SignalPlane};
use super::{ESCAPE, EOM, MAX_FRAME_LENGTH, MAX_PAYLOAD, MAX_STUFFED_PAYLOAD, SOM};
use crate::crc::{block_compute_crc, compute_crc, CRC_SEED};
use crate::error::LinkError;

/// One link frame, with its payload already byte-stuffed
///
/// `length` is the stuffed payload length: every escape byte counts.
#[derive(Clone)]
pub struct MessageStructure {
    start: u8,
    length: u8,
    plane: u8,
    payload: [u8; MAX_STUFFED_PAYLOAD],
    crc_hi: u8,
    crc_lo: u8,
    end: u8,
}

impl core::fmt::Debug for MessageStructure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageStructure")
            .field("length", &self.length)
            .field("plane", &self.plane)
            .field("payload", &self.stuffed_payload())
            .field("crc", &self.crc())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MessageStructure {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "MessageStructure {{ length: {=u8}, plane: {=u8:#x}, crc: {=u16:#x} }}",
            self.length,
            self.plane,
            self.crc()
        )
    }
}

/// Build a frame for `payload` on the given planes
///
/// Every payload byte equal to `0x7E` is preceded by the escape byte `0x1B`.
/// No other byte is escaped, including `0x1B` itself; the de-framer only
/// treats `0x1B` as an escape when the next byte is `0x7E`, so literal
/// `0x1B` data still round-trips.
///
/// The CRC covers the length byte, the plane byte and the stuffed payload.
///
/// # Errors
///
/// Returns `LinkError::DefinitionError` if `payload` is empty or longer than
/// 62 bytes.
pub fn frame_message(
    comms: CommsPlane,
    signal: SignalPlane,
    payload: &[u8],
) -> Result<MessageStructure, LinkError> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(LinkError::DefinitionError);
    }

    let mut message = MessageStructure {
        start: SOM,
        length: 0,
        plane: PlaneAddress::new(comms, signal).to_byte(),
        payload: [0; MAX_STUFFED_PAYLOAD],
        crc_hi: 0,
        crc_lo: 0,
        end: EOM,
    };

    let mut stuffed = 0usize;
    for &byte in payload {
        if byte == SOM {
            message.payload[stuffed] = ESCAPE;
            stuffed += 1;
        }
        message.payload[stuffed] = byte;
        stuffed += 1;
    }
    // At most 2 * 62 = 124, always fits
    message.length = stuffed as u8;

    let mut crc = CRC_SEED;
    compute_crc(message.length, &mut crc);
    compute_crc(message.plane, &mut crc);
    block_compute_crc(&message.payload[..stuffed], &mut crc)?;
    [message.crc_hi, message.crc_lo] = crc.to_be_bytes();

    Ok(message)
}

impl MessageStructure {
    /// Stuffed payload length as carried in the length byte
    pub fn stuffed_length(&self) -> usize {
        usize::from(self.length)
    }

    pub fn length_byte(&self) -> u8 {
        self.length
    }

    pub fn plane_byte(&self) -> u8 {
        self.plane
    }

    pub fn plane(&self) -> PlaneAddress {
        PlaneAddress::from_byte(self.plane)
    }

    /// Payload as it appears on the wire (escapes included)
    pub fn stuffed_payload(&self) -> &[u8] {
        &self.payload[..self.stuffed_length()]
    }

    pub fn crc(&self) -> u16 {
        u16::from_be_bytes([self.crc_hi, self.crc_lo])
    }

    /// Payload with escapes removed
    pub fn unstuffed_payload(&self) -> Vec<u8, MAX_PAYLOAD> {
        let mut out = Vec::new();
        let mut bytes = self.stuffed_payload().iter().peekable();
        while let Some(&byte) = bytes.next() {
            if byte == ESCAPE && bytes.peek() == Some(&&SOM) {
                continue;
            }
            // Construction never produces more than 62 unstuffed bytes
            let _ = out.push(byte);
        }
        out
    }

    /// Re-run the CRC over everything it protects plus the CRC bytes
    ///
    /// A well-formed frame reduces the register to zero.
    pub fn verify(&self) -> bool {
        let mut crc = CRC_SEED;
        compute_crc(self.length, &mut crc);
        compute_crc(self.plane, &mut crc);
        for &byte in self.stuffed_payload() {
            compute_crc(byte, &mut crc);
        }
        compute_crc(self.crc_hi, &mut crc);
        compute_crc(self.crc_lo, &mut crc);
        crc == 0
    }

    /// Exact wire image: `SOM LEN PLANE PAYLOAD.. CRC_HI CRC_LO EOM`
    pub fn to_wire(&self) -> Vec<u8, MAX_FRAME_LENGTH> {
        let mut wire = Vec::new();
        // Capacity covers the largest possible frame
        let _ = wire.push(self.start);
        let _ = wire.push(self.length);
        let _ = wire.push(self.plane);
        let _ = wire.extend_from_slice(self.stuffed_payload());
        let _ = wire.push(self.crc_hi);
        let _ = wire.push(self.crc_lo);
        let _ = wire.push(self.end);
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_frame_with_escape() {
        let message =
            frame_message(CommsPlane::Uart, SignalPlane::Control0, &[0x7E, 0x01]).unwrap();
        assert_eq!(
            message.to_wire().as_slice(),
            &[0x7E, 0x03, 0x00, 0x1B, 0x7E, 0x01, 0x77, 0x3B, 0x7E]
        );
        assert!(message.verify());
    }

    #[test]
    fn test_golden_frame_plain() {
        let message = frame_message(CommsPlane::SpiRadio0, SignalPlane::Data1, b"AB").unwrap();
        assert_eq!(
            message.to_wire().as_slice(),
            &[0x7E, 0x02, 0x35, 0x41, 0x42, 0x11, 0x86, 0x7E]
        );
    }

    #[test]
    fn test_known_crc_frame() {
        let message =
            frame_message(CommsPlane::SpiRadio2, SignalPlane::ExtensionData0, &[0x36]).unwrap();
        assert_eq!(message.crc(), crate::crc::CRC_KNOWN_CHECKSUM);
    }

    #[test]
    fn test_length_limits() {
        assert_eq!(
            frame_message(CommsPlane::Uart, SignalPlane::Data0, &[]).err(),
            Some(LinkError::DefinitionError)
        );
        assert_eq!(
            frame_message(CommsPlane::Uart, SignalPlane::Data0, &[0u8; 63]).err(),
            Some(LinkError::DefinitionError)
        );
        assert!(frame_message(CommsPlane::Uart, SignalPlane::Data0, &[0u8; 62]).is_ok());
        assert!(frame_message(CommsPlane::Uart, SignalPlane::Data0, &[0u8; 1]).is_ok());
    }

    #[test]
    fn test_all_start_tokens_double_length() {
        let message = frame_message(CommsPlane::Usart1, SignalPlane::Data2, &[SOM; 62]).unwrap();
        assert_eq!(message.stuffed_length(), 124);
        assert!(message
            .stuffed_payload()
            .chunks(2)
            .all(|pair| pair == [ESCAPE, SOM]));
        assert!(message.verify());
        assert_eq!(message.unstuffed_payload().as_slice(), &[SOM; 62]);
        assert_eq!(message.to_wire().len(), MAX_FRAME_LENGTH);
    }

    #[test]
    fn test_escape_byte_not_escaped() {
        let message =
            frame_message(CommsPlane::I2c, SignalPlane::Control1, &[ESCAPE, 0x00]).unwrap();
        assert_eq!(message.stuffed_payload(), &[ESCAPE, 0x00]);
        assert_eq!(message.unstuffed_payload().as_slice(), &[ESCAPE, 0x00]);
    }

    #[test]
    fn test_corrupted_frame_fails_verify() {
        let mut message = frame_message(CommsPlane::Uart, SignalPlane::Data0, b"hello").unwrap();
        message.payload[2] ^= 0x04;
        assert!(!message.verify());
    }
}
