//! Receive-side de-framing state machine
//!
//! Consumes the link one token at a time:
//!
//! ```text
//! WaitSom -> WaitLen -> WaitPlane -> Payload -> WaitCrcHi -> WaitCrcLo -> WaitEom
//!    ^                                                                      |
//!    +---------------------------- frame complete --------------------------+
//! ```
//!
//! Start and end tokens share the value `0x7E`, so message boundaries are
//! recovered from two rules:
//!
//! - A start token is never followed by another start token (the length byte
//!   is at most 124). A `0x7E` seen while waiting for the length means the
//!   previous `0x7E` closed something else; it becomes the new start.
//! - Inside the payload every genuine `0x7E` is escaped. An unescaped `0x7E`
//!   there, or a bad end token or CRC, abandons the frame. Any abandoning
//!   `0x7E` is taken as the start of the next frame.
//!
//! The plane and CRC bytes are positional and may take any value, `0x7E`
//! included.
//!
//! `0x1B` is an escape only when the next payload byte is `0x7E`; followed
//! by anything else it is literal data. Since the framer escapes every
//! `0x7E`, a stuffed payload never holds a literal `0x1B` directly followed
//! by a raw `0x7E`, so this decoding is unambiguous.

use heapless::Vec;

use super::plane::{CommsPlane, PlaneAddress, SignalPlane};
use super::{ESCAPE, EOM, MAX_PAYLOAD, MAX_STUFFED_PAYLOAD, SOM};
use crate::crc::{compute_crc, CRC_SEED};
use crate::error::DeframeError;
use crate::ring_buffer::{RingBuffer, Token};

/// Tokens taken from a ring per unload in `Deframer::drain`
const DRAIN_CHUNK: usize = 16;

/// De-framer position within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeframeState {
    WaitSom,
    WaitLen,
    WaitPlane,
    Payload,
    WaitCrcHi,
    WaitCrcLo,
    WaitEom,
}

/// A frame that passed length, framing and CRC checks
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceivedMessage {
    pub plane: PlaneAddress,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl ReceivedMessage {
    pub fn comms(&self) -> CommsPlane {
        self.plane.comms
    }

    pub fn signal(&self) -> SignalPlane {
        self.plane.signal
    }
}

/// Outcome of feeding one token
pub type DeframeResult = Result<ReceivedMessage, DeframeError>;

/// Streaming frame decoder
pub struct Deframer {
    state: DeframeState,
    crc: u16,
    declared: u8,
    consumed: u8,
    escape_pending: bool,
    plane: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
    accepted: u32,
    rejected: u32,
}

impl Deframer {
    pub const fn new() -> Self {
        Self {
            state: DeframeState::WaitSom,
            crc: CRC_SEED,
            declared: 0,
            consumed: 0,
            escape_pending: false,
            plane: 0,
            payload: Vec::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn state(&self) -> DeframeState {
        self.state
    }

    /// Frames delivered since creation
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// Frames discarded since creation
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Drop any partial frame and wait for a start token
    pub fn reset(&mut self) {
        self.state = DeframeState::WaitSom;
        self.escape_pending = false;
        self.payload.clear();
    }

    /// Feed one byte
    ///
    /// Returns `Some` when the byte completes a frame or causes one to be
    /// discarded.
    pub fn push(&mut self, byte: u8) -> Option<DeframeResult> {
        match self.state {
            DeframeState::WaitSom => {
                if byte == SOM {
                    self.begin();
                } else {
                    trace!("deframer: skipping {=u8:#x} outside frame", byte);
                }
                None
            }
            DeframeState::WaitLen => {
                if byte == SOM {
                    // Start token never follows a start token: re-anchor here
                    trace!("deframer: resync on repeated start token");
                    return None;
                }
                if byte == 0 || usize::from(byte) > MAX_STUFFED_PAYLOAD {
                    return Some(self.abandon(DeframeError::BadLength, DeframeState::WaitSom));
                }
                compute_crc(byte, &mut self.crc);
                self.declared = byte;
                self.state = DeframeState::WaitPlane;
                None
            }
            DeframeState::WaitPlane => {
                compute_crc(byte, &mut self.crc);
                self.plane = byte;
                self.consumed = 0;
                self.escape_pending = false;
                self.payload.clear();
                self.state = DeframeState::Payload;
                None
            }
            DeframeState::Payload => self.accumulate(byte),
            DeframeState::WaitCrcHi => {
                compute_crc(byte, &mut self.crc);
                self.state = DeframeState::WaitCrcLo;
                None
            }
            DeframeState::WaitCrcLo => {
                compute_crc(byte, &mut self.crc);
                self.state = DeframeState::WaitEom;
                None
            }
            DeframeState::WaitEom => {
                if byte != EOM {
                    return Some(self.abandon(DeframeError::MissingEndToken, DeframeState::WaitSom));
                }
                if self.crc != 0 {
                    return Some(self.abandon(DeframeError::CrcMismatch, DeframeState::WaitLen));
                }
                self.accepted = self.accepted.wrapping_add(1);
                self.state = DeframeState::WaitSom;
                Some(Ok(ReceivedMessage {
                    plane: PlaneAddress::from_byte(self.plane),
                    payload: core::mem::take(&mut self.payload),
                }))
            }
        }
    }

    /// Feed a block of bytes, handing every outcome to `on_result`
    pub fn feed(&mut self, bytes: &[u8], mut on_result: impl FnMut(DeframeResult)) {
        for &byte in bytes {
            if let Some(result) = self.push(byte) {
                on_result(result);
            }
        }
    }

    /// Drain every token currently in `ring` through the de-framer
    ///
    /// Tokens carry one byte each; the high byte is ignored. Returns the
    /// number of tokens consumed.
    pub fn drain(
        &mut self,
        ring: &mut RingBuffer,
        guarded: bool,
        mut on_result: impl FnMut(DeframeResult),
    ) -> usize {
        let mut chunk: [Token; DRAIN_CHUNK] = [0; DRAIN_CHUNK];
        let mut total = 0;
        loop {
            let count = ring.unload(&mut chunk, DRAIN_CHUNK, guarded);
            if count == 0 {
                break total;
            }
            total += count;
            for &token in &chunk[..count] {
                if let Some(result) = self.push(token as u8) {
                    on_result(result);
                }
            }
        }
    }

    fn begin(&mut self) {
        self.crc = CRC_SEED;
        self.escape_pending = false;
        self.payload.clear();
        self.state = DeframeState::WaitLen;
    }

    fn abandon(&mut self, reason: DeframeError, next: DeframeState) -> DeframeResult {
        debug!("deframer: discarding frame: {}", reason);
        self.rejected = self.rejected.wrapping_add(1);
        if next == DeframeState::WaitLen {
            self.begin();
        } else {
            self.reset();
        }
        Err(reason)
    }

    fn accumulate(&mut self, byte: u8) -> Option<DeframeResult> {
        if byte == SOM && !self.escape_pending {
            return Some(self.abandon(DeframeError::UnexpectedStartToken, DeframeState::WaitLen));
        }

        compute_crc(byte, &mut self.crc);
        self.consumed += 1;

        let stored = if self.escape_pending {
            self.escape_pending = false;
            if byte == SOM {
                self.store(SOM)
            } else {
                // The pending 0x1B was data
                self.store(ESCAPE) && self.take_data(byte)
            }
        } else {
            self.take_data(byte)
        };
        if !stored {
            return Some(self.abandon(DeframeError::PayloadOverflow, DeframeState::WaitSom));
        }

        if self.consumed == self.declared {
            if self.escape_pending {
                self.escape_pending = false;
                if !self.store(ESCAPE) {
                    return Some(self.abandon(DeframeError::PayloadOverflow, DeframeState::WaitSom));
                }
            }
            self.state = DeframeState::WaitCrcHi;
        }
        None
    }

    /// Store a non-escaped byte, or hold a `0x1B` until the next byte decides
    fn take_data(&mut self, byte: u8) -> bool {
        if byte == ESCAPE {
            self.escape_pending = true;
            true
        } else {
            self.store(byte)
        }
    }

    fn store(&mut self, byte: u8) -> bool {
        self.payload.push(byte).is_ok()
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_message;

    fn collect(deframer: &mut Deframer, bytes: &[u8]) -> Vec<DeframeResult, 8> {
        let mut results = Vec::new();
        deframer.feed(bytes, |r| {
            results.push(r).unwrap();
        });
        results
    }

    fn wire(comms: CommsPlane, signal: SignalPlane, payload: &[u8]) -> Vec<u8, 130> {
        frame_message(comms, signal, payload).unwrap().to_wire()
    }

    #[test]
    fn test_golden_frame_decodes() {
        let mut deframer = Deframer::new();
        let results = collect(
            &mut deframer,
            &[0x7E, 0x03, 0x00, 0x1B, 0x7E, 0x01, 0x77, 0x3B, 0x7E],
        );
        assert_eq!(results.len(), 1);
        let message = results[0].as_ref().unwrap();
        assert_eq!(message.comms(), CommsPlane::Uart);
        assert_eq!(message.signal(), SignalPlane::Control0);
        assert_eq!(message.payload.as_slice(), &[0x7E, 0x01]);
        assert_eq!(deframer.state(), DeframeState::WaitSom);
    }

    #[test]
    fn test_noise_before_frame_ignored() {
        let mut deframer = Deframer::new();
        let frame = wire(CommsPlane::Usart0, SignalPlane::Data0, b"ok");
        assert!(collect(&mut deframer, &[0x00, 0x55, 0x1B, 0xFF]).is_empty());
        let results = collect(&mut deframer, &frame);
        assert_eq!(results[0].as_ref().unwrap().payload.as_slice(), b"ok");
        assert_eq!(deframer.rejected(), 0);
    }

    #[test]
    fn test_repeated_start_tokens_resync() {
        let mut deframer = Deframer::new();
        let frame = wire(CommsPlane::Usart0, SignalPlane::Data0, b"x");
        let results = collect(&mut deframer, &[0x7E, 0x7E, 0x7E]);
        assert!(results.is_empty());
        let results = collect(&mut deframer, &frame[1..]);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut deframer = Deframer::new();
        let mut stream: Vec<u8, 260> = Vec::new();
        stream
            .extend_from_slice(&wire(CommsPlane::Uart, SignalPlane::Control0, &[1, 2]))
            .unwrap();
        stream
            .extend_from_slice(&wire(CommsPlane::I2c, SignalPlane::Data5, &[0x7E]))
            .unwrap();
        let results = collect(&mut deframer, &stream);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_ref().unwrap().comms(), CommsPlane::I2c);
        assert_eq!(results[1].as_ref().unwrap().payload.as_slice(), &[0x7E]);
        assert_eq!(deframer.accepted(), 2);
    }

    #[test]
    fn test_crc_corruption_discarded() {
        let mut deframer = Deframer::new();
        let mut frame = wire(CommsPlane::Uart, SignalPlane::Data0, b"abc");
        frame[4] ^= 0x01;
        let results = collect(&mut deframer, &frame);
        assert_eq!(results.as_slice(), &[Err(DeframeError::CrcMismatch)]);
        // The failed end token is treated as a fresh start
        assert_eq!(deframer.state(), DeframeState::WaitLen);

        let good = wire(CommsPlane::Uart, SignalPlane::Data0, b"abc");
        let results = collect(&mut deframer, &good);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn test_truncated_frame_recovers_on_next_start() {
        let mut deframer = Deframer::new();
        let frame = wire(CommsPlane::Uart, SignalPlane::Data0, b"hello");
        // Lose the tail: the next frame's start token lands inside the payload
        let mut stream: Vec<u8, 260> = Vec::new();
        stream.extend_from_slice(&frame[..5]).unwrap();
        stream.extend_from_slice(&frame).unwrap();
        let results = collect(&mut deframer, &stream);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(DeframeError::UnexpectedStartToken));
        assert_eq!(results[1].as_ref().unwrap().payload.as_slice(), b"hello");
    }

    #[test]
    fn test_bad_length_rejected() {
        let mut deframer = Deframer::new();
        assert_eq!(
            collect(&mut deframer, &[0x7E, 0x00]).as_slice(),
            &[Err(DeframeError::BadLength)]
        );
        assert_eq!(
            collect(&mut deframer, &[0x7E, 125]).as_slice(),
            &[Err(DeframeError::BadLength)]
        );
        assert_eq!(deframer.state(), DeframeState::WaitSom);
    }

    #[test]
    fn test_missing_end_token() {
        let mut deframer = Deframer::new();
        let mut frame = wire(CommsPlane::Uart, SignalPlane::Data0, b"z");
        let last = frame.len() - 1;
        frame[last] = 0x00;
        assert_eq!(
            collect(&mut deframer, &frame).as_slice(),
            &[Err(DeframeError::MissingEndToken)]
        );
    }

    #[test]
    fn test_plane_and_crc_bytes_may_equal_start_token() {
        // Anonymous4 (0xE) on Data3 (0x7) gives plane byte 0x7E
        let frame = wire(CommsPlane::Anonymous4, SignalPlane::Data3, b"p");
        assert_eq!(frame[2], 0x7E);
        let mut deframer = Deframer::new();
        let results = collect(&mut deframer, &frame);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().comms(), CommsPlane::Anonymous4);
    }

    #[test]
    fn test_literal_escape_bytes_round_trip() {
        let payloads: [&[u8]; 5] = [
            &[0x1B],
            &[0x1B, 0x7E],
            &[0x1B, 0x1B, 0x7E, 0x1B],
            &[0x7E, 0x1B, 0x00],
            &[0x00, 0x1B, 0x1B],
        ];
        for payload in payloads {
            let frame = wire(CommsPlane::SpiRadio1, SignalPlane::Control2, payload);
            let mut deframer = Deframer::new();
            let results = collect(&mut deframer, &frame);
            assert_eq!(results.len(), 1, "{:?}", payload);
            assert_eq!(results[0].as_ref().unwrap().payload.as_slice(), payload);
        }
    }

    #[test]
    fn test_unstuffed_overflow_rejected() {
        // 63 non-escaped payload bytes with a valid CRC
        let mut frame: Vec<u8, 130> = Vec::new();
        let mut crc = CRC_SEED;
        frame.push(SOM).unwrap();
        for byte in [63u8, 0x00] {
            compute_crc(byte, &mut crc);
            frame.push(byte).unwrap();
        }
        for _ in 0..63 {
            compute_crc(0x41, &mut crc);
            frame.push(0x41).unwrap();
        }
        frame.extend_from_slice(&crc.to_be_bytes()).unwrap();
        frame.push(EOM).unwrap();

        let mut deframer = Deframer::new();
        let results = collect(&mut deframer, &frame);
        assert_eq!(results[0], Err(DeframeError::PayloadOverflow));
    }

    #[test]
    fn test_drain_from_ring_buffer() {
        let frame = wire(CommsPlane::Usart2, SignalPlane::Data4, &[0x10, 0x7E, 0x20]);
        let mut ring = RingBuffer::initialise(64).unwrap();
        assert_eq!(ring.load_bytes(&frame, true), frame.len());

        let mut deframer = Deframer::new();
        let mut received = None;
        let consumed = deframer.drain(&mut ring, true, |r| received = Some(r));
        assert_eq!(consumed, frame.len());
        assert!(ring.is_empty());
        let message = received.unwrap().unwrap();
        assert_eq!(message.payload.as_slice(), &[0x10, 0x7E, 0x20]);
        assert_eq!(message.signal(), SignalPlane::Data4);
    }

    #[test]
    fn test_drain_spans_several_chunks() {
        let payload = [0x5A; 40];
        let frame = wire(CommsPlane::Usart1, SignalPlane::Data1, &payload);
        assert!(frame.len() > 2 * DRAIN_CHUNK);
        let mut ring = RingBuffer::initialise(64).unwrap();
        assert_eq!(ring.load_bytes(&frame, true), frame.len());

        let mut deframer = Deframer::new();
        let mut count = 0;
        let consumed = deframer.drain(&mut ring, true, |r| {
            assert_eq!(r.unwrap().payload.as_slice(), &payload);
            count += 1;
        });
        assert_eq!(consumed, frame.len());
        assert_eq!(count, 1);
    }
}
