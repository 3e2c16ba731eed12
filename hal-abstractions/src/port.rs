//! Character-at-a-time transport port
//!
//! The link layer moves one byte per call in both directions and polls a
//! ready flag first, the way a UART data register is serviced from an
//! interrupt or a background loop. Nothing here blocks.

use embedded_io::{Read, ReadReady, Write, WriteReady};

/// Single-byte transport endpoint (UART, USART, SPI radio FIFO, ...)
///
/// Implementors must never block: `get` returns `None` and `put` returns
/// `false` when the hardware is not ready.
pub trait CharacterPort {
    /// A received byte is waiting
    fn rx_ready(&mut self) -> bool;

    /// Take one received byte, if any
    fn get(&mut self) -> Option<u8>;

    /// The transmitter can accept a byte
    fn tx_ready(&mut self) -> bool;

    /// Hand one byte to the transmitter
    ///
    /// Returns `false` if the byte was not accepted.
    fn put(&mut self, byte: u8) -> bool;
}

/// Adapter exposing an `embedded-io` blocking driver as a `CharacterPort`
///
/// Reads and writes are only attempted after the driver reports ready, so the
/// underlying blocking calls return immediately. Driver errors are treated as
/// "not ready".
pub struct IoPort<T> {
    inner: T,
}

impl<T> IoPort<T> {
    /// Wrap a driver
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Borrow the wrapped driver
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap the driver
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> CharacterPort for IoPort<T>
where
    T: Read + ReadReady + Write + WriteReady,
{
    fn rx_ready(&mut self) -> bool {
        self.inner.read_ready().unwrap_or(false)
    }

    fn get(&mut self) -> Option<u8> {
        if !self.rx_ready() {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    fn tx_ready(&mut self) -> bool {
        self.inner.write_ready().unwrap_or(false)
    }

    fn put(&mut self, byte: u8) -> bool {
        if !self.tx_ready() {
            return false;
        }
        matches!(self.inner.write(&[byte]), Ok(1))
    }
}
