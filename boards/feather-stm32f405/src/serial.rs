//! USART3 link port (Feather TX = PB10, RX = PB11)
//!
//! The embassy driver owns pin muxing, clocks and baud rate. The per-byte
//! data path goes straight to the status and data registers: the receive
//! interrupt must not wait, and the transmit side is polled from idle one
//! byte per ready check.

use embassy_stm32::mode::Blocking;
use embassy_stm32::pac;
use embassy_stm32::usart::{self, Uart};
use planelink_hal::CharacterPort;

/// Link baud rate
pub const BAUD_RATE: u32 = 115_200;

/// USART3 registers
fn regs() -> pac::usart::Usart {
    pac::USART3
}

/// Enable or disable the receive-not-empty interrupt
pub fn listen_rx(enable: bool) {
    regs().cr1().modify(|w| w.set_rxneie(enable));
}

/// Take the received byte, if any, from interrupt context
///
/// Reading the data register after the status register also clears an
/// overrun; the second flag in the result reports one.
pub fn read_rx() -> (Option<u8>, bool) {
    let sr = regs().sr().read();
    if sr.rxne() || sr.ore() {
        let byte = regs().dr().read().dr() as u8;
        (sr.rxne().then_some(byte), sr.ore())
    } else {
        (None, false)
    }
}

/// Transmit half of the link as a `CharacterPort`
///
/// Receive is serviced by the interrupt, so the receive methods report
/// nothing here.
pub struct UsartPort {
    _uart: Uart<'static, Blocking>,
}

impl UsartPort {
    pub fn new(uart: Uart<'static, Blocking>) -> Self {
        Self { _uart: uart }
    }

    pub fn config() -> usart::Config {
        let mut config = usart::Config::default();
        config.baudrate = BAUD_RATE;
        config
    }
}

impl CharacterPort for UsartPort {
    fn rx_ready(&mut self) -> bool {
        false
    }

    fn get(&mut self) -> Option<u8> {
        None
    }

    fn tx_ready(&mut self) -> bool {
        regs().sr().read().txe()
    }

    fn put(&mut self, byte: u8) -> bool {
        if !self.tx_ready() {
            return false;
        }
        regs().dr().write(|w| w.set_dr(u16::from(byte)));
        true
    }
}
