//! Plane addressing
//!
//! A message is addressed by a comms-plane (which transport) and a
//! signal-plane (which logical channel on that transport). Both are 4-bit
//! values packed into the frame's plane byte: comms in the low nibble,
//! signal in the high nibble.

use crate::error::LinkError;

/// Physical transport a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommsPlane {
    Uart = 0,
    Usart0 = 1,
    Usart1 = 2,
    Usart2 = 3,
    Usart3 = 4,
    SpiRadio0 = 5,
    SpiRadio1 = 6,
    SpiRadio2 = 7,
    SpiRadio3 = 8,
    I2c = 9,
    Anonymous0 = 10,
    Anonymous1 = 11,
    Anonymous2 = 12,
    Anonymous3 = 13,
    Anonymous4 = 14,
    Anonymous5 = 15,
}

impl CommsPlane {
    const ALL: [Self; 16] = [
        Self::Uart,
        Self::Usart0,
        Self::Usart1,
        Self::Usart2,
        Self::Usart3,
        Self::SpiRadio0,
        Self::SpiRadio1,
        Self::SpiRadio2,
        Self::SpiRadio3,
        Self::I2c,
        Self::Anonymous0,
        Self::Anonymous1,
        Self::Anonymous2,
        Self::Anonymous3,
        Self::Anonymous4,
        Self::Anonymous5,
    ];

    /// Decode a 4-bit plane number
    ///
    /// # Errors
    ///
    /// Returns `LinkError::ParameterOutOfRange` for values above 15.
    pub fn from_nibble(value: u8) -> Result<Self, LinkError> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(LinkError::ParameterOutOfRange)
    }

    pub const fn nibble(self) -> u8 {
        self as u8
    }
}

/// Logical channel within a transport
///
/// Control and data channels 0-5 are interleaved, followed by two extension
/// control/data pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SignalPlane {
    Control0 = 0,
    Data0 = 1,
    Control1 = 2,
    Data1 = 3,
    Control2 = 4,
    Data2 = 5,
    Control3 = 6,
    Data3 = 7,
    Control4 = 8,
    Data4 = 9,
    Control5 = 10,
    Data5 = 11,
    ExtensionControl0 = 12,
    ExtensionData0 = 13,
    ExtensionControl1 = 14,
    ExtensionData1 = 15,
}

impl SignalPlane {
    const ALL: [Self; 16] = [
        Self::Control0,
        Self::Data0,
        Self::Control1,
        Self::Data1,
        Self::Control2,
        Self::Data2,
        Self::Control3,
        Self::Data3,
        Self::Control4,
        Self::Data4,
        Self::Control5,
        Self::Data5,
        Self::ExtensionControl0,
        Self::ExtensionData0,
        Self::ExtensionControl1,
        Self::ExtensionData1,
    ];

    /// Decode a 4-bit plane number
    ///
    /// # Errors
    ///
    /// Returns `LinkError::ParameterOutOfRange` for values above 15.
    pub fn from_nibble(value: u8) -> Result<Self, LinkError> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(LinkError::ParameterOutOfRange)
    }

    pub const fn nibble(self) -> u8 {
        self as u8
    }

    /// Control (as opposed to data) channel
    pub const fn is_control(self) -> bool {
        (self as u8) & 1 == 0
    }
}

/// Comms-plane and signal-plane pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlaneAddress {
    pub comms: CommsPlane,
    pub signal: SignalPlane,
}

impl PlaneAddress {
    pub const fn new(comms: CommsPlane, signal: SignalPlane) -> Self {
        Self { comms, signal }
    }

    /// Wire encoding: comms in the low nibble, signal in the high nibble
    pub const fn to_byte(self) -> u8 {
        (self.signal.nibble() << 4) | self.comms.nibble()
    }

    /// Every byte value is a valid plane address
    pub fn from_byte(byte: u8) -> Self {
        Self {
            comms: CommsPlane::ALL[usize::from(byte & 0x0F)],
            signal: SignalPlane::ALL[usize::from(byte >> 4)],
        }
    }
}
