//! Error types for the messaging core

/// Link-layer operation errors
///
/// Partial ring-buffer transfers and empty pools are not errors; those are
/// reported through return counts and `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// A required input was empty or absent
    NullOrMissingParameter,
    /// A parameter is outside its documented range
    ParameterOutOfRange,
    /// Structural misconfiguration (pool accounting violated, frame length invalid)
    DefinitionError,
    /// No free duration timer slot
    EventTimerInitialisationError,
    /// A ring buffer held no tokens when some were required
    RingBufferEmpty,
    /// A buffer pool had no free buffer when one was required
    RingBufferListEmpty,
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NullOrMissingParameter => write!(f, "Null or missing parameter"),
            Self::ParameterOutOfRange => write!(f, "Parameter out of range"),
            Self::DefinitionError => write!(f, "Definition error"),
            Self::EventTimerInitialisationError => write!(f, "Event timer initialisation error"),
            Self::RingBufferEmpty => write!(f, "Ring buffer empty"),
            Self::RingBufferListEmpty => write!(f, "Ring buffer list empty"),
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for LinkError {}

/// Reasons a received frame was discarded by the de-framer
///
/// The de-framer always resynchronises after reporting one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeframeError {
    /// Length byte outside `1..=124`
    BadLength,
    /// De-stuffed payload longer than 62 bytes
    PayloadOverflow,
    /// Unescaped start token inside the payload
    UnexpectedStartToken,
    /// Byte in the end-token position was not `0x7E`
    MissingEndToken,
    /// CRC register did not reduce to zero
    CrcMismatch,
}

impl core::fmt::Display for DeframeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadLength => write!(f, "Bad frame length"),
            Self::PayloadOverflow => write!(f, "Payload overflow"),
            Self::UnexpectedStartToken => write!(f, "Unexpected start token"),
            Self::MissingEndToken => write!(f, "Missing end token"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
        }
    }
}

impl core::error::Error for DeframeError {}
