//! Hardware abstraction traits for planelink firmware
//!
//! This crate defines the collaborator interfaces the messaging core calls
//! into. BSPs implement these traits (or wrap their drivers in the adapters
//! provided here); the core never touches peripheral registers itself.
//!
//! - **`port`**: `CharacterPort`, single-byte put/get with ready checks
//! - **`line`**: `IoLine`, a digital strobe line used by timer callbacks

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod line;
pub mod port;

pub use line::{IoLine, PinLine};
pub use port::{CharacterPort, IoPort};
