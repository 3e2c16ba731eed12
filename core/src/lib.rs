//! Platform-agnostic link-layer messaging core
//!
//! This crate contains the parts of the link stack that are shared across all
//! supported boards: ring buffers and their pools, the frame codec, duration
//! timers and the messaging-layer components. It has NO hardware
//! dependencies; hardware reaches it through the traits in `planelink-hal`.

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod log;

pub mod config;
pub mod crc;
pub mod critical_region;
pub mod error;
pub mod frame;
pub mod messaging;
pub mod pool;
pub mod ring_buffer;
pub mod timer;

pub use config::{LinkConfig, TimerConfig};
pub use error::{DeframeError, LinkError};
pub use frame::{frame_message, CommsPlane, Deframer, MessageStructure, PlaneAddress, SignalPlane};
pub use pool::{BufferHandle, BufferPool};
pub use ring_buffer::{RingBuffer, Token};
pub use timer::{DurationCallback, DurationTimerService, TickSource, TimerHandle, TimerKind};
