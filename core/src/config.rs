//! Configuration structures and compile-time sizes

/// Buffers in the primary serial port pool
pub const SERIAL_POOL_SIZE: usize = 8;

/// Buffers in the messaging-layer pool
pub const LAYER_POOL_SIZE: usize = 16;

/// Duration timer slots per timer block
pub const DURATION_TIMER_COUNT: usize = 12;

/// Duration timer configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    /// Period of the general-purpose system tick in microseconds
    pub system_tick_period_us: u32,
    /// Period of the core real-time timer tick in microseconds
    pub core_tick_period_us: u32,
    /// Shortest interval, in ticks, a timer may be armed for
    pub minimum_ticks: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            system_tick_period_us: 1_000,
            core_tick_period_us: 10,
            minimum_ticks: 1,
        }
    }
}

/// Link buffer configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    /// Requested ring buffer length (rounded down to a power of two)
    pub ring_length: usize,
    /// Guard pool and port operations with a critical region
    ///
    /// Must stay `true` unless every caller already runs with interrupts masked.
    pub pool_guarded: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ring_length: crate::ring_buffer::RING_BUFFER_MAX_LENGTH,
            pool_guarded: true,
        }
    }
}
