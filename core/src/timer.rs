//! Software duration timers driven by a hardware tick
//!
//! A `DurationTimerService` owns a fixed block of `N` timer slots. Each armed
//! slot counts down once per call to `tick`, which the board calls from its
//! tick interrupt. When a slot reaches zero its callback runs synchronously,
//! still inside the interrupt, so callbacks must be short and must not block;
//! setting a flag for the background loop is the expected pattern.
//!
//! Periodic timers reload immediately when they fire. One-shot timers release
//! their slot after firing, and their handle is stale from then on. Every
//! release bumps the slot's generation, so a stale handle never reaches a
//! later owner of the same slot.

use planelink_hal::IoLine;

use crate::config::TimerConfig;
use crate::critical_region;
use crate::error::LinkError;

/// Timer firing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Unassigned slot; never accepted by `assign`
    None,
    OneShot,
    Periodic,
}

/// Hardware tick the interval is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickSource {
    /// General purpose system tick
    SystemTick,
    /// Core real-time timer
    CoreTimer,
}

/// Identity of an assigned timer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle {
    index: u8,
    generation: u16,
}

impl TimerHandle {
    pub fn index(&self) -> usize {
        usize::from(self.index)
    }

    /// Assignment of the slot this handle was issued for
    pub fn generation(&self) -> u16 {
        self.generation
    }
}

/// Work done when a timer expires
pub trait DurationCallback {
    /// Called from interrupt context
    fn fire(&mut self);
}

impl DurationCallback for fn() {
    fn fire(&mut self) {
        (*self)()
    }
}

/// Toggle an IO line on every expiry (debug strobe, heartbeat LED)
pub struct StrobeCallback<L> {
    line: L,
}

impl<L: IoLine> StrobeCallback<L> {
    pub const fn new(line: L) -> Self {
        Self { line }
    }

    pub fn line(&self) -> &L {
        &self.line
    }
}

impl<L: IoLine> DurationCallback for StrobeCallback<L> {
    fn fire(&mut self) {
        self.line.toggle();
    }
}

struct DurationTimer<C> {
    remaining: u32,
    reload: u32,
    interval_us: u32,
    source: TickSource,
    callback: Option<C>,
    index: Option<u8>,
    generation: u16,
    kind: TimerKind,
}

impl<C> DurationTimer<C> {
    const FREE: Self = Self {
        remaining: 0,
        reload: 0,
        interval_us: 0,
        source: TickSource::SystemTick,
        callback: None,
        index: None,
        generation: 0,
        kind: TimerKind::None,
    };

    fn is_armed(&self) -> bool {
        self.index.is_some()
    }

    fn owned_by(&self, handle: TimerHandle) -> bool {
        self.is_armed() && self.generation == handle.generation
    }

    /// Free the slot, invalidating every handle issued for it
    fn release(&mut self) -> Option<C> {
        self.index = None;
        self.kind = TimerKind::None;
        self.remaining = 0;
        self.reload = 0;
        self.generation = self.generation.wrapping_add(1);
        self.callback.take()
    }
}

/// Block of `N` duration timers sharing one tick
pub struct DurationTimerService<C, const N: usize> {
    config: TimerConfig,
    timers: [DurationTimer<C>; N],
}

impl<C: DurationCallback, const N: usize> DurationTimerService<C, N> {
    const _ASSERT: () = assert!(N <= u8::MAX as usize, "timer block too large for u8 handles");

    pub fn new(config: TimerConfig) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::_ASSERT;
        Self {
            config,
            timers: core::array::from_fn(|_| DurationTimer::FREE),
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Interval converted to ticks of `source`, clamped to the configured minimum
    fn ticks_for(&self, interval_us: u32, source: TickSource) -> Result<u32, LinkError> {
        let period = match source {
            TickSource::SystemTick => self.config.system_tick_period_us,
            TickSource::CoreTimer => self.config.core_tick_period_us,
        };
        let ticks = interval_us
            .checked_div(period)
            .ok_or(LinkError::ParameterOutOfRange)?;
        Ok(ticks.max(self.config.minimum_ticks).max(1))
    }

    /// Arm a free slot
    ///
    /// # Errors
    ///
    /// - `LinkError::ParameterOutOfRange` for `TimerKind::None` or a zero tick period
    /// - `LinkError::EventTimerInitialisationError` if every slot is in use
    pub fn assign(
        &mut self,
        callback: C,
        kind: TimerKind,
        interval_us: u32,
        source: TickSource,
    ) -> Result<TimerHandle, LinkError> {
        if kind == TimerKind::None {
            return Err(LinkError::ParameterOutOfRange);
        }
        let ticks = self.ticks_for(interval_us, source)?;

        let Some(index) = self.timers.iter().position(|t| !t.is_armed()) else {
            warn!("duration timers exhausted ({} slots)", N);
            return Err(LinkError::EventTimerInitialisationError);
        };

        let timer = &mut self.timers[index];
        timer.remaining = ticks;
        timer.reload = ticks;
        timer.interval_us = interval_us;
        timer.source = source;
        timer.callback = Some(callback);
        // A tick must never see a slot that is armed but half written
        critical_region::run(true, || {
            timer.kind = kind;
            timer.index = Some(index as u8);
        });

        debug!("timer {} assigned: {} every {} ticks", index, kind, ticks);
        Ok(TimerHandle {
            index: index as u8,
            generation: timer.generation,
        })
    }

    fn armed_slot(&mut self, handle: TimerHandle) -> Result<&mut DurationTimer<C>, LinkError> {
        let timer = self
            .timers
            .get_mut(handle.index())
            .ok_or(LinkError::ParameterOutOfRange)?;
        if !timer.owned_by(handle) {
            return Err(LinkError::NullOrMissingParameter);
        }
        Ok(timer)
    }

    fn owned_slot(&self, handle: TimerHandle) -> Option<&DurationTimer<C>> {
        self.timers
            .get(handle.index())
            .filter(|t| t.owned_by(handle))
    }

    /// Release a slot, returning its callback
    ///
    /// # Errors
    ///
    /// - `LinkError::ParameterOutOfRange` if the handle does not index this block
    /// - `LinkError::NullOrMissingParameter` if the slot is already free or
    ///   has since been assigned again
    pub fn deassign(&mut self, handle: TimerHandle) -> Result<C, LinkError> {
        let timer = self.armed_slot(handle)?;
        let callback = critical_region::run(true, || timer.release());
        debug!("timer {} released", handle.index());
        callback.ok_or(LinkError::NullOrMissingParameter)
    }

    /// Restart an armed timer with a new interval on its original tick source
    ///
    /// # Errors
    ///
    /// Same as `deassign`, plus `ParameterOutOfRange` for a zero tick period.
    pub fn retrigger(&mut self, handle: TimerHandle, interval_us: u32) -> Result<(), LinkError> {
        let source = self.armed_slot(handle)?.source;
        let ticks = self.ticks_for(interval_us, source)?;
        let timer = self.armed_slot(handle)?;
        critical_region::run(true, || {
            timer.remaining = ticks;
            timer.reload = ticks;
            timer.interval_us = interval_us;
        });
        Ok(())
    }

    /// Advance every armed timer by one tick, firing any that expire
    ///
    /// Called from the tick interrupt. Returns the number of callbacks run.
    pub fn tick(&mut self) -> usize {
        let mut fired = 0;
        for timer in self.timers.iter_mut().filter(|t| t.is_armed()) {
            timer.remaining = timer.remaining.saturating_sub(1);
            if timer.remaining != 0 {
                continue;
            }
            fired += 1;
            match timer.kind {
                TimerKind::Periodic => {
                    timer.remaining = timer.reload;
                    if let Some(callback) = timer.callback.as_mut() {
                        callback.fire();
                    }
                }
                _ => {
                    if let Some(mut callback) = timer.release() {
                        callback.fire();
                    }
                }
            }
        }
        fired
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.owned_slot(handle).is_some()
    }

    /// Ticks left before the next expiry, `None` for a free or reused slot
    pub fn remaining_ticks(&self, handle: TimerHandle) -> Option<u32> {
        self.owned_slot(handle).map(|t| t.remaining)
    }

    /// Interval the timer was last armed with, in microseconds
    pub fn interval_us(&self, handle: TimerHandle) -> Option<u32> {
        self.owned_slot(handle).map(|t| t.interval_us)
    }

    pub fn kind(&self, handle: TimerHandle) -> TimerKind {
        self.owned_slot(handle).map_or(TimerKind::None, |t| t.kind)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.iter().filter(|t| t.is_armed()).count()
    }

    pub fn callback(&self, handle: TimerHandle) -> Option<&C> {
        self.owned_slot(handle).and_then(|t| t.callback.as_ref())
    }

    pub fn callback_mut(&mut self, handle: TimerHandle) -> Option<&mut C> {
        self.armed_slot(handle)
            .ok()
            .and_then(|t| t.callback.as_mut())
    }
}
