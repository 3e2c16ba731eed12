//! Critical regions and ISR-shared state
//!
//! All synchronisation between interrupt handlers and the background loop is
//! coarse-grained: interrupts are masked globally for the length of the
//! region. The masking itself comes from the `critical-section` crate
//! (`cortex-m`'s single-core implementation on target, the `std`
//! implementation in host tests), which already restores the previous
//! interrupt state on exit, so regions nest safely.
//!
//! On top of that this module keeps a nesting depth counter and a sticky
//! fault flag, so runaway nesting is visible to the firmware instead of
//! silently growing the stack inside an ISR.
//!
//! ## Usage
//! ```
//! use planelink_core::critical_region::{self, SharedCell};
//!
//! static TICKS: SharedCell<u32> = SharedCell::new(0);
//!
//! // Background loop: always guarded
//! TICKS.lock(|t| *t += 1);
//!
//! // Call sites already inside an ISR may skip the region
//! let n = critical_region::run(false, || 3);
//! assert_eq!(n, 3);
//! ```

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use critical_section::Mutex;

/// Deepest nesting tolerated before the fault flag is raised
pub const MAX_NESTING: u8 = 32;

/// Current nesting depth (only written with interrupts masked)
static DEPTH: AtomicU8 = AtomicU8::new(0);

/// Sticky fault flag, cleared only by `clear_fault`
static FAULT: AtomicBool = AtomicBool::new(false);

/// Run `f` with interrupts masked
pub fn enter<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_| {
        let depth = DEPTH.load(Ordering::Relaxed);
        if depth >= MAX_NESTING {
            error!("critical region nesting overflow at depth {}", depth);
            FAULT.store(true, Ordering::Release);
        }
        DEPTH.store(depth.saturating_add(1), Ordering::Relaxed);

        let result = f();

        let depth = DEPTH.load(Ordering::Relaxed);
        if depth == 0 {
            error!("critical region nesting underflow");
            FAULT.store(true, Ordering::Release);
        }
        DEPTH.store(depth.saturating_sub(1), Ordering::Relaxed);
        result
    })
}

/// Run `f`, inside a critical region only when `guarded` is set
///
/// ISR call sites pass `false` (interrupts are already masked for them, or
/// the data is private to that ISR); background-loop call sites pass `true`.
#[inline]
pub fn run<R>(guarded: bool, f: impl FnOnce() -> R) -> R {
    if guarded {
        enter(f)
    } else {
        f()
    }
}

/// Nesting depth of the calling context
///
/// Only meaningful when read from inside a region.
pub fn depth() -> u8 {
    DEPTH.load(Ordering::Relaxed)
}

/// Whether a nesting fault has been recorded since the last `clear_fault`
pub fn fault_raised() -> bool {
    FAULT.load(Ordering::Acquire)
}

/// Record a fault detected outside this module
///
/// Used by ISR paths that have no caller to return an error to.
pub fn raise_fault() {
    FAULT.store(true, Ordering::Release);
}

/// Clear the sticky fault flag
pub fn clear_fault() {
    FAULT.store(false, Ordering::Release);
}

/// State shared between interrupt handlers and the background loop
///
/// Every access masks interrupts for the duration of the closure. Group all
/// the state one ISR touches into a single cell rather than scattering
/// statics.
pub struct SharedCell<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> SharedCell<T> {
    /// Create a cell; usable in `static` initialisers
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the contents
    ///
    /// # Panics
    ///
    /// Panics if called re-entrantly on the same cell from inside `f`.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        enter(|| critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs))))
    }

    /// Swap in a new value, returning the old one
    pub fn replace(&self, value: T) -> T {
        self.lock(|inner| core::mem::replace(inner, value))
    }
}

impl<T: Copy> SharedCell<T> {
    /// Copy the contents out
    pub fn get(&self) -> T {
        self.lock(|inner| *inner)
    }
}
