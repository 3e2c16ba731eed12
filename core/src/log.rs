//! Logging macros for the messaging core
//!
//! These forward to `defmt` when the `defmt` feature is enabled. Without it
//! they compile to nothing but still borrow their arguments, so call sites
//! look the same in host builds and firmware builds.

macro_rules! __log {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$level!($s $(, $x)*);
        #[cfg(not(feature = "defmt"))]
        let _ = ($( &$x, )*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { __log!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { __log!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { __log!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { __log!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { __log!(error, $($arg)*) };
}
