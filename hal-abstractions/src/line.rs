//! Digital IO line used as a debug strobe

use embedded_hal::digital::StatefulOutputPin;

/// A resource/IO line the firmware can drive from callback context
///
/// Methods are infallible: a strobe that fails to toggle is not worth an
/// error path inside an interrupt.
pub trait IoLine {
    /// Drive the line high
    fn set_high(&mut self);

    /// Drive the line low
    fn set_low(&mut self);

    /// Invert the line
    fn toggle(&mut self);
}

/// Adapter exposing an `embedded-hal` output pin as an `IoLine`
pub struct PinLine<P> {
    pin: P,
}

impl<P> PinLine<P> {
    /// Wrap an output pin
    pub const fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Unwrap the pin
    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: StatefulOutputPin> IoLine for PinLine<P> {
    fn set_high(&mut self) {
        let _ = self.pin.set_high();
    }

    fn set_low(&mut self) {
        let _ = self.pin.set_low();
    }

    fn toggle(&mut self) {
        let _ = self.pin.toggle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorType, OutputPin};

    struct FakePin {
        high: bool,
    }

    impl ErrorType for FakePin {
        type Error = Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for FakePin {
        fn is_set_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.high)
        }
    }

    #[test]
    fn test_toggle_inverts_pin() {
        let mut line = PinLine::new(FakePin { high: false });
        line.toggle();
        assert!(line.pin.high);
        line.toggle();
        assert!(!line.pin.high);
        line.set_high();
        assert!(line.into_inner().high);
    }
}
