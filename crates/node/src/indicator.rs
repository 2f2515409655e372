//! Tri-colour indicator. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation logs state changes.

use anyhow::Result;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::command::LedCommand;

/// Applies an indicator state.  Fire-and-forget: no feedback.
pub trait IndicatorSink: Send {
    fn apply(&mut self, cmd: LedCommand);
}

/// BCM pin numbers for each colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbPins {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

// ---------------------------------------------------------------------------
// Real GPIO RGB LED (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct RgbLed {
    red: OutputPin,
    green: OutputPin,
    blue: OutputPin,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl RgbLed {
    pub fn new(pins: RgbPins, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut led = Self {
            red: gpio.get(pins.red)?.into_output(),
            green: gpio.get(pins.green)?.into_output(),
            blue: gpio.get(pins.blue)?.into_output(),
            active_low,
        };
        // Start dark.
        led.apply(LedCommand::Off);
        tracing::info!(?pins, active_low, "rgb indicator initialised");
        Ok(led)
    }

    fn drive(pin: &mut OutputPin, on: bool, active_low: bool) {
        if on != active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

#[cfg(feature = "gpio")]
impl IndicatorSink for RgbLed {
    fn apply(&mut self, cmd: LedCommand) {
        let (r, g, b) = cmd.rgb();
        Self::drive(&mut self.red, r, self.active_low);
        Self::drive(&mut self.green, g, self.active_low);
        Self::drive(&mut self.blue, b, self.active_low);
        tracing::info!(state = %cmd, "indicator set");
    }
}

// ---------------------------------------------------------------------------
// Mock indicator (development — no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct RgbLed {
    pub(crate) current: LedCommand,
}

#[cfg(not(feature = "gpio"))]
impl RgbLed {
    pub fn new(pins: RgbPins, _active_low: bool) -> Result<Self> {
        tracing::info!(?pins, "[mock-gpio] rgb indicator initialised (no hardware)");
        Ok(Self {
            current: LedCommand::Off,
        })
    }
}

#[cfg(not(feature = "gpio"))]
impl IndicatorSink for RgbLed {
    fn apply(&mut self, cmd: LedCommand) {
        self.current = cmd;
        tracing::info!(state = %cmd, "[mock-gpio] indicator set");
    }
}

// ===========================================================================
// Test doubles
// ===========================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every applied state.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingIndicator {
        pub(crate) applied: Arc<Mutex<Vec<LedCommand>>>,
    }

    impl RecordingIndicator {
        pub(crate) fn applied(&self) -> Vec<LedCommand> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl IndicatorSink for RecordingIndicator {
        fn apply(&mut self, cmd: LedCommand) {
            self.applied.lock().unwrap().push(cmd);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    const PINS: RgbPins = RgbPins {
        red: 13,
        green: 11,
        blue: 12,
    };

    #[test]
    fn mock_starts_off() {
        let led = RgbLed::new(PINS, false).unwrap();
        assert_eq!(led.current, LedCommand::Off);
    }

    #[test]
    fn mock_tracks_last_state() {
        let mut led = RgbLed::new(PINS, false).unwrap();
        led.apply(LedCommand::Red);
        led.apply(LedCommand::Blue);
        assert_eq!(led.current, LedCommand::Blue);
    }

    #[test]
    fn mock_can_turn_off_again() {
        let mut led = RgbLed::new(PINS, true).unwrap();
        led.apply(LedCommand::Green);
        led.apply(LedCommand::Off);
        assert_eq!(led.current, LedCommand::Off);
    }
}
