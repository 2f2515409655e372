//! Simulated on-die temperature sensor for local development.
//!
//! Models the RP2040's internal sensor behind a 12-bit ADC:
//! - Slow random walk of the die temperature with mean reversion
//! - Per-sample ADC code noise
//! - Conversion back to Celsius with the datasheet formula, so the published
//!   values carry the same quantisation a real board would show

use crate::reading::ReadingSource;

/// ADC reference voltage.
const VREF: f32 = 3.3;

/// Full-scale code of the 12-bit converter.
const ADC_MAX: u16 = 4095;

/// Sensor output at 27 C, in volts.
const V_AT_27C: f32 = 0.706;

/// Sensor slope, volts per degree (negative coefficient folded into the formula).
const SLOPE: f32 = 0.001721;

/// Convert a raw 12-bit code from the on-die sensor to degrees Celsius.
pub fn adc_to_celsius(raw: u16) -> f32 {
    let voltage = f32::from(raw) * (VREF / f32::from(ADC_MAX));
    27.0 - (voltage - V_AT_27C) / SLOPE
}

/// Inverse of [`adc_to_celsius`], rounded and clamped to the converter range.
fn celsius_to_adc(celsius: f32) -> u16 {
    let voltage = V_AT_27C - (celsius - 27.0) * SLOPE;
    let code = (voltage * f32::from(ADC_MAX) / VREF).round();
    code.clamp(0.0, f32::from(ADC_MAX)) as u16
}

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate N(0,1) using the Irwin-Hall method: sum of 12 uniform [0,1)
/// values minus 6.
fn approx_std_normal() -> f32 {
    let mut sum = 0.0_f32;
    for _ in 0..12 {
        sum += fastrand::f32();
    }
    sum - 6.0
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Stateful die-temperature simulator.
pub struct DieTemperatureSim {
    /// Current "true" die temperature.
    celsius: f32,
    center: f32,
    mean_reversion: f32,
    walk_sigma: f32,
    /// ADC noise in codes.
    noise_codes: f32,
}

impl DieTemperatureSim {
    pub fn new(center: f32) -> Self {
        Self {
            celsius: center,
            center,
            mean_reversion: 0.05,
            walk_sigma: 0.15,
            noise_codes: 1.5,
        }
    }

    /// Next raw ADC code.  Advances the simulated die temperature.
    pub fn sample_raw(&mut self) -> u16 {
        let pull = self.mean_reversion * (self.center - self.celsius);
        self.celsius += pull + self.walk_sigma * approx_std_normal();

        let code = f32::from(celsius_to_adc(self.celsius)) + self.noise_codes * approx_std_normal();
        code.round().clamp(0.0, f32::from(ADC_MAX)) as u16
    }
}

impl Default for DieTemperatureSim {
    fn default() -> Self {
        Self::new(27.0)
    }
}

impl ReadingSource for DieTemperatureSim {
    fn read(&mut self) -> f32 {
        adc_to_celsius(self.sample_raw())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
