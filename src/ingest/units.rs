//! Unit normalization heuristics.
//!
//! Provider payloads do not reliably say which unit a value is in, so each
//! field is classified by magnitude alone:
//!
//! 1. TEMPERATURE: No plausible surface temperature exceeds 100°C, so anything
//!    above 100 is read as Kelvin.
//!
//! 2. RAINFALL: The station feed reports hourly precipitation in meters, where a
//!    whole meter in one hour never happens. Values below 1 are read as meters.
//!    A very light shower reported directly in millimeters (e.g. 0.2mm) is
//!    misread as 200mm. This is an accepted limitation of value-only inference.
//!
//! 3. HUMIDITY, WIND SPEED, PRESSURE: Already percent, m/s and Pa.

/// Temperatures strictly above this are Kelvin.
pub const KELVIN_THRESHOLD: f64 = 100.0;

/// 0°C in Kelvin.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Rainfall strictly below this is meters.
pub const METERS_THRESHOLD: f64 = 1.0;

pub const MM_PER_METER: f64 = 1000.0;

/// Normalize a temperature reading to Celsius.
#[inline]
pub fn normalize_temperature(value: f64) -> f64 {
    if value > KELVIN_THRESHOLD {
        value - KELVIN_OFFSET
    } else {
        value
    }
}

/// Normalize a rainfall reading to millimeters.
#[inline]
pub fn normalize_rainfall(value: f64) -> f64 {
    if value < METERS_THRESHOLD {
        value * MM_PER_METER
    } else {
        value
    }
}

#[inline]
pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) * 5.0 / 9.0
}
