use crate::types::Sensors;

pub const LUX_MAX: f64 = 100.0;
pub const UV_MAX: f64 = 11.0;

/// Sensor readings scaled for bar rendering. Every field is in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormalizedSensors {
    pub humidity: f64,
    pub lux: f64,
    pub uv: f64,
}

pub fn normalize(sensors: Option<&Sensors>) -> NormalizedSensors {
    let Some(sensors) = sensors else {
        return NormalizedSensors::default();
    };

    NormalizedSensors {
        // Soil moisture already arrives as a ratio.
        humidity: ratio(sensors.soil_moisture, 1.0),
        lux: ratio(sensors.luminosity, LUX_MAX),
        uv: ratio(sensors.uv_level, UV_MAX),
    }
}

fn ratio(value: f64, max: f64) -> f64 {
    let scaled = value / max;
    if scaled.is_finite() {
        scaled.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
