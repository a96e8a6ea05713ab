use crate::cloud::ramp_rgb;
use bevy::prelude::*;

/// Height range mapped onto the blue..red ramp, metres above the sensor
const HEIGHT_LOW: f32 = -1.5;
const HEIGHT_HIGH: f32 = 1.5;

pub fn height_to_color(height: f32) -> Color {
    let [r, g, b] = ramp_rgb(height, HEIGHT_LOW, HEIGHT_HIGH);
    Color::srgb_u8(r, g, b)
}

/// Sensor colour when the point has one, height ramp otherwise
pub fn point_color(color: Option<[u8; 3]>, height: f32) -> Color {
    match color {
        Some([r, g, b]) => Color::srgb_u8(r, g, b),
        None => height_to_color(height),
    }
}
