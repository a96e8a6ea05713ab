use bevy::math::Vec3;

/// Sensor frame (x right, y up, z forward) to bevy (x right, y up, -z forward)
pub fn camera_to_bevy(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(x, y, -z)
}
