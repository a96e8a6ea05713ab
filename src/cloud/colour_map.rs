//! Depth/height to colour ramp: blue, cyan, yellow, red.

fn interpolate_color(start: [u8; 3], end: [u8; 3], factor: f32) -> [u8; 3] {
    let mut rgb = [0; 3];
    for i in 0..3 {
        rgb[i] = (start[i] as f32 + factor * (end[i] as f32 - start[i] as f32)).round() as u8;
    }
    rgb
}

/// Map `value` within `[low, high]` onto the ramp; out-of-range values clamp
/// to the end colours
pub fn ramp_rgb(value: f32, low: f32, high: f32) -> [u8; 3] {
    const STOPS: [(f32, [u8; 3]); 4] = [
        (0.0, [0, 0, 255]), // Blue
        (1.0 / 3.0, [0, 255, 255]), // Cyan
        (2.0 / 3.0, [255, 255, 0]), // Yellow
        (1.0, [255, 0, 0]), // Red
    ];

    let span = high - low;
    let t = if span > 0.0 && value.is_finite() {
        ((value - low) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    for pair in STOPS.windows(2) {
        let (start_t, start_color) = pair[0];
        let (end_t, end_color) = pair[1];
        if t <= end_t {
            let factor = (t - start_t) / (end_t - start_t);
            return interpolate_color(start_color, end_color, factor);
        }
    }
    [255, 0, 0]
}
