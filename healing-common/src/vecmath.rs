use glam::Vec3;
use palette::Srgb;

/// Color type used for every material tint in the simulation.
pub type Color = Srgb<f32>;

/// Builds a color from an `[r, g, b]` triple in 0..1.
#[inline(always)]
pub fn color_from_array(rgb: [f32; 3]) -> Color {
    Srgb::new(rgb[0], rgb[1], rgb[2])
}

/// Clamps a value between a minimum and maximum.
#[inline(always)]
pub fn clamp(val: f32, min: f32, max: f32) -> f32 { val.max(min).min(max) }

/// Clamps a value to the unit interval.
#[inline(always)]
pub fn clamp01(val: f32) -> f32 { clamp(val, 0.0, 1.0) }

#[inline(always)]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 { a + (b - a) * t }

/// Normalized position of `t` inside `[start, end]`, clamped to 0..1.
/// A degenerate window behaves like a step at `start`.
#[inline(always)]
pub fn window(t: f32, start: f32, end: f32) -> f32 {
    if end - start <= 1e-9 {
        if t >= start { 1.0 } else { 0.0 }
    } else {
        clamp01((t - start) / (end - start))
    }
}

#[inline(always)]
pub fn ease_out_cubic(x: f32) -> f32 {
    let inv = 1.0 - clamp01(x);
    1.0 - inv * inv * inv
}

#[inline(always)]
pub fn ease_in_out_cubic(x: f32) -> f32 {
    let x = clamp01(x);
    if x < 0.5 {
        4.0 * x * x * x
    } else {
        let k = -2.0 * x + 2.0;
        1.0 - k * k * k / 2.0
    }
}

/// Component-wise linear blend between two colors.
pub fn lerp_color(a: Color, b: Color, t: f32) -> Color {
    let t = clamp01(t);
    Srgb::new(
        lerp(a.red, b.red, t),
        lerp(a.green, b.green, t),
        lerp(a.blue, b.blue, t),
    )
}

/// Piecewise-linear color ramp over ascending `(t, color)` breakpoints.
/// Values before the first breakpoint take its color, values after the last take the last.
pub fn color_ramp(stops: &[(f32, Color)], t: f32) -> Color {
    match stops {
        [] => Srgb::new(0.0, 0.0, 0.0),
        [(_, only)] => *only,
        _ => {
            if t <= stops[0].0 {
                return stops[0].1;
            }
            for pair in stops.windows(2) {
                let (t0, c0) = pair[0];
                let (t1, c1) = pair[1];
                if t <= t1 {
                    return lerp_color(c0, c1, window(t, t0, t1));
                }
            }
            stops[stops.len() - 1].1
        }
    }
}

/// Angle of `v` around the vertical axis, measured in the XZ plane.
#[inline(always)]
pub fn horizontal_angle(v: Vec3) -> f32 { v.z.atan2(v.x) }

/// Unit vector in the XZ plane for a given angle (inverse of [`horizontal_angle`]).
#[inline(always)]
pub fn angle_to_horizontal(theta: f32) -> Vec3 { Vec3::new(theta.cos(), 0.0, theta.sin()) }

/// Caps the horizontal (XZ) speed of a velocity while leaving the vertical component alone.
pub fn clamp_horizontal_speed(v: Vec3, max: f32) -> Vec3 {
    let h = Vec3::new(v.x, 0.0, v.z);
    let len = h.length();
    if len > max && len > 1e-12 {
        let k = max / len;
        Vec3::new(v.x * k, v.y, v.z * k)
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easing_curves_hit_their_endpoints() {
        for f in [ease_out_cubic, ease_in_out_cubic] {
            assert_eq!(f(0.0), 0.0);
            assert_eq!(f(1.0), 1.0);
            assert_eq!(f(-3.0), 0.0);
            assert_eq!(f(7.0), 1.0);
        }
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn easing_curves_are_monotonic() {
        let mut prev = (0.0, 0.0);
        for i in 1..=100 {
            let x = i as f32 / 100.0;
            let cur = (ease_out_cubic(x), ease_in_out_cubic(x));
            assert!(cur.0 >= prev.0 && cur.1 >= prev.1);
            prev = cur;
        }
    }

    #[test]
    fn window_handles_degenerate_ranges() {
        assert_eq!(window(0.5, 0.5, 0.5), 1.0);
        assert_eq!(window(0.4, 0.5, 0.5), 0.0);
        assert!((window(0.25, 0.0, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn color_ramp_clamps_and_interpolates() {
        let red = Srgb::new(1.0, 0.0, 0.0);
        let blue = Srgb::new(0.0, 0.0, 1.0);
        let stops = [(0.2, red), (0.6, blue)];
        assert_eq!(color_ramp(&stops, 0.0), red);
        assert_eq!(color_ramp(&stops, 1.0), blue);
        let mid = color_ramp(&stops, 0.4);
        assert!((mid.red - 0.5).abs() < 1e-5 && (mid.blue - 0.5).abs() < 1e-5);
    }

    #[test]
    fn horizontal_speed_clamp_keeps_vertical() {
        let v = clamp_horizontal_speed(Vec3::new(3.0, 2.0, 4.0), 1.0);
        assert!((Vec3::new(v.x, 0.0, v.z).length() - 1.0).abs() < 1e-6);
        assert_eq!(v.y, 2.0);
    }
}
