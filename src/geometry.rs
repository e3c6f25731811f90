//! Distance, interpolation and travel-time helpers shared by every map system.

use bevy::prelude::*;

/// Straight-line distance between two points in light-years.
pub fn distance(a: Vec2, b: Vec2) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

pub fn midpoint(a: Vec2, b: Vec2) -> Vec2 {
    Vec2::new(lerp(a.x, b.x, 0.5), lerp(a.y, b.y, 0.5))
}

/// Hours needed to fly from `from` to `to`.
///
/// A warp gate at the destination replaces the carrier speed with the warp
/// speed. Speeds are in light-years per hour; a non-positive speed yields
/// `None` instead of an infinite ETA.
pub fn eta(
    from: Vec2,
    to: Vec2,
    to_has_warp_gate: bool,
    carrier_speed: f32,
    warp_speed: f32,
) -> Option<f32> {
    let speed = if to_has_warp_gate {
        warp_speed
    } else {
        carrier_speed
    };

    if speed <= 0.0 {
        return None;
    }

    Some(distance(from, to) / speed)
}

/// Heading in degrees from `from` toward `to`, 0 = +x, clockwise in screen space.
pub fn heading_degrees(from: Vec2, to: Vec2) -> f32 {
    let delta = to - from;
    delta.y.atan2(delta.x).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tolerance: f32) {
        let diff = (a - b).abs();
        assert!(diff < tolerance, "expected {} close to {}", a, b);
    }

    #[test]
    fn distance_is_euclidean() {
        assert_close(distance(Vec2::ZERO, Vec2::new(3.0, 4.0)), 5.0, 1e-6);
        assert_close(distance(Vec2::new(-1.0, -1.0), Vec2::new(-1.0, -1.0)), 0.0, 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Vec2::new(2.5, -7.0);
        let b = Vec2::new(-3.0, 1.25);
        assert_close(distance(a, b), distance(b, a), 1e-6);
    }

    #[test]
    fn lerp_endpoints_and_middle() {
        assert_close(lerp(30.0, 80.0, 0.0), 30.0, 1e-6);
        assert_close(lerp(30.0, 80.0, 1.0), 80.0, 1e-6);
        assert_close(lerp(30.0, 80.0, 0.5), 55.0, 1e-6);
    }

    #[test]
    fn midpoint_halves_segment() {
        let mid = midpoint(Vec2::new(0.0, 0.0), Vec2::new(4.0, -2.0));
        assert_close(mid.x, 2.0, 1e-6);
        assert_close(mid.y, -1.0, 1e-6);
    }

    #[test]
    fn eta_uses_carrier_speed_without_gate() {
        let hours = eta(Vec2::ZERO, Vec2::new(10.0, 0.0), false, 0.3333, 1.0);
        let hours = hours.expect("positive speed gives an eta");
        assert_close(hours, 10.0 / 0.3333, 1e-3);
        assert_close(hours, 30.0, 0.01);
    }

    #[test]
    fn eta_uses_warp_speed_with_gate() {
        let hours = eta(Vec2::ZERO, Vec2::new(0.0, 10.0), true, 0.3333, 1.0);
        assert_close(hours.expect("positive speed gives an eta"), 10.0, 1e-5);
    }

    #[test]
    fn eta_rejects_zero_speed() {
        assert!(eta(Vec2::ZERO, Vec2::ONE, false, 0.0, 3.0).is_none());
    }

    #[test]
    fn heading_points_along_axis() {
        assert_close(heading_degrees(Vec2::ZERO, Vec2::new(1.0, 0.0)), 0.0, 1e-4);
        assert_close(heading_degrees(Vec2::ZERO, Vec2::new(0.0, 1.0)), 90.0, 1e-4);
    }
}
