//! Shared components and drawing helpers for the render2d module.

use bevy::prelude::*;

/// Screen-space text spawned for map labels; respawned when layers change.
#[derive(Component)]
pub struct MapLabel;

pub const LABEL_COLOR: Color = Color::srgb(0.82, 0.9, 0.96);
pub const LABEL_BACKGROUND: Color = Color::srgba(0.05, 0.08, 0.12, 0.6);
pub const OUT_OF_RANGE_COLOR: Color = Color::srgba(0.4, 0.4, 0.45, 0.5);
pub const SELECTION_COLOR: Color = Color::srgb(1.0, 0.92, 0.35);

pub fn with_alpha(color: Color, alpha: f32) -> Color {
    let mut srgba = color.to_srgba();
    srgba.alpha *= alpha;
    Color::from(srgba)
}

/// Points for a dashed circle: pairs of segment endpoints.
pub fn dashed_circle(center: Vec2, radius: f32, dashes: usize) -> Vec<(Vec2, Vec2)> {
    let steps = dashes.max(1) * 2;
    let step = std::f32::consts::TAU / steps as f32;
    (0..steps)
        .step_by(2)
        .map(|i| {
            let a = i as f32 * step;
            let b = a + step;
            (
                center + Vec2::new(a.cos(), a.sin()) * radius,
                center + Vec2::new(b.cos(), b.sin()) * radius,
            )
        })
        .collect()
}

/// Corner brackets around a square of half-size `radius`.
pub fn bracket_segments(center: Vec2, radius: f32) -> Vec<(Vec2, Vec2)> {
    let arm = radius * 0.5;
    [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .into_iter()
        .flat_map(|(sx, sy)| {
            let corner = center + Vec2::new(sx * radius, sy * radius);
            [
                (corner, corner - Vec2::new(sx * arm, 0.0)),
                (corner, corner - Vec2::new(0.0, sy * arm)),
            ]
        })
        .collect()
}
