//! Marker components for HUD text entities.

use bevy::prelude::*;

#[derive(Component)]
pub struct HudText;

#[derive(Component)]
pub struct SelectionText;

#[derive(Component)]
pub struct FlightPlanText;

#[derive(Component)]
pub struct HintText;

#[derive(Component)]
pub struct LogContentText;

pub const HUD_COLOR: Color = Color::srgb(0.9, 0.9, 0.95);
pub const PANEL_COLOR: Color = Color::srgb(0.82, 0.88, 0.95);
pub const HINT_COLOR: Color = Color::srgb(0.6, 0.65, 0.72);
