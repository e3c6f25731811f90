//! UI plugin for the map HUD.
//!
//! This module provides:
//! - HUD (game, zoom, selection summary)
//! - Flight plan panel with per-leg ETA
//! - Key hints for the current mode
//! - Log panel

mod components;
mod hud;
mod log;

use bevy::prelude::*;

use crate::plugins::core::GameState;

// =============================================================================
// Plugin
// =============================================================================

pub struct UIPlugin;

impl Plugin for UIPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, hud::setup_hud)
            .add_systems(Update, log::update_log_panel)
            .add_systems(
                Update,
                (
                    hud::update_hud_text,
                    hud::update_selection_panel,
                    hud::update_flight_plan_panel,
                    hud::update_key_hints,
                )
                    .run_if(in_state(GameState::InGame)),
            );
    }
}
