//! Player plugin for map interaction.
//!
//! This module provides:
//! - Picking and the selection set
//! - The flight-plan state machine and waypoint editing
//! - Carrier builds and ship transfers

pub mod flight_plan;
mod interactions;
pub mod selection;

use bevy::ecs::schedule::IntoScheduleConfigs;
use bevy::prelude::*;

use crate::plugins::core::GameState;
use crate::plugins::render2d::{handle_mouse_pointer, handle_touch};
use crate::plugins::snapshot::install_scan;

// Re-export public types
pub use flight_plan::{FlightPlan, TargetFlags};
pub use selection::{Hovered, Selection, SelectionEntry};

// =============================================================================
// Plugin
// =============================================================================

pub struct PlayerPlugin;

impl Plugin for PlayerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Selection>()
            .init_resource::<FlightPlan>()
            .init_resource::<Hovered>()
            .add_systems(
                Update,
                interactions::prune_after_scan.after(install_scan),
            )
            // Clicks come out of the pointer systems in the same frame
            .add_systems(
                Update,
                (
                    interactions::track_hover,
                    interactions::route_map_clicks,
                    interactions::handle_plan_keys,
                    interactions::handle_cycle_carrier,
                    interactions::handle_build_carrier,
                    interactions::handle_transfer,
                    interactions::select_built_carrier,
                )
                    .chain()
                    .after(handle_mouse_pointer)
                    .after(handle_touch)
                    .after(interactions::prune_after_scan)
                    .run_if(in_state(GameState::InGame)),
            );
    }
}
