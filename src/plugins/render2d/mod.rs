//! 2D rendering plugin for the star map.

pub mod camera;
mod components;
pub mod layers;
mod map;

use bevy::ecs::schedule::IntoScheduleConfigs;
use bevy::prelude::*;

use crate::plugins::core::GameState;

// Re-export public types
pub use camera::{handle_mouse_pointer, handle_touch, MapClick, PointerGesture, TouchGesture, Viewport};
pub use layers::MapLayers;

// =============================================================================
// Plugin
// =============================================================================

pub struct Render2DPlugin;

impl Plugin for Render2DPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Viewport>()
            .init_resource::<PointerGesture>()
            .init_resource::<TouchGesture>()
            .init_resource::<MapLayers>()
            .add_message::<MapClick>()
            .add_systems(Startup, camera::setup_camera)
            .add_systems(OnEnter(GameState::InGame), camera::center_on_home)
            .add_systems(
                Update,
                (
                    camera::handle_wheel_zoom,
                    camera::handle_mouse_pointer,
                    camera::handle_touch,
                )
                    .run_if(in_state(GameState::InGame)),
            )
            .add_systems(
                Update,
                (
                    camera::sync_camera,
                    map::rebuild_layers,
                    map::draw_map_layers,
                    map::update_map_labels,
                )
                    .chain()
                    .after(camera::handle_wheel_zoom)
                    .after(camera::handle_mouse_pointer)
                    .after(camera::handle_touch)
                    .run_if(in_state(GameState::InGame)),
            );
    }
}
