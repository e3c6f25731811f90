use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub struct CorePlugin;

pub const MAP_CONFIG_PATH: &str = "config/map.ron";

// =============================================================================
// Resources
// =============================================================================

/// Tunables for the map. Overridable from `config/map.ron`.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub zoom_default: f32,
    pub wheel_zoom_divisor: f32,
    pub wheel_line_px: f32,
    pub pinch_zoom_divisor: f32,
    pub pick_tolerance_px: f32,
    pub click_slop_px: f32,
    pub scan_refresh_secs: f32,
    pub carrier_build_fee: f32,
    pub carrier_build_ships: u32,
    pub transfer_step: u32,
    /// Co-location radius in light-years.
    pub proximity_radius: f32,
    pub lines_min_zoom: f32,
    pub labels_min_zoom: f32,
    pub eta_labels_min_zoom: f32,
    pub scan_fixture: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            zoom_min: 5.0,
            zoom_max: 500.0,
            zoom_default: 10.0,
            wheel_zoom_divisor: 1000.0,
            wheel_line_px: 100.0,
            pinch_zoom_divisor: 100.0,
            pick_tolerance_px: 20.0,
            click_slop_px: 2.0,
            scan_refresh_secs: 60.0,
            carrier_build_fee: 25.0,
            carrier_build_ships: 1,
            transfer_step: 1,
            proximity_radius: 0.1,
            lines_min_zoom: 10.0,
            labels_min_zoom: 20.0,
            eta_labels_min_zoom: 50.0,
            scan_fixture: "assets/scans/demo.ron".to_string(),
        }
    }
}

#[derive(Resource, Debug)]
pub struct EventLog {
    entries: Vec<String>,
    max_entries: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: 8,
        }
    }
}

impl EventLog {
    pub fn push(&mut self, entry: String) {
        self.entries.push(entry);
        if self.entries.len() > self.max_entries {
            let overflow = self.entries.len() - self.max_entries;
            self.entries.drain(0..overflow);
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

#[derive(Resource, Debug, Clone)]
pub struct InputBindings {
    pub add_destination: KeyCode,
    pub finish_plan: KeyCode,
    pub cancel_plan: KeyCode,
    pub remove_last: KeyCode,
    pub tag_collect: KeyCode,
    pub tag_drop: KeyCode,
    pub tag_none: KeyCode,
    pub waypoint_prev: KeyCode,
    pub waypoint_next: KeyCode,
    pub build_carrier: KeyCode,
    pub transfer: KeyCode,
    pub transfer_reverse_modifier: KeyCode,
    pub refresh_scan: KeyCode,
    pub cycle_carrier: KeyCode,
}

impl Default for InputBindings {
    fn default() -> Self {
        Self {
            add_destination: KeyCode::KeyA,
            finish_plan: KeyCode::Enter,
            cancel_plan: KeyCode::Escape,
            remove_last: KeyCode::Backspace,
            tag_collect: KeyCode::KeyC,
            tag_drop: KeyCode::KeyX,
            tag_none: KeyCode::KeyZ,
            waypoint_prev: KeyCode::ArrowUp,
            waypoint_next: KeyCode::ArrowDown,
            build_carrier: KeyCode::KeyB,
            transfer: KeyCode::KeyT,
            transfer_reverse_modifier: KeyCode::ShiftLeft,
            refresh_scan: KeyCode::F5,
            cycle_carrier: KeyCode::Tab,
        }
    }
}

#[derive(States, Debug, Clone, Eq, PartialEq, Hash, Default)]
pub enum GameState {
    #[default]
    Boot,
    /// Waiting for the first scan.
    Loading,
    InGame,
}

impl Plugin for CorePlugin {
    fn build(&self, app: &mut App) {
        let config = load_map_config(Path::new(MAP_CONFIG_PATH));

        app.init_state::<GameState>()
            .insert_resource(config)
            .init_resource::<InputBindings>()
            .init_resource::<EventLog>()
            .add_systems(OnEnter(GameState::Boot), log_enter_boot)
            .add_systems(OnEnter(GameState::Boot), transition_to_loading)
            .add_systems(OnEnter(GameState::Loading), setup_loading_screen)
            .add_systems(OnExit(GameState::Loading), teardown_loading_screen)
            .add_systems(OnEnter(GameState::InGame), log_enter_ingame)
            .add_systems(OnExit(GameState::InGame), log_exit_ingame);
    }
}

fn log_enter_boot(mut log: ResMut<EventLog>) {
    log.push("State: Boot".to_string());
    info!("State: Boot");
}

fn transition_to_loading(mut next_state: ResMut<NextState<GameState>>) {
    next_state.set(GameState::Loading);
}

fn log_enter_ingame(mut log: ResMut<EventLog>) {
    log.push("State: InGame".to_string());
    info!("State: InGame");
}

fn log_exit_ingame(mut log: ResMut<EventLog>) {
    log.push("State: leaving InGame".to_string());
    info!("State: leaving InGame");
}

#[derive(Component)]
struct LoadingScreen;

fn setup_loading_screen(mut commands: Commands) {
    commands.spawn((
        LoadingScreen,
        Sprite {
            color: Color::srgb(0.02, 0.02, 0.04),
            custom_size: Some(Vec2::new(4000.0, 2250.0)),
            ..default()
        },
        Transform::from_xyz(0.0, 0.0, -10.0),
    ));
}

fn teardown_loading_screen(mut commands: Commands, screens: Query<Entity, With<LoadingScreen>>) {
    for entity in screens.iter() {
        commands.entity(entity).despawn();
    }
}

// =============================================================================
// Config loading
// =============================================================================

/// Missing file means defaults; a malformed one is logged and ignored.
pub fn load_map_config(path: &Path) -> MapConfig {
    match read_map_config(path) {
        Ok(Some(config)) => {
            info!("Loaded map config from {}", path.display());
            config
        }
        Ok(None) => MapConfig::default(),
        Err(error) => {
            error!("Map config ignored: {}", error);
            MapConfig::default()
        }
    }
}

fn read_map_config(path: &Path) -> Result<Option<MapConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|error| format!("Read error: {}", error))?;
    parse_map_config(&contents).map(Some)
}

pub fn parse_map_config(contents: &str) -> Result<MapConfig, String> {
    let config = ron::de::from_str::<MapConfig>(contents)
        .map_err(|error| format!("RON parse error: {}", error))?;

    if config.zoom_min <= 0.0 || config.zoom_min > config.zoom_max {
        return Err(format!(
            "zoom bounds invalid: min {} max {}",
            config.zoom_min, config.zoom_max
        ));
    }

    Ok(config)
}
