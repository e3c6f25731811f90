//! Snapshot store: the latest scan and its refresh schedule.
//!
//! The scan is swapped wholesale inside a single system, so every other system
//! sees either the old scan or the new one.

use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::prelude::*;

use crate::plugins::core::{EventLog, GameState, InputBindings, MapConfig};
use crate::plugins::server::{poll_server, ScanFetched, ServerLink, Ticket};
use crate::scan::{EntityKind, EntityRef, Scan};

pub struct ScanPlugin;

impl Plugin for ScanPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ScanStore>()
            .init_resource::<ScanRefresh>()
            .add_message::<ScanReplaced>()
            .add_systems(OnEnter(GameState::Loading), request_initial_scan)
            .add_systems(
                Update,
                (
                    tick_scan_refresh,
                    handle_refresh_key.run_if(in_state(GameState::InGame)),
                    install_scan.after(poll_server),
                ),
            );
    }
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Resource, Default, Debug)]
pub struct ScanStore {
    scan: Option<Scan>,
    generation: u32,
}

impl ScanStore {
    /// Swaps in a new scan and returns the previous one.
    pub fn replace(&mut self, scan: Scan) -> Option<Scan> {
        self.generation += 1;
        self.scan.replace(scan)
    }

    pub fn scan(&self) -> Option<&Scan> {
        self.scan.as_ref()
    }

    /// Only the optimistic mutation pipeline edits the scan in place.
    pub fn scan_mut(&mut self) -> Option<&mut Scan> {
        self.scan.as_mut()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn find_within_radius(
        &self,
        kind: EntityKind,
        point: Vec2,
        radius: f32,
    ) -> Vec<EntityRef<'_>> {
        self.scan
            .as_ref()
            .map(|scan| scan.find_within_radius(kind, point, radius))
            .unwrap_or_default()
    }
}

#[derive(Resource)]
pub struct ScanRefresh {
    pub timer: Timer,
}

impl FromWorld for ScanRefresh {
    fn from_world(world: &mut World) -> Self {
        let seconds = world
            .get_resource::<MapConfig>()
            .map(|config| config.scan_refresh_secs)
            .unwrap_or(60.0)
            .max(1.0);
        Self {
            timer: Timer::from_seconds(seconds, TimerMode::Repeating),
        }
    }
}

/// Written after a fresh scan has been installed.
#[derive(Message, Debug, Clone, Copy)]
pub struct ScanReplaced {
    pub generation: u32,
    pub as_of: Ticket,
}

// =============================================================================
// Systems
// =============================================================================

fn request_initial_scan(mut link: ResMut<ServerLink>) {
    info!("Requesting scan for game {}", link.game());
    link.fetch_scan();
}

fn tick_scan_refresh(time: Res<Time>, mut refresh: ResMut<ScanRefresh>, mut link: ResMut<ServerLink>) {
    refresh.timer.tick(time.delta());

    if refresh.timer.just_finished() {
        link.fetch_scan();
    }
}

fn handle_refresh_key(
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    mut refresh: ResMut<ScanRefresh>,
    mut link: ResMut<ServerLink>,
    mut log: ResMut<EventLog>,
) {
    if !input.just_pressed(bindings.refresh_scan) {
        return;
    }

    if link.fetch_scan() {
        refresh.timer.reset();
        log.push("Refreshing scan".to_string());
    }
}

pub fn install_scan(
    mut fetched: MessageReader<ScanFetched>,
    mut store: ResMut<ScanStore>,
    mut log: ResMut<EventLog>,
    state: Res<State<GameState>>,
    mut next_state: ResMut<NextState<GameState>>,
    mut replaced: MessageWriter<ScanReplaced>,
) {
    for message in fetched.read() {
        match &message.result {
            Ok(scan) => {
                info!(
                    "Scan replaced (stars: {}, planets: {}, carriers: {})",
                    scan.stars.len(),
                    scan.planets.len(),
                    scan.carriers.len()
                );
                store.replace(scan.clone());
                replaced.write(ScanReplaced {
                    generation: store.generation(),
                    as_of: message.as_of,
                });
                if *state.get() == GameState::Loading {
                    next_state.set(GameState::InGame);
                }
            }
            Err(error) => {
                error!("Scan fetch failed: {}", error);
                log.push(format!("Scan fetch failed: {}", error));
            }
        }
    }
}
