//! Player interaction systems: map clicks, flight-plan keys, builds and
//! transfers.

use bevy::ecs::message::MessageReader;
use bevy::prelude::*;
use bevy::window::PrimaryWindow;

use crate::geometry::distance;
use crate::plugins::core::{EventLog, InputBindings, MapConfig};
use crate::plugins::orders::{CarrierBuilt, MutationLedger};
use crate::plugins::render2d::{MapClick, Viewport};
use crate::plugins::server::ServerLink;
use crate::plugins::snapshot::{ScanReplaced, ScanStore};
use crate::scan::{DestinationAction, EntityId, EntityKind, Scan};

use super::flight_plan::{
    remove_last_destination, retain_existing, set_destination_action, target_flags,
    AppendOutcome, FlightPlan, RemoveOutcome,
};
use super::selection::{apply_pick, pick_entities, Hovered, SelectMode, Selection, SelectionEntry};

// =============================================================================
// Helpers
// =============================================================================

/// Nearest star or planet under the click that the planned carrier can reach.
/// Out-of-range bodies do not take clicks while planning.
pub fn planning_target(
    scan: &Scan,
    plan: &FlightPlan,
    viewport: &Viewport,
    screen: Vec2,
    tolerance_px: f32,
) -> Option<EntityId> {
    let world = viewport.screen_to_world(screen);
    scan.stars
        .iter()
        .chain(scan.planets.iter())
        .map(|body| (distance(body.position.vec(), world) * viewport.zoom(), body))
        .filter(|(gap, body)| *gap < tolerance_px && !target_flags(scan, plan, body).outside_range)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, body)| body.id.clone())
}

/// The carrier key actions apply to: the planned one, else the first selected
/// carrier the viewer owns.
pub fn editable_carrier(scan: &Scan, plan: &FlightPlan, selection: &Selection) -> Option<EntityId> {
    if let Some(planned) = plan.planning_for() {
        return Some(planned.clone());
    }
    selection
        .of_kind(EntityKind::Carrier)
        .find(|id| {
            scan.carrier(id)
                .map(|carrier| scan.is_viewer(Some(&carrier.owner)))
                .unwrap_or(false)
        })
        .cloned()
}

fn shift_held(input: &ButtonInput<KeyCode>, bindings: &InputBindings) -> bool {
    input.pressed(bindings.transfer_reverse_modifier) || input.pressed(KeyCode::ShiftRight)
}

// =============================================================================
// Systems
// =============================================================================

pub fn track_hover(
    windows: Query<&Window, With<PrimaryWindow>>,
    store: Res<ScanStore>,
    viewport: Res<Viewport>,
    config: Res<MapConfig>,
    mut hovered: ResMut<Hovered>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let entry = match (window.cursor_position(), store.scan()) {
        (Some(cursor), Some(scan)) => {
            pick_entities(scan, &viewport, cursor, config.pick_tolerance_px)
                .into_iter()
                .next()
        }
        _ => None,
    };

    if hovered.entry != entry {
        hovered.entry = entry;
    }
}

#[allow(clippy::too_many_arguments)]
pub fn route_map_clicks(
    mut clicks: MessageReader<MapClick>,
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    config: Res<MapConfig>,
    viewport: Res<Viewport>,
    mut store: ResMut<ScanStore>,
    mut link: ResMut<ServerLink>,
    mut ledger: ResMut<MutationLedger>,
    mut selection: ResMut<Selection>,
    mut plan: ResMut<FlightPlan>,
    mut log: ResMut<EventLog>,
) {
    for click in clicks.read() {
        let Some(scan) = store.scan() else {
            continue;
        };

        if let Some(carrier) = plan.planning_for().cloned() {
            let target =
                planning_target(scan, &plan, &viewport, click.screen, config.pick_tolerance_px);
            if let Some(target) = target {
                let Some(scan) = store.scan_mut() else {
                    continue;
                };
                let outcome = ledger.edit_carrier(scan, &mut link, &carrier, |scan| {
                    plan.append(scan, &target)
                });
                match outcome {
                    AppendOutcome::Appended { index } => {
                        let name = scan
                            .find_target(&target)
                            .map(|body| body.name.clone())
                            .unwrap_or_else(|| target.to_string());
                        log.push(format!("Waypoint {}: {}", index + 1, name));
                    }
                    other => debug!("Waypoint click ignored: {:?}", other),
                }
                continue;
            }
        }

        let picked = pick_entities(scan, &viewport, click.screen, config.pick_tolerance_px);
        let mode = if shift_held(&input, &bindings) {
            SelectMode::Add
        } else {
            SelectMode::Replace
        };
        apply_pick(&mut selection, &mut plan, picked, mode);
    }
}

#[allow(clippy::too_many_arguments)]
pub fn handle_plan_keys(
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    selection: Res<Selection>,
    mut store: ResMut<ScanStore>,
    mut link: ResMut<ServerLink>,
    mut ledger: ResMut<MutationLedger>,
    mut plan: ResMut<FlightPlan>,
    mut log: ResMut<EventLog>,
) {
    if input.just_pressed(bindings.add_destination) {
        let Some(scan) = store.scan() else {
            return;
        };
        let owned = selection.of_kind(EntityKind::Carrier).find_map(|id| {
            scan.carrier(id)
                .filter(|carrier| scan.is_viewer(Some(&carrier.owner)))
        });
        match owned {
            Some(carrier) => {
                log.push(format!("Planning {}: click stars to add waypoints", carrier.name));
                plan.begin(carrier.id.clone());
            }
            None => log.push("Select one of your carriers first".to_string()),
        }
    }

    let leaving = input.just_pressed(bindings.finish_plan) || input.just_pressed(bindings.cancel_plan);
    if leaving && plan.end().is_some() {
        log.push("Flight plan done".to_string());
    }

    let action = if input.just_pressed(bindings.tag_collect) {
        Some(DestinationAction::Collect)
    } else if input.just_pressed(bindings.tag_drop) {
        Some(DestinationAction::Drop)
    } else if input.just_pressed(bindings.tag_none) {
        Some(DestinationAction::None)
    } else {
        None
    };
    let remove = input.just_pressed(bindings.remove_last);
    let step = if input.just_pressed(bindings.waypoint_prev) {
        Some(-1)
    } else if input.just_pressed(bindings.waypoint_next) {
        Some(1)
    } else {
        None
    };
    if action.is_none() && !remove && step.is_none() {
        return;
    }

    let Some(carrier) = store
        .scan()
        .and_then(|scan| editable_carrier(scan, &plan, &selection))
    else {
        return;
    };
    let Some(scan) = store.scan_mut() else {
        return;
    };

    if remove {
        let outcome = ledger.edit_carrier(scan, &mut link, &carrier, |scan| {
            remove_last_destination(scan, &carrier)
        });
        match outcome {
            RemoveOutcome::Removed(_) => log.push("Last waypoint removed".to_string()),
            RemoveOutcome::Empty => debug!("No waypoint to remove on {}", carrier),
            RemoveOutcome::UnknownCarrier => debug!("Carrier {} is gone", carrier),
        }
    }

    if let Some(step) = step {
        if let Some(index) = scan.carrier(&carrier).and_then(|c| plan.move_cursor(c, step)) {
            debug!("Waypoint cursor on {} at {}", carrier, index);
        }
    }

    if let Some(action) = action {
        let Some(index) = scan.carrier(&carrier).and_then(|c| plan.cursor_index(c)) else {
            return;
        };
        let result = ledger.edit_carrier(scan, &mut link, &carrier, |scan| {
            set_destination_action(scan, &carrier, index, action)
        });
        match result {
            Ok(()) => log.push(format!("Waypoint {} set to {}", index + 1, action.label())),
            Err(error) => warn!("Tagging failed: {}", error),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn handle_build_carrier(
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    config: Res<MapConfig>,
    selection: Res<Selection>,
    mut store: ResMut<ScanStore>,
    mut link: ResMut<ServerLink>,
    mut ledger: ResMut<MutationLedger>,
    mut log: ResMut<EventLog>,
) {
    if !input.just_pressed(bindings.build_carrier) {
        return;
    }
    let Some(origin) = selection.first_body().map(|entry| entry.id.clone()) else {
        log.push("Select one of your stars to build a carrier".to_string());
        return;
    };
    let Some(scan) = store.scan_mut() else {
        return;
    };

    match ledger.begin_build(
        scan,
        &mut link,
        &origin,
        config.carrier_build_ships,
        config.carrier_build_fee,
    ) {
        Ok(_) => log.push(format!("Building carrier (${:.0})", config.carrier_build_fee)),
        Err(error) => {
            warn!("Build refused: {}", error);
            log.push(error);
        }
    }
}

/// New carriers are selected and go straight into planning.
pub fn select_built_carrier(
    mut built: MessageReader<CarrierBuilt>,
    mut selection: ResMut<Selection>,
    mut plan: ResMut<FlightPlan>,
) {
    for message in built.read() {
        selection.add(SelectionEntry::new(EntityKind::Carrier, message.carrier.clone()));
        plan.begin(message.carrier.clone());
    }
}

#[allow(clippy::too_many_arguments)]
pub fn handle_transfer(
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    config: Res<MapConfig>,
    selection: Res<Selection>,
    store: Res<ScanStore>,
    mut link: ResMut<ServerLink>,
    mut ledger: ResMut<MutationLedger>,
    mut log: ResMut<EventLog>,
) {
    if !input.just_pressed(bindings.transfer) {
        return;
    }
    let (Some(body), Some(carrier)) = (
        selection.first_body().map(|entry| entry.id.clone()),
        selection.first_of(EntityKind::Carrier).cloned(),
    ) else {
        log.push("Select a star and a carrier to move ships".to_string());
        return;
    };
    let Some(scan) = store.scan() else {
        return;
    };

    let (from, to) = if shift_held(&input, &bindings) {
        (carrier, body)
    } else {
        (body, carrier)
    };
    if let Err(error) = ledger.begin_transfer(
        scan,
        &mut link,
        &from,
        &to,
        config.transfer_step,
        config.proximity_radius,
    ) {
        log.push(error);
    }
}

/// Adds the next carrier parked at the selected star (or carrier) to the
/// selection.
pub fn handle_cycle_carrier(
    input: Res<ButtonInput<KeyCode>>,
    bindings: Res<InputBindings>,
    config: Res<MapConfig>,
    store: Res<ScanStore>,
    mut selection: ResMut<Selection>,
) {
    if !input.just_pressed(bindings.cycle_carrier) {
        return;
    }
    let Some(scan) = store.scan() else {
        return;
    };
    let anchor = selection
        .first_body()
        .or_else(|| {
            selection
                .entries()
                .iter()
                .find(|e| e.kind == EntityKind::Carrier)
        })
        .and_then(|entry| scan.find_by_id(entry.kind, &entry.id))
        .map(|entity| entity.position());
    let Some(anchor) = anchor else {
        return;
    };

    let next = store
        .find_within_radius(EntityKind::Carrier, anchor, config.proximity_radius)
        .into_iter()
        .filter(|carrier| !selection.contains(EntityKind::Carrier, carrier.id()))
        .min_by(|a, b| distance(a.position(), anchor).total_cmp(&distance(b.position(), anchor)))
        .map(|carrier| carrier.id().clone());
    if let Some(next) = next {
        selection.add(SelectionEntry::new(EntityKind::Carrier, next));
    }
}

pub fn prune_after_scan(
    mut replaced: MessageReader<ScanReplaced>,
    store: Res<ScanStore>,
    mut selection: ResMut<Selection>,
    mut plan: ResMut<FlightPlan>,
    mut log: ResMut<EventLog>,
) {
    if replaced.is_empty() {
        return;
    }
    replaced.clear();
    let Some(scan) = store.scan() else {
        return;
    };

    let pruned = selection.retain_existing(scan);
    if pruned > 0 {
        debug!("Dropped {} vanished entities from selection", pruned);
    }
    if retain_existing(&mut plan, scan) {
        log.push("Planned carrier is gone; planning ended".to_string());
    }
}
