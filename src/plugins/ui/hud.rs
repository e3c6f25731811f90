//! HUD setup and update systems.

use bevy::prelude::*;
use bevy::ui::Node as UiNode;
use std::path::Path;

use crate::plugins::core::InputBindings;
use crate::plugins::player::{FlightPlan, Selection};
use crate::plugins::render2d::Viewport;
use crate::plugins::snapshot::ScanStore;
use crate::scan::{EntityKind, EntityRef, Scan};

use super::components::{
    FlightPlanText, HintText, HudText, LogContentText, SelectionText, HINT_COLOR, HUD_COLOR,
    PANEL_COLOR,
};

const FONT_PATH: &str = "fonts/SpaceMono-Regular.ttf";

// =============================================================================
// Setup Systems
// =============================================================================

fn hud_font(asset_server: &AssetServer, font_size: f32) -> TextFont {
    let font_on_disk = Path::new("assets").join(FONT_PATH);
    if font_on_disk.exists() {
        TextFont {
            font: asset_server.load(FONT_PATH),
            font_size,
            ..default()
        }
    } else {
        TextFont {
            font_size,
            ..default()
        }
    }
}

fn anchored(left: Option<f32>, right: Option<f32>, top: Option<f32>, bottom: Option<f32>) -> UiNode {
    let px = |value: Option<f32>| value.map(Val::Px).unwrap_or(Val::Auto);
    UiNode {
        position_type: PositionType::Absolute,
        left: px(left),
        right: px(right),
        top: px(top),
        bottom: px(bottom),
        ..default()
    }
}

pub fn setup_hud(mut commands: Commands, asset_server: Res<AssetServer>) {
    if !Path::new("assets").join(FONT_PATH).exists() {
        info!("HUD font not found at assets/{}; using the default font", FONT_PATH);
    }

    // Zoom and game (top-left)
    commands.spawn((
        HudText,
        Text::new("Zoom: --"),
        hud_font(&asset_server, 18.0),
        TextColor(HUD_COLOR),
        anchored(Some(14.0), None, Some(10.0), None),
    ));

    commands.spawn((
        SelectionText,
        Text::new("Selection: --"),
        hud_font(&asset_server, 14.0),
        TextColor(PANEL_COLOR),
        anchored(Some(14.0), None, Some(36.0), None),
    ));

    // Flight plan (top-right)
    commands.spawn((
        FlightPlanText,
        Text::new(""),
        hud_font(&asset_server, 14.0),
        TextColor(PANEL_COLOR),
        anchored(None, Some(14.0), Some(10.0), None),
    ));

    commands.spawn((
        HintText,
        Text::new(""),
        hud_font(&asset_server, 12.0),
        TextColor(HINT_COLOR),
        anchored(Some(14.0), None, None, Some(10.0)),
    ));

    commands.spawn((
        LogContentText,
        Text::new(""),
        hud_font(&asset_server, 12.0),
        TextColor(HINT_COLOR),
        anchored(None, Some(14.0), None, Some(10.0)),
    ));
}

// =============================================================================
// Text builders
// =============================================================================

pub fn key_name(key: KeyCode) -> String {
    let debug = format!("{:?}", key);
    debug
        .strip_prefix("Key")
        .or_else(|| debug.strip_prefix("Digit"))
        .unwrap_or(&debug)
        .to_string()
}

pub fn selection_summary(scan: Option<&Scan>, selection: &Selection) -> String {
    let Some(scan) = scan else {
        return "Selection: --".to_string();
    };
    if selection.is_empty() {
        return "Selection: none".to_string();
    }

    let mut parts = Vec::new();
    for kind in [EntityKind::Star, EntityKind::Planet, EntityKind::Carrier] {
        let count = selection.of_kind(kind).count();
        let Some(first) = selection.first_of(kind) else {
            continue;
        };
        let name = match scan.find_by_id(kind, first) {
            Some(EntityRef::Carrier(carrier)) => {
                format!("{} ({} ships)", carrier.name, carrier.ships)
            }
            Some(EntityRef::Star(body)) | Some(EntityRef::Planet(body)) => {
                match body.ships {
                    Some(ships) => format!("{} ({} ships)", body.name, ships),
                    None => body.name.clone(),
                }
            }
            None => first.to_string(),
        };
        let more = if count > 1 {
            format!(" +{}", count - 1)
        } else {
            String::new()
        };
        parts.push(format!("{}: {}{}", kind.label(), name, more));
    }
    format!("Selection: {}", parts.join(" | "))
}

/// Waypoints of the planned carrier, or of the first selected one, with the
/// ETA of each leg.
pub fn flight_plan_summary(scan: Option<&Scan>, plan: &FlightPlan, selection: &Selection) -> String {
    let Some(scan) = scan else {
        return String::new();
    };
    let carrier = plan
        .planning_for()
        .or_else(|| selection.first_of(EntityKind::Carrier))
        .and_then(|id| scan.carrier(id));
    let Some(carrier) = carrier else {
        return String::new();
    };

    let mut lines = vec![format!(
        "{}{}",
        carrier.name,
        if plan.is_planning_carrier(&carrier.id) {
            " [planning]"
        } else {
            ""
        }
    )];
    if carrier.destination_queue.is_empty() {
        lines.push("No waypoints".to_string());
        return lines.join("\n");
    }

    let cursor = plan.cursor_index(carrier);
    let mut from = carrier.position.vec();
    let mut total = 0.0;
    for (index, destination) in carrier.destination_queue.iter().enumerate() {
        let marker = if cursor == Some(index) { "> " } else { "  " };
        let Some(body) = scan.find_target(&destination.target) else {
            lines.push(format!("{}{}. ? ({})", marker, index + 1, destination.target));
            continue;
        };
        let eta = scan.eta_to(from, body);
        total += eta.unwrap_or(0.0);
        let eta_text = eta
            .map(|hours| format!("{:.1}h", hours))
            .unwrap_or_else(|| "--".to_string());
        lines.push(format!(
            "{}{}. {}  {}  {}",
            marker,
            index + 1,
            body.name,
            eta_text,
            destination.action.label()
        ));
        from = body.position.vec();
    }
    lines.push(format!("Total: {:.1}h", total));
    lines.join("\n")
}

pub fn key_hints(plan: &FlightPlan, selection: &Selection, bindings: &InputBindings) -> String {
    if plan.is_planning() {
        return format!(
            "Click stars in range | {} undo | {}/{} pick waypoint | {}/{}/{} collect/drop/none | {} done",
            key_name(bindings.remove_last),
            key_name(bindings.waypoint_prev),
            key_name(bindings.waypoint_next),
            key_name(bindings.tag_collect),
            key_name(bindings.tag_drop),
            key_name(bindings.tag_none),
            key_name(bindings.finish_plan),
        );
    }

    let has_carrier = selection.first_of(EntityKind::Carrier).is_some();
    let has_body = selection.first_body().is_some();
    let mut hints = vec!["Drag to pan | Wheel to zoom | Shift-click adds".to_string()];
    if has_carrier {
        hints.push(format!("{} plan route", key_name(bindings.add_destination)));
    }
    if has_body {
        hints.push(format!("{} build carrier", key_name(bindings.build_carrier)));
    }
    if has_body || has_carrier {
        hints.push(format!("{} next carrier", key_name(bindings.cycle_carrier)));
    }
    if has_body && has_carrier {
        hints.push(format!(
            "{} load / Shift+{} unload ships",
            key_name(bindings.transfer),
            key_name(bindings.transfer)
        ));
    }
    hints.push(format!("{} refresh", key_name(bindings.refresh_scan)));
    hints.join(" | ")
}

// =============================================================================
// Update Systems
// =============================================================================

pub fn update_hud_text(
    viewport: Res<Viewport>,
    store: Res<ScanStore>,
    mut hud: Query<&mut Text, With<HudText>>,
) {
    if let Some(mut text) = hud.iter_mut().next() {
        let game = store
            .scan()
            .map(|scan| scan.game.to_string())
            .unwrap_or_else(|| "--".to_string());
        let value = format!("Game: {} | Zoom: {}", game, viewport.label());
        if text.0 != value {
            text.0 = value;
        }
    }
}

pub fn update_selection_panel(
    store: Res<ScanStore>,
    selection: Res<Selection>,
    mut panel: Query<&mut Text, With<SelectionText>>,
) {
    if !store.is_changed() && !selection.is_changed() {
        return;
    }
    if let Some(mut text) = panel.iter_mut().next() {
        text.0 = selection_summary(store.scan(), &selection);
    }
}

pub fn update_flight_plan_panel(
    store: Res<ScanStore>,
    plan: Res<FlightPlan>,
    selection: Res<Selection>,
    mut panel: Query<&mut Text, With<FlightPlanText>>,
) {
    if !store.is_changed() && !plan.is_changed() && !selection.is_changed() {
        return;
    }
    if let Some(mut text) = panel.iter_mut().next() {
        text.0 = flight_plan_summary(store.scan(), &plan, &selection);
    }
}

pub fn update_key_hints(
    plan: Res<FlightPlan>,
    selection: Res<Selection>,
    bindings: Res<InputBindings>,
    mut panel: Query<&mut Text, With<HintText>>,
) {
    if !plan.is_changed() && !selection.is_changed() {
        return;
    }
    if let Some(mut text) = panel.iter_mut().next() {
        text.0 = key_hints(&plan, &selection, &bindings);
    }
}
