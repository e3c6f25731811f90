//! Map view rendering: range rings, routes, markers and labels.

use bevy::prelude::*;
use bevy::ui::Node as UiNode;

use crate::geometry::midpoint;
use crate::plugins::core::MapConfig;
use crate::plugins::player::{FlightPlan, Hovered, Selection};
use crate::plugins::snapshot::ScanStore;

use super::camera::{to_render, Viewport};
use super::components::{
    bracket_segments, dashed_circle, with_alpha, MapLabel, LABEL_BACKGROUND, LABEL_COLOR,
    OUT_OF_RANGE_COLOR, SELECTION_COLOR,
};
use super::layers::{compose, ComposeInput, LayerKind, MapLayers, RingStyle};

// =============================================================================
// Layer cache
// =============================================================================

/// Recomposes the layers when any input changed. Panning alone leaves them
/// untouched.
#[allow(clippy::too_many_arguments)]
pub fn rebuild_layers(
    store: Res<ScanStore>,
    viewport: Res<Viewport>,
    selection: Res<Selection>,
    plan: Res<FlightPlan>,
    hovered: Res<Hovered>,
    config: Res<MapConfig>,
    mut layers: ResMut<MapLayers>,
    mut last_zoom: Local<f32>,
) {
    let zoom_changed = *last_zoom != viewport.zoom();
    let inputs_changed = store.is_changed()
        || selection.is_changed()
        || plan.is_changed()
        || hovered.is_changed()
        || config.is_changed();
    if !zoom_changed && !inputs_changed {
        return;
    }
    *last_zoom = viewport.zoom();

    let Some(scan) = store.scan() else {
        layers.set_if_neq(MapLayers::default());
        return;
    };
    let composed = compose(&ComposeInput {
        scan,
        zoom: viewport.zoom(),
        selection: &selection,
        plan: &plan,
        hovered: hovered.entry.as_ref(),
        config: &config,
    });
    if layers.set_if_neq(composed) {
        debug!(
            "Map layers rebuilt: {} bodies, {} carriers, {} legs",
            layers.len(LayerKind::Bodies),
            layers.len(LayerKind::Carriers),
            layers.len(LayerKind::Routes)
        );
    }
}

// =============================================================================
// Drawing
// =============================================================================

pub fn draw_map_layers(mut gizmos: Gizmos, layers: Res<MapLayers>) {
    for kind in LayerKind::ORDER {
        match kind {
            LayerKind::Ranges => draw_ranges(&mut gizmos, &layers),
            LayerKind::Routes => draw_routes(&mut gizmos, &layers),
            LayerKind::Bodies => draw_bodies(&mut gizmos, &layers),
            LayerKind::Carriers => draw_carriers(&mut gizmos, &layers),
            LayerKind::Selection => draw_selection(&mut gizmos, &layers),
        }
    }
}

fn draw_ranges(gizmos: &mut Gizmos, layers: &MapLayers) {
    for ring in &layers.ranges {
        let center = to_render(ring.center);
        match ring.style {
            RingStyle::Hyperspace => {
                gizmos.circle_2d(center, ring.radius, with_alpha(ring.color, 0.15));
            }
            RingStyle::Scan => {
                for (a, b) in dashed_circle(center, ring.radius, 24) {
                    gizmos.line_2d(a, b, with_alpha(ring.color, 0.35));
                }
            }
            RingStyle::PlanReach => {
                gizmos.circle_2d(center, ring.radius, with_alpha(ring.color, 0.8));
            }
        }
    }
}

fn draw_routes(gizmos: &mut Gizmos, layers: &MapLayers) {
    for leg in &layers.routes {
        let alpha = match (leg.highlighted, leg.active) {
            (true, _) => 1.0,
            (false, true) => 0.6,
            (false, false) => 0.3,
        };
        gizmos.line_2d(to_render(leg.from), to_render(leg.to), with_alpha(leg.color, alpha));
    }
}

fn draw_bodies(gizmos: &mut Gizmos, layers: &MapLayers) {
    for body in &layers.bodies {
        let center = to_render(body.position);
        let color = if body.flags.outside_range {
            OUT_OF_RANGE_COLOR
        } else if body.dimmed {
            with_alpha(body.color, 0.4)
        } else {
            body.color
        };
        gizmos.circle_2d(center, body.radius, color);

        if body.warp_gate {
            gizmos.circle_2d(center, body.radius * 1.3, with_alpha(body.color, 0.6));
        }
        if body.flags.is_target {
            gizmos.circle_2d(center, body.radius * 0.5, SELECTION_COLOR);
        }
        if body.flags.is_last_target {
            gizmos.circle_2d(center, body.radius * 0.25, SELECTION_COLOR);
        }
    }
}

fn draw_carriers(gizmos: &mut Gizmos, layers: &MapLayers) {
    for carrier in &layers.carriers {
        let center = to_render(carrier.position);
        gizmos.circle_2d(center, carrier.radius, carrier.color);

        if let Some(heading) = carrier.heading {
            let radians = heading.to_radians();
            let tip = carrier.position + Vec2::new(radians.cos(), radians.sin()) * carrier.radius * 2.0;
            gizmos.line_2d(center, to_render(tip), carrier.color);
        }
        if carrier.planning {
            gizmos.circle_2d(center, carrier.radius * 1.5, SELECTION_COLOR);
        }
    }
}

fn draw_selection(gizmos: &mut Gizmos, layers: &MapLayers) {
    for mark in &layers.selection {
        for (a, b) in bracket_segments(to_render(mark.position), mark.radius) {
            gizmos.line_2d(a, b, SELECTION_COLOR);
        }
    }
}

// =============================================================================
// Labels
// =============================================================================

/// Respawns screen-space labels whenever the layers or the view moved.
pub fn update_map_labels(
    mut commands: Commands,
    layers: Res<MapLayers>,
    viewport: Res<Viewport>,
    labels: Query<Entity, With<MapLabel>>,
) {
    if !layers.is_changed() && !viewport.is_changed() {
        return;
    }
    for entity in labels.iter() {
        commands.entity(entity).despawn();
    }

    let bodies = layers.bodies.iter().filter_map(|body| {
        body.label.as_ref().map(|name| {
            let text = match body.ships {
                Some(ships) => format!("{} [{}]", name, ships),
                None => name.clone(),
            };
            (body.position + Vec2::new(0.0, body.radius), text, 14.0)
        })
    });
    let carriers = layers.carriers.iter().filter_map(|carrier| {
        carrier
            .label
            .as_ref()
            .map(|text| (carrier.position - Vec2::new(0.0, carrier.radius * 3.0), text.clone(), 12.0))
    });
    let etas = layers
        .routes
        .iter()
        .filter(|leg| leg.show_eta)
        .filter_map(|leg| {
            leg.eta_hours
                .map(|hours| (midpoint(leg.from, leg.to), format!("{:.1}h", hours), 12.0))
        });

    for (world, text, font_size) in bodies.chain(carriers).chain(etas) {
        let screen = viewport.world_to_screen(world);
        commands.spawn((
            MapLabel,
            Text::new(text),
            TextFont {
                font_size,
                ..default()
            },
            TextColor(LABEL_COLOR),
            UiNode {
                position_type: PositionType::Absolute,
                left: Val::Px(screen.x + 6.0),
                top: Val::Px(screen.y - 8.0),
                padding: UiRect::all(Val::Px(2.0)),
                ..default()
            },
            BackgroundColor(LABEL_BACKGROUND),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::player::SelectionEntry;
    use crate::scan::fixtures::sample_scan;
    use crate::scan::{EntityId, EntityKind};

    fn app() -> App {
        let mut app = App::new();
        let mut store = ScanStore::default();
        store.replace(sample_scan());
        app.insert_resource(store)
            .insert_resource(Viewport::new(60.0, 5.0, 500.0))
            .insert_resource(MapConfig::default())
            .init_resource::<Selection>()
            .init_resource::<FlightPlan>()
            .init_resource::<Hovered>()
            .init_resource::<MapLayers>()
            .add_systems(Update, rebuild_layers);
        app
    }

    #[test]
    fn layers_follow_selection_changes() {
        let mut app = app();
        app.update();
        assert_eq!(app.world().resource::<MapLayers>().len(LayerKind::Bodies), 5);
        assert_eq!(app.world().resource::<MapLayers>().len(LayerKind::Selection), 0);

        app.world_mut()
            .resource_mut::<Selection>()
            .add(SelectionEntry::new(EntityKind::Star, EntityId::new("s0")));
        app.update();

        assert_eq!(app.world().resource::<MapLayers>().len(LayerKind::Selection), 1);
    }

    #[test]
    fn layers_empty_without_scan() {
        let mut app = app();
        app.insert_resource(ScanStore::default());
        app.update();
        assert_eq!(*app.world().resource::<MapLayers>(), MapLayers::default());
    }
}
