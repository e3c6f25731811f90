//! Draw layers composed from the scan, viewport, selection and flight plan.
//!
//! `compose` is a pure function. The map systems call it whenever one of its
//! inputs changed and draw from the cached result every frame.

use bevy::color::Srgba;
use bevy::prelude::*;

use crate::geometry::{heading_degrees, lerp};
use crate::plugins::core::MapConfig;
use crate::plugins::player::flight_plan::{range_origin, target_flags, FlightPlan, TargetFlags};
use crate::plugins::player::selection::{Selection, SelectionEntry};
use crate::scan::{Body, EntityId, EntityKind, Scan};

/// Marker size bounds in light-years.
pub const MARKER_MIN: f32 = 0.2;
pub const MARKER_MAX: f32 = 2.0;

const NEUTRAL: Color = Color::srgb(0.55, 0.58, 0.62);

/// Back-to-front draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Ranges,
    Routes,
    Bodies,
    Carriers,
    Selection,
}

impl LayerKind {
    pub const ORDER: [LayerKind; 5] = [
        LayerKind::Ranges,
        LayerKind::Routes,
        LayerKind::Bodies,
        LayerKind::Carriers,
        LayerKind::Selection,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingStyle {
    /// Filled hyperspace reach of an owned star.
    Hyperspace,
    /// Dashed scanning coverage.
    Scan,
    /// Reach of the next jump of the planned carrier.
    PlanReach,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeRing {
    pub center: Vec2,
    pub radius: f32,
    pub style: RingStyle,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub carrier: EntityId,
    pub from: Vec2,
    pub to: Vec2,
    /// Hours of travel; `None` when the game speed is unusable.
    pub eta_hours: Option<f32>,
    /// Carrier to its next stop.
    pub active: bool,
    pub highlighted: bool,
    pub show_eta: bool,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyMarker {
    pub kind: EntityKind,
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    pub color: Color,
    pub selected: bool,
    pub dimmed: bool,
    pub flags: TargetFlags,
    pub ships: Option<u32>,
    pub warp_gate: bool,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarrierMarker {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    pub color: Color,
    /// Degrees toward the first waypoint, in scan space.
    pub heading: Option<f32>,
    pub selected: bool,
    pub planning: bool,
    pub ships: u32,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionMark {
    pub position: Vec2,
    pub radius: f32,
}

/// Cached layers in scan coordinates.
#[derive(Resource, Debug, Default, Clone, PartialEq)]
pub struct MapLayers {
    pub ranges: Vec<RangeRing>,
    pub routes: Vec<RouteLeg>,
    pub bodies: Vec<BodyMarker>,
    pub carriers: Vec<CarrierMarker>,
    pub selection: Vec<SelectionMark>,
}

impl MapLayers {
    pub fn len(&self, kind: LayerKind) -> usize {
        match kind {
            LayerKind::Ranges => self.ranges.len(),
            LayerKind::Routes => self.routes.len(),
            LayerKind::Bodies => self.bodies.len(),
            LayerKind::Carriers => self.carriers.len(),
            LayerKind::Selection => self.selection.len(),
        }
    }

    pub fn body(&self, id: &EntityId) -> Option<&BodyMarker> {
        self.bodies.iter().find(|b| &b.id == id)
    }

    pub fn carrier(&self, id: &EntityId) -> Option<&CarrierMarker> {
        self.carriers.iter().find(|c| &c.id == id)
    }
}

pub struct ComposeInput<'a> {
    pub scan: &'a Scan,
    pub zoom: f32,
    pub selection: &'a Selection,
    pub plan: &'a FlightPlan,
    pub hovered: Option<&'a SelectionEntry>,
    pub config: &'a MapConfig,
}

// =============================================================================
// Sizing and colour
// =============================================================================

/// Richer bodies get bigger markers; markers shrink in world units as the
/// view zooms in.
pub fn marker_size(resources: Option<u32>, zoom: f32) -> f32 {
    let t = resources.unwrap_or(0) as f32 / 50.0;
    (lerp(30.0, 80.0, t) / zoom.max(f32::EPSILON)).clamp(MARKER_MIN, MARKER_MAX)
}

pub fn player_color(scan: &Scan, owner: Option<&EntityId>) -> Color {
    owner
        .and_then(|id| scan.player(id))
        .and_then(|player| Srgba::hex(&player.color).ok())
        .map(Color::from)
        .unwrap_or(NEUTRAL)
}

// =============================================================================
// Composer
// =============================================================================

pub fn compose(input: &ComposeInput) -> MapLayers {
    let mut layers = MapLayers::default();
    compose_ranges(input, &mut layers);
    compose_routes(input, &mut layers);
    compose_bodies(input, &mut layers);
    compose_carriers(input, &mut layers);
    compose_selection(&mut layers);
    layers
}

fn compose_ranges(input: &ComposeInput, layers: &mut MapLayers) {
    let scan = input.scan;
    if let Some(viewer) = scan.viewer() {
        let color = player_color(scan, Some(&viewer.id));
        let owned: Vec<&Body> = scan
            .stars
            .iter()
            .chain(scan.planets.iter())
            .filter(|body| body.occupier.as_ref() == Some(&viewer.id))
            .collect();

        for body in &owned {
            layers.ranges.push(RangeRing {
                center: body.position.vec(),
                radius: viewer.hyperspace_range(),
                style: RingStyle::Hyperspace,
                color,
            });
        }
        for body in &owned {
            layers.ranges.push(RangeRing {
                center: body.position.vec(),
                radius: viewer.scan_range(),
                style: RingStyle::Scan,
                color,
            });
        }
    }

    let planned = input.plan.planning_for().and_then(|id| scan.carrier(id));
    if let Some(carrier) = planned {
        if let Some(owner) = scan.owner_of(carrier) {
            layers.ranges.push(RangeRing {
                center: range_origin(scan, carrier),
                radius: owner.hyperspace_range(),
                style: RingStyle::PlanReach,
                color: player_color(scan, Some(&owner.id)),
            });
        }
    }
}

fn compose_routes(input: &ComposeInput, layers: &mut MapLayers) {
    let scan = input.scan;
    let lines_visible = input.zoom >= input.config.lines_min_zoom;
    let show_eta = input.zoom > input.config.eta_labels_min_zoom;

    for carrier in &scan.carriers {
        let highlighted = input.selection.contains(EntityKind::Carrier, &carrier.id)
            || input.plan.is_planning_carrier(&carrier.id);
        // Selected routes stay visible when zoomed out.
        if !lines_visible && !highlighted {
            continue;
        }

        let color = player_color(scan, Some(&carrier.owner));
        let mut from = carrier.position.vec();
        for (index, (_, body)) in scan.resolved_route(carrier).into_iter().enumerate() {
            let to = body.position.vec();
            layers.routes.push(RouteLeg {
                carrier: carrier.id.clone(),
                from,
                to,
                eta_hours: scan.eta_to(from, body),
                active: index == 0,
                highlighted,
                show_eta,
                color,
            });
            from = to;
        }
    }
}

fn compose_bodies(input: &ComposeInput, layers: &mut MapLayers) {
    let scan = input.scan;
    let labels_visible = input.zoom > input.config.labels_min_zoom;
    let anything_selected = !input.selection.is_empty();

    let bodies = scan
        .stars
        .iter()
        .map(|body| (EntityKind::Star, body))
        .chain(scan.planets.iter().map(|body| (EntityKind::Planet, body)));

    for (kind, body) in bodies {
        let selected = input.selection.contains(kind, &body.id);
        let hovered = input
            .hovered
            .map(|h| h.kind == kind && h.id == body.id)
            .unwrap_or(false);
        let flags = target_flags(scan, input.plan, body);

        layers.bodies.push(BodyMarker {
            kind,
            id: body.id.clone(),
            position: body.position.vec(),
            radius: marker_size(body.resources, input.zoom) * 0.5,
            color: player_color(scan, body.occupier.as_ref()),
            selected,
            dimmed: anything_selected && !selected,
            flags,
            ships: scan.total_ships_at(body, input.config.proximity_radius),
            warp_gate: body.has_warp_gate(),
            label: (labels_visible || selected || hovered).then(|| body.name.clone()),
        });
    }
}

fn compose_carriers(input: &ComposeInput, layers: &mut MapLayers) {
    let scan = input.scan;
    let labels_visible = input.zoom > input.config.labels_min_zoom;

    for carrier in &scan.carriers {
        let selected = input.selection.contains(EntityKind::Carrier, &carrier.id);
        let hovered = input
            .hovered
            .map(|h| h.kind == EntityKind::Carrier && h.id == carrier.id)
            .unwrap_or(false);
        let position = carrier.position.vec();
        let heading = scan
            .resolved_route(carrier)
            .first()
            .map(|(_, body)| body.position.vec())
            .filter(|next| *next != position)
            .map(|next| heading_degrees(position, next));

        layers.carriers.push(CarrierMarker {
            id: carrier.id.clone(),
            position,
            radius: marker_size(None, input.zoom) * 0.3,
            color: player_color(scan, Some(&carrier.owner)),
            heading,
            selected,
            planning: input.plan.is_planning_carrier(&carrier.id),
            ships: carrier.ships,
            label: (labels_visible || selected || hovered)
                .then(|| format!("{} ({})", carrier.name, carrier.ships)),
        });
    }
}

fn compose_selection(layers: &mut MapLayers) {
    let bodies = layers
        .bodies
        .iter()
        .filter(|b| b.selected)
        .map(|b| (b.position, b.radius));
    let carriers = layers
        .carriers
        .iter()
        .filter(|c| c.selected)
        .map(|c| (c.position, c.radius));
    let marks: Vec<SelectionMark> = bodies
        .chain(carriers)
        .map(|(position, radius)| SelectionMark {
            position,
            radius: radius * 1.6,
        })
        .collect();
    layers.selection = marks;
}
