//! Read-only game snapshot ("scan") as delivered by the game server.
//!
//! A scan is replaced wholesale on every refresh. Optional resource fields
//! on stars and planets are `None` when the viewer has no scan coverage:
//! `None` means unknown, never zero.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{distance, eta};

// =============================================================================
// Identifiers and positions
// =============================================================================

/// Opaque server-side identifier, unique within its collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// World position in light-years.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn vec(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

impl From<Vec2> for Position {
    fn from(value: Vec2) -> Self {
        Self::new(value.x, value.y)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Star,
    Planet,
    Carrier,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Star => "Star",
            EntityKind::Planet => "Planet",
            EntityKind::Carrier => "Carrier",
        }
    }

    pub fn is_body(self) -> bool {
        matches!(self, EntityKind::Star | EntityKind::Planet)
    }
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DestinationAction {
    Collect,
    Drop,
    #[default]
    None,
}

impl DestinationAction {
    pub fn label(self) -> &'static str {
        match self {
            DestinationAction::Collect => "Collect",
            DestinationAction::Drop => "Drop",
            DestinationAction::None => "Nothing",
        }
    }
}

/// One waypoint of a carrier's flight plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub target: EntityId,
    #[serde(default)]
    pub action: DestinationAction,
}

impl Destination {
    pub fn new(target: EntityId) -> Self {
        Self {
            target,
            action: DestinationAction::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchLevels {
    pub scanning: u32,
    pub hyperspace: u32,
    pub terraforming: u32,
    pub experimentation: u32,
    pub weapons: u32,
    pub banking: u32,
    pub manufacturing: u32,
}

impl Default for ResearchLevels {
    fn default() -> Self {
        Self {
            scanning: 1,
            hyperspace: 1,
            terraforming: 1,
            experimentation: 1,
            weapons: 1,
            banking: 1,
            manufacturing: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_player_color")]
    pub color: String,
    /// Only known for the viewing player.
    #[serde(default)]
    pub cash: Option<f32>,
    #[serde(default)]
    pub research_levels: ResearchLevels,
}

fn default_player_color() -> String {
    "#888888".to_string()
}

impl Player {
    /// Maximum jump length between consecutive waypoints.
    pub fn hyperspace_range(&self) -> f32 {
        (self.research_levels.hyperspace + 3) as f32
    }

    pub fn scan_range(&self) -> f32 {
        (self.research_levels.scanning + 2) as f32
    }
}

/// A star or planet. Both share the same wire shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub position: Position,
    #[serde(default)]
    pub occupier: Option<EntityId>,
    #[serde(default)]
    pub ships: Option<u32>,
    #[serde(default)]
    pub economy: Option<u32>,
    #[serde(default)]
    pub industry: Option<u32>,
    #[serde(default)]
    pub science: Option<u32>,
    #[serde(default)]
    pub resources: Option<u32>,
    #[serde(default)]
    pub warp_gate: Option<bool>,
    /// Orbital distance of a planet from its star; zero for stars.
    #[serde(default)]
    pub distance: f32,
}

pub type Star = Body;
pub type Planet = Body;

impl Body {
    pub fn has_warp_gate(&self) -> bool {
        self.warp_gate == Some(true)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub owner: EntityId,
    pub position: Position,
    #[serde(default)]
    pub ships: u32,
    #[serde(default)]
    pub destination_queue: Vec<Destination>,
}

impl Carrier {
    pub fn last_destination(&self) -> Option<&Destination> {
        self.destination_queue.last()
    }

    pub fn targets(&self, id: &EntityId) -> bool {
        self.destination_queue.iter().any(|d| &d.target == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Light-years per hour.
    pub carrier_speed: f32,
    /// Light-years per hour when flying into a warp gate.
    pub warp_speed: f32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            carrier_speed: 0.3333,
            warp_speed: 3.0,
        }
    }
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub game: EntityId,
    #[serde(default)]
    pub viewer: Option<EntityId>,
    #[serde(default)]
    pub settings: GameSettings,
    #[serde(default)]
    pub stars: Vec<Star>,
    #[serde(default)]
    pub planets: Vec<Planet>,
    #[serde(default)]
    pub carriers: Vec<Carrier>,
    #[serde(default)]
    pub players: Vec<Player>,
}

/// Borrowed view of any positioned entity in a scan.
#[derive(Clone, Copy, Debug)]
pub enum EntityRef<'a> {
    Star(&'a Star),
    Planet(&'a Planet),
    Carrier(&'a Carrier),
}

impl<'a> EntityRef<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Star(_) => EntityKind::Star,
            EntityRef::Planet(_) => EntityKind::Planet,
            EntityRef::Carrier(_) => EntityKind::Carrier,
        }
    }

    pub fn id(&self) -> &'a EntityId {
        match self {
            EntityRef::Star(body) | EntityRef::Planet(body) => &body.id,
            EntityRef::Carrier(carrier) => &carrier.id,
        }
    }

    pub fn position(&self) -> Vec2 {
        match self {
            EntityRef::Star(body) | EntityRef::Planet(body) => body.position.vec(),
            EntityRef::Carrier(carrier) => carrier.position.vec(),
        }
    }
}

impl Scan {
    pub fn star(&self, id: &EntityId) -> Option<&Star> {
        self.stars.iter().find(|s| &s.id == id)
    }

    pub fn planet(&self, id: &EntityId) -> Option<&Planet> {
        self.planets.iter().find(|p| &p.id == id)
    }

    pub fn carrier(&self, id: &EntityId) -> Option<&Carrier> {
        self.carriers.iter().find(|c| &c.id == id)
    }

    pub fn carrier_mut(&mut self, id: &EntityId) -> Option<&mut Carrier> {
        self.carriers.iter_mut().find(|c| &c.id == id)
    }

    pub fn player(&self, id: &EntityId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_mut(&mut self, id: &EntityId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    /// Resolve a waypoint target: stars first, then planets.
    pub fn find_target(&self, id: &EntityId) -> Option<&Body> {
        self.star(id).or_else(|| self.planet(id))
    }

    pub fn find_target_mut(&mut self, id: &EntityId) -> Option<&mut Body> {
        if let Some(index) = self.stars.iter().position(|s| &s.id == id) {
            return self.stars.get_mut(index);
        }
        self.planets.iter_mut().find(|p| &p.id == id)
    }

    pub fn viewer(&self) -> Option<&Player> {
        self.viewer.as_ref().and_then(|id| self.player(id))
    }

    pub fn owner_of(&self, carrier: &Carrier) -> Option<&Player> {
        self.player(&carrier.owner)
    }

    pub fn is_viewer(&self, player: Option<&EntityId>) -> bool {
        match (player, self.viewer.as_ref()) {
            (Some(player), Some(viewer)) => player == viewer,
            _ => false,
        }
    }

    /// All entities of one collection, in scan order.
    pub fn entities(&self, kind: EntityKind) -> Vec<EntityRef<'_>> {
        match kind {
            EntityKind::Star => self.stars.iter().map(EntityRef::Star).collect(),
            EntityKind::Planet => self.planets.iter().map(EntityRef::Planet).collect(),
            EntityKind::Carrier => self.carriers.iter().map(EntityRef::Carrier).collect(),
        }
    }

    pub fn find_by_id(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRef<'_>> {
        match kind {
            EntityKind::Star => self.star(id).map(EntityRef::Star),
            EntityKind::Planet => self.planet(id).map(EntityRef::Planet),
            EntityKind::Carrier => self.carrier(id).map(EntityRef::Carrier),
        }
    }

    /// Linear scan; entity counts per game are in the low hundreds.
    pub fn find_within_radius(
        &self,
        kind: EntityKind,
        point: Vec2,
        radius: f32,
    ) -> Vec<EntityRef<'_>> {
        self.entities(kind)
            .into_iter()
            .filter(|entity| distance(entity.position(), point) <= radius)
            .collect()
    }

    /// Ships at a body plus ships aboard co-located carriers of the same occupier.
    pub fn total_ships_at(&self, body: &Body, radius: f32) -> Option<u32> {
        let own = body.ships?;
        let Some(occupier) = body.occupier.as_ref() else {
            return Some(own);
        };
        let docked = self
            .find_within_radius(EntityKind::Carrier, body.position.vec(), radius)
            .into_iter()
            .filter_map(|entity| match entity {
                EntityRef::Carrier(carrier) if &carrier.owner == occupier => Some(carrier.ships),
                _ => None,
            })
            .sum::<u32>();
        Some(own + docked)
    }

    /// Travel time from a point to a body with this game's speeds.
    pub fn eta_to(&self, from: Vec2, target: &Body) -> Option<f32> {
        eta(
            from,
            target.position.vec(),
            target.has_warp_gate(),
            self.settings.carrier_speed,
            self.settings.warp_speed,
        )
    }

    /// Resolved waypoint positions of a carrier; stale targets are skipped.
    pub fn resolved_route<'s, 'c>(&'s self, carrier: &'c Carrier) -> Vec<(&'c Destination, &'s Body)> {
        carrier
            .destination_queue
            .iter()
            .filter_map(|d| self.find_target(&d.target).map(|body| (d, body)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn body(id: &str, x: f32, y: f32, occupier: Option<&str>) -> Body {
        Body {
            id: EntityId::new(id),
            name: id.to_uppercase(),
            position: Position::new(x, y),
            occupier: occupier.map(EntityId::new),
            ships: Some(10),
            economy: Some(1),
            industry: Some(1),
            science: Some(1),
            resources: Some(25),
            warp_gate: Some(false),
            distance: 0.0,
        }
    }

    pub fn carrier(id: &str, owner: &str, x: f32, y: f32, queue: &[&str]) -> Carrier {
        Carrier {
            id: EntityId::new(id),
            name: format!("Carrier {}", id),
            owner: EntityId::new(owner),
            position: Position::new(x, y),
            ships: 5,
            destination_queue: queue
                .iter()
                .map(|target| Destination::new(EntityId::new(*target)))
                .collect(),
        }
    }

    pub fn player(id: &str, hyperspace: u32) -> Player {
        Player {
            id: EntityId::new(id),
            name: id.to_string(),
            color: "#3399ff".to_string(),
            cash: Some(100.0),
            research_levels: ResearchLevels {
                hyperspace,
                ..ResearchLevels::default()
            },
        }
    }

    /// Viewer `p1` with hyperspace 1 (range 4 LY) and a small cluster of stars.
    pub fn sample_scan() -> Scan {
        Scan {
            game: EntityId::new("game-1"),
            viewer: Some(EntityId::new("p1")),
            settings: GameSettings::default(),
            stars: vec![
                body("s0", 0.0, 0.0, Some("p1")),
                body("s1", 3.9, 0.0, None),
                body("s2", 4.5, 0.0, None),
                body("s3", 0.0, 3.0, Some("p2")),
            ],
            planets: vec![body("pl0", 0.0, -2.0, Some("p1"))],
            carriers: vec![
                carrier("c1", "p1", 0.0, 0.0, &[]),
                carrier("c2", "p2", 0.0, 3.0, &[]),
            ],
            players: vec![player("p1", 1), player("p2", 2)],
        }
    }
}
