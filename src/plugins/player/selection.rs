//! Spatial picking and the selection set.

use bevy::prelude::*;

use crate::geometry::distance;
use crate::plugins::render2d::Viewport;
use crate::scan::{EntityId, EntityKind, Scan};

use super::flight_plan::FlightPlan;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionEntry {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl SelectionEntry {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

/// Selected entities, unique by kind and id, in pick order.
#[derive(Resource, Debug, Default, Clone, PartialEq)]
pub struct Selection {
    entries: Vec<SelectionEntry>,
}

impl Selection {
    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.entries.iter().any(|e| e.kind == kind && &e.id == id)
    }

    pub fn first_of(&self, kind: EntityKind) -> Option<&EntityId> {
        self.entries.iter().find(|e| e.kind == kind).map(|e| &e.id)
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityId> {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| &e.id)
    }

    /// First selected star or planet.
    pub fn first_body(&self) -> Option<&SelectionEntry> {
        self.entries.iter().find(|e| e.kind.is_body())
    }

    pub fn replace(&mut self, entries: Vec<SelectionEntry>) {
        self.entries.clear();
        for entry in entries {
            self.add(entry);
        }
    }

    pub fn add(&mut self, entry: SelectionEntry) -> bool {
        if self.contains(entry.kind, &entry.id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries that are no longer in the scan. Returns how many went.
    pub fn retain_existing(&mut self, scan: &Scan) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| scan.find_by_id(e.kind, &e.id).is_some());
        before - self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Replace,
    Add,
}

/// Entities within `tolerance_px` of `screen`, nearest first.
///
/// Carriers are all kept since they stack on the same spot; stars and planets
/// keep only their nearest hit.
pub fn pick_entities(
    scan: &Scan,
    viewport: &Viewport,
    screen: Vec2,
    tolerance_px: f32,
) -> Vec<SelectionEntry> {
    let world = viewport.screen_to_world(screen);
    let mut candidates: Vec<(f32, SelectionEntry)> = [
        EntityKind::Star,
        EntityKind::Planet,
        EntityKind::Carrier,
    ]
    .into_iter()
    .flat_map(|kind| scan.entities(kind))
    .filter_map(|entity| {
        let gap = distance(entity.position(), world) * viewport.zoom();
        (gap < tolerance_px).then(|| (gap, SelectionEntry::new(entity.kind(), entity.id().clone())))
    })
    .collect();

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut picked: Vec<SelectionEntry> = Vec::new();
    for (_, entry) in candidates {
        let duplicate_kind = entry.kind != EntityKind::Carrier
            && picked.iter().any(|p| p.kind == entry.kind);
        if !duplicate_kind {
            picked.push(entry);
        }
    }
    picked
}

/// Applies a pick to the selection. Any selection click leaves flight planning.
pub fn apply_pick(
    selection: &mut Selection,
    plan: &mut FlightPlan,
    picked: Vec<SelectionEntry>,
    mode: SelectMode,
) {
    plan.end();

    if picked.is_empty() {
        debug!("Click hit nothing; selection cleared");
        selection.clear();
        return;
    }

    match mode {
        SelectMode::Replace => selection.replace(picked),
        SelectMode::Add => {
            for entry in picked {
                selection.add(entry);
            }
        }
    }
}

/// Topmost entity under the cursor, for hover labels.
#[derive(Resource, Debug, Default, Clone, PartialEq)]
pub struct Hovered {
    pub entry: Option<SelectionEntry>,
}
