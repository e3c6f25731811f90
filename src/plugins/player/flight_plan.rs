//! Flight planning: which carrier is being planned and the edits allowed on
//! its destination queue.
//!
//! The queue is edited like a stack. Waypoints are appended at the tail when
//! the jump from the previous waypoint fits in the owner's hyperspace range,
//! and only the tail can be removed. Actions can be changed on any waypoint;
//! a cursor picks which one.

use bevy::prelude::*;

use crate::geometry::distance;
use crate::scan::{Body, Carrier, Destination, DestinationAction, EntityId, Scan};

// =============================================================================
// Resources
// =============================================================================

#[derive(Resource, Debug, Default, Clone, PartialEq, Eq)]
pub struct FlightPlan {
    planning_for: Option<EntityId>,
    /// Waypoint row picked with the cursor keys. `None` follows the tail.
    cursor: Option<(EntityId, usize)>,
}

impl FlightPlan {
    pub fn planning_for(&self) -> Option<&EntityId> {
        self.planning_for.as_ref()
    }

    pub fn is_planning(&self) -> bool {
        self.planning_for.is_some()
    }

    pub fn is_planning_carrier(&self, carrier: &EntityId) -> bool {
        self.planning_for.as_ref() == Some(carrier)
    }

    /// Starts planning `carrier`, replacing any other session. Returns the
    /// carrier that was being planned before, if it differs.
    pub fn begin(&mut self, carrier: EntityId) -> Option<EntityId> {
        info!("Planning started for {}", carrier);
        self.cursor = None;
        let previous = self.planning_for.replace(carrier);
        previous.filter(|previous| Some(previous) != self.planning_for.as_ref())
    }

    pub fn end(&mut self) -> Option<EntityId> {
        self.cursor = None;
        let ended = self.planning_for.take();
        if let Some(carrier) = ended.as_ref() {
            info!("Planning ended for {}", carrier);
        }
        ended
    }

    /// Appends `target` to the planned carrier if it is in range.
    pub fn append(&self, scan: &mut Scan, target: &EntityId) -> AppendOutcome {
        let Some(carrier_id) = self.planning_for.as_ref() else {
            return AppendOutcome::NotPlanning;
        };
        append_destination(scan, carrier_id, target)
    }

    /// Waypoint the action keys apply to: the cursor row when it was moved on
    /// this carrier, else the tail. Clamped to the current queue.
    pub fn cursor_index(&self, carrier: &Carrier) -> Option<usize> {
        let last = carrier.destination_queue.len().checked_sub(1)?;
        match self.cursor.as_ref() {
            Some((id, index)) if id == &carrier.id => Some((*index).min(last)),
            _ => Some(last),
        }
    }

    /// Moves the cursor `step` rows towards the tail (negative: the head).
    pub fn move_cursor(&mut self, carrier: &Carrier, step: isize) -> Option<usize> {
        let last = carrier.destination_queue.len().checked_sub(1)?;
        let current = self.cursor_index(carrier)?;
        let next = current.saturating_add_signed(step).min(last);
        self.cursor = (next < last).then(|| (carrier.id.clone(), next));
        Some(next)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended { index: usize },
    NotPlanning,
    UnknownCarrier,
    UnknownTarget,
    OutOfRange { distance: f32, range: f32 },
}

impl AppendOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(Destination),
    Empty,
    UnknownCarrier,
}

/// Per-body flags while a carrier is being planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetFlags {
    pub outside_range: bool,
    pub is_target: bool,
    pub is_last_target: bool,
}

// =============================================================================
// Queue operations
// =============================================================================

/// Where the next jump starts: the last waypoint that still resolves, or the
/// carrier itself when the queue is empty.
pub fn range_origin(scan: &Scan, carrier: &Carrier) -> Vec2 {
    carrier
        .destination_queue
        .iter()
        .rev()
        .find_map(|d| scan.find_target(&d.target))
        .map(|body| body.position.vec())
        .unwrap_or_else(|| carrier.position.vec())
}

pub fn hyperspace_range(scan: &Scan, carrier: &Carrier) -> Option<f32> {
    scan.owner_of(carrier).map(|owner| owner.hyperspace_range())
}

/// A carrier without a known owner reaches nothing.
pub fn within_range(scan: &Scan, carrier: &Carrier, point: Vec2) -> bool {
    match hyperspace_range(scan, carrier) {
        Some(range) => distance(range_origin(scan, carrier), point) <= range,
        None => false,
    }
}

pub fn append_destination(scan: &mut Scan, carrier_id: &EntityId, target: &EntityId) -> AppendOutcome {
    let Some(carrier) = scan.carrier(carrier_id) else {
        return AppendOutcome::UnknownCarrier;
    };
    let Some(body) = scan.find_target(target) else {
        return AppendOutcome::UnknownTarget;
    };

    let Some(range) = hyperspace_range(scan, carrier) else {
        return AppendOutcome::OutOfRange {
            distance: f32::INFINITY,
            range: 0.0,
        };
    };
    let leg = distance(range_origin(scan, carrier), body.position.vec());
    if leg > range {
        debug!(
            "Waypoint {} rejected for {}: {:.2} LY > {:.2} LY",
            target, carrier_id, leg, range
        );
        return AppendOutcome::OutOfRange {
            distance: leg,
            range,
        };
    }

    let Some(carrier) = scan.carrier_mut(carrier_id) else {
        return AppendOutcome::UnknownCarrier;
    };
    carrier
        .destination_queue
        .push(Destination::new(target.clone()));
    let index = carrier.destination_queue.len() - 1;
    info!("Waypoint {} appended to {} at #{}", target, carrier_id, index);
    AppendOutcome::Appended { index }
}

pub fn remove_last_destination(scan: &mut Scan, carrier_id: &EntityId) -> RemoveOutcome {
    let Some(carrier) = scan.carrier_mut(carrier_id) else {
        return RemoveOutcome::UnknownCarrier;
    };
    match carrier.destination_queue.pop() {
        Some(removed) => {
            info!("Waypoint {} removed from {}", removed.target, carrier_id);
            RemoveOutcome::Removed(removed)
        }
        None => RemoveOutcome::Empty,
    }
}

/// Retags an existing waypoint. Range is not checked again.
pub fn set_destination_action(
    scan: &mut Scan,
    carrier_id: &EntityId,
    index: usize,
    action: DestinationAction,
) -> Result<(), String> {
    let carrier = scan
        .carrier_mut(carrier_id)
        .ok_or_else(|| format!("Unknown carrier {}", carrier_id))?;
    let destination = carrier
        .destination_queue
        .get_mut(index)
        .ok_or_else(|| format!("{} has no waypoint #{}", carrier.name, index))?;
    destination.action = action;
    Ok(())
}

pub fn target_flags(scan: &Scan, plan: &FlightPlan, body: &Body) -> TargetFlags {
    let Some(carrier) = plan.planning_for().and_then(|id| scan.carrier(id)) else {
        return TargetFlags::default();
    };

    TargetFlags {
        outside_range: !within_range(scan, carrier, body.position.vec()),
        is_target: carrier.targets(&body.id),
        is_last_target: carrier
            .last_destination()
            .map(|d| d.target == body.id)
            .unwrap_or(false),
    }
}

/// Ends planning when its carrier is gone from the scan.
pub fn retain_existing(plan: &mut FlightPlan, scan: &Scan) -> bool {
    let stale = plan
        .planning_for()
        .map(|id| scan.carrier(id).is_none())
        .unwrap_or(false);
    if stale {
        plan.end();
    }
    stale
}
