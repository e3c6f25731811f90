//! Optimistic mutations: apply locally, submit, then reconcile or roll back.
//!
//! Carrier updates are serialized per carrier. While one update is in flight
//! later edits to the same carrier are applied locally at once and queued.
//! A failure restores the last confirmed carrier and drops the queue, since
//! every queued edit was built on top of the failed one.
//!
//! Scans carry the highest ticket sent before they were requested. Anything
//! newer (open lanes, unresolved builds, carriers confirmed since) is laid
//! back over an installed scan, so an older scan never undoes local edits.

use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::prelude::*;
use std::collections::{HashMap, VecDeque};

use crate::geometry::distance;
use crate::plugins::core::EventLog;
use crate::plugins::server::{poll_server, Mutation, MutationResolved, Reply, ServerLink, Ticket};
use crate::plugins::snapshot::{install_scan, ScanReplaced, ScanStore};
use crate::scan::{Body, Carrier, Destination, EntityId, Player, Scan};

pub struct OrdersPlugin;

impl Plugin for OrdersPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<MutationLedger>()
            .add_message::<CarrierBuilt>()
            .add_systems(
                Update,
                (
                    reapply_pending_edits.after(install_scan),
                    resolve_mutations
                        .after(poll_server)
                        .after(reapply_pending_edits),
                ),
            );
    }
}

/// A build was confirmed and the new carrier is in the scan.
#[derive(Message, Debug, Clone)]
pub struct CarrierBuilt {
    pub carrier: EntityId,
}

// =============================================================================
// Transactions
// =============================================================================

/// An entity as it was before an optimistic edit.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    Carrier(Carrier),
    Body(Body),
    Player(Player),
}

impl Snapshot {
    /// Entities that have left the scan are not brought back.
    fn restore(&self, scan: &mut Scan) {
        match self {
            Snapshot::Carrier(carrier) => {
                if let Some(slot) = scan.carrier_mut(&carrier.id) {
                    *slot = carrier.clone();
                }
            }
            Snapshot::Body(body) => {
                if let Some(slot) = scan.find_target_mut(&body.id) {
                    *slot = body.clone();
                }
            }
            Snapshot::Player(player) => {
                if let Some(slot) = scan.player_mut(&player.id) {
                    *slot = player.clone();
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub ticket: Ticket,
    pub mutation: Mutation,
    pub before: Vec<Snapshot>,
}

impl Transaction {
    pub fn rollback(&self, scan: &mut Scan) {
        for snapshot in &self.before {
            snapshot.restore(scan);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CarrierEdit {
    name: Option<String>,
    destinations: Vec<Destination>,
}

impl CarrierEdit {
    fn between(before: &Carrier, after: &Carrier) -> Self {
        Self {
            name: (before.name != after.name).then(|| after.name.clone()),
            destinations: after.destination_queue.clone(),
        }
    }

    fn into_mutation(self, carrier: &EntityId) -> Mutation {
        Mutation::UpdateCarrier {
            carrier: carrier.clone(),
            name: self.name,
            destinations: Some(self.destinations),
        }
    }
}

#[derive(Debug)]
struct CarrierLane {
    in_flight: Transaction,
    queued: VecDeque<CarrierEdit>,
    /// Local optimistic state, re-applied over refreshed scans.
    latest: Carrier,
}

impl CarrierLane {
    /// The carrier the in-flight update would roll back to.
    fn baseline_mut(&mut self) -> Option<&mut Carrier> {
        self.in_flight.before.iter_mut().find_map(|snapshot| match snapshot {
            Snapshot::Carrier(carrier) => Some(carrier),
            _ => None,
        })
    }

    /// Queue the server held when a scan marked `as_of` was taken.
    fn server_queue(&self, as_of: Ticket) -> Vec<Destination> {
        if self.in_flight.ticket <= as_of {
            if let Mutation::UpdateCarrier {
                destinations: Some(destinations),
                ..
            } = &self.in_flight.mutation
            {
                return destinations.clone();
            }
        }
        self.baseline_queue()
    }

    fn baseline_queue(&self) -> Vec<Destination> {
        self.in_flight
            .before
            .iter()
            .find_map(|snapshot| match snapshot {
                Snapshot::Carrier(carrier) => Some(carrier.destination_queue.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn lay_over(&mut self, fresh: &mut Carrier, as_of: Ticket) {
        let known = self.server_queue(as_of);
        let consumed = consumed_head(&known, &fresh.destination_queue);
        drop_consumed(&mut self.latest.destination_queue, &known, consumed);
        for edit in self.queued.iter_mut() {
            drop_consumed(&mut edit.destinations, &known, consumed);
        }
        if let Some(baseline) = self.baseline_mut() {
            baseline.position = fresh.position;
            baseline.ships = fresh.ships;
            drop_consumed(&mut baseline.destination_queue, &known, consumed);
        }

        fresh.name = self.latest.name.clone();
        fresh.destination_queue = self.latest.destination_queue.clone();
    }
}

/// A carrier update the server confirmed after the newest scan was requested.
#[derive(Debug)]
struct ConfirmedCarrier {
    ticket: Ticket,
    carrier: Carrier,
    /// Queue the server held before this update.
    baseline: Vec<Destination>,
}

impl ConfirmedCarrier {
    fn lay_over(&self, fresh: &mut Carrier) {
        let consumed = consumed_head(&self.baseline, &fresh.destination_queue);
        let mut queue = self.carrier.destination_queue.clone();
        drop_consumed(&mut queue, &self.baseline, consumed);
        fresh.name = self.carrier.name.clone();
        fresh.destination_queue = queue;
    }
}

#[derive(Debug)]
struct PendingBuild {
    transaction: Transaction,
    origin: EntityId,
    viewer: EntityId,
    ships: u32,
    fee: f32,
}

impl PendingBuild {
    fn charge(&self, scan: &mut Scan) {
        if let Some(body) = scan.find_target_mut(&self.origin) {
            body.ships = Some(body.ships.unwrap_or(0).saturating_sub(self.ships));
        }
        if let Some(player) = scan.player_mut(&self.viewer) {
            player.cash = Some(player.cash.unwrap_or(0.0) - self.fee);
        }
    }

    /// Takes the rollback baseline from `scan` and charges it again unless
    /// the server had already seen the build. Returns true when charged.
    fn recharge(&mut self, scan: &mut Scan, as_of: Ticket) -> bool {
        let body = scan.find_target(&self.origin).cloned().map(Snapshot::Body);
        let player = scan.player(&self.viewer).cloned().map(Snapshot::Player);
        self.transaction.before = body.into_iter().chain(player).collect();
        if self.transaction.ticket <= as_of {
            return false;
        }
        self.charge(scan);
        true
    }
}

fn same_targets(a: &[Destination], b: &[Destination]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.target == y.target)
}

/// Head waypoints the server consumed, given the queue it held and the queue
/// it reports now. Zero when the two do not line up.
fn consumed_head(known: &[Destination], fresh: &[Destination]) -> usize {
    (0..=known.len())
        .find(|&skip| same_targets(&known[skip..], fresh))
        .unwrap_or(0)
}

fn drop_consumed(queue: &mut Vec<Destination>, known: &[Destination], count: usize) {
    if count > 0 && queue.len() >= count && same_targets(&queue[..count], &known[..count]) {
        queue.drain(..count);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    CarrierConfirmed {
        carrier: EntityId,
        next_submitted: bool,
    },
    CarrierRolledBack {
        carrier: EntityId,
        error: String,
        discarded: usize,
    },
    Built {
        carrier: EntityId,
    },
    BuildRolledBack {
        error: String,
    },
    Transferred {
        from: EntityId,
        to: EntityId,
        amount: u32,
    },
    TransferRejected {
        error: String,
    },
    Unknown,
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Resource, Debug, Default)]
pub struct MutationLedger {
    lanes: HashMap<EntityId, CarrierLane>,
    confirmed: HashMap<EntityId, ConfirmedCarrier>,
    builds: HashMap<Ticket, PendingBuild>,
    transfers: HashMap<Ticket, Mutation>,
}

impl MutationLedger {
    pub fn pending_count(&self) -> usize {
        self.lanes
            .values()
            .map(|lane| 1 + lane.queued.len())
            .sum::<usize>()
            + self.builds.len()
            + self.transfers.len()
    }

    pub fn is_pending(&self, carrier: &EntityId) -> bool {
        self.lanes.contains_key(carrier)
    }

    /// Runs `edit` on the scan and schedules an update if the carrier changed.
    pub fn edit_carrier<R>(
        &mut self,
        scan: &mut Scan,
        link: &mut ServerLink,
        carrier: &EntityId,
        edit: impl FnOnce(&mut Scan) -> R,
    ) -> R {
        let before = scan.carrier(carrier).cloned();
        let outcome = edit(scan);
        if let (Some(before), Some(after)) = (before, scan.carrier(carrier).cloned()) {
            if before != after {
                self.record_carrier_edit(before, after, link);
            }
        }
        outcome
    }

    fn record_carrier_edit(&mut self, before: Carrier, after: Carrier, link: &mut ServerLink) {
        let edit = CarrierEdit::between(&before, &after);

        if let Some(lane) = self.lanes.get_mut(&after.id) {
            lane.queued.push_back(edit);
            lane.latest = after;
            debug!(
                "Carrier {} edit queued behind #{} ({} waiting)",
                lane.latest.id,
                lane.in_flight.ticket,
                lane.queued.len()
            );
            return;
        }

        let mutation = edit.into_mutation(&after.id);
        let ticket = link.submit(mutation.clone());
        self.lanes.insert(
            after.id.clone(),
            CarrierLane {
                in_flight: Transaction {
                    ticket,
                    mutation,
                    before: vec![Snapshot::Carrier(before)],
                },
                queued: VecDeque::new(),
                latest: after,
            },
        );
    }

    /// Charges the fee and ships up front; the carrier appears on confirmation.
    pub fn begin_build(
        &mut self,
        scan: &mut Scan,
        link: &mut ServerLink,
        origin: &EntityId,
        ships: u32,
        fee: f32,
    ) -> Result<Ticket, String> {
        let viewer = scan
            .viewer()
            .cloned()
            .ok_or_else(|| "No viewing player".to_string())?;
        let body = scan
            .find_target(origin)
            .cloned()
            .ok_or_else(|| format!("Unknown origin {}", origin))?;
        if !scan.is_viewer(body.occupier.as_ref()) {
            return Err(format!("{} is not yours", body.name));
        }
        let available = body.ships.unwrap_or(0);
        if ships == 0 || available < ships {
            return Err(format!("{} has only {} ships", body.name, available));
        }
        let cash = viewer.cash.unwrap_or(0.0);
        if cash < fee {
            return Err(format!("Carrier costs ${:.0}, you have ${:.0}", fee, cash));
        }

        let before = vec![Snapshot::Body(body), Snapshot::Player(viewer.clone())];
        let mutation = Mutation::BuildCarrier {
            origin: origin.clone(),
            ships,
        };
        let ticket = link.submit(mutation.clone());
        let build = PendingBuild {
            transaction: Transaction {
                ticket,
                mutation,
                before,
            },
            origin: origin.clone(),
            viewer: viewer.id,
            ships,
            fee,
        };
        build.charge(scan);
        self.builds.insert(ticket, build);
        Ok(ticket)
    }

    /// Transfers change local state only once the server agrees.
    pub fn begin_transfer(
        &mut self,
        scan: &Scan,
        link: &mut ServerLink,
        from: &EntityId,
        to: &EntityId,
        amount: u32,
        radius: f32,
    ) -> Result<Ticket, String> {
        let (source_at, source_ships) =
            ship_holder(scan, from).ok_or_else(|| format!("Unknown source {}", from))?;
        let (sink_at, _) = ship_holder(scan, to).ok_or_else(|| format!("Unknown target {}", to))?;
        if distance(source_at, sink_at) > radius {
            return Err("Transfer needs both sides at the same place".to_string());
        }
        if amount == 0 || source_ships < amount {
            return Err(format!("Only {} ships available", source_ships));
        }

        let mutation = Mutation::TransferShips {
            from: from.clone(),
            to: to.clone(),
            amount,
        };
        let ticket = link.submit(mutation.clone());
        self.transfers.insert(ticket, mutation);
        Ok(ticket)
    }

    pub fn resolve(
        &mut self,
        scan: &mut Scan,
        link: &mut ServerLink,
        ticket: Ticket,
        result: Result<Reply, String>,
    ) -> Resolution {
        if let Some(carrier) = self.lane_for(ticket) {
            return self.resolve_carrier(scan, link, carrier, result);
        }
        if let Some(PendingBuild { transaction, .. }) = self.builds.remove(&ticket) {
            return match result {
                Ok(Reply::Carrier(built)) => {
                    let id = built.id.clone();
                    if scan.carrier(&id).is_none() {
                        scan.carriers.push(built);
                    }
                    Resolution::Built { carrier: id }
                }
                Ok(other) => {
                    transaction.rollback(scan);
                    Resolution::BuildRolledBack {
                        error: format!("Unexpected reply {:?}", other),
                    }
                }
                Err(error) => {
                    transaction.rollback(scan);
                    Resolution::BuildRolledBack { error }
                }
            };
        }
        if let Some(mutation) = self.transfers.remove(&ticket) {
            let Mutation::TransferShips { from, to, amount } = mutation else {
                return Resolution::Unknown;
            };
            return match result {
                Ok(Reply::Transfer { success: true }) => {
                    adjust_ships(scan, &from, -(amount as i64));
                    adjust_ships(scan, &to, amount as i64);
                    Resolution::Transferred { from, to, amount }
                }
                Ok(_) => Resolution::TransferRejected {
                    error: "Server refused the transfer".to_string(),
                },
                Err(error) => Resolution::TransferRejected { error },
            };
        }
        Resolution::Unknown
    }

    fn lane_for(&self, ticket: Ticket) -> Option<EntityId> {
        self.lanes
            .iter()
            .find(|(_, lane)| lane.in_flight.ticket == ticket)
            .map(|(id, _)| id.clone())
    }

    fn resolve_carrier(
        &mut self,
        scan: &mut Scan,
        link: &mut ServerLink,
        carrier: EntityId,
        result: Result<Reply, String>,
    ) -> Resolution {
        let Some(mut lane) = self.lanes.remove(&carrier) else {
            return Resolution::Unknown;
        };

        let confirmed = match result {
            Ok(Reply::Carrier(confirmed)) => confirmed,
            Ok(other) => return rollback_lane(scan, carrier, lane, format!("Unexpected reply {:?}", other)),
            Err(error) => return rollback_lane(scan, carrier, lane, error),
        };
        let baseline = lane.baseline_queue();
        self.confirmed.insert(
            carrier.clone(),
            ConfirmedCarrier {
                ticket: lane.in_flight.ticket,
                carrier: confirmed.clone(),
                baseline,
            },
        );

        match lane.queued.pop_front() {
            None => {
                if let Some(slot) = scan.carrier_mut(&carrier) {
                    *slot = confirmed;
                }
                Resolution::CarrierConfirmed {
                    carrier,
                    next_submitted: false,
                }
            }
            Some(next) => {
                let mutation = next.into_mutation(&carrier);
                let ticket = link.submit(mutation.clone());
                lane.in_flight = Transaction {
                    ticket,
                    mutation,
                    before: vec![Snapshot::Carrier(confirmed)],
                };
                self.lanes.insert(carrier.clone(), lane);
                Resolution::CarrierConfirmed {
                    carrier,
                    next_submitted: true,
                }
            }
        }
    }

    /// Lays local state the scan does not reflect yet over a freshly
    /// installed scan requested after ticket `as_of`.
    pub fn reapply_pending(&mut self, scan: &mut Scan, as_of: Ticket) -> usize {
        self.confirmed.retain(|_, confirmed| confirmed.ticket > as_of);

        let mut applied = 0;
        for (id, confirmed) in &self.confirmed {
            if self.lanes.contains_key(id) {
                continue;
            }
            if let Some(carrier) = scan.carrier_mut(id) {
                confirmed.lay_over(carrier);
                applied += 1;
            }
        }
        for (id, lane) in self.lanes.iter_mut() {
            if let Some(carrier) = scan.carrier_mut(id) {
                lane.lay_over(carrier, as_of);
                applied += 1;
            }
        }
        for build in self.builds.values_mut() {
            if build.recharge(scan, as_of) {
                applied += 1;
            }
        }
        applied
    }
}

fn rollback_lane(scan: &mut Scan, carrier: EntityId, lane: CarrierLane, error: String) -> Resolution {
    lane.in_flight.rollback(scan);
    Resolution::CarrierRolledBack {
        carrier,
        error,
        discarded: lane.queued.len(),
    }
}

fn ship_holder(scan: &Scan, id: &EntityId) -> Option<(Vec2, u32)> {
    if let Some(carrier) = scan.carrier(id) {
        return Some((carrier.position.vec(), carrier.ships));
    }
    scan.find_target(id)
        .map(|body| (body.position.vec(), body.ships.unwrap_or(0)))
}

fn adjust_ships(scan: &mut Scan, id: &EntityId, delta: i64) {
    let apply = |ships: u32| (ships as i64 + delta).max(0) as u32;
    if let Some(carrier) = scan.carrier_mut(id) {
        carrier.ships = apply(carrier.ships);
    } else if let Some(body) = scan.find_target_mut(id) {
        body.ships = Some(apply(body.ships.unwrap_or(0)));
    }
}

// =============================================================================
// Systems
// =============================================================================

fn resolve_mutations(
    mut resolved: MessageReader<MutationResolved>,
    mut ledger: ResMut<MutationLedger>,
    mut store: ResMut<ScanStore>,
    mut link: ResMut<ServerLink>,
    mut log: ResMut<EventLog>,
    mut built: MessageWriter<CarrierBuilt>,
) {
    for message in resolved.read() {
        let Some(scan) = store.scan_mut() else {
            warn!("Mutation #{} resolved before any scan", message.ticket);
            continue;
        };

        match ledger.resolve(scan, &mut link, message.ticket, message.result.clone()) {
            Resolution::CarrierConfirmed {
                carrier,
                next_submitted,
            } => {
                info!(
                    "Carrier {} update #{} confirmed{}",
                    carrier,
                    message.ticket,
                    if next_submitted { ", next edit sent" } else { "" }
                );
            }
            Resolution::CarrierRolledBack {
                carrier,
                error,
                discarded,
            } => {
                warn!(
                    "Carrier {} rolled back ({} queued edits dropped): {}",
                    carrier, discarded, error
                );
                log.push(format!("Flight plan reverted: {}", error));
            }
            Resolution::Built { carrier } => {
                info!("Carrier {} built", carrier);
                log.push(format!("Carrier {} launched", carrier));
                built.write(CarrierBuilt { carrier });
            }
            Resolution::BuildRolledBack { error } => {
                warn!("Carrier build rolled back: {}", error);
                log.push(format!("Build failed: {}", error));
            }
            Resolution::Transferred { from, to, amount } => {
                info!("Transferred {} ships {} -> {}", amount, from, to);
                log.push(format!("Moved {} ships", amount));
            }
            Resolution::TransferRejected { error } => {
                warn!("Transfer rejected: {}", error);
                log.push(format!("Transfer failed: {}", error));
            }
            Resolution::Unknown => {
                debug!("Ignoring reply for unknown ticket #{}", message.ticket);
            }
        }
    }
}

fn reapply_pending_edits(
    mut replaced: MessageReader<ScanReplaced>,
    mut ledger: ResMut<MutationLedger>,
    mut store: ResMut<ScanStore>,
) {
    let Some(as_of) = replaced.read().last().map(|message| message.as_of) else {
        return;
    };

    if let Some(scan) = store.scan_mut() {
        let applied = ledger.reapply_pending(scan, as_of);
        if applied > 0 {
            info!("Re-applied {} pending edits over scan as of #{}", applied, as_of);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::player::flight_plan::{append_destination, remove_last_destination};
    use crate::plugins::core::GameState;
    use crate::plugins::server::{GameServer, LocalServer, ScanFetched, ServerEvent};
    use crate::scan::fixtures::sample_scan;

    fn id(value: &str) -> EntityId {
        EntityId::new(value)
    }

    fn link_with(server: LocalServer) -> ServerLink {
        let game = server.game().clone();
        ServerLink::new(game, server)
    }

    fn pump(ledger: &mut MutationLedger, scan: &mut Scan, link: &mut ServerLink) -> Vec<Resolution> {
        let mut resolutions = Vec::new();
        for event in link.poll() {
            if let ServerEvent::Mutation { ticket, result } = event {
                resolutions.push(ledger.resolve(scan, link, ticket, result));
            }
        }
        resolutions
    }

    fn queue(scan: &Scan, carrier: &str) -> Vec<String> {
        scan.carrier(&id(carrier))
            .map(|c| c.destination_queue.iter().map(|d| d.target.to_string()).collect())
            .unwrap_or_default()
    }

    fn append(ledger: &mut MutationLedger, scan: &mut Scan, link: &mut ServerLink, target: &str) {
        let outcome = ledger.edit_carrier(scan, link, &id("c1"), |scan| {
            append_destination(scan, &id("c1"), &id(target))
        });
        assert!(outcome.is_appended(), "append {} failed: {:?}", target, outcome);
    }

    #[test]
    fn failed_update_restores_exact_queue() {
        let mut server = LocalServer::new(sample_scan());
        server.fail_next_mutations(1);
        let mut link = link_with(server);
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();
        scan.carriers[0].destination_queue = vec![Destination::new(id("s0"))];
        let before = scan.carrier(&id("c1")).cloned();

        append(&mut ledger, &mut scan, &mut link, "s1");
        assert_eq!(queue(&scan, "c1"), vec!["s0", "s1"]);

        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        assert!(matches!(
            resolutions.as_slice(),
            [Resolution::CarrierRolledBack { discarded: 0, .. }]
        ));
        assert_eq!(scan.carrier(&id("c1")).cloned(), before);
        assert!(!ledger.is_pending(&id("c1")));
    }

    #[test]
    fn edits_to_one_carrier_are_serialized() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        append(&mut ledger, &mut scan, &mut link, "s1");
        append(&mut ledger, &mut scan, &mut link, "s2");
        assert_eq!(ledger.pending_count(), 2);

        let first = pump(&mut ledger, &mut scan, &mut link);
        assert_eq!(
            first,
            vec![Resolution::CarrierConfirmed {
                carrier: id("c1"),
                next_submitted: true,
            }]
        );
        // Local state keeps the queued edit while it is in flight.
        assert_eq!(queue(&scan, "c1"), vec!["s1", "s2"]);

        let second = pump(&mut ledger, &mut scan, &mut link);
        assert_eq!(
            second,
            vec![Resolution::CarrierConfirmed {
                carrier: id("c1"),
                next_submitted: false,
            }]
        );
        assert_eq!(queue(&scan, "c1"), vec!["s1", "s2"]);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn failure_drops_queued_edits_and_restores_baseline() {
        let mut server = LocalServer::new(sample_scan());
        server.fail_next_mutations(1);
        let mut link = link_with(server);
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        append(&mut ledger, &mut scan, &mut link, "s1");
        append(&mut ledger, &mut scan, &mut link, "s2");

        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        assert!(matches!(
            resolutions.as_slice(),
            [Resolution::CarrierRolledBack { discarded: 1, .. }]
        ));
        assert!(queue(&scan, "c1").is_empty());
        assert!(pump(&mut ledger, &mut scan, &mut link).is_empty());
    }

    #[test]
    fn second_edit_failure_restores_first_confirmed_state() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        append(&mut ledger, &mut scan, &mut link, "s1");
        append(&mut ledger, &mut scan, &mut link, "s2");
        pump(&mut ledger, &mut scan, &mut link);

        // The second update targets a star the server no longer knows.
        let resolution = ledger.resolve(
            &mut scan,
            &mut link,
            2,
            Err("Waypoint 1 targets unknown s2".to_string()),
        );
        assert!(matches!(resolution, Resolution::CarrierRolledBack { .. }));
        assert_eq!(queue(&scan, "c1"), vec!["s1"]);
    }

    #[test]
    fn unchanged_edit_submits_nothing() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        ledger.edit_carrier(&mut scan, &mut link, &id("c1"), |scan| {
            remove_last_destination(scan, &id("c1"))
        });
        assert_eq!(ledger.pending_count(), 0);
        assert!(link.poll().is_empty());
    }

    #[test]
    fn pending_edits_survive_scan_refresh() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();
        append(&mut ledger, &mut scan, &mut link, "s1");

        let mut fresh = sample_scan();
        assert_eq!(ledger.reapply_pending(&mut fresh, 0), 1);
        assert_eq!(queue(&fresh, "c1"), vec!["s1"]);
    }

    fn fetched(link: &mut ServerLink) -> (Scan, Vec<(Ticket, Result<Reply, String>)>) {
        let mut scan = None;
        let mut replies = Vec::new();
        for event in link.poll() {
            match event {
                ServerEvent::Scan(result) => scan = result.ok(),
                ServerEvent::Mutation { ticket, result } => replies.push((ticket, result)),
            }
        }
        (scan.expect("scan answered"), replies)
    }

    #[test]
    fn confirmed_edit_survives_an_older_scan() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        assert!(link.fetch_scan());
        let as_of = link.fetch_mark();
        append(&mut ledger, &mut scan, &mut link, "s1");
        let (mut older, replies) = fetched(&mut link);
        for (ticket, result) in replies {
            ledger.resolve(&mut scan, &mut link, ticket, result);
        }
        assert!(!ledger.is_pending(&id("c1")));
        assert!(queue(&older, "c1").is_empty());

        assert_eq!(ledger.reapply_pending(&mut older, as_of), 1);
        assert_eq!(queue(&older, "c1"), vec!["s1"]);

        // A scan requested after the confirmation retires it.
        assert!(link.fetch_scan());
        let as_of = link.fetch_mark();
        let (mut newer, _) = fetched(&mut link);
        assert_eq!(ledger.reapply_pending(&mut newer, as_of), 0);
        assert_eq!(queue(&newer, "c1"), vec!["s1"]);
        assert!(ledger.confirmed.is_empty());
    }

    #[test]
    fn unresolved_build_stays_charged_across_refreshes() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        assert!(link.fetch_scan());
        let ticket = ledger
            .begin_build(&mut scan, &mut link, &id("s0"), 1, 25.0)
            .expect("build accepted locally");
        let (mut older, replies) = fetched(&mut link);
        assert_eq!(ledger.reapply_pending(&mut older, 0), 1);
        assert_eq!(older.star(&id("s0")).and_then(|s| s.ships), Some(9));
        assert_eq!(older.viewer().and_then(|p| p.cash), Some(75.0));

        // The server had already built it when this scan was taken.
        assert!(link.fetch_scan());
        let (mut newer, _) = fetched(&mut link);
        assert_eq!(ledger.reapply_pending(&mut newer, ticket), 0);
        assert_eq!(newer.star(&id("s0")).and_then(|s| s.ships), Some(9));
        assert_eq!(newer.viewer().and_then(|p| p.cash), Some(75.0));

        let carriers = newer.carriers.len();
        for (ticket, result) in replies {
            let resolution = ledger.resolve(&mut newer, &mut link, ticket, result);
            assert!(matches!(resolution, Resolution::Built { .. }));
        }
        assert_eq!(newer.carriers.len(), carriers);
    }

    #[test]
    fn failed_build_after_refresh_restores_refreshed_values() {
        let mut server = LocalServer::new(sample_scan());
        server.fail_next_mutations(1);
        let mut link = link_with(server);
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        ledger
            .begin_build(&mut scan, &mut link, &id("s0"), 1, 25.0)
            .expect("build accepted locally");
        let mut fresh = sample_scan();
        if let Some(star) = fresh.find_target_mut(&id("s0")) {
            star.ships = Some(12);
        }
        ledger.reapply_pending(&mut fresh, 0);
        assert_eq!(fresh.star(&id("s0")).and_then(|s| s.ships), Some(11));

        let resolutions = pump(&mut ledger, &mut fresh, &mut link);
        assert!(matches!(resolutions.as_slice(), [Resolution::BuildRolledBack { .. }]));
        assert_eq!(fresh.star(&id("s0")).and_then(|s| s.ships), Some(12));
        assert_eq!(fresh.viewer().and_then(|p| p.cash), Some(100.0));
    }

    #[test]
    fn consumed_head_matches_the_reported_suffix() {
        let route = |targets: &[&str]| -> Vec<Destination> {
            targets.iter().map(|t| Destination::new(id(t))).collect()
        };
        assert_eq!(consumed_head(&route(&["s1", "s0"]), &route(&["s1", "s0"])), 0);
        assert_eq!(consumed_head(&route(&["s1", "s0"]), &route(&["s0"])), 1);
        assert_eq!(consumed_head(&route(&["s1"]), &route(&[])), 1);
        assert_eq!(consumed_head(&route(&["s1"]), &route(&["s2"])), 0);
    }

    #[test]
    fn consumed_waypoints_are_not_restored() {
        let mut world = sample_scan();
        world.carriers[0].destination_queue = vec![Destination::new(id("s1"))];
        let mut link = link_with(LocalServer::new(world.clone()));
        let mut ledger = MutationLedger::default();
        let mut scan = world.clone();

        append(&mut ledger, &mut scan, &mut link, "s0");
        append(&mut ledger, &mut scan, &mut link, "s1");
        assert_eq!(queue(&scan, "c1"), vec!["s1", "s0", "s1"]);

        // The carrier reached s1 before the server saw either edit.
        let mut fresh = world;
        fresh.carriers[0].destination_queue.clear();
        assert_eq!(ledger.reapply_pending(&mut fresh, 0), 1);
        assert_eq!(queue(&fresh, "c1"), vec!["s0", "s1"]);

        // The queued edit goes out without the consumed waypoint too.
        pump(&mut ledger, &mut fresh, &mut link);
        pump(&mut ledger, &mut fresh, &mut link);
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(queue(&fresh, "c1"), vec!["s0", "s1"]);
    }

    /// Answers mutations at once and holds scans back for one poll.
    struct LaggingScans {
        inner: LocalServer,
        held: Vec<ServerEvent>,
    }

    impl GameServer for LaggingScans {
        fn fetch_scan(&mut self, game: &EntityId) {
            self.inner.fetch_scan(game);
        }

        fn submit(&mut self, ticket: Ticket, mutation: Mutation) {
            self.inner.submit(ticket, mutation);
        }

        fn poll(&mut self) -> Vec<ServerEvent> {
            let mut ready = std::mem::take(&mut self.held);
            for event in self.inner.poll() {
                match event {
                    ServerEvent::Scan(_) => self.held.push(event),
                    other => ready.push(other),
                }
            }
            ready
        }
    }

    fn pipeline_app(server: impl GameServer) -> App {
        let mut app = App::new();
        let mut store = ScanStore::default();
        store.replace(sample_scan());
        app.add_message::<ScanFetched>()
            .add_message::<MutationResolved>()
            .add_message::<ScanReplaced>()
            .insert_resource(ServerLink::new(id("game-1"), server))
            .insert_resource(store)
            .init_resource::<EventLog>()
            .insert_resource(State::new(GameState::InGame))
            .init_resource::<NextState<GameState>>()
            .add_plugins(OrdersPlugin)
            .add_systems(Update, (poll_server, install_scan.after(poll_server)));
        app
    }

    fn append_in(app: &mut App, target: &str) {
        let world = app.world_mut();
        let mut ledger = world.remove_resource::<MutationLedger>().expect("ledger");
        let mut link = world.remove_resource::<ServerLink>().expect("link");
        if let Some(scan) = world.resource_mut::<ScanStore>().scan_mut() {
            append(&mut ledger, scan, &mut link, target);
        }
        world.insert_resource(link);
        world.insert_resource(ledger);
    }

    fn store_queue(app: &App) -> Vec<String> {
        app.world()
            .resource::<ScanStore>()
            .scan()
            .map(|scan| queue(scan, "c1"))
            .unwrap_or_default()
    }

    #[test]
    fn scan_and_confirmation_in_one_frame_keep_the_waypoint() {
        let mut app = pipeline_app(LocalServer::new(sample_scan()));
        app.world_mut().resource_mut::<ServerLink>().fetch_scan();
        append_in(&mut app, "s1");

        app.update();

        assert_eq!(app.world().resource::<ScanStore>().generation(), 2);
        assert_eq!(store_queue(&app), vec!["s1"]);
        assert_eq!(app.world().resource::<MutationLedger>().pending_count(), 0);
    }

    #[test]
    fn scan_arriving_after_confirmation_keeps_the_waypoint() {
        let mut app = pipeline_app(LaggingScans {
            inner: LocalServer::new(sample_scan()),
            held: Vec::new(),
        });
        app.world_mut().resource_mut::<ServerLink>().fetch_scan();
        append_in(&mut app, "s1");

        app.update();
        assert_eq!(app.world().resource::<ScanStore>().generation(), 1);
        assert_eq!(store_queue(&app), vec!["s1"]);

        app.update();
        assert_eq!(app.world().resource::<ScanStore>().generation(), 2);
        assert_eq!(store_queue(&app), vec!["s1"]);

        app.world_mut().resource_mut::<ServerLink>().fetch_scan();
        app.update();
        app.update();
        assert_eq!(app.world().resource::<ScanStore>().generation(), 3);
        assert_eq!(store_queue(&app), vec!["s1"]);
        assert!(app.world().resource::<MutationLedger>().confirmed.is_empty());
    }

    #[test]
    fn build_is_optimistic_and_rolls_back() {
        let mut server = LocalServer::new(sample_scan());
        server.fail_next_mutations(1);
        let mut link = link_with(server);
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        ledger
            .begin_build(&mut scan, &mut link, &id("s0"), 1, 25.0)
            .expect("build accepted locally");
        assert_eq!(scan.star(&id("s0")).and_then(|s| s.ships), Some(9));
        assert_eq!(scan.viewer().and_then(|p| p.cash), Some(75.0));

        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        assert!(matches!(resolutions.as_slice(), [Resolution::BuildRolledBack { .. }]));
        assert_eq!(scan.star(&id("s0")).and_then(|s| s.ships), Some(10));
        assert_eq!(scan.viewer().and_then(|p| p.cash), Some(100.0));
    }

    #[test]
    fn confirmed_build_inserts_carrier() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        ledger
            .begin_build(&mut scan, &mut link, &id("s0"), 1, 25.0)
            .expect("build accepted locally");
        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        let [Resolution::Built { carrier }] = resolutions.as_slice() else {
            panic!("unexpected {:?}", resolutions);
        };
        assert!(scan.carrier(carrier).is_some());
        assert_eq!(scan.carriers.len(), 3);
    }

    #[test]
    fn build_checks_ownership_and_cash_locally() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        assert!(ledger
            .begin_build(&mut scan, &mut link, &id("s3"), 1, 25.0)
            .is_err());
        assert!(ledger
            .begin_build(&mut scan, &mut link, &id("s0"), 1, 500.0)
            .is_err());
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn transfer_applies_only_after_success() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();

        ledger
            .begin_transfer(&scan, &mut link, &id("s0"), &id("c1"), 2, 0.1)
            .expect("co-located transfer");
        assert_eq!(scan.carrier(&id("c1")).map(|c| c.ships), Some(5));

        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        assert!(matches!(resolutions.as_slice(), [Resolution::Transferred { amount: 2, .. }]));
        assert_eq!(scan.carrier(&id("c1")).map(|c| c.ships), Some(7));
        assert_eq!(scan.star(&id("s0")).and_then(|s| s.ships), Some(8));
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut server = LocalServer::new(sample_scan());
        server.fail_next_mutations(1);
        let mut link = link_with(server);
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();
        let before = scan.clone();

        ledger
            .begin_transfer(&scan, &mut link, &id("c1"), &id("s0"), 1, 0.1)
            .expect("co-located transfer");
        let resolutions = pump(&mut ledger, &mut scan, &mut link);
        assert!(matches!(resolutions.as_slice(), [Resolution::TransferRejected { .. }]));
        assert_eq!(scan, before);
    }

    #[test]
    fn transfer_requires_colocation_locally() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let scan = sample_scan();
        let result = ledger.begin_transfer(&scan, &mut link, &id("s1"), &id("c1"), 1, 0.1);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_ticket_is_ignored() {
        let mut link = link_with(LocalServer::new(sample_scan()));
        let mut ledger = MutationLedger::default();
        let mut scan = sample_scan();
        let resolution = ledger.resolve(&mut scan, &mut link, 99, Err("late".to_string()));
        assert_eq!(resolution, Resolution::Unknown);
    }
}
