//! Transport seam between the map and the game server.
//!
//! Requests never block: `fetch_scan` and `submit` enqueue work and answers
//! are collected by `poll` once per frame. `LocalServer` keeps an
//! authoritative scan in-process and validates requests the way the hosted
//! server does.

use bevy::ecs::message::MessageWriter;
use bevy::prelude::*;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::geometry::distance;
use crate::plugins::core::MapConfig;
use crate::scan::{Body, Carrier, Destination, EntityId, Scan};

pub type Ticket = u64;

const DEMO_SCAN: &str = include_str!("../../assets/scans/demo.ron");

// =============================================================================
// Wire types
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Always carries the full resulting destination list, never a diff.
    UpdateCarrier {
        carrier: EntityId,
        name: Option<String>,
        destinations: Option<Vec<Destination>>,
    },
    BuildCarrier {
        origin: EntityId,
        ships: u32,
    },
    TransferShips {
        from: EntityId,
        to: EntityId,
        amount: u32,
    },
}

impl Mutation {
    pub fn describe(&self) -> String {
        match self {
            Mutation::UpdateCarrier {
                carrier,
                destinations,
                ..
            } => format!(
                "update {} ({} waypoints)",
                carrier,
                destinations.as_ref().map(Vec::len).unwrap_or(0)
            ),
            Mutation::BuildCarrier { origin, ships } => {
                format!("build carrier at {} with {} ships", origin, ships)
            }
            Mutation::TransferShips { from, to, amount } => {
                format!("transfer {} ships {} -> {}", amount, from, to)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Carrier(Carrier),
    Transfer { success: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    Scan(Result<Scan, String>),
    Mutation {
        ticket: Ticket,
        result: Result<Reply, String>,
    },
}

pub trait GameServer: Send + Sync + 'static {
    fn fetch_scan(&mut self, game: &EntityId);
    fn submit(&mut self, ticket: Ticket, mutation: Mutation);
    fn poll(&mut self) -> Vec<ServerEvent>;
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Message, Debug, Clone)]
pub struct ScanFetched {
    pub result: Result<Scan, String>,
    /// Highest ticket submitted before the scan was requested.
    pub as_of: Ticket,
}

#[derive(Message, Debug, Clone)]
pub struct MutationResolved {
    pub ticket: Ticket,
    pub result: Result<Reply, String>,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Resource)]
pub struct ServerLink {
    server: Box<dyn GameServer>,
    game: EntityId,
    next_ticket: Ticket,
    fetch_pending: bool,
    fetch_mark: Ticket,
}

impl ServerLink {
    pub fn new(game: EntityId, server: impl GameServer) -> Self {
        Self {
            server: Box::new(server),
            game,
            next_ticket: 1,
            fetch_pending: false,
            fetch_mark: 0,
        }
    }

    pub fn game(&self) -> &EntityId {
        &self.game
    }

    pub fn fetch_pending(&self) -> bool {
        self.fetch_pending
    }

    /// Mutations up to this ticket were sent before the latest scan request,
    /// so the server answers that request with them applied.
    pub fn fetch_mark(&self) -> Ticket {
        self.fetch_mark
    }

    /// Requests a scan unless one is already on its way.
    pub fn fetch_scan(&mut self) -> bool {
        if self.fetch_pending {
            return false;
        }
        self.fetch_pending = true;
        self.fetch_mark = self.next_ticket - 1;
        self.server.fetch_scan(&self.game);
        true
    }

    pub fn submit(&mut self, mutation: Mutation) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        info!("Submitting #{}: {}", ticket, mutation.describe());
        self.server.submit(ticket, mutation);
        ticket
    }

    pub fn poll(&mut self) -> Vec<ServerEvent> {
        let events = self.server.poll();
        if events.iter().any(|e| matches!(e, ServerEvent::Scan(_))) {
            self.fetch_pending = false;
        }
        events
    }
}

// =============================================================================
// Local server
// =============================================================================

pub struct LocalServer {
    world: Scan,
    outbox: VecDeque<ServerEvent>,
    carrier_build_fee: f32,
    proximity_radius: f32,
    next_carrier: u32,
    failing_mutations: u32,
}

impl LocalServer {
    pub fn new(world: Scan) -> Self {
        let defaults = MapConfig::default();
        Self {
            world,
            outbox: VecDeque::new(),
            carrier_build_fee: defaults.carrier_build_fee,
            proximity_radius: defaults.proximity_radius,
            next_carrier: 1,
            failing_mutations: 0,
        }
    }

    pub fn from_ron_str(source: &str) -> Result<Self, String> {
        ron::de::from_str::<Scan>(source)
            .map(Self::new)
            .map_err(|error| format!("RON parse error: {}", error))
    }

    pub fn with_rules(mut self, config: &MapConfig) -> Self {
        self.carrier_build_fee = config.carrier_build_fee;
        self.proximity_radius = config.proximity_radius;
        self
    }

    pub fn game(&self) -> &EntityId {
        &self.world.game
    }

    pub fn world(&self) -> &Scan {
        &self.world
    }

    /// The next `count` mutations fail as if the network dropped them.
    pub fn fail_next_mutations(&mut self, count: u32) {
        self.failing_mutations = count;
    }

    /// Copy of the world as the viewer is allowed to see it.
    pub fn view_for_viewer(&self) -> Scan {
        let mut view = self.world.clone();
        let Some(viewer) = self.world.viewer().cloned() else {
            return view;
        };

        let range = viewer.scan_range();
        let mut sources: Vec<Vec2> = self
            .world
            .stars
            .iter()
            .chain(self.world.planets.iter())
            .filter(|b| b.occupier.as_ref() == Some(&viewer.id))
            .map(|b| b.position.vec())
            .collect();
        sources.extend(
            self.world
                .carriers
                .iter()
                .filter(|c| c.owner == viewer.id)
                .map(|c| c.position.vec()),
        );
        let scanned = |point: Vec2| sources.iter().any(|s| distance(*s, point) <= range);

        for body in view.stars.iter_mut().chain(view.planets.iter_mut()) {
            if body.occupier.as_ref() == Some(&viewer.id) || scanned(body.position.vec()) {
                continue;
            }
            body.ships = None;
            body.economy = None;
            body.industry = None;
            body.science = None;
            body.resources = None;
            body.warp_gate = None;
        }
        view.carriers
            .retain(|c| c.owner == viewer.id || scanned(c.position.vec()));
        for player in view.players.iter_mut() {
            if player.id != viewer.id {
                player.cash = None;
            }
        }
        view
    }

    fn viewer_id(&self) -> Result<EntityId, String> {
        self.world
            .viewer
            .clone()
            .ok_or_else(|| "No viewer for this game".to_string())
    }

    fn apply(&mut self, mutation: Mutation) -> Result<Reply, String> {
        match mutation {
            Mutation::UpdateCarrier {
                carrier,
                name,
                destinations,
            } => self.update_carrier(&carrier, name, destinations),
            Mutation::BuildCarrier { origin, ships } => self.build_carrier(&origin, ships),
            Mutation::TransferShips { from, to, amount } => {
                let success = self.transfer_ships(&from, &to, amount);
                Ok(Reply::Transfer { success })
            }
        }
    }

    fn update_carrier(
        &mut self,
        id: &EntityId,
        name: Option<String>,
        destinations: Option<Vec<Destination>>,
    ) -> Result<Reply, String> {
        let viewer = self.viewer_id()?;
        let carrier = self
            .world
            .carrier(id)
            .ok_or_else(|| format!("Unknown carrier {}", id))?;
        if carrier.owner != viewer {
            return Err(format!("Carrier {} is not yours", id));
        }
        if let Some(destinations) = destinations.as_ref() {
            validate_route(&self.world, carrier, destinations)?;
        }

        let carrier = self
            .world
            .carrier_mut(id)
            .ok_or_else(|| format!("Unknown carrier {}", id))?;
        if let Some(name) = name {
            carrier.name = name;
        }
        if let Some(destinations) = destinations {
            carrier.destination_queue = destinations;
        }
        Ok(Reply::Carrier(carrier.clone()))
    }

    fn build_carrier(&mut self, origin: &EntityId, ships: u32) -> Result<Reply, String> {
        let viewer = self.viewer_id()?;
        let fee = self.carrier_build_fee;
        let body = self
            .world
            .find_target(origin)
            .ok_or_else(|| format!("Unknown origin {}", origin))?;
        if body.occupier.as_ref() != Some(&viewer) {
            return Err(format!("{} is not yours", body.name));
        }
        let available = body.ships.unwrap_or(0);
        if ships == 0 || available < ships {
            return Err(format!(
                "{} has {} ships, {} needed",
                body.name, available, ships
            ));
        }
        let position = body.position;
        let cash = self.world.player(&viewer).and_then(|p| p.cash).unwrap_or(0.0);
        if cash < fee {
            return Err(format!("Not enough cash: {:.0} < {:.0}", cash, fee));
        }

        if let Some(body) = self.world.find_target_mut(origin) {
            body.ships = Some(available - ships);
        }
        if let Some(player) = self.world.player_mut(&viewer) {
            player.cash = Some(cash - fee);
        }

        let carrier = Carrier {
            id: self.fresh_carrier_id(),
            name: format!("Carrier {}", self.next_carrier),
            owner: viewer,
            position,
            ships,
            destination_queue: Vec::new(),
        };
        self.next_carrier += 1;
        self.world.carriers.push(carrier.clone());
        Ok(Reply::Carrier(carrier))
    }

    fn fresh_carrier_id(&self) -> EntityId {
        let mut index = self.next_carrier;
        loop {
            let id = EntityId::new(format!("carrier-{}", index));
            if self.world.carrier(&id).is_none() {
                return id;
            }
            index += 1;
        }
    }

    fn transfer_ships(&mut self, from: &EntityId, to: &EntityId, amount: u32) -> bool {
        let Ok(viewer) = self.viewer_id() else {
            return false;
        };
        let (Some(source), Some(sink)) = (self.holder(from), self.holder(to)) else {
            return false;
        };
        if amount == 0
            || source.owner.as_ref() != Some(&viewer)
            || sink.owner.as_ref() != Some(&viewer)
            || source.ships < amount
            || distance(source.position, sink.position) > self.proximity_radius
        {
            return false;
        }

        self.set_ships(from, source.ships - amount);
        self.set_ships(to, sink.ships + amount);
        true
    }

    fn holder(&self, id: &EntityId) -> Option<Holder> {
        if let Some(carrier) = self.world.carrier(id) {
            return Some(Holder {
                position: carrier.position.vec(),
                owner: Some(carrier.owner.clone()),
                ships: carrier.ships,
            });
        }
        self.world.find_target(id).map(|body| Holder {
            position: body.position.vec(),
            owner: body.occupier.clone(),
            ships: body.ships.unwrap_or(0),
        })
    }

    fn set_ships(&mut self, id: &EntityId, ships: u32) {
        if let Some(carrier) = self.world.carrier_mut(id) {
            carrier.ships = ships;
        } else if let Some(body) = self.world.find_target_mut(id) {
            body.ships = Some(ships);
        }
    }
}

struct Holder {
    position: Vec2,
    owner: Option<EntityId>,
    ships: u32,
}

/// Every leg, starting at the carrier, must fit in the owner's hyperspace range.
pub fn validate_route(
    scan: &Scan,
    carrier: &Carrier,
    destinations: &[Destination],
) -> Result<(), String> {
    let owner = scan
        .owner_of(carrier)
        .ok_or_else(|| format!("Carrier {} has no owner", carrier.id))?;
    let range = owner.hyperspace_range();
    let mut origin = carrier.position.vec();

    for (index, destination) in destinations.iter().enumerate() {
        let body: &Body = scan
            .find_target(&destination.target)
            .ok_or_else(|| format!("Waypoint {} targets unknown {}", index, destination.target))?;
        let leg = distance(origin, body.position.vec());
        if leg > range {
            return Err(format!(
                "Waypoint {} is {:.2} LY away, range {:.2}",
                index, leg, range
            ));
        }
        origin = body.position.vec();
    }
    Ok(())
}

impl GameServer for LocalServer {
    fn fetch_scan(&mut self, game: &EntityId) {
        let result = if game != &self.world.game {
            Err(format!("Unknown game {}", game))
        } else {
            Ok(self.view_for_viewer())
        };
        self.outbox.push_back(ServerEvent::Scan(result));
    }

    fn submit(&mut self, ticket: Ticket, mutation: Mutation) {
        let result = if self.failing_mutations > 0 {
            self.failing_mutations -= 1;
            Err("Request timed out".to_string())
        } else {
            self.apply(mutation)
        };
        self.outbox.push_back(ServerEvent::Mutation { ticket, result });
    }

    fn poll(&mut self) -> Vec<ServerEvent> {
        self.outbox.drain(..).collect()
    }
}

/// Reads the fixture scan, falling back to the bundled demo galaxy.
pub fn load_local_server(config: &MapConfig) -> LocalServer {
    let path = Path::new(&config.scan_fixture);
    let loaded = if path.exists() {
        fs::read_to_string(path)
            .map_err(|error| format!("Read error: {}", error))
            .and_then(|contents| LocalServer::from_ron_str(&contents))
    } else {
        LocalServer::from_ron_str(DEMO_SCAN)
    };

    match loaded {
        Ok(server) => {
            info!(
                "Local server ready for game {} ({} stars, {} carriers)",
                server.game(),
                server.world().stars.len(),
                server.world().carriers.len()
            );
            server.with_rules(config)
        }
        Err(error) => {
            error!("Scan fixture {} unusable: {}", path.display(), error);
            LocalServer::from_ron_str(DEMO_SCAN)
                .unwrap_or_else(|_| LocalServer::new(Scan::default()))
                .with_rules(config)
        }
    }
}

// =============================================================================
// Plugin
// =============================================================================

pub struct ServerPlugin;

impl Plugin for ServerPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<MapConfig>()
            .cloned()
            .unwrap_or_default();
        let server = load_local_server(&config);
        let game = server.game().clone();

        app.insert_resource(ServerLink::new(game, server))
            .add_message::<ScanFetched>()
            .add_message::<MutationResolved>()
            .add_systems(Update, poll_server);
    }
}

pub fn poll_server(
    mut link: ResMut<ServerLink>,
    mut scans: MessageWriter<ScanFetched>,
    mut mutations: MessageWriter<MutationResolved>,
) {
    let as_of = link.fetch_mark();
    for event in link.poll() {
        match event {
            ServerEvent::Scan(result) => {
                scans.write(ScanFetched { result, as_of });
            }
            ServerEvent::Mutation { ticket, result } => {
                mutations.write(MutationResolved { ticket, result });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::fixtures::sample_scan;
    use crate::scan::Position;

    fn server() -> LocalServer {
        LocalServer::new(sample_scan())
    }

    fn reply(server: &mut LocalServer, mutation: Mutation) -> Result<Reply, String> {
        server.submit(7, mutation);
        match server.poll().pop() {
            Some(ServerEvent::Mutation { ticket, result }) => {
                assert_eq!(ticket, 7);
                result
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn route(targets: &[&str]) -> Option<Vec<Destination>> {
        Some(
            targets
                .iter()
                .map(|t| Destination::new(EntityId::new(*t)))
                .collect(),
        )
    }

    #[test]
    fn bundled_demo_scan_parses() {
        let server = LocalServer::from_ron_str(DEMO_SCAN).expect("demo scan parses");
        assert!(!server.world().stars.is_empty());
        assert!(server.world().viewer().is_some());
    }

    #[test]
    fn fetch_answers_on_poll_only() {
        let mut server = server();
        let game = server.game().clone();
        server.fetch_scan(&game);
        let events = server.poll();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Scan(Ok(_))));
        assert!(server.poll().is_empty());
    }

    #[test]
    fn fetch_rejects_unknown_game() {
        let mut server = server();
        server.fetch_scan(&EntityId::new("other"));
        assert!(matches!(server.poll()[0], ServerEvent::Scan(Err(_))));
    }

    #[test]
    fn view_hides_resources_outside_scan_range() {
        let mut world = sample_scan();
        let mut far = world.stars[1].clone();
        far.id = EntityId::new("far");
        far.position = Position::new(40.0, 40.0);
        world.stars.push(far);
        let mut rival = world.carriers[1].clone();
        rival.id = EntityId::new("rival-far");
        rival.position = Position::new(40.0, 40.0);
        world.carriers.push(rival);

        let view = LocalServer::new(world).view_for_viewer();
        let far = view.star(&EntityId::new("far")).expect("star stays visible");
        assert_eq!(far.resources, None);
        assert_eq!(far.ships, None);
        let near = view.star(&EntityId::new("s3")).expect("near star");
        assert_eq!(near.resources, Some(25));
        assert!(view.carrier(&EntityId::new("rival-far")).is_none());
        assert!(view.carrier(&EntityId::new("c2")).is_some());
        let rival = view.player(&EntityId::new("p2")).expect("rival");
        assert_eq!(rival.cash, None);
    }

    #[test]
    fn update_carrier_accepts_route_within_range() {
        let mut server = server();
        let result = reply(
            &mut server,
            Mutation::UpdateCarrier {
                carrier: EntityId::new("c1"),
                name: None,
                destinations: route(&["s1"]),
            },
        );
        match result {
            Ok(Reply::Carrier(carrier)) => assert_eq!(carrier.destination_queue.len(), 1),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn update_carrier_rejects_long_leg() {
        let mut server = server();
        let result = reply(
            &mut server,
            Mutation::UpdateCarrier {
                carrier: EntityId::new("c1"),
                name: None,
                destinations: route(&["s2"]),
            },
        );
        assert!(result.is_err());
        let carrier = server.world().carrier(&EntityId::new("c1")).expect("carrier");
        assert!(carrier.destination_queue.is_empty());
    }

    #[test]
    fn update_carrier_rejects_foreign_carrier() {
        let mut server = server();
        let result = reply(
            &mut server,
            Mutation::UpdateCarrier {
                carrier: EntityId::new("c2"),
                name: Some("Mine".to_string()),
                destinations: None,
            },
        );
        assert_eq!(result, Err("Carrier c2 is not yours".to_string()));
    }

    #[test]
    fn build_carrier_charges_fee_and_ships() {
        let mut server = server();
        let result = reply(
            &mut server,
            Mutation::BuildCarrier {
                origin: EntityId::new("s0"),
                ships: 1,
            },
        );
        let Ok(Reply::Carrier(carrier)) = result else {
            panic!("build failed: {:?}", result);
        };
        assert_eq!(carrier.ships, 1);
        assert_eq!(carrier.owner, EntityId::new("p1"));
        let world = server.world();
        assert_eq!(world.star(&EntityId::new("s0")).and_then(|s| s.ships), Some(9));
        assert_eq!(world.player(&EntityId::new("p1")).and_then(|p| p.cash), Some(75.0));
        assert!(world.carrier(&carrier.id).is_some());
    }

    #[test]
    fn build_carrier_needs_cash() {
        let mut world = sample_scan();
        world.players[0].cash = Some(10.0);
        let mut server = LocalServer::new(world);
        let result = reply(
            &mut server,
            Mutation::BuildCarrier {
                origin: EntityId::new("s0"),
                ships: 1,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn transfer_requires_colocation() {
        let mut server = server();
        let ok = reply(
            &mut server,
            Mutation::TransferShips {
                from: EntityId::new("s0"),
                to: EntityId::new("c1"),
                amount: 3,
            },
        );
        assert_eq!(ok, Ok(Reply::Transfer { success: true }));
        assert_eq!(server.world().carrier(&EntityId::new("c1")).map(|c| c.ships), Some(8));

        let rejected = reply(
            &mut server,
            Mutation::TransferShips {
                from: EntityId::new("s1"),
                to: EntityId::new("c1"),
                amount: 1,
            },
        );
        assert_eq!(rejected, Ok(Reply::Transfer { success: false }));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut server = server();
        server.fail_next_mutations(1);
        let mutation = Mutation::TransferShips {
            from: EntityId::new("s0"),
            to: EntityId::new("c1"),
            amount: 1,
        };
        assert!(reply(&mut server, mutation.clone()).is_err());
        assert!(reply(&mut server, mutation).is_ok());
    }

    #[test]
    fn link_dedupes_scan_requests_until_answered() {
        let world = sample_scan();
        let game = world.game.clone();
        let mut link = ServerLink::new(game, LocalServer::new(world));
        assert!(link.fetch_scan());
        assert!(!link.fetch_scan());
        assert_eq!(link.poll().len(), 1);
        assert!(!link.fetch_pending());
        assert!(link.fetch_scan());
    }

    #[test]
    fn link_tickets_increase() {
        let world = sample_scan();
        let game = world.game.clone();
        let mut link = ServerLink::new(game, LocalServer::new(world));
        let first = link.submit(Mutation::BuildCarrier {
            origin: EntityId::new("s0"),
            ships: 1,
        });
        let second = link.submit(Mutation::BuildCarrier {
            origin: EntityId::new("s0"),
            ships: 1,
        });
        assert!(second > first);
    }

    #[test]
    fn fetch_mark_covers_tickets_sent_before_the_request() {
        let world = sample_scan();
        let game = world.game.clone();
        let mut link = ServerLink::new(game, LocalServer::new(world));
        link.fetch_scan();
        assert_eq!(link.fetch_mark(), 0);
        link.poll();

        let ticket = link.submit(Mutation::BuildCarrier {
            origin: EntityId::new("s0"),
            ships: 1,
        });
        link.fetch_scan();
        assert_eq!(link.fetch_mark(), ticket);
        // Later submissions do not move the mark of the pending request.
        link.submit(Mutation::BuildCarrier {
            origin: EntityId::new("s0"),
            ships: 1,
        });
        assert_eq!(link.fetch_mark(), ticket);
    }

    #[test]
    fn validate_route_checks_every_leg() {
        let scan = sample_scan();
        let carrier = scan.carriers[0].clone();
        let hops = route(&["s1", "s2"]).unwrap_or_default();
        assert!(validate_route(&scan, &carrier, &hops).is_ok());
        let jump = route(&["s3", "s2"]).unwrap_or_default();
        assert!(validate_route(&scan, &carrier, &jump).is_err());
    }
}
