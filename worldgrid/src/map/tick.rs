//! The per-map update driver. A tick pumps sessions, runs the respawn scheduler at its
//! interval, fans out the visit of cells around players and active entities, updates
//! the visited entities in parallel, then applies everything that mutates the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLockReadGuard;

use glam::Vec3;
use indexmap::{IndexMap, IndexSet};

use tracing::{debug, instrument, warn};

use crate::context::{Outgoing, SessionCommand};
use crate::coord::{CellArea, CellCoord, GridCoord, TOTAL_NUMBER_OF_CELLS_PER_MAP};
use crate::entity::{Entity, EntityId, EntityKind, Position, TickOutcome};
use crate::grid::{Bag, Grid, GridState};
use crate::updater::Updatable;

use super::Map;


const CELL_COUNT: usize = (TOTAL_NUMBER_OF_CELLS_PER_MAP * TOTAL_NUMBER_OF_CELLS_PER_MAP) as usize;


/// One bit per cell of the map, set when the cell has been claimed during the current
/// tick. Claims are atomic so that concurrent visits never claim the same cell twice.
pub(super) struct CellMarks {
    words: Vec<AtomicU64>,
}

impl CellMarks {

    pub(super) fn new() -> Self {
        Self {
            words: (0..CELL_COUNT.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn index(cell: CellCoord) -> usize {
        (cell.y * TOTAL_NUMBER_OF_CELLS_PER_MAP + cell.x) as usize
    }

    pub(super) fn reset(&mut self) {
        for word in &mut self.words {
            *word.get_mut() = 0;
        }
    }

    /// Claim a cell, return true if it was not claimed yet.
    #[inline]
    pub(super) fn mark(&self, cell: CellCoord) -> bool {
        let index = Self::index(cell);
        let bit = 1u64 << (index % 64);
        self.words[index / 64].fetch_or(bit, Ordering::Relaxed) & bit == 0
    }

    #[inline]
    pub(super) fn is_marked(&self, cell: CellCoord) -> bool {
        let index = Self::index(cell);
        self.words[index / 64].load(Ordering::Relaxed) & (1u64 << (index % 64)) != 0
    }

}


/// Result of the visit of the surroundings of a player or an active entity.
struct SourceVisit {
    source: EntityId,
    /// Entities of the cells claimed by this visit.
    claimed: Vec<EntityId>,
    /// The entities a player can see, none for other sources.
    visible: Option<IndexSet<EntityId>>,
}

/// Read-only view of the map shared by the tasks of the visit fan-out.
struct FanOut<'a> {
    grids: RwLockReadGuard<'a, HashMap<GridCoord, Box<Grid>>>,
    entities: &'a IndexMap<EntityId, Entity>,
    marks: &'a CellMarks,
    radius: f32,
}

impl FanOut<'_> {

    fn cell_entities(&self, cell: CellCoord) -> impl Iterator<Item = &Entity> + '_ {
        self.grids.get(&cell.grid())
            .and_then(|grid| grid.cell(cell))
            .into_iter()
            .flat_map(|grid_cell| grid_cell.iter())
            .filter_map(|id| self.entities.get(&id))
    }

    fn claim_around(&self, center: Vec3, claimed: &mut Vec<EntityId>) {
        for cell in CellArea::around(center.x, center.y, self.radius) {
            if self.marks.mark(cell) {
                claimed.extend(self.cell_entities(cell).map(Entity::id));
            }
        }
    }

    fn collect_visible(&self, observer: EntityId, center: Vec3, visible: &mut IndexSet<EntityId>) {
        let center = center.truncate();
        for cell in CellArea::around(center.x, center.y, self.radius) {
            for entity in self.cell_entities(cell) {
                if entity.id() != observer
                    && entity.is_visible_to(observer)
                    && entity.position.pos.truncate().distance(center) <= self.radius
                {
                    visible.insert(entity.id());
                }
            }
        }
    }

    fn visit_source(&self, source: EntityId) -> SourceVisit {

        let mut visit = SourceVisit { source, claimed: Vec::new(), visible: None };
        let Some(entity) = self.entities.get(&source) else {
            return visit;
        };

        let center = entity.position.pos;
        self.claim_around(center, &mut visit.claimed);

        if let Some(player) = entity.as_player() {

            let mut visible = IndexSet::new();
            self.collect_visible(source, center, &mut visible);

            // Far sight shows the surroundings of the viewpoint as well.
            if let Some(view_point) = player.view_point.and_then(|id| self.entities.get(&id)) {
                self.claim_around(view_point.position.pos, &mut visit.claimed);
                self.collect_visible(source, view_point.position.pos, &mut visible);
            }

            visit.visible = Some(visible);

        }

        // Combat partners out of range are updated as well.
        if let Some(links) = entity.combat_links() {
            for partner in links.iter().filter_map(|id| self.entities.get(&id)) {
                if partner.position.distance_2d(&entity.position) > self.radius {
                    self.claim_around(partner.position.pos, &mut visit.claimed);
                }
            }
        }

        visit

    }

}


impl Map {

    /// Run one tick of this map.
    #[instrument(skip(self))]
    pub fn update(&mut self, diff_ms: u32) {

        self.time_ms += diff_ms as u64;
        let tasks = self.tasks.clone();

        let sessions = self.players.iter()
            .filter_map(|id| self.entities.get(id))
            .filter_map(|entity| entity.as_player().map(|player| (entity.id(), player.session)))
            .collect::<Vec<_>>();

        let ctx = &self.ctx;
        let commands = tasks.run(sessions, |(id, session)| (id, ctx.sessions.pump(session, diff_ms)));

        self.respawn_timer.update(diff_ms);
        if self.respawn_timer.passed() {
            self.respawn_timer.reset();
            self.process_respawns();
            self.update_spawn_group_conditions();
            self.remove_old_corpses();
        }

        for (id, commands) in commands {
            for command in commands {
                self.apply_session_command(id, command);
            }
        }

        self.marks.reset();

        let sources = self.players.iter()
            .chain(self.active.iter())
            .copied()
            .collect::<Vec<_>>();

        let visits = {
            let fan_out = FanOut {
                grids: self.grids.read(),
                entities: &self.entities,
                marks: &self.marks,
                radius: self.config.visibility_distance,
            };
            tasks.run(sources, |source| fan_out.visit_source(source))
        };

        let mut updated = IndexSet::new();
        for visit in &visits {
            updated.insert(visit.source);
            updated.extend(visit.claimed.iter().copied());
        }

        let targets = self.entities.values_mut()
            .filter(|entity| updated.contains(&entity.id()))
            .collect::<Vec<_>>();

        let outcomes = tasks.run(targets, |entity| (entity.id(), entity.update(diff_ms)));

        self.update_transports(diff_ms);

        for (id, outcome) in outcomes {
            if let Some(outcome) = outcome {
                self.apply_tick_outcome(id, outcome);
            }
        }

        for visit in visits {
            if let Some(visible) = visit.visible {
                self.update_visibility(visit.source, visible);
            }
        }

        self.send_outgoing();
        self.process_script_events();
        self.update_weather(diff_ms);
        self.ctx.phases.update(self.key, diff_ms);
        self.move_all_in_move_lists();

        if !self.players.is_empty() || !self.active.is_empty() {
            self.process_relocation_notifies(diff_ms);
        }

        self.remove_all_objects_in_remove_list();
        self.update_grid_states(diff_ms);

    }

    fn apply_session_command(&mut self, id: EntityId, command: SessionCommand) {
        match command {
            SessionCommand::Move(dest) => {
                if let Err(e) = self.player_relocation(id, dest) {
                    warn!("failed to move player {id}: {e}");
                }
            }
            SessionCommand::Leave => {
                self.remove_player(id);
            }
        }
    }

    fn apply_tick_outcome(&mut self, id: EntityId, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Expired => {
                self.add_to_remove_list(id);
            }
            TickOutcome::CorpseDecayed => {
                if let Err(e) = self.despawn(id, true) {
                    warn!("failed to despawn decayed creature {id}: {e}");
                }
            }
            TickOutcome::Relocate(dest) => {
                if let Err(e) = self.relocate(id, dest) {
                    warn!("failed to relocate {id}: {e}");
                }
            }
        }
    }

    /// Move transports by their velocity, carrying their passengers along.
    #[instrument(skip_all)]
    fn update_transports(&mut self, diff_ms: u32) {

        for transport in self.transports.iter().copied().collect::<Vec<_>>() {

            let Some(entity) = self.entities.get(&transport) else {
                continue;
            };

            let Some(data) = entity.as_transport() else {
                continue;
            };

            let delta = data.velocity * diff_ms as f32 / 1000.0;
            if delta == Vec3::ZERO {
                continue;
            }

            let passengers = data.passengers.iter().copied().collect::<Vec<_>>();
            let dest = Position { pos: entity.position.pos + delta, ..entity.position };
            if let Err(e) = self.game_object_relocation(transport, dest) {
                warn!("failed to move transport {transport}: {e}");
                continue;
            }

            for passenger in passengers {
                let Some(position) = self.entities.get(&passenger).map(|entity| entity.position) else {
                    continue;
                };
                let dest = Position { pos: position.pos + delta, ..position };
                if let Err(e) = self.relocate(passenger, dest) {
                    debug!("passenger {passenger} of transport {transport} not moved: {e}");
                }
            }

        }

    }

    /// Queue creation and destruction of entities entering and leaving a player's view.
    fn update_visibility(&mut self, player_id: EntityId, visible: IndexSet<EntityId>) {

        let Some(player) = self.entities.get_mut(&player_id).and_then(Entity::as_player_mut) else {
            return;
        };

        for &id in &player.visible {
            if !visible.contains(&id) {
                player.outgoing.push(Outgoing::Destroy(id));
            }
        }

        for &id in &visible {
            if !player.visible.contains(&id) {
                player.outgoing.push(Outgoing::Create(id));
            }
        }

        player.visible = visible;

    }

    /// Deliver the queued updates of every player to its session.
    fn send_outgoing(&mut self) {
        for id in &self.players {
            let Some(player) = self.entities.get_mut(id).and_then(Entity::as_player_mut) else {
                continue;
            };
            if !player.outgoing.is_empty() {
                let updates = std::mem::take(&mut player.outgoing);
                self.ctx.sessions.send(player.session, &updates);
            }
        }
    }

    /// Notify creatures around entities that moved, for every active grid whose notify
    /// timer elapsed. Notified entities are reset in a second pass.
    #[instrument(skip_all)]
    fn process_relocation_notifies(&mut self, diff_ms: u32) {

        let mut due = Vec::new();
        for coord in self.grids.coords() {
            if let Some(grid) = self.grids.get_mut(coord) {
                if grid.state() != GridState::Active {
                    continue;
                }
                grid.relocation_timer.update(diff_ms);
                if grid.relocation_timer.passed() {
                    due.push(coord);
                }
            }
        }

        if due.is_empty() {
            return;
        }

        {
            let fan_out = FanOut {
                grids: self.grids.read(),
                entities: &self.entities,
                marks: &self.marks,
                radius: self.config.visibility_distance,
            };

            for coord in &due {

                let Some(grid) = fan_out.grids.get(coord) else {
                    continue;
                };

                for id in grid.entity_ids() {

                    let Some(target) = self.entities.get(&id) else {
                        continue;
                    };

                    if !target.needs_relocation_notify() {
                        continue;
                    }

                    let pos = target.position.pos;
                    for cell in CellArea::around(pos.x, pos.y, fan_out.radius) {
                        for observer in fan_out.cell_entities(cell) {
                            if observer.id() != id
                                && observer.kind() == EntityKind::Creature
                                && observer.is_alive()
                                && target.is_visible_to(observer.id())
                                && observer.position.distance_2d(&target.position) <= fan_out.radius
                            {
                                self.ctx.combat.move_in_line_of_sight(observer, target);
                            }
                        }
                    }

                }

            }
        }

        let period = self.config.relocation_notify_period;
        for coord in due {
            for id in self.grid_entities(coord) {
                if let Some(entity) = self.entities.get_mut(&id) {
                    entity.relocation_notify = false;
                }
            }
            if let Some(grid) = self.grids.get_mut(coord) {
                grid.relocation_timer.reset(period);
            }
        }

    }

    /// Return true if the cell has been claimed by a visit during the last tick.
    #[inline]
    pub fn is_cell_visited(&self, cell: CellCoord) -> bool {
        self.marks.is_marked(cell)
    }

    /// Number of players indexed in a grid.
    pub fn grid_player_count(&self, coord: GridCoord) -> usize {
        self.grids.read().get(&coord).map_or(0, |grid| grid.count(Bag::World, EntityKind::Player))
    }

}


impl Updatable for Map {

    fn update(&mut self, diff_ms: u32) {
        Map::update(self, diff_ms);
    }

}


#[cfg(test)]
mod tests {

    use crate::config::MapConfig;
    use crate::context::{MapKey, WeatherState};
    use crate::entity::{EntityData, Motion, TransportData};
    use crate::memory::MemoryContext;
    use crate::spawn::{SpawnData, SpawnKind};

    use super::*;

    fn pos(x: f32, y: f32) -> Position {
        Position::new(x, y, 0.0, 0.0)
    }

    fn setup() -> (Map, MemoryContext) {
        let ctx = MemoryContext::new();
        (Map::new(MapKey::new(1, 0), MapConfig::default(), ctx.context(), 1000), ctx)
    }

    fn add_creature(map: &mut Map, at: Position) -> EntityId {
        let id = map.generate_id(EntityKind::Creature);
        map.add_to_map(Entity::creature(id, 1, at)).unwrap()
    }

    #[test]
    fn cell_marks() {
        let mut marks = CellMarks::new();
        let cell = CellCoord::new(300, 12).unwrap();
        let last = CellCoord::new(TOTAL_NUMBER_OF_CELLS_PER_MAP - 1, TOTAL_NUMBER_OF_CELLS_PER_MAP - 1).unwrap();
        assert!(!marks.is_marked(cell));
        assert!(marks.mark(cell));
        assert!(!marks.mark(cell));
        assert!(marks.mark(last));
        assert!(marks.is_marked(cell));
        marks.reset();
        assert!(!marks.is_marked(cell));
        assert!(!marks.is_marked(last));
    }

    #[test]
    fn sessions_pumped_and_commands_applied() {

        let (mut map, ctx) = setup();
        let player = map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        ctx.sessions.push_command(7, SessionCommand::Move(pos(15.0, 12.0)));

        map.update(100);
        assert_eq!(ctx.sessions.pumps(), 1);
        assert_eq!(map.entity(player).unwrap().position, pos(15.0, 12.0));
        assert_eq!(map.time_ms(), 1_000_100);
        assert!(map.is_cell_visited(pos(15.0, 12.0).cell().unwrap()));

        ctx.sessions.push_command(7, SessionCommand::Leave);
        map.update(100);
        assert_eq!(map.player_count(), 0);
        assert!(!ctx.phases.is_registered(map.key(), player));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn visibility_updates_sent() {

        let (mut map, ctx) = setup();
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let near = add_creature(&mut map, pos(40.0, 10.0));
        add_creature(&mut map, pos(400.0, 10.0));

        // Only visible to another player.
        let id = map.generate_id(EntityKind::Creature);
        let mut private = Entity::creature(id, 1, pos(20.0, 10.0));
        private.private_owner = Some(EntityId::new(EntityKind::Player, 2));
        map.add_to_map(private).unwrap();

        map.update(100);
        assert_eq!(ctx.sessions.sent(7), [Outgoing::Create(near)]);

        map.remove_from_map(near);
        map.update(100);
        assert_eq!(ctx.sessions.sent(7), [Outgoing::Create(near), Outgoing::Destroy(near)]);

    }

    #[test]
    fn only_visited_entities_update() {

        let (mut map, _) = setup();
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        map.load_grid_at(2000.0, 10.0).unwrap();

        let near = add_creature(&mut map, pos(30.0, 10.0));
        let far = add_creature(&mut map, pos(2000.0, 10.0));
        for id in [near, far] {
            let start = map.entity(id).unwrap().position;
            map.entity_mut(id).unwrap().as_creature_mut().unwrap().motion = Some(Motion {
                dest: Position { pos: start.pos + Vec3::new(0.0, 10.0, 0.0), ..start },
                speed: 100.0,
            });
        }

        map.update(50);
        assert_eq!(map.entity(near).unwrap().position.pos, Vec3::new(30.0, 15.0, 0.0));
        assert_eq!(map.entity(far).unwrap().position.pos, Vec3::new(2000.0, 10.0, 0.0));

    }

    #[test]
    fn creature_crosses_cell_in_one_tick() {

        let (mut map, _) = setup();
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let id = add_creature(&mut map, pos(30.0, 10.0));
        map.entity_mut(id).unwrap().as_creature_mut().unwrap().motion = Some(Motion {
            dest: pos(50.0, 10.0),
            speed: 100.0,
        });

        map.update(1000);
        let entity = map.entity(id).unwrap();
        assert_eq!(entity.position, pos(50.0, 10.0));
        assert_eq!(entity.cell(), pos(50.0, 10.0).cell());
        assert_eq!(map.pending_moves(), 0);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn expired_effects_removed() {

        let (mut map, _) = setup();
        let player = map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let id = map.generate_id(EntityKind::DynamicObject);
        let effect = map.add_to_map(Entity::dynamic_object(id, player, pos(12.0, 10.0), Some(150))).unwrap();

        map.update(100);
        assert!(map.contains_entity(effect));
        map.update(100);
        assert!(!map.contains_entity(effect));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn decayed_corpse_respawns() {

        let config = MapConfig { creature_corpse_decay: 100, respawn_check_interval: 1000, ..MapConfig::default() };
        let ctx = MemoryContext::new();
        let mut data = SpawnData::new(SpawnKind::Creature, 4, 100, 1, pos(20.0, 10.0));
        data.respawn_delay = 2;
        ctx.store.add_spawn(data);
        let mut map = Map::new(MapKey::new(1, 0), config, ctx.context(), 1000);

        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let creature = map.entities_by_spawn(SpawnKind::Creature, 4).next().unwrap();
        map.kill_creature(creature).unwrap();

        map.update(100);
        assert!(!map.contains_entity(creature));
        assert_eq!(map.respawn_time(SpawnKind::Creature, 4).map(|record| record.due), Some(1002));

        map.update(900);
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 4).count(), 0);
        map.update(1000);
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 4).count(), 1);
        assert!(map.respawn_time(SpawnKind::Creature, 4).is_none());

    }

    #[test]
    fn moving_player_notifies_creatures() {

        let (mut map, ctx) = setup();
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        add_creature(&mut map, pos(40.0, 10.0));

        ctx.sessions.push_command(7, SessionCommand::Move(pos(12.0, 10.0)));
        map.update(500);
        assert_eq!(ctx.combat.line_of_sight_count(), 1);

        // Throttled until the notify period elapsed.
        ctx.sessions.push_command(7, SessionCommand::Move(pos(14.0, 10.0)));
        map.update(500);
        assert_eq!(ctx.combat.line_of_sight_count(), 1);
        map.update(500);
        assert_eq!(ctx.combat.line_of_sight_count(), 2);

        // Reset once notified.
        map.update(1000);
        assert_eq!(ctx.combat.line_of_sight_count(), 2);

    }

    #[test]
    fn creature_moving_in_cell_notifies_neighbours() {

        let (mut map, ctx) = setup();
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let walker = add_creature(&mut map, pos(40.0, 10.0));
        add_creature(&mut map, pos(50.0, 10.0));

        // Nobody moved yet, flags are cleared.
        map.update(1000);
        let before = ctx.combat.line_of_sight_count();

        map.entity_mut(walker).unwrap().as_creature_mut().unwrap().motion = Some(Motion {
            dest: pos(60.0, 10.0),
            speed: 3.0,
        });

        map.update(1000);
        let entity = map.entity(walker).unwrap();
        assert!((entity.position.pos.x - 43.0).abs() < 1e-3);
        assert_eq!(entity.cell(), pos(40.0, 10.0).cell());
        assert!(ctx.combat.line_of_sight_count() > before);

    }

    #[test]
    fn transport_carries_passengers() {

        let (mut map, _) = setup();
        let player = map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        let boat = map.generate_id(EntityKind::GameObject);
        let mut entity = Entity::game_object(boat, 3, pos(10.0, 10.0));
        if let EntityData::GameObject(data) = &mut entity.data {
            data.transport = Some(TransportData { velocity: Vec3::new(10.0, 0.0, 0.0), ..TransportData::default() });
        }
        map.add_to_map(entity).unwrap();
        map.add_passenger(boat, player).unwrap();

        map.update(1000);
        assert_eq!(map.entity(boat).unwrap().position, pos(20.0, 10.0));
        assert_eq!(map.entity(player).unwrap().position, pos(20.0, 10.0));

    }

    #[test]
    fn tick_runs_collaborators() {

        let (mut map, ctx) = setup();
        let player = map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        ctx.rules.set_weather(1, WeatherState::Snow, 0.2);
        map.schedule_script_event(50, |map| map.set_zone_music(1, 9));

        map.update(1000);
        assert_eq!(ctx.phases.updates(), 1);
        assert_eq!(map.pending_script_events(), 0);
        assert_eq!(map.zone_dynamic_info(1).unwrap().music_id, 9);

        // Queued after the flush, sent on the next tick.
        map.update(10);
        let sent = ctx.sessions.sent(7);
        assert!(sent.contains(&Outgoing::ZoneMusic { zone_id: 1, music_id: 9 }));
        assert!(sent.contains(&Outgoing::ZoneWeather { zone_id: 1, weather: WeatherState::Snow, grade: 0.2 }));
        assert!(map.entity(player).unwrap().as_player().unwrap().outgoing.is_empty());

    }

    #[test]
    fn player_sees_across_grid_border() {

        let ctx = MemoryContext::new();
        ctx.store.add_spawn(SpawnData::new(SpawnKind::Creature, 3, 100, 1, pos(5.0, 10.0)));
        let mut map = Map::new(MapKey::new(1, 0), MapConfig::default(), ctx.context(), 1000);

        let player = map.add_player(Entity::player(1, 7, pos(-5.0, 10.0))).unwrap();
        let spawn_grid = pos(5.0, 10.0).grid().unwrap();
        assert_ne!(map.entity(player).unwrap().cell().map(CellCoord::grid), Some(spawn_grid));
        assert!(map.is_grid_loaded(spawn_grid));

        map.update(100);
        map.update(100);
        let spawned = map.entities_by_spawn(SpawnKind::Creature, 3).collect::<Vec<_>>();
        assert_eq!(spawned.len(), 1);
        assert!(ctx.sessions.sent(7).contains(&Outgoing::Create(spawned[0])));

        // Walking along the border keeps the grid loaded without spawning twice.
        ctx.sessions.push_command(7, SessionCommand::Move(pos(-70.0, 10.0)));
        map.update(100);
        ctx.sessions.push_command(7, SessionCommand::Move(pos(-5.0, 10.0)));
        map.update(100);
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 3).count(), 1);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn idle_map_unloads_grids() {

        let config = MapConfig { grid_unload_delay: 1000, ..MapConfig::default() };
        let ctx = MemoryContext::new();
        let mut map = Map::new(MapKey::new(1, 0), config, ctx.context(), 1000);
        map.add_player(Entity::player(1, 7, pos(10.0, 10.0))).unwrap();
        ctx.sessions.push_command(7, SessionCommand::Leave);

        for _ in 0..20 {
            map.update(100);
        }

        assert_eq!(map.grid_count(), 0);
        assert_eq!(ctx.terrain.loaded_tiles(), 0);

    }

}
