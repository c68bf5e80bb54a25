//! Grid retirement: idle eviction driven by the grid state machine, and the full
//! teardown of a map. A grid is unloaded by evacuating foreign entities to their
//! respawn grid, cleaning and destroying everything else, corpses excepted.

use tracing::{debug, instrument, trace, warn};

use crate::coord::GridCoord;
use crate::entity::{Entity, EntityId, EntityKind};
use crate::grid::{Bag, GridState};

use super::{Map, MapEvent};


/// How a grid is unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadMode {
    /// Idle eviction, refused while the grid is protected, holds creatures in its
    /// world-object bags, or is in range of a player or an active entity.
    Evict,
    /// Map teardown, the grid is unloaded regardless of its content.
    Teardown,
}


impl Map {

    /// Return true if an entity blocks the eviction of the grid by being in range of it.
    /// Active entities inside of the grid whose respawn grid is another loaded grid do
    /// not block, they are evacuated.
    fn blocks_eviction(&self, coord: GridCoord, entity: &Entity) -> bool {

        let Some(cell) = entity.cell else {
            return false;
        };

        if entity.kind() != EntityKind::Player && cell.grid() == coord {
            if let Some(home) = entity.home.grid() {
                if home != coord && self.is_grid_loaded(home) {
                    return false;
                }
            }
        }

        coord.cells().expand(self.config.visibility_cells()).contains(cell)

    }

    fn eviction_refused(&self, coord: GridCoord) -> bool {

        {
            let grids = self.grids.read();
            let Some(grid) = grids.get(&coord) else {
                return true;
            };
            // Pets, possessed creatures and passengers are world objects.
            if grid.is_protected() || grid.count(Bag::World, EntityKind::Creature) != 0 {
                return true;
            }
        }

        self.players.iter()
            .chain(self.active.iter())
            .filter_map(|id| self.entities.get(id))
            .any(|entity| self.blocks_eviction(coord, entity))

    }

    /// Entities indexed in the live bags of a grid.
    pub(super) fn grid_entities(&self, coord: GridCoord) -> Vec<EntityId> {
        self.grids.read().get(&coord).map(|grid| grid.entity_ids().collect()).unwrap_or_default()
    }

    /// Unload a grid, return false if the eviction has been refused or the grid does
    /// not exist. A refusal is not an error, the grid is checked again later.
    #[instrument(skip(self))]
    pub fn unload_grid(&mut self, coord: GridCoord, mode: UnloadMode) -> bool {

        if !self.is_grid_created(coord) {
            return false;
        }

        if mode == UnloadMode::Evict && self.eviction_refused(coord) {
            trace!("unload of grid {coord} of map {} refused", self.key.map_id);
            return false;
        }

        // Positions must be final before choosing who leaves the grid.
        self.move_all_in_move_lists();

        for id in self.grid_entities(coord) {

            let Some(home) = self.entities.get(&id).and_then(|entity| entity.home.grid()) else {
                continue;
            };

            if home == coord || !self.is_grid_loaded(home) {
                continue;
            }

            let evacuated = match id.kind {
                EntityKind::Creature => self.creature_respawn_relocation(id, true),
                EntityKind::GameObject => self.game_object_respawn_relocation(id, true),
                _ => false,
            };

            if evacuated {
                self.push_event(MapEvent::Evacuated { id, to: home });
            }

        }

        self.move_all_in_move_lists();

        for id in self.grid_entities(coord) {
            if matches!(id.kind, EntityKind::Player | EntityKind::Corpse) {
                continue;
            }
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.destroyed = true;
                self.ctx.combat.cleanup_before_delete(entity);
            }
        }

        self.remove_all_objects_in_remove_list();

        for id in self.grid_entities(coord) {
            match id.kind {
                EntityKind::Player => {
                    warn!("player {id} removed with grid {coord} of map {}", self.key.map_id);
                    self.remove_player(id);
                }
                EntityKind::Corpse => {
                    // Corpses stay in their directory and come back with the grid.
                    self.remove_from_grid(id);
                    if let Some(corpse) = self.entities.get_mut(&id) {
                        corpse.in_world = false;
                    }
                }
                _ => {
                    self.remove_from_map(id);
                }
            }
        }

        let pending_corpses = self.grids.get_mut(coord)
            .map(|grid| grid.cells().flat_map(|(_, cell)| cell.pending_corpses().iter().copied()).collect::<Vec<_>>())
            .unwrap_or_default();

        for id in pending_corpses {
            self.remove_from_grid(id);
        }

        self.ctx.phases.unload_grid(self.key, coord);
        let grid = self.grids.remove(coord);
        debug_assert!(grid.as_ref().is_some_and(|grid| grid.is_empty()), "unloaded grid {coord} is not empty");

        self.ctx.terrain.unload_tile(self.key.map_id, coord);
        debug!("unloaded grid {coord} of map {}", self.key.map_id);
        self.push_event(MapEvent::GridUnloaded(coord));
        true

    }

    /// Advance the state machine of every grid.
    #[instrument(skip_all)]
    pub(super) fn update_grid_states(&mut self, diff_ms: u32) {

        let delay = self.config.grid_unload_delay;

        for coord in self.grids.coords() {

            let Some(grid) = self.grids.get_mut(coord) else {
                continue;
            };

            match grid.state() {
                GridState::Active => {

                    grid.ttl.update(diff_ms);
                    if !grid.ttl.passed() {
                        continue;
                    }

                    grid.ttl.reset(delay / 10);
                    let players = grid.count(Bag::World, EntityKind::Player);
                    if players != 0 || self.active_objects_near_grid(coord) {
                        continue;
                    }

                    // Creatures left alone stop fighting.
                    for id in self.grid_entities(coord) {
                        if id.kind == EntityKind::Creature {
                            if let Some(entity) = self.entities.get_mut(&id) {
                                self.ctx.combat.stop_combat(entity);
                            }
                        }
                    }

                    self.set_grid_state(coord, GridState::Idle);

                }
                GridState::Idle => {
                    grid.ttl.reset(delay);
                    self.set_grid_state(coord, GridState::Removal);
                }
                GridState::Removal => {

                    if grid.is_protected() {
                        continue;
                    }

                    grid.ttl.update(diff_ms);
                    if !grid.ttl.passed() {
                        continue;
                    }

                    if !self.unload_grid(coord, UnloadMode::Evict) {
                        if let Some(grid) = self.grids.get_mut(coord) {
                            grid.ttl.reset(delay / 10);
                        }
                    }

                }
            }

        }

    }

    fn set_grid_state(&mut self, coord: GridCoord, state: GridState) {
        if let Some(grid) = self.grids.get_mut(coord) {
            grid.set_state(state);
            debug!("grid {coord} of map {} is now {state:?}", self.key.map_id);
            self.push_event(MapEvent::GridState { coord, state });
        }
    }

    /// Tear the map down: players are removed and every grid is unloaded. Pending
    /// respawns are dropped from memory, persisted ones remain.
    #[instrument(skip_all)]
    pub fn unload_all(&mut self) {

        for id in self.players.iter().copied().collect::<Vec<_>>() {
            self.remove_player(id);
        }

        for id in self.move_lists.clear() {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.pending_move = Default::default();
            }
        }

        // Released while the protected grids still exist.
        for id in self.active.iter().copied().collect::<Vec<_>>() {
            self.remove_from_active(id);
        }

        for coord in self.grids.coords() {
            self.unload_grid(coord, UnloadMode::Teardown);
        }

        for id in self.corpses.iter().collect::<Vec<_>>() {
            self.remove_from_map(id);
        }

        for id in self.entities.keys().copied().collect::<Vec<_>>() {
            warn!("entity {id} outside of any grid removed on teardown of map {}", self.key.map_id);
            self.remove_from_map(id);
        }

        self.transports.clear();
        self.respawns.clear();
        self.remove_list.clear();
        self.script_events.clear();

        debug!("unloaded all grids of map {}", self.key.map_id);

    }

}


#[cfg(test)]
mod tests {

    use crate::config::MapConfig;
    use crate::context::MapKey;
    use crate::entity::{CorpseType, Position};
    use crate::memory::{CombatCall, MemoryContext};
    use crate::respawn::RespawnRecord;
    use crate::spawn::SpawnKind;

    use super::*;

    fn pos(x: f32, y: f32) -> Position {
        Position::new(x, y, 0.0, 0.0)
    }

    fn setup(config: MapConfig) -> (Map, MemoryContext) {
        let ctx = MemoryContext::new();
        let mut map = Map::new(MapKey::new(1, 0), config, ctx.context(), 1000);
        map.swap_events(Some(Vec::new()));
        (map, ctx)
    }

    /// A spawned creature located at `at` with its respawn point at `home`.
    fn creature(map: &mut Map, spawn_id: u64, at: Position, home: Position, active: bool) -> EntityId {
        let id = map.generate_id(EntityKind::Creature);
        let entity = Entity::creature(id, 100, at)
            .with_spawn(spawn_id)
            .with_home(home)
            .with_active(active);
        map.add_to_map(entity).unwrap()
    }

    #[test]
    fn active_creature_away_from_home() {

        let (mut map, _) = setup(MapConfig::default());
        let g1 = pos(10.0, 10.0).grid().unwrap();
        let g2 = pos(2000.0, 10.0).grid().unwrap();
        map.load_grid_at(10.0, 10.0).unwrap();

        let id = creature(&mut map, 1, pos(2000.0, 10.0), pos(10.0, 10.0), true);
        assert!(map.is_grid_loaded(g2));
        assert_eq!(map.grid_protection(g1), Some(1));

        // Protection, not presence, blocks the unload.
        assert!(!map.unload_grid(g1, UnloadMode::Evict));
        assert!(map.unload_grid(g2, UnloadMode::Evict));
        assert!(!map.is_grid_created(g2));

        let entity = map.entity(id).unwrap();
        assert_eq!(entity.cell().map(|cell| cell.grid()), Some(g1));
        assert_eq!(entity.position, pos(10.0, 10.0));
        assert!(map.swap_events(None).unwrap().contains(&MapEvent::Evacuated { id, to: g1 }));

        assert!(!map.unload_grid(g1, UnloadMode::Evict));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn foreign_creature_evacuated_not_destroyed() {

        let (mut map, ctx) = setup(MapConfig::default());
        let g1 = pos(10.0, 10.0).grid().unwrap();
        let g2 = pos(2000.0, 10.0).grid().unwrap();
        map.load_grid_at(10.0, 10.0).unwrap();
        map.load_grid_at(2000.0, 10.0).unwrap();

        let foreign = creature(&mut map, 1, pos(2000.0, 10.0), pos(10.0, 10.0), false);
        let local = creature(&mut map, 2, pos(2010.0, 10.0), pos(2010.0, 10.0), false);
        let corpse_id = map.generate_id(EntityKind::Corpse);
        let owner = EntityId::new(EntityKind::Player, 9);
        map.add_corpse(Entity::corpse(corpse_id, owner, pos(2020.0, 10.0), CorpseType::Resurrectable, 1000)).unwrap();

        assert!(map.unload_grid(g2, UnloadMode::Evict));

        assert_eq!(map.entity(foreign).and_then(Entity::cell).map(|cell| cell.grid()), Some(g1));
        assert!(!map.contains_entity(local));
        assert!(ctx.combat.calls().contains(&CombatCall::Cleanup(local)));
        assert!(!ctx.combat.calls().contains(&CombatCall::Cleanup(foreign)));

        // The corpse waits for its grid.
        let corpse = map.entity(corpse_id).unwrap();
        assert!(!corpse.is_in_world());
        assert_eq!(corpse.cell(), None);
        assert_eq!(map.dangling_references(), 0);
        assert!(!ctx.terrain.is_tile_loaded(1, g2));
        assert_eq!(ctx.phases.grid_unloads(), [g2]);

        map.load_grid_at(2000.0, 10.0).unwrap();
        assert!(map.entity(corpse_id).unwrap().is_in_world());
        // The local creature had no spawn definition and stays gone.
        assert_eq!(map.entity_count(), 2);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn eviction_refusals() {

        let (mut map, _) = setup(MapConfig::default());
        let g1 = pos(10.0, 10.0).grid().unwrap();
        map.load_grid_at(10.0, 10.0).unwrap();

        assert!(map.set_grid_unload_lock(g1, true));
        assert!(!map.unload_grid(g1, UnloadMode::Evict));
        map.set_grid_unload_lock(g1, false);

        // A pet in the world-object bag.
        let id = map.generate_id(EntityKind::Creature);
        let pet = map.add_to_map(Entity::creature(id, 1, pos(10.0, 10.0)).with_world_object(true)).unwrap();
        assert!(!map.unload_grid(g1, UnloadMode::Evict));
        map.remove_from_map(pet);

        // A player in range, even from the next grid.
        let player = map.add_player(Entity::player(1, 1, pos(540.0, 10.0))).unwrap();
        assert!(!map.unload_grid(g1, UnloadMode::Evict));
        map.remove_player(player);

        assert!(map.unload_grid(g1, UnloadMode::Evict));
        assert!(!map.unload_grid(g1, UnloadMode::Evict));

    }

    #[test]
    fn teardown_ignores_refusals() {

        let (mut map, ctx) = setup(MapConfig::default());
        let g1 = pos(10.0, 10.0).grid().unwrap();
        map.load_grid_at(10.0, 10.0).unwrap();
        creature(&mut map, 1, pos(10.0, 10.0), pos(10.0, 10.0), true);
        map.set_grid_unload_lock(g1, true);

        assert!(map.unload_grid(g1, UnloadMode::Teardown));
        assert_eq!(map.entity_count(), 0);
        assert_eq!(map.grid_count(), 0);
        assert_eq!(ctx.terrain.loaded_tiles(), 0);

    }

    #[test]
    fn idle_grid_is_evicted() {

        let config = MapConfig { grid_unload_delay: 1000, ..MapConfig::default() };
        let (mut map, ctx) = setup(config);
        // Far enough from the grid borders to only see into its own grid.
        let g1 = pos(250.0, 250.0).grid().unwrap();

        let player = map.add_player(Entity::player(1, 1, pos(250.0, 250.0))).unwrap();
        assert_eq!(map.grid_count(), 1);
        assert_eq!(map.grid_state(g1), Some(GridState::Active));

        // Stays active while the player is around.
        map.update_grid_states(100);
        assert_eq!(map.grid_state(g1), Some(GridState::Active));

        map.remove_player(player);
        map.update_grid_states(100);
        assert_eq!(map.grid_state(g1), Some(GridState::Idle));
        map.update_grid_states(100);
        assert_eq!(map.grid_state(g1), Some(GridState::Removal));

        map.update_grid_states(500);
        assert!(map.is_grid_created(g1));
        map.update_grid_states(500);
        assert!(!map.is_grid_created(g1));
        assert_eq!(ctx.terrain.loaded_tiles(), 0);

        let states = map.swap_events(None).unwrap().into_iter()
            .filter_map(|event| match event {
                MapEvent::GridState { state, .. } => Some(state),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(states, [GridState::Active, GridState::Idle, GridState::Removal]);

    }

    #[test]
    fn refused_eviction_retries_later() {

        let config = MapConfig { grid_unload_delay: 1000, ..MapConfig::default() };
        let (mut map, _) = setup(config);
        let g1 = pos(10.0, 10.0).grid().unwrap();
        map.load_grid_at(10.0, 10.0).unwrap();
        let id = map.generate_id(EntityKind::Creature);
        let pet = map.add_to_map(Entity::creature(id, 1, pos(10.0, 10.0)).with_world_object(true)).unwrap();

        map.update_grid_states(0);
        assert_eq!(map.grid_state(g1), Some(GridState::Removal));
        map.update_grid_states(1000);
        assert!(map.is_grid_created(g1));

        map.remove_from_map(pet);
        map.update_grid_states(50);
        assert!(map.is_grid_created(g1));
        map.update_grid_states(50);
        assert!(!map.is_grid_created(g1));

    }

    #[test]
    fn disabled_unload_keeps_grids() {

        let config = MapConfig { grid_unload: false, grid_unload_delay: 1000, ..MapConfig::default() };
        let (mut map, _) = setup(config);
        map.load_grid_at(10.0, 10.0).unwrap();
        for _ in 0..10 {
            map.update_grid_states(1000);
        }
        assert_eq!(map.grid_count(), 1);

    }

    #[test]
    fn teardown_keeps_persisted_records() {

        let (mut map, ctx) = setup(MapConfig::default());
        let key = map.key();
        map.load_grid_at(10.0, 10.0).unwrap();
        creature(&mut map, 1, pos(10.0, 10.0), pos(10.0, 10.0), true);
        map.add_player(Entity::player(1, 1, pos(20.0, 10.0))).unwrap();
        let grid_id = pos(10.0, 10.0).grid().unwrap().id();
        map.save_respawn_time(RespawnRecord { kind: SpawnKind::Creature, spawn_id: 5, entry: 1, due: 9000, grid_id });
        let corpse_id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(corpse_id, EntityId::new(EntityKind::Player, 9), pos(30.0, 10.0), CorpseType::Resurrectable, 1000)).unwrap();
        map.schedule_script_event(10, |_| {});

        map.unload_all();

        assert_eq!(map.grid_count(), 0);
        assert_eq!(map.entity_count(), 0);
        assert_eq!(map.player_count(), 0);
        assert_eq!(map.respawn_count(), 0);
        assert_eq!(map.pending_script_events(), 0);
        assert_eq!(map.dangling_references(), 0);
        assert_eq!(ctx.store.respawn_count(key), 1);
        assert_eq!(ctx.store.corpse_count(key), 1);

    }

}
