//! The grid loader, materializing the spawns of every cell of a grid when it loads.

use tracing::{debug, instrument, trace};

use crate::coord::{CellCoord, GridCoord};
use crate::entity::{Entity, EntityData, EntityId};
use crate::spawn::{SpawnData, SpawnKind};

use super::Map;


impl Map {

    /// Materialize the spawns and corpses of every cell of a grid being loaded.
    #[instrument(skip(self))]
    pub(super) fn load_grid_objects(&mut self, coord: GridCoord) {

        let mut spawned = 0;
        for cell in coord.cells() {
            for data in self.ctx.persistence.cell_spawns(self.key.map_id, cell) {
                if self.spawn_on_grid_load(&data, cell, None) {
                    spawned += 1;
                }
            }
        }

        let corpses = self.load_grid_corpses(coord);
        debug!("loaded {spawned} spawns and {corpses} corpses in grid {coord} of map {}", self.key.map_id);

    }

    /// Materialize the spawns of a personal phase for its owner, once per grid.
    pub(super) fn load_personal_grid(&mut self, coord: GridCoord, phase_id: u32, owner: EntityId) -> usize {

        let Some(grid) = self.grids.get_mut(coord) else {
            return 0;
        };

        if !grid.mark_personal_phase(phase_id, owner) {
            return 0;
        }

        let mut spawned = 0;
        for cell in coord.cells() {
            for data in self.ctx.persistence.cell_personal_spawns(self.key.map_id, phase_id, cell) {
                if self.spawn_on_grid_load(&data, cell, Some(owner)) {
                    spawned += 1;
                }
            }
        }

        debug!("loaded {spawned} spawns of personal phase {phase_id} in grid {coord} for {owner}");
        spawned

    }

    fn spawn_on_grid_load(&mut self, data: &SpawnData, cell: CellCoord, owner: Option<EntityId>) -> bool {

        if data.map_id != self.key.map_id || data.cell() != Some(cell) {
            trace!("ignored spawn {} not located in cell {cell}", data.spawn_id);
            return false;
        }

        if !self.should_be_spawned_for(data, owner) {
            return false;
        }

        let mut entity = self.create_from_spawn(data);
        entity.private_owner = owner;
        let active = entity.active;
        let id = self.insert_in_world(entity, cell);
        if active {
            self.ensure_grid_loaded_for_active_object(cell, id);
        }

        // A respawn already due is consumed by this spawn.
        if self.respawns.get(data.kind, data.spawn_id).is_some() {
            self.remove_respawn_time(data.kind, data.spawn_id, true);
        }

        true

    }

    /// Check whether a spawn should be materialized when its grid loads. Spawns with a
    /// pending respawn in the future, already spawned, in an inactive spawn group or not
    /// spawned by their pool are skipped.
    pub fn should_be_spawned_on_grid_load(&self, data: &SpawnData) -> bool {
        self.should_be_spawned_for(data, None)
    }

    fn should_be_spawned_for(&self, data: &SpawnData, owner: Option<EntityId>) -> bool {

        if let Some(record) = self.respawns.get(data.kind, data.spawn_id) {
            if record.due > self.now() {
                return false;
            }
        }

        // Personal copies are only checked against copies of the same owner.
        let spawned = self.entities_by_spawn(data.kind, data.spawn_id)
            .filter_map(|id| self.entities.get(&id))
            .any(|entity| entity.private_owner == owner);

        if spawned {
            return false;
        }

        if let Some(group) = self.spawn_groups.get(&data.group_id) {
            if !group.is_system() && !self.is_spawn_group_active(data.group_id) {
                return false;
            }
        }

        if let Some(pool_id) = data.pool_id {
            if !self.ctx.rules.pool_spawned(self.key, pool_id, data.kind, data.spawn_id) {
                return false;
            }
        }

        true

    }

    /// Build the entity of a spawn, not yet added to the map.
    pub(super) fn create_from_spawn(&mut self, data: &SpawnData) -> Entity {

        let id = self.generate_id(data.kind.entity_kind());
        let entity = match data.kind {
            SpawnKind::Creature => {
                let mut entity = Entity::creature(id, data.entry, data.position);
                if let Some(creature) = entity.as_creature_mut() {
                    creature.respawn_delay = data.respawn_delay;
                }
                entity
            }
            SpawnKind::GameObject => {
                let mut entity = Entity::game_object(id, data.entry, data.position);
                if let EntityData::GameObject(game_object) = &mut entity.data {
                    game_object.respawn_delay = data.respawn_delay;
                }
                entity
            }
            SpawnKind::AreaTrigger => {
                // Spawned area triggers have no caster and never expire.
                let mut entity = Entity::area_trigger(id, id, data.position, None);
                entity.entry = data.entry;
                entity
            }
        };

        entity.with_spawn(data.spawn_id)
            .with_active(data.active)
            .with_world_object(data.world_object)

    }

    /// Materialize a spawn outside of a grid load, its grid must be loaded. Return the
    /// entity if spawned.
    pub(super) fn spawn_from_data(&mut self, data: &SpawnData) -> Option<EntityId> {
        let cell = data.cell()?;
        if !self.is_grid_loaded(cell.grid()) {
            return None;
        }
        let entity = self.create_from_spawn(data);
        self.add_to_map(entity).ok()
    }

}


#[cfg(test)]
mod tests {

    use crate::config::MapConfig;
    use crate::context::MapKey;
    use crate::entity::{EntityKind, Position};
    use crate::memory::MemoryContext;
    use crate::respawn::RespawnRecord;
    use crate::spawn::{SpawnGroupData, SpawnGroupFlags};

    use super::*;

    fn map(ctx: &MemoryContext) -> Map {
        Map::new(MapKey::new(1, 0), MapConfig::default(), ctx.context(), 1000)
    }

    fn spawn(spawn_id: u64, x: f32, y: f32) -> SpawnData {
        SpawnData::new(SpawnKind::Creature, spawn_id, 100, 1, Position::new(x, y, 0.0, 0.0))
    }

    #[test]
    fn loads_every_cell_once() {

        let ctx = MemoryContext::new();
        ctx.store.add_spawn(spawn(1, 10.0, 10.0));
        ctx.store.add_spawn(spawn(2, 300.0, 400.0));
        ctx.store.add_spawn(SpawnData::new(SpawnKind::GameObject, 3, 7, 1, Position::new(20.0, 20.0, 0.0, 0.0)));
        // Another map.
        ctx.store.add_spawn(SpawnData::new(SpawnKind::Creature, 4, 7, 2, Position::new(20.0, 20.0, 0.0, 0.0)));

        let mut map = map(&ctx);
        assert!(map.load_grid_at(10.0, 10.0).unwrap());
        assert_eq!(ctx.store.cell_queries(), 64);
        assert_eq!(ctx.terrain.balances(), 1);
        assert!(ctx.terrain.is_tile_loaded(1, Position::new(10.0, 10.0, 0.0, 0.0).grid().unwrap()));

        assert!(!map.load_grid_at(10.0, 10.0).unwrap());
        assert_eq!(ctx.store.cell_queries(), 64);
        assert_eq!(ctx.terrain.balances(), 1);

        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 1).count(), 1);
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 2).count(), 1);
        assert_eq!(map.entities_by_spawn(SpawnKind::GameObject, 3).count(), 1);
        assert_eq!(map.entity_count(), 3);
        assert!(map.entities().all(|entity| entity.is_in_world()));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn future_respawn_blocks_spawn() {

        let ctx = MemoryContext::new();
        ctx.store.add_spawn(spawn(1, 10.0, 10.0));
        ctx.store.add_spawn(spawn(2, 20.0, 20.0));
        let grid_id = Position::new(10.0, 10.0, 0.0, 0.0).grid().unwrap().id();
        let key = MapKey::new(1, 0);
        ctx.store.insert_respawn(key, RespawnRecord { kind: SpawnKind::Creature, spawn_id: 1, entry: 100, due: 5000, grid_id });
        ctx.store.insert_respawn(key, RespawnRecord { kind: SpawnKind::Creature, spawn_id: 2, entry: 100, due: 500, grid_id });

        let mut map = map(&ctx);
        map.load_grid_at(10.0, 10.0).unwrap();

        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 1).count(), 0);
        assert!(map.respawn_time(SpawnKind::Creature, 1).is_some());
        // The due record is consumed by the spawn.
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 2).count(), 1);
        assert!(map.respawn_time(SpawnKind::Creature, 2).is_none());
        assert!(ctx.store.respawn(key, SpawnKind::Creature, 2).is_none());

    }

    #[test]
    fn inactive_group_and_pool_block_spawn() {

        let ctx = MemoryContext::new();
        ctx.store.add_spawn_group(SpawnGroupData {
            group_id: 5,
            name: "manual".to_string(),
            map_id: 1,
            flags: SpawnGroupFlags::MANUAL_SPAWN,
        });
        let mut grouped = spawn(1, 10.0, 10.0);
        grouped.group_id = 5;
        ctx.store.add_spawn(grouped);
        let mut pooled = spawn(2, 20.0, 20.0);
        pooled.pool_id = Some(3);
        ctx.store.add_spawn(pooled);
        ctx.rules.set_pool_spawned(SpawnKind::Creature, 2, false);

        let mut map = map(&ctx);
        map.load_grid_at(10.0, 10.0).unwrap();
        assert_eq!(map.entity_count(), 0);

    }

    #[test]
    fn personal_phase_spawns_per_owner() {

        let ctx = MemoryContext::new();
        let mut personal = spawn(1, 10.0, 10.0);
        personal.phase_id = Some(9);
        ctx.store.add_spawn(personal);

        let first = EntityId::new(EntityKind::Player, 1);
        let second = EntityId::new(EntityKind::Player, 2);
        ctx.phases.set_personal_phases(first, vec![9]);
        ctx.phases.set_personal_phases(second, vec![9]);

        let mut map = map(&ctx);
        let pos = Position::new(10.0, 10.0, 0.0, 0.0);
        map.add_player(Entity::player(1, 1, pos)).unwrap();
        map.add_player(Entity::player(2, 2, pos)).unwrap();

        let owners = map.entities_by_spawn(SpawnKind::Creature, 1)
            .map(|id| map.entity(id).unwrap().private_owner)
            .collect::<Vec<_>>();
        assert_eq!(owners.len(), 2);
        assert!(owners.contains(&Some(first)));
        assert!(owners.contains(&Some(second)));

        // Moving around the same grid does not load the phase again.
        map.player_relocation(first, Position::new(15.0, 15.0, 0.0, 0.0)).unwrap();
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 1).count(), 2);

    }

}
