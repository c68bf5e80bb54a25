//! Entities entering and leaving a map, players and the end of tick remove list.

use std::mem;

use tracing::{debug, error, warn};

use crate::coord::CellCoord;
use crate::entity::{Entity, EntityData, EntityId, EntityKind};
use crate::respawn::RespawnRecord;
use crate::spawn::SpawnKind;

use super::{Map, MapError, MapEvent};


impl Map {

    /// Add an entity to this map. Active entities load their grid, other entities only
    /// need their grid to be created. Players are routed to [`Self::add_player`].
    pub fn add_to_map(&mut self, entity: Entity) -> Result<EntityId, MapError> {

        let id = entity.id();
        if id.kind == EntityKind::Player {
            return self.add_player(entity);
        } else if id.kind == EntityKind::Corpse {
            return self.add_corpse(entity);
        }

        if self.entities.contains_key(&id) {
            return Err(MapError::AlreadyInMap(id));
        }

        let cell = self.entity_cell(&entity)?;
        let (active, position) = (entity.active, entity.position);
        if active {
            self.ensure_grid_loaded_for_active_object(cell, id);
        } else {
            self.ensure_grid_created(cell.grid());
        }

        self.insert_in_world(entity, cell);
        if active {
            self.load_grids_in_range(position);
        }

        Ok(id)

    }

    /// Compute the cell of an entity about to enter the map.
    pub(super) fn entity_cell(&self, entity: &Entity) -> Result<CellCoord, MapError> {
        let pos = entity.position.pos;
        entity.position.cell().ok_or_else(|| {
            warn!("entity {} has invalid coordinates ({}, {}) in map {}", entity.id(), pos.x, pos.y, self.key.map_id);
            MapError::InvalidCoord { x: pos.x, y: pos.y }
        })
    }

    /// Insert an entity in the directory and index it in the given cell, its grid must
    /// exist. Every secondary directory is updated.
    pub(super) fn insert_in_world(&mut self, entity: Entity, cell: CellCoord) -> EntityId {

        let id = entity.id();
        let active = entity.active;
        let private = entity.private_owner.is_some();
        let transport = entity.is_transport();

        self.index_spawn(&entity);
        self.entities.insert(id, entity);

        let live = self.add_to_grid(id, cell);
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.in_world = live;
        }

        if active {
            self.add_to_active(id);
        }

        if transport {
            self.transports.insert(id);
        }

        if private {
            self.ctx.phases.register(self.key, id);
        }

        self.push_event(MapEvent::Added(id));
        id

    }

    /// Remove an entity from the map immediately and give it back. Prefer
    /// [`Self::add_to_remove_list`] while the entity may still be referenced in the
    /// current tick.
    pub fn remove_from_map(&mut self, id: EntityId) -> Option<Entity> {

        if id.kind == EntityKind::Player {
            return self.remove_player(id);
        }

        let entity = self.entities.get(&id)?;
        let (active, private) = (entity.active, entity.private_owner.is_some());

        if active {
            self.remove_from_active(id);
        }

        if private {
            self.ctx.phases.unregister(self.key, id);
        }

        self.remove_from_grid(id);
        self.remove_from_transports(id);
        self.transports.swap_remove(&id);
        self.remove_list.swap_remove(&id);
        self.move_lists.forget(id);

        let mut entity = self.entities.swap_remove(&id)?;
        self.unindex_spawn(&entity);
        if id.kind == EntityKind::Corpse {
            self.corpses.remove(&entity);
        }

        entity.in_world = false;
        self.push_event(MapEvent::Removed(id));
        Some(entity)

    }

    /// Add a player to this map, its grid is loaded and becomes active.
    pub fn add_player(&mut self, mut entity: Entity) -> Result<EntityId, MapError> {

        let id = entity.id();
        if id.kind != EntityKind::Player {
            return self.add_to_map(entity);
        }

        if self.entities.contains_key(&id) {
            return Err(MapError::AlreadyInMap(id));
        }

        let cell = self.entity_cell(&entity)?;
        // Loading the grid for a player requires it to be known by the phase tracker.
        self.ctx.phases.register(self.key, id);

        let zone_id = self.ctx.terrain.zone_at(self.key.map_id, entity.position.pos);
        let mut ghost = false;
        if let Some(player) = entity.as_player_mut() {
            player.zone_id = zone_id;
            player.visible.clear();
            player.outgoing.clear();
            ghost = player.ghost;
        }

        entity.active = true;
        let position = entity.position;
        self.entities.insert(id, entity);
        self.ensure_grid_loaded_for_active_object(cell, id);

        let live = self.add_to_grid(id, cell);
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.in_world = live;
        }

        self.load_grids_in_range(position);

        self.players.insert(id);
        self.send_zone_dynamic_info(zone_id, id);

        if !ghost {
            self.convert_corpse_to_bones(id);
        }

        debug!("player {id} entered map {} at cell {cell}", self.key.map_id);
        self.push_event(MapEvent::Added(id));
        Ok(id)

    }

    /// Remove a player from this map and give it back.
    pub fn remove_player(&mut self, id: EntityId) -> Option<Entity> {

        if !self.players.swap_remove(&id) {
            return None;
        }

        self.ctx.phases.unregister(self.key, id);
        self.remove_from_grid(id);

        self.remove_from_transports(id);

        let mut entity = self.entities.swap_remove(&id)?;
        entity.in_world = false;
        debug!("player {id} left map {}", self.key.map_id);
        self.push_event(MapEvent::Removed(id));
        Some(entity)

    }

    /// Unboard an entity leaving the map from every transport.
    fn remove_from_transports(&mut self, id: EntityId) {
        for transport in &self.transports {
            if let Some(data) = self.entities.get_mut(transport).and_then(Entity::as_transport_mut) {
                data.passengers.swap_remove(&id);
            }
        }
    }

    /// Queue an entity to be destroyed at the end of the tick, players cannot be queued.
    pub fn add_to_remove_list(&mut self, id: EntityId) -> bool {
        if id.kind == EntityKind::Player {
            error!("player {id} cannot be added to the remove list of map {}", self.key.map_id);
            false
        } else if self.entities.contains_key(&id) {
            self.remove_list.insert(id)
        } else {
            false
        }
    }

    #[inline]
    pub fn is_in_remove_list(&self, id: EntityId) -> bool {
        self.remove_list.contains(&id)
    }

    /// Destroy every entity of the remove list, removals may queue other entities.
    pub(super) fn remove_all_objects_in_remove_list(&mut self) {
        while !self.remove_list.is_empty() {
            for id in mem::take(&mut self.remove_list) {
                match id.kind {
                    EntityKind::Player => {
                        error!("player {id} found in the remove list of map {}", self.key.map_id);
                    }
                    EntityKind::Corpse => {
                        self.remove_corpse(id);
                    }
                    EntityKind::Creature => {
                        if let Some(entity) = self.entities.get_mut(&id) {
                            self.ctx.combat.cleanup_before_delete(entity);
                        }
                        self.remove_from_map(id);
                    }
                    _ => {
                        self.remove_from_map(id);
                    }
                }
            }
        }
    }

    /// Despawn an entity at the end of the tick, optionally scheduling the respawn of
    /// its spawn after the spawn's respawn delay.
    pub fn despawn(&mut self, id: EntityId, schedule_respawn: bool) -> Result<(), MapError> {

        let entity = self.entities.get(&id).ok_or(MapError::UnknownEntity(id))?;

        if schedule_respawn {
            let kind = SpawnKind::from_entity_kind(id.kind).filter(|kind| kind.has_respawns());
            let delay = match &entity.data {
                EntityData::Creature(creature) => creature.respawn_delay,
                EntityData::GameObject(game_object) => game_object.respawn_delay,
                _ => 0,
            };
            if let (Some(kind), Some(spawn_id), Some(grid)) = (kind, entity.spawn_id, entity.home.grid()) {
                let record = RespawnRecord {
                    kind,
                    spawn_id,
                    entry: entity.entry,
                    due: self.now() + delay as u64,
                    grid_id: grid.id(),
                };
                self.save_respawn_time(record);
            }
        }

        self.add_to_remove_list(id);
        Ok(())

    }

    /// Kill a creature, its corpse decays after the configured delay and then respawns.
    pub fn kill_creature(&mut self, id: EntityId) -> Result<(), MapError> {

        let entity = self.entities.get_mut(&id).ok_or(MapError::UnknownEntity(id))?;
        self.ctx.combat.stop_combat(entity);
        let creature = entity.as_creature_mut().ok_or(MapError::UnknownEntity(id))?;

        creature.alive = false;
        creature.motion = None;
        creature.corpse_decay.reset(self.config.creature_corpse_decay);
        Ok(())

    }

    // =================== //
    //     TRANSPORTS      //
    // =================== //

    /// Board a passenger onto a transport, the passenger moves along with it.
    pub fn add_passenger(&mut self, transport: EntityId, passenger: EntityId) -> Result<(), MapError> {
        if !self.entities.contains_key(&passenger) {
            return Err(MapError::UnknownEntity(passenger));
        }
        let data = self.entities.get_mut(&transport)
            .and_then(Entity::as_transport_mut)
            .ok_or(MapError::UnknownEntity(transport))?;
        data.passengers.insert(passenger);
        Ok(())
    }

    pub fn remove_passenger(&mut self, transport: EntityId, passenger: EntityId) -> bool {
        self.entities.get_mut(&transport)
            .and_then(Entity::as_transport_mut)
            .is_some_and(|data| data.passengers.swap_remove(&passenger))
    }

}


#[cfg(test)]
mod tests {

    use crate::config::MapConfig;
    use crate::context::MapKey;
    use crate::entity::{Position, TransportData};
    use crate::grid::GridState;
    use crate::memory::MemoryContext;

    use super::*;

    fn map() -> (Map, MemoryContext) {
        let ctx = MemoryContext::new();
        (Map::new(MapKey::new(1, 0), MapConfig::default(), ctx.context(), 1000), ctx)
    }

    #[test]
    fn invalid_coords_do_not_allocate() {

        let (mut map, _) = map();
        let id = map.generate_id(EntityKind::Creature);
        let creature = Entity::creature(id, 1, Position::new(1.0e9, 0.0, 0.0, 0.0));
        assert!(matches!(map.add_to_map(creature), Err(MapError::InvalidCoord { .. })));

        assert!(matches!(map.load_grid_at(f32::NAN, 0.0), Err(MapError::InvalidCoord { .. })));
        assert_eq!(map.grid_at(-1.0e9, 0.0), None);
        assert_eq!(map.grid_count(), 0);
        assert_eq!(map.entity_count(), 0);

    }

    #[test]
    fn passive_entity_only_creates_grid() {

        let (mut map, _) = map();
        let pos = Position::new(200.0, -300.0, 0.0, 0.0);
        let id = map.generate_id(EntityKind::GameObject);
        map.add_to_map(Entity::game_object(id, 5, pos)).unwrap();

        let grid = pos.grid().unwrap();
        assert!(map.is_grid_created(grid));
        assert!(!map.is_grid_loaded(grid));
        assert_eq!(map.entity(id).unwrap().cell(), pos.cell());
        assert!(map.entity(id).unwrap().is_in_world());
        assert!(matches!(map.add_to_map(Entity::game_object(id, 5, pos)), Err(MapError::AlreadyInMap(_))));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn add_and_remove_grid_restores_cell() {

        let (mut map, _) = map();
        let pos = Position::new(0.0, 0.0, 0.0, 0.0);
        let cell = pos.cell().unwrap();
        let first = map.generate_id(EntityKind::Creature);
        map.add_to_map(Entity::creature(first, 1, pos)).unwrap();
        let second = map.generate_id(EntityKind::Creature);
        map.add_to_map(Entity::creature(second, 1, pos)).unwrap();

        let mut before = Vec::new();
        map.visit_no_create(cell, &mut crate::visit::FnVisitor::new(crate::visit::VisitFilter::ALL, |e: &Entity| before.push(e.id())));

        assert!(map.remove_from_grid(first));
        assert!(map.entity(first).unwrap().cell().is_none());
        assert!(!map.remove_from_grid(first));
        assert!(map.add_to_grid(first, cell));

        let mut after = Vec::new();
        map.visit_no_create(cell, &mut crate::visit::FnVisitor::new(crate::visit::VisitFilter::ALL, |e: &Entity| after.push(e.id())));
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn player_enters_and_leaves() {

        let (mut map, ctx) = map();
        let pos = Position::new(50.0, 50.0, 0.0, 0.0);
        let id = map.add_player(Entity::player(1, 77, pos)).unwrap();
        let grid = pos.grid().unwrap();

        assert_eq!(map.player_count(), 1);
        assert!(map.is_grid_loaded(grid));
        assert_eq!(map.grid_state(grid), Some(GridState::Active));
        assert!(ctx.phases.is_registered(map.key(), id));
        assert!(map.entity(id).unwrap().is_in_world());

        let player = map.remove_player(id).unwrap();
        assert!(!player.is_in_world());
        assert_eq!(map.player_count(), 0);
        assert!(!ctx.phases.is_registered(map.key(), id));
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn remove_list_destroys_at_once() {

        let (mut map, ctx) = map();
        let pos = Position::new(0.0, 0.0, 0.0, 0.0);
        let creature = map.generate_id(EntityKind::Creature);
        map.add_to_map(Entity::creature(creature, 1, pos)).unwrap();
        let effect = map.generate_id(EntityKind::DynamicObject);
        map.add_to_map(Entity::dynamic_object(effect, creature, pos, None)).unwrap();
        let player = map.add_player(Entity::player(1, 1, pos)).unwrap();

        assert!(map.add_to_remove_list(creature));
        assert!(map.add_to_remove_list(effect));
        assert!(!map.add_to_remove_list(player));
        assert!(map.is_in_remove_list(creature));

        map.remove_all_objects_in_remove_list();
        assert!(!map.contains_entity(creature));
        assert!(!map.contains_entity(effect));
        assert!(map.contains_entity(player));
        assert_eq!(ctx.combat.calls(), [crate::memory::CombatCall::Cleanup(creature)]);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn despawn_schedules_respawn() {

        let (mut map, ctx) = map();
        let pos = Position::new(0.0, 0.0, 0.0, 0.0);
        let id = map.generate_id(EntityKind::Creature);
        let mut creature = Entity::creature(id, 1, pos).with_spawn(9);
        creature.as_creature_mut().unwrap().respawn_delay = 60;
        map.add_to_map(creature).unwrap();

        map.despawn(id, true).unwrap();
        map.remove_all_objects_in_remove_list();

        let record = map.respawn_time(SpawnKind::Creature, 9).unwrap();
        assert_eq!(record.due, 1060);
        assert_eq!(ctx.store.respawn(map.key(), SpawnKind::Creature, 9).map(|r| r.due), Some(1060));
        assert_eq!(map.entities_by_spawn(SpawnKind::Creature, 9).count(), 0);

    }

    #[test]
    fn transport_passengers() {

        let (mut map, _) = map();
        let pos = Position::new(0.0, 0.0, 0.0, 0.0);
        let boat = map.generate_id(EntityKind::GameObject);
        let mut entity = Entity::game_object(boat, 3, pos);
        if let EntityData::GameObject(data) = &mut entity.data {
            data.transport = Some(TransportData::default());
        }
        map.add_to_map(entity).unwrap();
        let player = map.add_player(Entity::player(1, 1, pos)).unwrap();

        map.add_passenger(boat, player).unwrap();
        assert!(map.entity(boat).unwrap().as_transport().unwrap().passengers.contains(&player));
        map.remove_player(player);
        assert!(map.entity(boat).unwrap().as_transport().unwrap().passengers.is_empty());
        assert!(!map.remove_passenger(boat, player));

        // Creatures leaving the map are unboarded as well.
        let creature = map.generate_id(EntityKind::Creature);
        map.add_to_map(Entity::creature(creature, 1, pos)).unwrap();
        map.add_passenger(boat, creature).unwrap();
        map.despawn(creature, false).unwrap();
        map.remove_all_objects_in_remove_list();
        assert!(!map.contains_entity(creature));
        assert!(map.entity(boat).unwrap().as_transport().unwrap().passengers.is_empty());
        assert_eq!(map.dangling_references(), 0);

    }

}
