//! Active entities, exempt from distance culling. Active creatures with a spawn protect
//! their respawn grid from being unloaded.

use tracing::{debug, error};

use crate::coord::{CellArea, GridCoord};
use crate::entity::{Entity, EntityId, EntityKind, Position};

use super::{Map, MapError};


impl Map {

    /// The grid protected by an active entity, only non-pet creatures with a spawn
    /// protect their respawn grid.
    fn protected_grid(entity: &Entity) -> Option<GridCoord> {
        if entity.kind() == EntityKind::Creature && !entity.is_pet() && entity.spawn_id.is_some() {
            entity.home.grid()
        } else {
            None
        }
    }

    /// Register an entity in the active list, players have their own list.
    pub(super) fn add_to_active(&mut self, id: EntityId) {

        if id.kind == EntityKind::Player {
            return;
        }

        let Some(entity) = self.entities.get(&id) else {
            return;
        };

        if !self.active.insert(id) {
            return;
        }

        if let Some(home) = Self::protected_grid(entity) {
            self.ensure_grid_created(home);
            if let Some(grid) = self.grids.get_mut(home) {
                grid.increment_protection();
            }
        }

    }

    /// Unregister an entity from the active list, releasing the protection it holds.
    pub(super) fn remove_from_active(&mut self, id: EntityId) {

        if !self.active.swap_remove(&id) {
            return;
        }

        let Some(home) = self.entities.get(&id).and_then(Self::protected_grid) else {
            return;
        };

        match self.grids.get_mut(home) {
            Some(grid) => grid.decrement_protection(),
            None => error!("active entity {id} protects grid {home} which does not exist"),
        }

    }

    /// Make an entity active or not, players are always active.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> Result<(), MapError> {

        let entity = self.entities.get_mut(&id).ok_or(MapError::UnknownEntity(id))?;
        if id.kind == EntityKind::Player || entity.active == active {
            return Ok(());
        }

        entity.active = active;
        let in_world = entity.in_world;
        let cell = entity.cell;
        let position = entity.position;

        if !in_world {
            return Ok(());
        }

        if active {
            self.add_to_active(id);
            if let Some(cell) = cell {
                self.ensure_grid_loaded_for_active_object(cell, id);
                self.load_grids_in_range(position);
            }
        } else {
            self.remove_from_active(id);
        }

        debug!("entity {id} active: {active}");
        Ok(())

    }

    /// Load every grid an active entity standing at the given position can see into,
    /// its own grid is expected to be loaded already.
    pub(super) fn load_grids_in_range(&mut self, position: Position) {

        let mut seen = Vec::with_capacity(4);
        for cell in CellArea::around(position.pos.x, position.pos.y, self.config.visibility_distance) {
            let coord = cell.grid();
            if !seen.contains(&coord) {
                seen.push(coord);
                if self.ensure_grid_loaded(cell) {
                    debug!("loaded grid {coord} in visibility range of ({}, {})", position.pos.x, position.pos.y);
                }
            }
        }

    }

    /// Return true if a player or an active entity is close enough to the given grid to
    /// see into it.
    pub fn active_objects_near_grid(&self, coord: GridCoord) -> bool {
        let area = coord.cells().expand(self.config.visibility_cells());
        self.players.iter()
            .chain(self.active.iter())
            .filter_map(|id| self.entities.get(id).and_then(Entity::cell))
            .any(|cell| area.contains(cell))
    }

}


#[cfg(test)]
mod tests {

    use crate::context::MapKey;
    use crate::config::MapConfig;
    use crate::entity::{Entity, EntityKind, Position};
    use crate::memory::MemoryContext;

    use super::*;

    fn map() -> Map {
        Map::new(MapKey::new(1, 0), MapConfig::default(), MemoryContext::new().context(), 1000)
    }

    #[test]
    fn active_creature_protects_home_grid() {

        let mut map = map();
        let home = Position::new(100.0, 100.0, 0.0, 0.0);
        let id = map.generate_id(EntityKind::Creature);
        let creature = Entity::creature(id, 1, home).with_spawn(42).with_active(true);
        map.add_to_map(creature).unwrap();

        let grid = home.grid().unwrap();
        assert_eq!(map.grid_protection(grid), Some(1));
        assert!(map.active_entities().any(|active| active == id));

        map.set_active(id, false).unwrap();
        assert_eq!(map.grid_protection(grid), Some(0));
        map.set_active(id, true).unwrap();
        assert_eq!(map.grid_protection(grid), Some(1));

        map.remove_from_map(id);
        assert_eq!(map.grid_protection(grid), Some(0));

    }

    #[test]
    fn pets_do_not_protect() {
        let mut map = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        let id = map.generate_id(EntityKind::Creature);
        let mut pet = Entity::creature(id, 1, pos).with_spawn(7).with_active(true);
        pet.as_creature_mut().unwrap().pet = true;
        map.add_to_map(pet).unwrap();
        assert_eq!(map.grid_protection(pos.grid().unwrap()), Some(0));
    }

    #[test]
    fn near_grid_uses_visibility() {

        let mut map = map();
        let pos = Position::new(10.0, 10.0, 0.0, 0.0);
        map.add_player(Entity::player(1, 1, pos)).unwrap();

        let grid = pos.grid().unwrap();
        assert!(map.active_objects_near_grid(grid));
        let far = GridCoord::new(grid.x + 3, grid.y).unwrap();
        assert!(!map.active_objects_near_grid(far));

    }

}
