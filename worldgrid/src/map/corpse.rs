//! Player corpses and bones. Corpses are indexed by cell and owner so that they can be
//! brought back in the world when their grid loads, and expire after a while.

use std::collections::HashMap;

use indexmap::IndexSet;

use tracing::{debug, warn};

use crate::context::{CorpseRecord, PersistenceError};
use crate::coord::GridCoord;
use crate::entity::{CorpseType, Entity, EntityId, EntityKind};
use crate::grid::GridState;

use super::{Map, MapError, MapEvent};


/// Directories of the corpses of a map, corpses themselves are in the entity directory.
#[derive(Debug, Default)]
pub(super) struct CorpseDirectory {
    /// Corpses by cell identifier, including those whose grid is not loaded.
    by_cell: HashMap<u32, IndexSet<EntityId>>,
    /// Resurrectable corpses by owner.
    by_owner: HashMap<EntityId, EntityId>,
    bones: IndexSet<EntityId>,
}

impl CorpseDirectory {

    fn insert(&mut self, corpse: &Entity) {
        let Some(data) = corpse.as_corpse() else { return };
        if let Some(cell) = corpse.position.cell() {
            self.by_cell.entry(cell.id()).or_default().insert(corpse.id());
        }
        match data.corpse_type {
            CorpseType::Resurrectable => { self.by_owner.insert(data.owner, corpse.id()); }
            CorpseType::Bones => { self.bones.insert(corpse.id()); }
        }
    }

    pub(super) fn remove(&mut self, corpse: &Entity) {
        let Some(data) = corpse.as_corpse() else { return };
        if let Some(cell) = corpse.position.cell() {
            if let Some(ids) = self.by_cell.get_mut(&cell.id()) {
                ids.swap_remove(&corpse.id());
                if ids.is_empty() {
                    self.by_cell.remove(&cell.id());
                }
            }
        }
        match data.corpse_type {
            CorpseType::Resurrectable => {
                if self.by_owner.get(&data.owner) == Some(&corpse.id()) {
                    self.by_owner.remove(&data.owner);
                }
            }
            CorpseType::Bones => { self.bones.swap_remove(&corpse.id()); }
        }
    }

    /// Iterate every corpse of the directory.
    pub(super) fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.by_cell.values().flatten().copied()
    }

    fn in_cell(&self, cell_id: u32) -> Vec<EntityId> {
        self.by_cell.get(&cell_id).map(|ids| ids.iter().copied().collect()).unwrap_or_default()
    }

}


impl Map {

    /// Load persisted corpses of this map, called once at creation.
    pub(super) fn load_corpses(&mut self) {

        let records = match self.ctx.persistence.load_corpses(self.key) {
            Ok(records) => records,
            Err(PersistenceError::Unsupported) => return,
            Err(e) => {
                warn!("failed to load corpses of map {}: {e}", self.key.map_id);
                return;
            }
        };

        let count = records.len();
        for record in records {
            let id = self.generate_id(EntityKind::Corpse);
            let corpse = Entity::corpse(id, record.owner, record.position, record.corpse_type, record.created);
            if let Err(e) = self.insert_corpse(corpse, false) {
                warn!("failed to restore corpse of {}: {e}", record.owner);
            }
        }

        debug!("loaded {count} corpses in map {}", self.key.map_id);

    }

    /// Add a corpse to this map. A corpse whose grid exists but is not loaded is kept
    /// aside until the grid loads. Resurrectable corpses are persisted.
    pub fn add_corpse(&mut self, corpse: Entity) -> Result<EntityId, MapError> {
        self.insert_corpse(corpse, true)
    }

    fn insert_corpse(&mut self, corpse: Entity, persist: bool) -> Result<EntityId, MapError> {

        let id = corpse.id();
        let data = corpse.as_corpse().ok_or(MapError::UnknownEntity(id))?;
        if self.entities.contains_key(&id) {
            return Err(MapError::AlreadyInMap(id));
        }

        let cell = self.entity_cell(&corpse)?;
        let owner = data.owner;
        let resurrectable = data.corpse_type == CorpseType::Resurrectable;

        // An owner has a single resurrectable corpse.
        if resurrectable {
            if let Some(previous) = self.corpses.by_owner.get(&owner).copied() {
                self.remove_corpse(previous);
            }
        }

        if persist && resurrectable {
            let record = CorpseRecord {
                owner,
                position: corpse.position,
                corpse_type: CorpseType::Resurrectable,
                created: data.created,
            };
            if let Err(e) = self.ctx.persistence.save_corpse(self.key, &record) {
                if e != PersistenceError::Unsupported {
                    warn!("failed to save corpse of {owner}: {e}");
                }
            }
        }

        self.corpses.insert(&corpse);

        if self.is_grid_created(cell.grid()) {
            Ok(self.insert_in_world(corpse, cell))
        } else {
            self.entities.insert(id, corpse);
            self.push_event(MapEvent::Added(id));
            Ok(id)
        }

    }

    /// Remove a corpse from the map and its directories.
    pub fn remove_corpse(&mut self, id: EntityId) -> Option<Entity> {
        if id.kind != EntityKind::Corpse {
            return None;
        }
        self.remove_from_map(id)
    }

    /// The resurrectable corpse of an owner.
    pub fn corpse_by_owner(&self, owner: EntityId) -> Option<EntityId> {
        self.corpses.by_owner.get(&owner).copied()
    }

    #[inline]
    pub fn bones_count(&self) -> usize {
        self.corpses.bones.len()
    }

    /// Corpses located in a grid, whether the grid is loaded or not.
    pub fn corpses_in_grid(&self, coord: GridCoord) -> Vec<EntityId> {
        coord.cells().iter().flat_map(|cell| self.corpses.in_cell(cell.id())).collect()
    }

    /// Replace the resurrectable corpse of an owner by bones. Bones are not created if
    /// the grid is about to be unloaded. Return the bones if created.
    pub fn convert_corpse_to_bones(&mut self, owner: EntityId) -> Option<EntityId> {

        let id = self.corpse_by_owner(owner)?;
        let corpse = self.remove_corpse(id)?;

        match self.ctx.persistence.delete_corpse(self.key, owner) {
            Ok(()) | Err(PersistenceError::NotFound | PersistenceError::Unsupported) => {}
            Err(e) => warn!("failed to delete corpse of {owner}: {e}"),
        }

        let grid = corpse.position.grid()?;
        if self.grid_state(grid) == Some(GridState::Removal) {
            return None;
        }

        let bones_id = self.generate_id(EntityKind::Corpse);
        let bones = Entity::corpse(bones_id, owner, corpse.position, CorpseType::Bones, self.now());
        self.add_corpse(bones).ok()

    }

    /// Expire old corpses, resurrectable corpses become bones and old bones are removed.
    pub(super) fn remove_old_corpses(&mut self) {

        let now = self.now();
        let created = |map: &Map, id: &EntityId| map.entities.get(id)
            .and_then(Entity::as_corpse)
            .map(|data| data.created)
            .unwrap_or(0);

        let expired_owners = self.corpses.by_owner.iter()
            .filter(|(_, id)| created(self, id) + self.config.player_corpse_expiry < now)
            .map(|(owner, _)| *owner)
            .collect::<Vec<_>>();

        for owner in expired_owners {
            self.convert_corpse_to_bones(owner);
        }

        let expired_bones = self.corpses.bones.iter()
            .filter(|id| created(self, id) + self.config.bones_expiry < now)
            .copied()
            .collect::<Vec<_>>();

        for id in expired_bones {
            self.remove_corpse(id);
        }

    }

    /// Bring the corpses of a freshly loaded grid in the world, return their count.
    pub(super) fn load_grid_corpses(&mut self, coord: GridCoord) -> usize {

        let mut count = 0;
        for cell in coord.cells() {

            for id in self.corpses.in_cell(cell.id()) {

                let Some(corpse) = self.entities.get(&id) else {
                    continue;
                };

                if corpse.in_world {
                    continue;
                }

                // Pending corpses are indexed in the pending bag, reindex them live.
                if corpse.cell.is_some() {
                    self.remove_from_grid(id);
                }

                if self.add_to_grid(id, cell) {
                    if let Some(corpse) = self.entities.get_mut(&id) {
                        corpse.in_world = true;
                    }
                    count += 1;
                }

            }

        }

        count

    }

}


#[cfg(test)]
mod tests {

    use crate::config::{MapConfig, DAY, HOUR};
    use crate::context::MapKey;
    use crate::entity::Position;
    use crate::memory::MemoryContext;

    use super::*;

    fn map() -> (Map, MemoryContext) {
        let ctx = MemoryContext::new();
        (Map::new(MapKey::new(1, 0), MapConfig::default(), ctx.context(), 1000), ctx)
    }

    fn owner() -> EntityId {
        EntityId::new(EntityKind::Player, 5)
    }

    #[test]
    fn pending_corpse_enters_world_on_load() {

        let (mut map, ctx) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        let grid = pos.grid().unwrap();
        map.ensure_grid_created(grid);

        let id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(id, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();
        assert!(!map.entity(id).unwrap().is_in_world());
        assert_eq!(ctx.store.corpse_count(map.key()), 1);
        assert_eq!(map.corpse_by_owner(owner()), Some(id));
        assert_eq!(map.dangling_references(), 0);

        // A pending corpse claiming to be in world is not indexed in a live bag.
        map.entity_mut(id).unwrap().in_world = true;
        assert_eq!(map.dangling_references(), 1);
        map.entity_mut(id).unwrap().in_world = false;

        map.load_grid_at(100.0, 100.0).unwrap();
        assert!(map.entity(id).unwrap().is_in_world());
        assert_eq!(map.corpses_in_grid(grid), [id]);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn corpse_without_grid_waits() {

        let (mut map, _) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        let id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(id, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();
        assert_eq!(map.grid_count(), 0);
        assert!(map.entity(id).unwrap().cell().is_none());

        map.load_grid_at(100.0, 100.0).unwrap();
        assert!(map.entity(id).unwrap().is_in_world());

    }

    #[test]
    fn convert_to_bones() {

        let (mut map, ctx) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        map.load_grid_at(100.0, 100.0).unwrap();
        let id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(id, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();

        let bones = map.convert_corpse_to_bones(owner()).unwrap();
        assert!(!map.contains_entity(id));
        assert_eq!(map.corpse_by_owner(owner()), None);
        assert_eq!(map.bones_count(), 1);
        assert_eq!(ctx.store.corpse_count(map.key()), 0);
        assert_eq!(map.entity(bones).unwrap().as_corpse().unwrap().corpse_type, CorpseType::Bones);
        assert!(map.convert_corpse_to_bones(owner()).is_none());

    }

    #[test]
    fn no_bones_in_removal_grid() {
        let (mut map, _) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        map.load_grid_at(100.0, 100.0).unwrap();
        map.grids.get_mut(pos.grid().unwrap()).unwrap().set_state(GridState::Removal);
        let id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(id, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();
        assert!(map.convert_corpse_to_bones(owner()).is_none());
        assert_eq!(map.bones_count(), 0);
    }

    #[test]
    fn old_corpses_expire() {

        let (mut map, _) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        map.load_grid_at(100.0, 100.0).unwrap();

        let id = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(id, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();

        map.time_ms += 3 * DAY * 1000 + 1000;
        map.remove_old_corpses();
        assert!(!map.contains_entity(id));
        assert_eq!(map.bones_count(), 1);

        map.time_ms += HOUR * 1000 + 1000;
        map.remove_old_corpses();
        assert_eq!(map.bones_count(), 0);
        assert_eq!(map.dangling_references(), 0);

    }

    #[test]
    fn second_corpse_replaces_first() {
        let (mut map, _) = map();
        let pos = Position::new(100.0, 100.0, 0.0, 0.0);
        let first = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(first, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();
        let second = map.generate_id(EntityKind::Corpse);
        map.add_corpse(Entity::corpse(second, owner(), pos, CorpseType::Resurrectable, map.now())).unwrap();
        assert!(!map.contains_entity(first));
        assert_eq!(map.corpse_by_owner(owner()), Some(second));
    }

}
