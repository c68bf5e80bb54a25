//! Relocation of entities. Moves within a cell are applied immediately, moves across
//! cells of non-player entities are deferred to per-kind move lists flushed at the end
//! of the tick.

use std::mem;

use tracing::{debug, instrument, warn};

use crate::entity::{EntityId, EntityKind, MoveState, PendingMove, Position};

use super::{Map, MapError};


/// The deferred move lists, one for each movable kind except players.
#[derive(Debug, Default)]
pub(super) struct MoveLists {
    lists: [Vec<EntityId>; 4],
}

impl MoveLists {

    fn index(kind: EntityKind) -> Option<usize> {
        match kind {
            EntityKind::Creature => Some(0),
            EntityKind::GameObject => Some(1),
            EntityKind::DynamicObject => Some(2),
            EntityKind::AreaTrigger => Some(3),
            EntityKind::Player |
            EntityKind::Corpse => None,
        }
    }

    fn push(&mut self, id: EntityId) {
        if let Some(index) = Self::index(id.kind) {
            self.lists[index].push(id);
        }
    }

    /// Drop an entity from its list, used when the entity leaves the map.
    pub(super) fn forget(&mut self, id: EntityId) {
        if let Some(index) = Self::index(id.kind) {
            self.lists[index].retain(|&other| other != id);
        }
    }

    fn take(&mut self, kind: EntityKind) -> Vec<EntityId> {
        Self::index(kind).map(|index| mem::take(&mut self.lists[index])).unwrap_or_default()
    }

    pub(super) fn clear(&mut self) -> Vec<EntityId> {
        self.lists.iter_mut().flat_map(mem::take).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

}


impl Map {

    /// Relocate an entity of any kind, players are relocated immediately.
    pub fn relocate(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {
        match id.kind {
            EntityKind::Player => self.player_relocation(id, dest),
            EntityKind::Corpse => Err(MapError::UnknownEntity(id)),
            kind => self.entity_relocation(id, kind, dest, true),
        }
    }

    /// Relocate a player immediately, the destination grid is loaded if needed.
    pub fn player_relocation(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {

        let entity = self.entities.get(&id)
            .filter(|entity| entity.kind() == EntityKind::Player)
            .ok_or(MapError::UnknownEntity(id))?;

        let new_cell = dest.cell().ok_or_else(|| {
            warn!("player {id} relocated to invalid coordinates ({}, {})", dest.pos.x, dest.pos.y);
            MapError::InvalidCoord { x: dest.pos.x, y: dest.pos.y }
        })?;

        let old_cell = entity.cell;
        if old_cell != Some(new_cell) {
            self.remove_from_grid(id);
            if old_cell.map_or(true, |old_cell| old_cell.diff_grid(new_cell)) {
                self.ensure_grid_loaded_for_active_object(new_cell, id);
            }
            let live = self.add_to_grid(id, new_cell);
            debug_assert!(live, "player {id} not indexed in a live bag");
            self.load_grids_in_range(dest);
        }

        self.apply_position(id, dest);

        let zone_id = self.ctx.terrain.zone_at(self.key.map_id, dest.pos);
        let Some(player) = self.entities.get_mut(&id).and_then(|entity| entity.as_player_mut()) else {
            return Ok(());
        };

        if player.zone_id != zone_id {
            player.zone_id = zone_id;
            self.send_zone_dynamic_info(zone_id, id);
        }

        Ok(())

    }

    /// Relocate a creature, moves across cells are deferred to the move list. If the
    /// destination grid is not loaded when flushed, it falls back to its respawn point.
    #[inline]
    pub fn creature_relocation(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {
        self.entity_relocation(id, EntityKind::Creature, dest, true)
    }

    #[inline]
    pub fn game_object_relocation(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {
        self.entity_relocation(id, EntityKind::GameObject, dest, true)
    }

    #[inline]
    pub fn dynamic_object_relocation(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {
        self.entity_relocation(id, EntityKind::DynamicObject, dest, false)
    }

    #[inline]
    pub fn area_trigger_relocation(&mut self, id: EntityId, dest: Position) -> Result<(), MapError> {
        self.entity_relocation(id, EntityKind::AreaTrigger, dest, false)
    }

    /// Common relocation of non-player entities. Without respawn fallback a move toward
    /// a grid that does not exist is ignored.
    pub(super) fn entity_relocation(&mut self, id: EntityId, kind: EntityKind, dest: Position, respawn_relocation_on_fail: bool) -> Result<(), MapError> {

        let entity = self.entities.get(&id)
            .filter(|entity| entity.kind() == kind)
            .ok_or(MapError::UnknownEntity(id))?;

        let new_cell = dest.cell().ok_or_else(|| {
            warn!("entity {id} relocated to invalid coordinates ({}, {})", dest.pos.x, dest.pos.y);
            MapError::InvalidCoord { x: dest.pos.x, y: dest.pos.y }
        })?;

        let old_cell = entity.cell.ok_or(MapError::UnknownEntity(id))?;

        if !respawn_relocation_on_fail && !self.is_grid_created(new_cell.grid()) {
            return Ok(());
        }

        if old_cell != new_cell {
            self.add_to_move_list(id, dest, respawn_relocation_on_fail);
        } else {
            self.apply_position(id, dest);
            self.remove_from_move_list(id);
        }

        Ok(())

    }

    fn add_to_move_list(&mut self, id: EntityId, dest: Position, home_fallback: bool) {

        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };

        if entity.pending_move.state == MoveState::None {
            self.move_lists.push(id);
        }

        entity.pending_move = PendingMove { state: MoveState::Active, dest, home_fallback };

    }

    /// Cancel a pending move, the entity stays in its list until the next flush.
    fn remove_from_move_list(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.get_mut(&id) {
            if entity.pending_move.state == MoveState::Active {
                entity.pending_move.state = MoveState::Inactive;
            }
        }
    }

    /// Number of entities currently in move lists, cancelled ones included.
    #[inline]
    pub fn pending_moves(&self) -> usize {
        self.move_lists.len()
    }

    fn apply_position(&mut self, id: EntityId, dest: Position) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.position = dest;
            entity.relocation_notify = true;
        }
    }

    /// Move the index of an entity to the cell of the destination, without changing its
    /// position. Return false if the destination grid is not available.
    fn entity_cell_relocation(&mut self, id: EntityId, dest: Position) -> bool {

        let Some(entity) = self.entities.get(&id) else {
            return false;
        };

        let active = entity.active;
        let (Some(old_cell), Some(new_cell)) = (entity.cell, dest.cell()) else {
            return false;
        };

        if old_cell == new_cell {
            return true;
        }

        if old_cell.diff_grid(new_cell) {
            if active {
                self.ensure_grid_loaded_for_active_object(new_cell, id);
            } else if !self.is_grid_loaded(new_cell.grid()) {
                return false;
            }
        }

        self.remove_from_grid(id);
        self.add_to_grid(id, new_cell);
        if active {
            self.load_grids_in_range(dest);
        }

        true

    }

    /// Apply all deferred moves of a kind.
    fn move_all_in_move_list(&mut self, kind: EntityKind) {

        for id in self.move_lists.take(kind) {

            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };

            let pending = entity.pending_move;
            entity.pending_move.state = MoveState::None;
            if pending.state != MoveState::Active || !entity.in_world {
                continue;
            }

            if self.entity_cell_relocation(id, pending.dest) {
                self.apply_position(id, pending.dest);
            } else if pending.home_fallback && self.respawn_relocation(id, false) {
                debug!("entity {id} moved to its respawn point, destination grid not loaded");
            } else {
                debug!("entity {id} left in place, destination grid not loaded");
            }

        }

    }

    /// Flush every move list.
    #[instrument(skip_all)]
    pub(super) fn move_all_in_move_lists(&mut self) {
        self.move_all_in_move_list(EntityKind::Creature);
        self.move_all_in_move_list(EntityKind::GameObject);
        self.move_all_in_move_list(EntityKind::DynamicObject);
        self.move_all_in_move_list(EntityKind::AreaTrigger);
    }

    /// Move an entity back to its respawn point. With `diff_grid_only`, nothing is done
    /// if the respawn point is in the current grid. Return false if the respawn grid is
    /// not available.
    fn respawn_relocation(&mut self, id: EntityId, diff_grid_only: bool) -> bool {

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };

        let home = entity.home;
        let (Some(cell), Some(home_cell)) = (entity.cell, home.cell()) else {
            return false;
        };

        if diff_grid_only && !cell.diff_grid(home_cell) {
            return true;
        }

        if let Some(creature) = entity.as_creature_mut() {
            creature.motion = None;
        }

        if id.kind == EntityKind::Creature {
            self.ctx.combat.stop_combat(entity);
        }

        if self.entity_cell_relocation(id, home) {
            self.apply_position(id, home);
            true
        } else {
            false
        }

    }

    /// Move a creature back to its respawn point, see the grid evacuator.
    #[inline]
    pub fn creature_respawn_relocation(&mut self, id: EntityId, diff_grid_only: bool) -> bool {
        id.kind == EntityKind::Creature && self.respawn_relocation(id, diff_grid_only)
    }

    #[inline]
    pub fn game_object_respawn_relocation(&mut self, id: EntityId, diff_grid_only: bool) -> bool {
        id.kind == EntityKind::GameObject && self.respawn_relocation(id, diff_grid_only)
    }

}
