//! Spawn groups of a map, their active state and their condition driven spawning.

use tracing::{debug, error, instrument};

use crate::entity::{EntityData, EntityId};
use crate::spawn::{SpawnGroupData, SpawnGroupFlags};

use super::{Map, MapError};


impl Map {

    pub(super) fn load_spawn_groups(&mut self) {

        let map_id = self.key.map_id;
        self.spawn_groups.insert(crate::spawn::DEFAULT_SPAWN_GROUP, SpawnGroupData::default_group(map_id));

        for group in self.ctx.persistence.map_spawn_groups(map_id) {
            if group.map_id != map_id {
                continue;
            }
            self.spawn_groups.insert(group.group_id, group);
        }

    }

    #[inline]
    pub fn spawn_group_data(&self, group_id: u32) -> Option<&SpawnGroupData> {
        self.spawn_groups.get(&group_id)
    }

    /// System groups are always active, other groups are active by default unless they
    /// are manually spawned, toggling inverts the default.
    pub fn is_spawn_group_active(&self, group_id: u32) -> bool {

        let Some(group) = self.spawn_groups.get(&group_id) else {
            error!("tried to query state of non-existing spawn group {group_id} in map {}", self.key.map_id);
            return false;
        };

        if group.is_system() {
            return true;
        }

        let manual = group.flags.contains(SpawnGroupFlags::MANUAL_SPAWN);
        self.toggled_groups.contains(&group_id) != !manual

    }

    /// Set the active state of a spawn group, without spawning or despawning anything.
    pub fn set_spawn_group_active(&mut self, group_id: u32, state: bool) -> Result<(), MapError> {

        let group = self.spawn_groups.get(&group_id).ok_or(MapError::UnknownSpawnGroup(group_id))?;
        if group.is_system() {
            return Err(MapError::SystemSpawnGroup(group_id));
        }

        let manual = group.flags.contains(SpawnGroupFlags::MANUAL_SPAWN);
        if state != !manual {
            self.toggled_groups.insert(group_id);
        } else {
            self.toggled_groups.remove(&group_id);
        }

        Ok(())

    }

    /// Activate a spawn group and spawn its members whose grid is loaded. Members with
    /// a pending respawn are skipped unless respawn times are ignored, already spawned
    /// members are only duplicated when forced.
    pub fn spawn_group_spawn(&mut self, group_id: u32, ignore_respawn: bool, force: bool) -> Result<Vec<EntityId>, MapError> {

        self.set_spawn_group_active(group_id, true)?;

        let mut spawned = Vec::new();
        for (kind, spawn_id) in self.ctx.persistence.group_spawns(group_id) {

            if !kind.has_respawns() {
                continue;
            }

            if force || ignore_respawn {
                self.remove_respawn_time(kind, spawn_id, true);
            }

            if self.respawns.get(kind, spawn_id).is_some() {
                continue;
            }

            if !force {
                let exists = self.entities_by_spawn(kind, spawn_id)
                    .filter_map(|id| self.entities.get(&id))
                    .any(|entity| match &entity.data {
                        EntityData::Creature(creature) => creature.alive,
                        _ => true,
                    });
                if exists {
                    continue;
                }
            }

            let Some(data) = self.ctx.persistence.spawn_data(kind, spawn_id) else {
                continue;
            };

            debug_assert_eq!(data.map_id, self.key.map_id, "spawn group member of another map");

            // Members in unloaded grids are spawned by the grid loader.
            if let Some(id) = self.spawn_from_data(&data) {
                spawned.push(id);
            }

        }

        debug!("spawned {} entities of spawn group {group_id} in map {}", spawned.len(), self.key.map_id);
        Ok(spawned)

    }

    /// Deactivate a spawn group and queue its spawned members for removal, returning
    /// how many were queued.
    pub fn spawn_group_despawn(&mut self, group_id: u32, delete_respawn_times: bool) -> Result<usize, MapError> {

        let group = self.spawn_groups.get(&group_id).ok_or(MapError::UnknownSpawnGroup(group_id))?;
        if group.is_system() {
            return Err(MapError::SystemSpawnGroup(group_id));
        }

        let mut despawned = Vec::new();
        for (kind, spawn_id) in self.ctx.persistence.group_spawns(group_id) {
            if delete_respawn_times {
                self.remove_respawn_time(kind, spawn_id, true);
            }
            despawned.extend(self.entities_by_spawn(kind, spawn_id));
        }

        for &id in &despawned {
            self.add_to_remove_list(id);
        }

        self.set_spawn_group_active(group_id, false)?;
        debug!("despawned {} entities of spawn group {group_id} in map {}", despawned.len(), self.key.map_id);
        Ok(despawned.len())

    }

    /// Reconcile the active state of non-system groups with their conditions.
    #[instrument(skip_all)]
    pub(super) fn update_spawn_group_conditions(&mut self) {

        let mut group_ids = self.spawn_groups.values()
            .filter(|group| !group.is_system())
            .map(|group| (group.group_id, group.flags))
            .collect::<Vec<_>>();

        group_ids.sort_unstable_by_key(|&(group_id, _)| group_id);

        for (group_id, flags) in group_ids {

            let active = self.is_spawn_group_active(group_id);
            let should_be_active = self.ctx.rules.spawn_group_condition(self.key, group_id);
            let despawn = flags.contains(SpawnGroupFlags::DESPAWN_ON_CONDITION_FAILURE);

            // Manual groups are never spawned by their condition.
            let result = if flags.contains(SpawnGroupFlags::MANUAL_SPAWN) {
                if active && !should_be_active && despawn {
                    self.spawn_group_despawn(group_id, true).map(drop)
                } else {
                    Ok(())
                }
            } else if active == should_be_active {
                Ok(())
            } else if should_be_active {
                self.spawn_group_spawn(group_id, false, false).map(drop)
            } else if despawn {
                self.spawn_group_despawn(group_id, true).map(drop)
            } else {
                self.set_spawn_group_active(group_id, false)
            };

            if let Err(e) = result {
                error!("failed to update spawn group {group_id} of map {}: {e}", self.key.map_id);
            }

        }

    }

}
