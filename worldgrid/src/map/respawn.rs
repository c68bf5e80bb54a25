//! Respawn management of a map: persisted respawn records, eligibility checks and the
//! processing of due respawns.

use tracing::{debug, error, instrument, trace, warn};

use crate::config::WEEK;
use crate::coord::GridCoord;
use crate::context::PersistenceError;
use crate::entity::EntityData;
use crate::respawn::RespawnRecord;
use crate::spawn::{SpawnData, SpawnGroupFlags, SpawnKind};

use super::{Map, MapError, MapEvent};


/// Outcome of the eligibility check of a due respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RespawnCheck {
    /// The spawn can be materialized.
    Eligible,
    /// The record is removed without respawning.
    Delete,
    /// The respawn is gated by another spawn, check again at the given time.
    Reschedule(u64),
}


impl Map {

    /// Load the persisted respawn records of this map, records of unknown spawns are
    /// deleted from the store.
    pub(super) fn load_respawn_times(&mut self) {

        let records = match self.ctx.persistence.load_respawns(self.key) {
            Ok(records) => records,
            Err(PersistenceError::Unsupported) => return,
            Err(e) => {
                warn!("failed to load respawn times of map {}: {e}", self.key.map_id);
                return;
            }
        };

        for record in records {
            if self.ctx.persistence.spawn_data(record.kind, record.spawn_id).is_none() {
                error!("respawn time of unknown spawn {:?} {} in map {}, discarded", record.kind, record.spawn_id, self.key.map_id);
                self.delete_respawn_from_store(record.kind, record.spawn_id);
                continue;
            }
            self.add_respawn_info(record);
        }

        debug!("loaded {} respawn times in map {}", self.respawns.len(), self.key.map_id);

    }

    /// Add a respawn record in memory only. A pending record of the same spawn is kept if
    /// it is due earlier, in which case false is returned.
    pub fn add_respawn_info(&mut self, record: RespawnRecord) -> bool {

        if !record.kind.has_respawns() {
            return false;
        }

        let inserted = self.respawns.insert(record);
        if !inserted {
            trace!("respawn of {:?} {} at {} rejected, an earlier respawn is pending", record.kind, record.spawn_id, record.due);
        }

        inserted

    }

    /// Schedule a respawn and persist it, a zero due time removes the pending respawn.
    pub fn save_respawn_time(&mut self, record: RespawnRecord) -> bool {

        if record.due == 0 {
            self.remove_respawn_time(record.kind, record.spawn_id, true);
            return false;
        }

        if !self.add_respawn_info(record) {
            return false;
        }

        self.persist_respawn(&record);
        true

    }

    /// Schedule the respawn of a spawn after the given delay in seconds.
    pub fn schedule_respawn(&mut self, kind: SpawnKind, spawn_id: u64, delay: u64) -> Result<bool, MapError> {

        let data = self.ctx.persistence.spawn_data(kind, spawn_id)
            .ok_or(MapError::UnknownSpawn { kind, spawn_id })?;

        let grid = data.grid().ok_or(MapError::InvalidCoord { x: data.position.pos.x, y: data.position.pos.y })?;

        Ok(self.save_respawn_time(RespawnRecord {
            kind,
            spawn_id,
            entry: data.entry,
            due: self.now() + delay,
            grid_id: grid.id(),
        }))

    }

    /// The pending respawn of a spawn.
    #[inline]
    pub fn respawn_time(&self, kind: SpawnKind, spawn_id: u64) -> Option<&RespawnRecord> {
        self.respawns.get(kind, spawn_id)
    }

    #[inline]
    pub fn respawn_count(&self) -> usize {
        self.respawns.len()
    }

    /// Pending respawns in due order.
    pub fn respawn_records(&self) -> impl Iterator<Item = &RespawnRecord> + '_ {
        self.respawns.iter()
    }

    /// Remove a pending respawn, optionally deleting it from the store.
    pub fn remove_respawn_time(&mut self, kind: SpawnKind, spawn_id: u64, delete_from_store: bool) -> Option<RespawnRecord> {
        let record = self.respawns.remove(kind, spawn_id);
        if delete_from_store && record.is_some() {
            self.delete_respawn_from_store(kind, spawn_id);
        }
        record
    }

    /// Force a pending respawn to be due now, return false if there is none.
    pub fn respawn(&mut self, kind: SpawnKind, spawn_id: u64) -> bool {

        let now = self.now();
        match self.respawns.get(kind, spawn_id) {
            Some(record) if record.due > now => {}
            _ => return false,
        }

        self.respawns.reschedule(kind, spawn_id, now);
        if let Some(record) = self.respawns.get(kind, spawn_id).copied() {
            self.persist_respawn(&record);
        }

        true

    }

    /// The respawn time of the spawn gating the respawn of the given one, zero if none.
    pub fn linked_respawn_time(&self, kind: SpawnKind, spawn_id: u64) -> u64 {
        self.ctx.persistence.linked_respawn(kind, spawn_id)
            .and_then(|(linked_kind, linked_id)| self.respawns.get(linked_kind, linked_id))
            .map_or(0, |record| record.due)
    }

    fn persist_respawn(&self, record: &RespawnRecord) {
        match self.ctx.persistence.save_respawn(self.key, record) {
            Ok(()) | Err(PersistenceError::Unsupported) => {}
            Err(e) => warn!("failed to save respawn time of {:?} {}: {e}", record.kind, record.spawn_id),
        }
    }

    fn delete_respawn_from_store(&self, kind: SpawnKind, spawn_id: u64) {
        match self.ctx.persistence.delete_respawn(self.key, kind, spawn_id) {
            Ok(()) | Err(PersistenceError::NotFound | PersistenceError::Unsupported) => {}
            Err(e) => warn!("failed to delete respawn time of {kind:?} {spawn_id}: {e}"),
        }
    }

    fn check_respawn(&mut self, record: &RespawnRecord, data: &SpawnData) -> RespawnCheck {

        if !self.is_spawn_group_active(data.group_id) {
            return RespawnCheck::Delete;
        }

        let escort = self.config.dynamic_escort_respawn && (data.escort || self.spawn_groups.get(&data.group_id)
            .is_some_and(|group| group.flags.contains(SpawnGroupFlags::ESCORT_QUEST_NPC)));

        // Escort NPCs may respawn while all other copies are being escorted.
        let exists = self.entities_by_spawn(record.kind, record.spawn_id)
            .filter_map(|id| self.entities.get(&id))
            .filter(|entity| entity.private_owner.is_none())
            .any(|entity| match &entity.data {
                EntityData::Creature(creature) => creature.alive && !(escort && creature.escorted),
                _ => true,
            });

        if exists {
            return RespawnCheck::Delete;
        }

        let linked_time = self.linked_respawn_time(record.kind, record.spawn_id);
        if linked_time != 0 {
            let now = self.now();
            let due = if linked_time == u64::MAX {
                linked_time
            } else if self.ctx.persistence.linked_respawn(record.kind, record.spawn_id) == Some((record.kind, record.spawn_id)) {
                // Never respawn, but keep the record queryable.
                now + WEEK
            } else {
                now.max(linked_time) + self.rand.next_range(5, 15) as u64
            };
            return RespawnCheck::Reschedule(due);
        }

        RespawnCheck::Eligible

    }

    /// Process every due respawn in due order. Respawns of a grid that is not loaded
    /// stay pending, the grid loader spawns them when the grid loads.
    #[instrument(skip_all)]
    pub(super) fn process_respawns(&mut self) {

        let now = self.now();
        for (kind, spawn_id) in self.respawns.due(now) {

            let Some(record) = self.respawns.get(kind, spawn_id).copied() else {
                continue;
            };

            if record.due == 0 {
                self.remove_respawn_time(kind, spawn_id, true);
                continue;
            }

            let Some(data) = self.ctx.persistence.spawn_data(kind, spawn_id) else {
                error!("respawn time of unknown spawn {kind:?} {spawn_id} in map {}, discarded", self.key.map_id);
                self.remove_respawn_time(kind, spawn_id, true);
                continue;
            };

            if let Some(pool_id) = data.pool_id {
                if self.ctx.rules.update_pool(self.key, pool_id, kind, spawn_id) {
                    self.remove_respawn_time(kind, spawn_id, true);
                }
                continue;
            }

            match self.check_respawn(&record, &data) {
                RespawnCheck::Eligible => {

                    let loaded = GridCoord::from_id(record.grid_id)
                        .is_some_and(|grid| self.is_grid_loaded(grid));

                    if !loaded {
                        trace!("respawn of {kind:?} {spawn_id} pending, grid {} not loaded", record.grid_id);
                        continue;
                    }

                    self.remove_respawn_time(kind, spawn_id, true);
                    match self.spawn_from_data(&data) {
                        Some(id) => self.push_event(MapEvent::Respawned { kind, spawn_id, id }),
                        None => debug!("failed to respawn {kind:?} {spawn_id} in map {}", self.key.map_id),
                    }

                }
                RespawnCheck::Delete => {
                    self.remove_respawn_time(kind, spawn_id, true);
                }
                RespawnCheck::Reschedule(due) => {
                    debug_assert!(due > now, "respawn rescheduled in the past");
                    self.respawns.reschedule(kind, spawn_id, due);
                    if let Some(record) = self.respawns.get(kind, spawn_id).copied() {
                        self.persist_respawn(&record);
                    }
                }
            }

        }

    }

}
