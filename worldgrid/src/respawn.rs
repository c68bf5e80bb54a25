//! The respawn schedule, an ordered set of pending respawns with a lookup index by
//! spawn id. Processing of due records is done by the map, which knows about grids and
//! spawn groups.

use std::collections::{BTreeSet, HashMap};

use crate::spawn::SpawnKind;


/// A pending respawn of a spawn definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnRecord {
    pub kind: SpawnKind,
    pub spawn_id: u64,
    pub entry: u32,
    /// Game time (seconds) at which the spawn is due, zero means delete only.
    pub due: u64,
    /// Identifier of the grid containing the spawn point.
    pub grid_id: u32,
}

impl RespawnRecord {

    /// The total ordering key of this record in the schedule.
    #[inline]
    fn key(&self) -> (u64, u64, SpawnKind) {
        (self.due, self.spawn_id, self.kind)
    }

}


/// Pending respawns ordered by due time, then spawn id, then kind.
#[derive(Debug, Default)]
pub struct RespawnSchedule {
    /// Ordering of pending records.
    order: BTreeSet<(u64, u64, SpawnKind)>,
    /// Records indexed by their spawn, there is at most one record per spawn.
    records: HashMap<(SpawnKind, u64), RespawnRecord>,
}

impl RespawnSchedule {

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record, an existing record for the same spawn is replaced if the new
    /// one is due earlier or at the same time, otherwise the insertion is rejected and
    /// false is returned.
    pub fn insert(&mut self, record: RespawnRecord) -> bool {

        if let Some(existing) = self.records.get(&(record.kind, record.spawn_id)) {
            if record.due > existing.due {
                return false;
            }
            let removed = self.order.remove(&existing.key());
            debug_assert!(removed, "respawn record missing from ordering");
        }

        let inserted = self.order.insert(record.key());
        debug_assert!(inserted, "duplicate respawn ordering key");
        self.records.insert((record.kind, record.spawn_id), record);
        true

    }

    #[inline]
    pub fn get(&self, kind: SpawnKind, spawn_id: u64) -> Option<&RespawnRecord> {
        self.records.get(&(kind, spawn_id))
    }

    pub fn remove(&mut self, kind: SpawnKind, spawn_id: u64) -> Option<RespawnRecord> {
        let record = self.records.remove(&(kind, spawn_id))?;
        let removed = self.order.remove(&record.key());
        debug_assert!(removed, "respawn record missing from ordering");
        Some(record)
    }

    /// Change the due time of an existing record, returning false if absent.
    pub fn reschedule(&mut self, kind: SpawnKind, spawn_id: u64, due: u64) -> bool {
        let Some(record) = self.records.get_mut(&(kind, spawn_id)) else {
            return false;
        };
        self.order.remove(&record.key());
        record.due = due;
        self.order.insert(record.key());
        true
    }

    /// The earliest pending record.
    pub fn first(&self) -> Option<&RespawnRecord> {
        let &(_, spawn_id, kind) = self.order.first()?;
        self.records.get(&(kind, spawn_id))
    }

    /// Return the spawns of all records due at the given time, in schedule order.
    pub fn due(&self, now: u64) -> Vec<(SpawnKind, u64)> {
        self.order.iter()
            .take_while(|&&(due, _, _)| due <= now)
            .map(|&(_, spawn_id, kind)| (kind, spawn_id))
            .collect()
    }

    /// Iterate all records in schedule order.
    pub fn iter(&self) -> impl Iterator<Item = &RespawnRecord> + '_ {
        self.order.iter().filter_map(|&(_, spawn_id, kind)| self.records.get(&(kind, spawn_id)))
    }

    /// Remove and return the earliest record.
    pub fn pop_first(&mut self) -> Option<RespawnRecord> {
        let (_, spawn_id, kind) = self.order.pop_first()?;
        self.records.remove(&(kind, spawn_id))
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.records.clear();
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    fn record(kind: SpawnKind, spawn_id: u64, due: u64) -> RespawnRecord {
        RespawnRecord { kind, spawn_id, entry: 1, due, grid_id: 0 }
    }

    #[test]
    fn duplicate_rejected_when_later() {

        let mut schedule = RespawnSchedule::new();
        assert!(schedule.insert(record(SpawnKind::Creature, 5, 100)));
        assert!(!schedule.insert(record(SpawnKind::Creature, 5, 200)));
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.get(SpawnKind::Creature, 5).map(|r| r.due), Some(100));

        // The same spawn id of another kind is another record.
        assert!(schedule.insert(record(SpawnKind::GameObject, 5, 200)));
        assert_eq!(schedule.len(), 2);

        // Earlier record replace the existing one.
        assert!(schedule.insert(record(SpawnKind::Creature, 5, 50)));
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.iter().count(), 2);
        assert_eq!(schedule.first().map(|r| (r.kind, r.due)), Some((SpawnKind::Creature, 50)));

    }

    #[test]
    fn pop_order_is_total() {

        // Simple xorshift to get a scattered but reproducible set of records.
        let mut state = 0x2545F4914F6CDD1Du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut schedule = RespawnSchedule::new();
        for _ in 0..500 {
            let kind = if next() % 2 == 0 { SpawnKind::Creature } else { SpawnKind::GameObject };
            schedule.insert(record(kind, next() % 64, next() % 16));
        }

        let mut popped = Vec::new();
        while let Some(record) = schedule.pop_first() {
            popped.push(record);
        }

        assert!(schedule.is_empty());
        for pair in popped.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.due <= b.due);
            if a.due == b.due {
                assert!((a.spawn_id, a.kind) < (b.spawn_id, b.kind));
            }
        }

    }

    #[test]
    fn due_and_reschedule() {

        let mut schedule = RespawnSchedule::new();
        schedule.insert(record(SpawnKind::Creature, 1, 30));
        schedule.insert(record(SpawnKind::Creature, 2, 10));
        schedule.insert(record(SpawnKind::GameObject, 2, 10));
        schedule.insert(record(SpawnKind::Creature, 3, 20));

        assert_eq!(schedule.due(20), [
            (SpawnKind::Creature, 2),
            (SpawnKind::GameObject, 2),
            (SpawnKind::Creature, 3),
        ]);

        assert!(schedule.reschedule(SpawnKind::Creature, 1, 0));
        assert_eq!(schedule.due(0), [(SpawnKind::Creature, 1)]);
        assert!(!schedule.reschedule(SpawnKind::Creature, 42, 0));

        assert_eq!(schedule.remove(SpawnKind::Creature, 3).map(|r| r.due), Some(20));
        assert_eq!(schedule.remove(SpawnKind::Creature, 3), None);
        assert_eq!(schedule.len(), 3);

    }

}
