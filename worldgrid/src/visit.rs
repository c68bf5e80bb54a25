//! Visitors dispatched over the contents of cells. A visitor declares which bags and
//! which kinds of entities it is interested in, the map then calls it for every
//! matching entity without exposing the cells themselves.

use crate::entity::{Entity, EntityKind, KindSet};
use crate::grid::Bag;


/// Selection of entities dispatched to a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitFilter {
    pub kinds: KindSet,
    pub grid_bag: bool,
    pub world_bag: bool,
}

impl VisitFilter {

    /// Every entity of both bags.
    pub const ALL: Self = Self { kinds: KindSet::ALL, grid_bag: true, world_bag: true };

    /// Game objects of both bags.
    pub const fn game_objects() -> Self {
        Self { kinds: KindSet::of(EntityKind::GameObject), grid_bag: true, world_bag: true }
    }

    /// Creatures of both bags.
    pub const fn creatures() -> Self {
        Self { kinds: KindSet::of(EntityKind::Creature), grid_bag: true, world_bag: true }
    }

    /// Spell effect volumes, dynamic objects and area triggers.
    pub const fn area_effects() -> Self {
        Self {
            kinds: KindSet::of(EntityKind::DynamicObject).with(EntityKind::AreaTrigger),
            grid_bag: true,
            world_bag: true,
        }
    }

    pub const fn corpses() -> Self {
        Self { kinds: KindSet::of(EntityKind::Corpse), grid_bag: true, world_bag: true }
    }

    /// Every kind of the world bag only.
    pub const fn world_objects() -> Self {
        Self { kinds: KindSet::ALL, grid_bag: false, world_bag: true }
    }

    /// Every kind of the grid bag only.
    pub const fn grid_objects() -> Self {
        Self { kinds: KindSet::ALL, grid_bag: true, world_bag: false }
    }

    #[inline]
    pub fn accepts_bag(&self, bag: Bag) -> bool {
        match bag {
            Bag::Grid => self.grid_bag,
            Bag::World => self.world_bag,
        }
    }

    #[inline]
    pub fn accepts_kind(&self, kind: EntityKind) -> bool {
        self.kinds.contains(kind)
    }

}


/// A visitor of cell contents.
pub trait Visitor {

    /// The entities this visitor wants to see.
    fn filter(&self) -> VisitFilter {
        VisitFilter::ALL
    }

    fn visit(&mut self, entity: &Entity);

}

/// A visitor built from a filter and a closure.
pub struct FnVisitor<F> {
    filter: VisitFilter,
    func: F,
}

impl<F> FnVisitor<F>
where
    F: FnMut(&Entity),
{

    pub fn new(filter: VisitFilter, func: F) -> Self {
        Self { filter, func }
    }

}

impl<F> Visitor for FnVisitor<F>
where
    F: FnMut(&Entity),
{

    fn filter(&self) -> VisitFilter {
        self.filter
    }

    fn visit(&mut self, entity: &Entity) {
        (self.func)(entity)
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn filters() {

        let area = VisitFilter::area_effects();
        assert!(area.accepts_kind(EntityKind::DynamicObject));
        assert!(area.accepts_kind(EntityKind::AreaTrigger));
        assert!(!area.accepts_kind(EntityKind::Creature));

        let world = VisitFilter::world_objects();
        assert!(world.accepts_bag(Bag::World));
        assert!(!world.accepts_bag(Bag::Grid));
        assert!(world.accepts_kind(EntityKind::Player));

        assert!(VisitFilter::creatures().accepts_bag(Bag::Grid));
        assert!(!VisitFilter::corpses().accepts_kind(EntityKind::Player));

    }

}
