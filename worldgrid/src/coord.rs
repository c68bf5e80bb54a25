//! Grid and cell coordinate math. The world is a square of `MAX_NUMBER_OF_GRIDS`
//! grids per side, each grid subdivided in `MAX_NUMBER_OF_CELLS` cells per side. World
//! position (0, 0) lies at the center of the map, between grids 31 and 32.

use std::fmt;

use glam::Vec3;


/// Number of grids on each side of a map.
pub const MAX_NUMBER_OF_GRIDS: u32 = 64;
/// Size of a grid side, in world units.
pub const SIZE_OF_GRIDS: f32 = 533.333_3;
/// Index of the grid containing the world origin.
pub const CENTER_GRID_ID: u32 = MAX_NUMBER_OF_GRIDS / 2;
/// Offset applied before dividing world coordinates by the grid size.
pub const CENTER_GRID_OFFSET: f32 = SIZE_OF_GRIDS / 2.0;

/// Number of cells on each side of a grid.
pub const MAX_NUMBER_OF_CELLS: u32 = 8;
/// Size of a cell side, in world units.
pub const SIZE_OF_GRID_CELL: f32 = SIZE_OF_GRIDS / MAX_NUMBER_OF_CELLS as f32;
/// Index of the cell containing the world origin.
pub const CENTER_GRID_CELL_ID: u32 = MAX_NUMBER_OF_CELLS * MAX_NUMBER_OF_GRIDS / 2;
/// Offset applied before dividing world coordinates by the cell size.
pub const CENTER_GRID_CELL_OFFSET: f32 = SIZE_OF_GRID_CELL / 2.0;
/// Number of cells on each side of the whole map.
pub const TOTAL_NUMBER_OF_CELLS_PER_MAP: u32 = MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_CELLS;

/// Total size of a map side, in world units.
pub const MAP_SIZE: f32 = SIZE_OF_GRIDS * MAX_NUMBER_OF_GRIDS as f32;
/// Half of the map size, the maximum absolute value of a valid coordinate.
pub const MAP_HALFSIZE: f32 = MAP_SIZE / 2.0;


/// Coordinate of a grid in the map, both components are in `0..MAX_NUMBER_OF_GRIDS`
/// when built through the checked constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

/// Coordinate of a cell in the whole map, both components are in
/// `0..TOTAL_NUMBER_OF_CELLS_PER_MAP` when built through the checked constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {

    /// Create a grid coordinate, returning none if outside of the map.
    #[inline]
    pub fn new(x: u32, y: u32) -> Option<Self> {
        (x < MAX_NUMBER_OF_GRIDS && y < MAX_NUMBER_OF_GRIDS).then_some(Self { x, y })
    }

    /// Compute the grid containing the given world position, none if the position is
    /// outside of the addressable world.
    #[inline]
    pub fn from_world(x: f32, y: f32) -> Option<Self> {
        if !is_valid_map_coord(x, y) {
            return None;
        }
        let (gx, gy) = compute_unchecked(x, y, CENTER_GRID_OFFSET, SIZE_OF_GRIDS, CENTER_GRID_ID);
        Self::new(u32::try_from(gx).ok()?, u32::try_from(gy).ok()?)
    }

    /// Unique identifier of this grid within its map.
    #[inline]
    pub fn id(self) -> u32 {
        self.y * MAX_NUMBER_OF_GRIDS + self.x
    }

    /// Inverse of [`Self::id`].
    #[inline]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::new(id % MAX_NUMBER_OF_GRIDS, id / MAX_NUMBER_OF_GRIDS)
    }

    /// The coordinate of the terrain tile matching this grid, terrain tiles are indexed
    /// in the reverse direction.
    #[inline]
    pub fn tile(self) -> (u32, u32) {
        (MAX_NUMBER_OF_GRIDS - 1 - self.x, MAX_NUMBER_OF_GRIDS - 1 - self.y)
    }

    /// The first (lowest) cell of this grid.
    #[inline]
    pub fn min_cell(self) -> CellCoord {
        CellCoord { x: self.x * MAX_NUMBER_OF_CELLS, y: self.y * MAX_NUMBER_OF_CELLS }
    }

    /// Iterate over all cells of this grid.
    #[inline]
    pub fn cells(self) -> CellArea {
        let min = self.min_cell();
        CellArea {
            low: min,
            high: CellCoord { x: min.x + MAX_NUMBER_OF_CELLS - 1, y: min.y + MAX_NUMBER_OF_CELLS - 1 },
        }
    }

}

impl CellCoord {

    /// Create a cell coordinate, returning none if outside of the map.
    #[inline]
    pub fn new(x: u32, y: u32) -> Option<Self> {
        (x < TOTAL_NUMBER_OF_CELLS_PER_MAP && y < TOTAL_NUMBER_OF_CELLS_PER_MAP).then_some(Self { x, y })
    }

    /// Compute the cell containing the given world position, none if the position is
    /// outside of the addressable world.
    #[inline]
    pub fn from_world(x: f32, y: f32) -> Option<Self> {
        if !is_valid_map_coord(x, y) {
            return None;
        }
        let (cx, cy) = compute_cell_unchecked(x, y);
        Self::new(u32::try_from(cx).ok()?, u32::try_from(cy).ok()?)
    }

    /// Shortcut for [`Self::from_world`] with a 3D position, Z is ignored.
    #[inline]
    pub fn from_pos(pos: Vec3) -> Option<Self> {
        Self::from_world(pos.x, pos.y)
    }

    /// Compute the cell for a world position, clamping the result to the map bounds.
    /// This is used when computing areas, where a radius may extend past the border.
    #[inline]
    pub fn from_world_clamped(x: f32, y: f32) -> Self {
        let (cx, cy) = compute_cell_unchecked(x, y);
        let limit = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64 - 1;
        Self {
            x: cx.clamp(0, limit) as u32,
            y: cy.clamp(0, limit) as u32,
        }
    }

    /// The grid containing this cell.
    #[inline]
    pub fn grid(self) -> GridCoord {
        GridCoord { x: self.x / MAX_NUMBER_OF_CELLS, y: self.y / MAX_NUMBER_OF_CELLS }
    }

    /// The local X/Y coordinate of this cell within its grid.
    #[inline]
    pub fn local(self) -> (usize, usize) {
        ((self.x % MAX_NUMBER_OF_CELLS) as usize, (self.y % MAX_NUMBER_OF_CELLS) as usize)
    }

    /// Unique identifier of this cell within its map, used for corpse directories and
    /// the per-tick visited bitmap.
    #[inline]
    pub fn id(self) -> u32 {
        self.y * TOTAL_NUMBER_OF_CELLS_PER_MAP + self.x
    }

    /// Return true if both cells belong to different grids.
    #[inline]
    pub fn diff_grid(self, other: Self) -> bool {
        self.grid() != other.grid()
    }

    /// World position of the center of this cell, Z is zero.
    pub fn center(self) -> Vec3 {
        let x = (self.x as f32 - CENTER_GRID_CELL_ID as f32) * SIZE_OF_GRID_CELL + CENTER_GRID_CELL_OFFSET;
        let y = (self.y as f32 - CENTER_GRID_CELL_ID as f32) * SIZE_OF_GRID_CELL + CENTER_GRID_CELL_OFFSET;
        Vec3::new(x, y, 0.0)
    }

    /// Return this coordinate moved by the given amount, clamped into the map.
    #[inline]
    pub fn offset_clamped(self, dx: i64, dy: i64) -> Self {
        let limit = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64 - 1;
        Self {
            x: (self.x as i64 + dx).clamp(0, limit) as u32,
            y: (self.y as i64 + dy).clamp(0, limit) as u32,
        }
    }

}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}


/// Return true if the given world coordinates are finite and inside of the map.
#[inline]
pub fn is_valid_map_coord(x: f32, y: f32) -> bool {
    x.is_finite() && y.is_finite() && x.abs() <= MAP_HALFSIZE - 0.5 && y.abs() <= MAP_HALFSIZE - 0.5
}

/// Shared discretization, the computation is done in double precision so that the
/// result is stable with spawn data computed offline.
#[inline]
fn compute_unchecked(x: f32, y: f32, center_offset: f32, size: f32, center: u32) -> (i64, i64) {
    let x_offset = (x as f64 - center_offset as f64) / size as f64;
    let y_offset = (y as f64 - center_offset as f64) / size as f64;
    let x_val = (x_offset + center as f64 + 0.5).floor() as i64;
    let y_val = (y_offset + center as f64 + 0.5).floor() as i64;
    (x_val, y_val)
}

#[inline]
fn compute_cell_unchecked(x: f32, y: f32) -> (i64, i64) {
    compute_unchecked(x, y, CENTER_GRID_CELL_OFFSET, SIZE_OF_GRID_CELL, CENTER_GRID_CELL_ID)
}


/// An inclusive rectangle of cells, iterating row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellArea {
    pub low: CellCoord,
    pub high: CellCoord,
}

impl CellArea {

    /// Compute the area of cells covering a circle of the given radius around a world
    /// position. Parts of the circle outside of the map are clamped.
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        if radius <= 0.0 {
            let center = CellCoord::from_world_clamped(x, y);
            return Self { low: center, high: center };
        }
        Self {
            low: CellCoord::from_world_clamped(x - radius, y - radius),
            high: CellCoord::from_world_clamped(x + radius, y + radius),
        }
    }

    /// Grow this area by the given number of cells on each side, clamped into the map.
    pub fn expand(self, cells: u32) -> Self {
        let cells = cells as i64;
        Self {
            low: self.low.offset_clamped(-cells, -cells),
            high: self.high.offset_clamped(cells, cells),
        }
    }

    /// Return true if the given cell is inside of this area.
    #[inline]
    pub fn contains(&self, cell: CellCoord) -> bool {
        self.low.x <= cell.x && cell.x <= self.high.x && self.low.y <= cell.y && cell.y <= self.high.y
    }

    /// Iterate over all cells of this area.
    #[inline]
    pub fn iter(&self) -> CellAreaIter {
        CellAreaIter { area: *self, x: self.low.x, y: self.low.y }
    }

}

impl IntoIterator for CellArea {
    type Item = CellCoord;
    type IntoIter = CellAreaIter;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over cells of a [`CellArea`].
#[derive(Debug, Clone)]
pub struct CellAreaIter {
    area: CellArea,
    x: u32,
    y: u32,
}

impl Iterator for CellAreaIter {

    type Item = CellCoord;

    fn next(&mut self) -> Option<Self::Item> {

        if self.area.low.x > self.area.high.x || self.y > self.area.high.y {
            return None;
        }

        let ret = CellCoord { x: self.x, y: self.y };

        self.x += 1;
        if self.x > self.area.high.x {
            self.x = self.area.low.x;
            self.y += 1;
        }

        Some(ret)

    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn origin_is_centered() {
        let cell = CellCoord::from_world(0.0, 0.0).unwrap();
        assert_eq!(cell.grid(), GridCoord { x: 32, y: 32 });
        assert_eq!(GridCoord::from_world(0.0, 0.0), Some(GridCoord { x: 32, y: 32 }));
        assert_eq!(GridCoord::from_world(-1.0, -1.0), Some(GridCoord { x: 31, y: 31 }));
    }

    #[test]
    fn cell_nested_in_grid() {
        for &(x, y) in &[(0.0, 0.0), (-8000.0, 1234.5), (16000.0, -16000.0), (5.0, 266.0)] {
            let cell = CellCoord::from_world(x, y).unwrap();
            let grid = GridCoord::from_world(x, y).unwrap();
            assert_eq!(cell.grid(), grid, "cell {cell} of ({x}, {y}) not in grid {grid}");
            assert!(grid.cells().contains(cell));
        }
    }

    #[test]
    fn invalid_coords_rejected() {
        assert_eq!(GridCoord::from_world(MAP_HALFSIZE, 0.0), None);
        assert_eq!(CellCoord::from_world(0.0, -MAP_HALFSIZE - 10.0), None);
        assert_eq!(CellCoord::from_world(f32::NAN, 0.0), None);
        assert_eq!(CellCoord::from_world(0.0, f32::INFINITY), None);
        assert_eq!(GridCoord::new(MAX_NUMBER_OF_GRIDS, 0), None);
        assert_eq!(CellCoord::new(0, TOTAL_NUMBER_OF_CELLS_PER_MAP), None);
    }

    #[test]
    fn grid_id_round_trip() {
        let grid = GridCoord::new(12, 40).unwrap();
        assert_eq!(GridCoord::from_id(grid.id()), Some(grid));
        assert_eq!(grid.tile(), (51, 23));
    }

    #[test]
    fn cell_center_maps_back() {
        let cell = CellCoord::new(300, 17).unwrap();
        let center = cell.center();
        assert_eq!(CellCoord::from_world(center.x, center.y), Some(cell));
    }

    #[test]
    fn area_around() {

        let area = CellArea::around(0.0, 0.0, 0.0);
        assert_eq!(area.iter().count(), 1);

        let area = CellArea::around(0.0, 0.0, SIZE_OF_GRID_CELL);
        assert_eq!(area.iter().count(), 9);
        assert!(area.contains(CellCoord::from_world(0.0, 0.0).unwrap()));

        // Clamped at the border of the map.
        let area = CellArea::around(MAP_HALFSIZE - 1.0, MAP_HALFSIZE - 1.0, 500.0);
        assert_eq!(area.high, CellCoord { x: TOTAL_NUMBER_OF_CELLS_PER_MAP - 1, y: TOTAL_NUMBER_OF_CELLS_PER_MAP - 1 });

    }

    #[test]
    fn area_iter_order() {
        let area = CellArea { low: CellCoord { x: 0, y: 0 }, high: CellCoord { x: 1, y: 1 } };
        assert_eq!(area.iter().collect::<Vec<_>>(), [
            CellCoord { x: 0, y: 0 },
            CellCoord { x: 1, y: 0 },
            CellCoord { x: 0, y: 1 },
            CellCoord { x: 1, y: 1 },
        ]);
        let grid = GridCoord::new(3, 4).unwrap();
        assert_eq!(grid.cells().iter().count(), 64);
    }

}
