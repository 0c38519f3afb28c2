//! Uniform spatial hash grid for broad-phase collision queries
//!
//! Objects are registered with an axis-aligned bounding box and appear in every
//! cell the box overlaps. Queries return a candidate set; callers narrow-phase
//! with exact geometry.

use crate::util::vec2::Vec2;
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::hash::Hash;

// ============================================================================
// Grid Constants
// ============================================================================

/// Initial capacity for the cell map (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for the id list within a cell
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Cells covered by one object; most objects span four cells or fewer
type CellList = SmallVec<[CellKey; 4]>;

/// Axis-aligned bounding box with a top-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Square box of half extent `half` centered on `center`
    pub fn around(center: Vec2, half: f32) -> Self {
        Self {
            x: center.x - half,
            y: center.y - half,
            width: half * 2.0,
            height: half * 2.0,
        }
    }
}

/// Uniform grid keyed by object id
pub struct SpatialGrid<K> {
    cell_size: f32,
    inv_cell_size: f32,
    cells: HashMap<CellKey, Vec<K>>,
    /// Cells each registered object currently occupies
    members: HashMap<K, CellList>,
}

impl<K> SpatialGrid<K>
where
    K: Copy + Eq + Hash + Ord,
{
    /// Create a new grid with the given cell size (world units)
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            members: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of registered objects
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: K) -> bool {
        self.members.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.members.clear();
    }

    #[inline]
    fn coord(&self, value: f32) -> i32 {
        (value * self.inv_cell_size).floor() as i32
    }

    /// Every cell overlapped by `bounds`
    fn cells_for(&self, bounds: &Aabb) -> CellList {
        let min_x = self.coord(bounds.x);
        let min_y = self.coord(bounds.y);
        let max_x = self.coord(bounds.x + bounds.width);
        let max_y = self.coord(bounds.y + bounds.height);

        let mut keys = CellList::new();
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                keys.push((cx, cy));
            }
        }
        keys
    }

    /// Register `id` in every cell its bounds overlap.
    ///
    /// Inserting an id that is already present re-registers it at the new bounds.
    pub fn insert(&mut self, id: K, bounds: Aabb) {
        if self.members.contains_key(&id) {
            self.remove(id);
        }

        let keys = self.cells_for(&bounds);
        for key in &keys {
            self.cells
                .entry(*key)
                .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                .push(id);
        }
        self.members.insert(id, keys);
    }

    /// Deregister `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: K) -> bool {
        let Some(keys) = self.members.remove(&id) else {
            return false;
        };

        for key in keys {
            if let Some(cell) = self.cells.get_mut(&key) {
                cell.retain(|other| *other != id);
                if cell.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
        true
    }

    /// Move `id` to new bounds (remove + insert)
    pub fn update(&mut self, id: K, bounds: Aabb) {
        self.remove(id);
        self.insert(id, bounds);
    }

    /// Other objects sharing at least one cell with `id`, deduplicated and sorted.
    ///
    /// The result never contains `id` itself; an unregistered id has no neighbours.
    pub fn get_nearby(&self, id: K) -> Vec<K> {
        let Some(keys) = self.members.get(&id) else {
            return Vec::new();
        };
        self.collect(keys, Some(id))
    }

    /// Objects in any cell overlapped by `bounds`, deduplicated and sorted
    pub fn query_area(&self, bounds: &Aabb) -> Vec<K> {
        let keys = self.cells_for(bounds);
        self.collect(&keys, None)
    }

    fn collect(&self, keys: &[CellKey], exclude: Option<K>) -> Vec<K> {
        let mut seen: HashSet<K> = HashSet::new();
        let mut found = Vec::new();

        for key in keys {
            let Some(cell) = self.cells.get(key) else {
                continue;
            };
            for &other in cell {
                if Some(other) != exclude && seen.insert(other) {
                    found.push(other);
                }
            }
        }

        found.sort_unstable();
        found
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialGridStats {
        SpatialGridStats {
            non_empty_cells: self.cells.len(),
            total_entities: self.members.len(),
            max_per_cell: self.cells.values().map(|c| c.len()).max().unwrap_or(0),
        }
    }
}

/// Statistics about the spatial grid
#[derive(Debug, Clone, Default)]
pub struct SpatialGridStats {
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_overlapping_pair() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.insert(1, Aabb::new(50.0, 50.0, 20.0, 20.0));
        grid.insert(2, Aabb::new(60.0, 60.0, 20.0, 20.0));

        assert_eq!(grid.get_nearby(1), vec![2]);
        assert_eq!(grid.get_nearby(2), vec![1]);

        grid.update(1, Aabb::new(500.0, 500.0, 20.0, 20.0));
        assert!(grid.get_nearby(2).is_empty());
        assert!(grid.get_nearby(1).is_empty());
    }

    #[test]
    fn test_nearby_is_symmetric_and_excludes_self() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(50.0);
        let boxes = [
            (1, Aabb::new(10.0, 10.0, 30.0, 30.0)),
            (2, Aabb::new(45.0, 45.0, 10.0, 10.0)),
            (3, Aabb::new(90.0, 10.0, 5.0, 5.0)),
            (4, Aabb::new(400.0, 400.0, 5.0, 5.0)),
        ];
        for (id, aabb) in boxes {
            grid.insert(id, aabb);
        }

        for (a, _) in boxes {
            let nearby = grid.get_nearby(a);
            assert!(!nearby.contains(&a));
            for b in nearby {
                assert!(grid.get_nearby(b).contains(&a), "{a} sees {b} but not back");
            }
        }
    }

    #[test]
    fn test_object_spanning_cells_is_deduplicated() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        // Spans four cells
        grid.insert(1, Aabb::new(90.0, 90.0, 20.0, 20.0));
        grid.insert(2, Aabb::new(80.0, 80.0, 40.0, 40.0));

        assert_eq!(grid.get_nearby(1), vec![2]);
        assert_eq!(grid.stats().non_empty_cells, 4);
        assert_eq!(grid.stats().max_per_cell, 2);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.insert(1, Aabb::new(0.0, 0.0, 10.0, 10.0));
        assert!(!grid.remove(99));
        assert_eq!(grid.len(), 1);
        assert!(grid.remove(1));
        assert!(grid.is_empty());
        assert_eq!(grid.stats().non_empty_cells, 0);
    }

    #[test]
    fn test_query_area() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(200.0);
        grid.insert(7, Aabb::around(Vec2::new(1000.0, 1000.0), 20.0));
        grid.insert(3, Aabb::around(Vec2::new(1010.0, 990.0), 20.0));
        grid.insert(9, Aabb::around(Vec2::new(3000.0, 100.0), 20.0));

        let found = grid.query_area(&Aabb::around(Vec2::new(1005.0, 1005.0), 5.0));
        assert_eq!(found, vec![3, 7]);
    }

    #[test]
    fn test_reinsert_moves_object() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.insert(1, Aabb::new(10.0, 10.0, 5.0, 5.0));
        grid.insert(1, Aabb::new(910.0, 910.0, 5.0, 5.0));
        assert_eq!(grid.len(), 1);
        assert!(grid.query_area(&Aabb::new(0.0, 0.0, 50.0, 50.0)).is_empty());
    }
}
