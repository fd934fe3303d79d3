//! Uniform grid over the XZ plane.
//!
//! Used twice per tick: as the broad phase for player interpenetration and
//! for per-player snapshot relevance. Cells are keyed by integer coordinates
//! and a query inspects the 3×3 block around the query cell, so the cell
//! size must be at least the largest radius queried.

use shared::math::Vec3;
use shared::PlayerId;
use std::collections::HashMap;

pub type CellKey = (i32, i32);

const NEIGHBOR_OFFSETS: [(i32, i32); 9] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (0, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct GridEntry {
    id: PlayerId,
    position: Vec3,
}

#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    inv_cell_size: f64,
    cells: HashMap<CellKey, Vec<GridEntry>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Empties every cell. Cells that were occupied keep their allocation
    /// for the next rebuild; cells already empty are dropped, so the map
    /// only holds cells used by the last two fills.
    pub fn clear(&mut self) {
        self.cells.retain(|_, cell| {
            let occupied = !cell.is_empty();
            cell.clear();
            occupied
        });
    }

    /// Cells currently allocated, occupied or not.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn cell_of(&self, position: Vec3) -> CellKey {
        (
            (position[0] * self.inv_cell_size).floor() as i32,
            (position[2] * self.inv_cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, id: PlayerId, position: Vec3) {
        let key = self.cell_of(position);
        self.cells.entry(key).or_default().push(GridEntry { id, position });
    }

    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = (PlayerId, &'a Vec3)>) {
        self.clear();
        for (id, position) in entries {
            self.insert(id, *position);
        }
    }

    fn neighbors(&self, position: Vec3) -> impl Iterator<Item = &GridEntry> {
        let (cx, cz) = self.cell_of(position);
        NEIGHBOR_OFFSETS.iter().flat_map(move |&(dx, dz)| {
            self.cells
                .get(&(cx + dx, cz + dz))
                .into_iter()
                .flat_map(|cell| cell.iter())
        })
    }

    /// Ids whose horizontal distance to `position` is at most `radius`,
    /// sorted ascending.
    pub fn query_radius(&self, position: Vec3, radius: f64) -> Vec<PlayerId> {
        let radius_sq = radius * radius;
        let mut ids: Vec<PlayerId> = self
            .neighbors(position)
            .filter(|entry| horizontal_distance_sq(entry.position, position) <= radius_sq)
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Candidate pairs `(a, b)` with `a < b` sharing a cell or adjacent
    /// cells, each listed once, sorted.
    pub fn potential_pairs(&self) -> Vec<(PlayerId, PlayerId)> {
        let mut pairs = Vec::new();
        for entries in self.cells.values() {
            for entry in entries {
                for other in self.neighbors(entry.position) {
                    if entry.id < other.id {
                        pairs.push((entry.id, other.id));
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn horizontal_distance_sq(a: Vec3, b: Vec3) -> f64 {
    let dx = a[0] - b[0];
    let dz = a[2] - b[2];
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_query() {
        let mut grid = SpatialGrid::new(4.0);
        grid.insert(1, [0.0, 0.0, 0.0]);
        grid.insert(2, [3.0, 0.0, 0.0]);
        grid.insert(3, [20.0, 0.0, 0.0]);

        assert_eq!(grid.query_radius([0.0; 3], 4.0), vec![1, 2]);
        assert_eq!(grid.query_radius([20.0, 0.0, 1.0], 2.0), vec![3]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_query_ignores_height() {
        let mut grid = SpatialGrid::new(4.0);
        grid.insert(1, [1.0, 50.0, 1.0]);
        assert_eq!(grid.query_radius([1.0, 0.0, 1.0], 0.5), vec![1]);
    }

    #[test]
    fn test_negative_coordinates_use_floor() {
        let mut grid = SpatialGrid::new(2.0);
        grid.insert(1, [-0.5, 0.0, -0.5]);
        grid.insert(2, [0.5, 0.0, 0.5]);
        assert_eq!(grid.potential_pairs(), vec![(1, 2)]);
    }

    #[test]
    fn test_potential_pairs_are_unique() {
        let mut grid = SpatialGrid::new(2.0);
        grid.insert(1, [0.0; 3]);
        grid.insert(2, [0.1, 0.0, 0.0]);
        grid.insert(3, [2.5, 0.0, 0.0]);
        grid.insert(4, [100.0, 0.0, 100.0]);
        assert_eq!(grid.potential_pairs(), vec![(1, 2), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut grid = SpatialGrid::new(2.0);
        grid.insert(9, [0.0; 3]);
        let positions = vec![(1, [5.0, 0.0, 5.0]), (2, [5.5, 0.0, 5.0])];
        grid.rebuild(positions.iter().map(|(id, p)| (*id, p)));
        assert_eq!(grid.len(), 2);
        assert!(grid.query_radius([0.0; 3], 1.0).is_empty());
    }

    #[test]
    fn test_rebuild_drops_abandoned_cells() {
        let mut grid = SpatialGrid::new(2.0);
        for step in 0..100 {
            let position = [step as f64 * 3.0, 0.0, 0.0];
            grid.rebuild([(1, &position)]);
        }
        assert_eq!(grid.len(), 1);
        assert!(grid.cell_count() <= 2);
        assert_eq!(grid.query_radius([297.0, 0.0, 0.0], 1.0), vec![1]);
    }
}
