//! Uniform spatial grid over the world bounds.
//!
//! Cells are squares of a fixed side length. Each cell holds the entities
//! whose AABB overlaps it, tagged with a layer mask so queries can filter
//! (players vs. static geometry). The grid hands back the list of touched
//! cell indices on insert; callers keep it for O(cells) removal.

use crate::components::LayerMask;
use crate::entity::EntityId;

/// World-space AABB, inclusive on all edges.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridEntry {
    pub entity: EntityId,
    pub layer: LayerMask,
}

#[derive(Debug, Default)]
pub struct GridCell {
    pub entries: Vec<GridEntry>,
}

pub struct SpatialGrid {
    cell_size: f64,
    width: usize,
    height: usize,
    cells: Vec<GridCell>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64, width: usize, height: usize) -> Self {
        let mut cells = Vec::with_capacity(width * height);
        cells.resize_with(width * height, GridCell::default);
        Self {
            cell_size,
            width,
            height,
            cells,
        }
    }

    /// World coordinates to signed cell coordinates. Floor handles negative
    /// world coordinates correctly.
    pub fn cell_coord(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Cell coordinates to a linear index; `None` outside the grid.
    pub fn cell_index(&self, gx: i64, gy: i64) -> Option<usize> {
        if gx < 0 || gy < 0 || gx >= self.width as i64 || gy >= self.height as i64 {
            return None;
        }
        Some(gy as usize * self.width + gx as usize)
    }

    /// Inverse of [`cell_index`](Self::cell_index).
    pub fn cell_coord_of_index(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.cells.len() {
            return None;
        }
        Some((index % self.width, index / self.width))
    }

    /// Inserts an entity into every cell its bounds overlap and returns the
    /// touched cell indices. Parts of the bounds outside the grid are
    /// silently ignored.
    pub fn add(&mut self, id: EntityId, bounds: Bounds, layer: LayerMask) -> Vec<usize> {
        let (min_gx, min_gy) = self.cell_coord(bounds.min_x, bounds.min_y);
        let (max_gx, max_gy) = self.cell_coord(bounds.max_x, bounds.max_y);

        let entry = GridEntry { entity: id, layer };
        let mut touched = Vec::new();

        for gy in min_gy..=max_gy {
            for gx in min_gx..=max_gx {
                if let Some(index) = self.cell_index(gx, gy) {
                    self.cells[index].entries.push(entry);
                    touched.push(index);
                }
            }
        }
        touched
    }

    /// Removes an entity from the given cells. Cell order inside a bucket is
    /// not preserved.
    pub fn remove(&mut self, cell_indices: &[usize], id: EntityId) {
        for &index in cell_indices {
            if index >= self.cells.len() {
                continue;
            }
            let entries = &mut self.cells[index].entries;
            if let Some(pos) = entries.iter().position(|e| e.entity == id) {
                entries.swap_remove(pos);
            }
        }
    }

    /// Iterates every in-range cell overlapped by `bounds`, each yielded at
    /// most once.
    pub fn cells_in_bounds(&self, bounds: Bounds) -> impl Iterator<Item = (usize, &GridCell)> {
        let (min_gx, min_gy) = self.cell_coord(bounds.min_x, bounds.min_y);
        let (max_gx, max_gy) = self.cell_coord(bounds.max_x, bounds.max_y);

        (min_gy..=max_gy).flat_map(move |gy| {
            (min_gx..=max_gx).filter_map(move |gx| {
                self.cell_index(gx, gy).map(|index| (index, &self.cells[index]))
            })
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> EntityId {
        EntityId::new(index, 0)
    }

    fn grid() -> SpatialGrid {
        // 10x10 cells of size 10: world 100x100.
        SpatialGrid::new(10.0, 10, 10)
    }

    #[test]
    fn add_covers_exactly_the_overlapped_cells() {
        let mut g = grid();
        // [15,5]..[25,15] overlaps cells (1,0), (2,0), (1,1), (2,1).
        let touched = g.add(
            id(1),
            Bounds {
                min_x: 15.0,
                min_y: 5.0,
                max_x: 25.0,
                max_y: 15.0,
            },
            LayerMask::STATIC,
        );

        let mut expected: Vec<usize> = vec![
            g.cell_index(1, 0).unwrap(),
            g.cell_index(2, 0).unwrap(),
            g.cell_index(1, 1).unwrap(),
            g.cell_index(2, 1).unwrap(),
        ];
        expected.sort_unstable();
        let mut got = touched.clone();
        got.sort_unstable();
        assert_eq!(got, expected);

        // Not present anywhere else.
        for index in 0..100 {
            let present = g.cells[index].entries.iter().any(|e| e.entity == id(1));
            assert_eq!(present, touched.contains(&index));
        }
    }

    #[test]
    fn remove_clears_every_touched_cell() {
        let mut g = grid();
        let touched = g.add(
            id(2),
            Bounds {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 35.0,
                max_y: 5.0,
            },
            LayerMask::PLAYER,
        );
        g.remove(&touched, id(2));

        for cell in &g.cells {
            assert!(cell.entries.iter().all(|e| e.entity != id(2)));
        }
    }

    #[test]
    fn out_of_range_bounds_yield_only_in_range_cells() {
        let mut g = grid();
        let touched = g.add(
            id(3),
            Bounds {
                min_x: -25.0,
                min_y: -25.0,
                max_x: 5.0,
                max_y: 5.0,
            },
            LayerMask::PLAYER,
        );
        // Only cell (0,0) is inside the grid.
        assert_eq!(touched, vec![g.cell_index(0, 0).unwrap()]);
    }

    #[test]
    fn fully_outside_bounds_touch_nothing() {
        let mut g = grid();
        let touched = g.add(
            id(4),
            Bounds {
                min_x: 500.0,
                min_y: 500.0,
                max_x: 510.0,
                max_y: 510.0,
            },
            LayerMask::STATIC,
        );
        assert!(touched.is_empty());
    }

    #[test]
    fn cells_in_bounds_yields_each_cell_once() {
        let mut g = grid();
        g.add(
            id(5),
            Bounds {
                min_x: 11.0,
                min_y: 11.0,
                max_x: 12.0,
                max_y: 12.0,
            },
            LayerMask::STATIC,
        );

        let visited: Vec<usize> = g
            .cells_in_bounds(Bounds {
                min_x: 5.0,
                min_y: 5.0,
                max_x: 25.0,
                max_y: 25.0,
            })
            .map(|(index, _)| index)
            .collect();

        let mut dedup = visited.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(visited.len(), dedup.len());
        assert_eq!(visited.len(), 9); // 3x3 block of cells
    }

    #[test]
    fn entries_carry_their_layer() {
        let mut g = grid();
        g.add(
            id(6),
            Bounds {
                min_x: 1.0,
                min_y: 1.0,
                max_x: 2.0,
                max_y: 2.0,
            },
            LayerMask::STATIC,
        );
        g.add(
            id(7),
            Bounds {
                min_x: 1.0,
                min_y: 1.0,
                max_x: 2.0,
                max_y: 2.0,
            },
            LayerMask::PLAYER,
        );

        let cell = &g.cells[g.cell_index(0, 0).unwrap()];
        let statics: Vec<_> = cell
            .entries
            .iter()
            .filter(|e| e.layer.has(LayerMask::STATIC))
            .collect();
        assert_eq!(statics.len(), 1);
        assert_eq!(statics[0].entity, id(6));
    }

    #[test]
    fn coord_index_round_trip() {
        let g = grid();
        let index = g.cell_index(3, 7).unwrap();
        assert_eq!(g.cell_coord_of_index(index), Some((3, 7)));
        assert_eq!(g.cell_index(-1, 0), None);
        assert_eq!(g.cell_index(0, 10), None);
        assert_eq!(g.cell_coord_of_index(100), None);
    }
}
