//! Row/column tiling of the ground plane.
//!
//! Rows run along z from `front` to `back`, columns along x from `left` to
//! `right`. Every cell is half open on its high edges except the last row and
//! column, which also own the outer edge, so the cells partition the closed
//! extent exactly.

use super::cell::GridCell;
use crate::cloud::{Point3D, PointCloud};
use crate::config::GridConfig;
use crate::error::{Error, Result};

/// Outer bounds and tiling of a grid, metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridExtent {
    pub front: f32,
    pub back: f32,
    pub left: f32,
    pub right: f32,
    pub rows: usize,
    pub cols: usize,
}

impl GridExtent {
    pub fn new(
        front: f32,
        back: f32,
        left: f32,
        right: f32,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        if ![front, back, left, right].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidExtent("bounds must be finite".into()));
        }
        if front >= back {
            return Err(Error::InvalidExtent(format!(
                "front {} must be below back {}",
                front, back
            )));
        }
        if left >= right {
            return Err(Error::InvalidExtent(format!(
                "left {} must be below right {}",
                left, right
            )));
        }
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidExtent(format!("{}x{} cells", rows, cols)));
        }
        Ok(Self {
            front,
            back,
            left,
            right,
            rows,
            cols,
        })
    }

    /// Width of one column along x
    pub fn cell_width(&self) -> f32 {
        (self.right - self.left) / self.cols as f32
    }

    /// Depth of one row along z
    pub fn cell_depth(&self) -> f32 {
        (self.back - self.front) / self.rows as f32
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.left && x <= self.right && z >= self.front && z <= self.back
    }
}

/// Where the grid is in its per-frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    Accumulating,
    Finalized,
}

/// Corner cells of the grid, the named A1/C1/A3/C3 cells of a 3x3 layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
    pub front_left: GridCell,
    pub front_right: GridCell,
    pub back_left: GridCell,
    pub back_right: GridCell,
}

/// Per-cell height statistics over an R x C tiling of the (x, z) plane
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    extent: GridExtent,
    x_bounds: Vec<f32>,
    z_bounds: Vec<f32>,
    cells: Vec<GridCell>,
    floor: Option<f32>,
    state: GridState,
}

impl SpatialGrid {
    pub fn new(
        front: f32,
        back: f32,
        left: f32,
        right: f32,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        let extent = GridExtent::new(front, back, left, right, rows, cols)?;
        Ok(Self::with_extent(extent))
    }

    pub fn from_config(config: &GridConfig) -> Result<Self> {
        let mut grid = Self::new(
            config.front,
            config.back,
            config.left,
            config.right,
            config.rows,
            config.cols,
        )?;
        grid.set_floor(config.min_height);
        Ok(grid)
    }

    fn with_extent(extent: GridExtent) -> Self {
        let mut grid = Self {
            extent,
            x_bounds: Vec::new(),
            z_bounds: Vec::new(),
            cells: Vec::with_capacity(extent.rows * extent.cols),
            floor: None,
            state: GridState::Accumulating,
        };
        grid.rebuild_bounds();
        grid.cells = (0..extent.rows)
            .flat_map(|row| (0..extent.cols).map(move |col| (row, col)))
            .map(|(row, col)| {
                GridCell::new(
                    row,
                    col,
                    (grid.x_bounds[col], grid.x_bounds[col + 1]),
                    (grid.z_bounds[row], grid.z_bounds[row + 1]),
                )
            })
            .collect();
        grid
    }

    fn rebuild_bounds(&mut self) {
        let e = self.extent;
        self.x_bounds = edges(e.left, e.right, e.cols);
        self.z_bounds = edges(e.front, e.back, e.rows);
        for cell in &mut self.cells {
            cell.x_min = self.x_bounds[cell.col];
            cell.x_max = self.x_bounds[cell.col + 1];
            cell.z_min = self.z_bounds[cell.row];
            cell.z_max = self.z_bounds[cell.row + 1];
        }
    }

    /// Clear every cell to the empty sentinels and start a new frame
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(GridCell::clear);
        self.state = GridState::Accumulating;
    }

    /// Add one point. Invalid points, points below the floor and points
    /// outside the extent are ignored.
    pub fn ingest(&mut self, point: &Point3D) {
        if !point.is_valid() {
            return;
        }
        if self.floor.is_some_and(|floor| point.y < floor) {
            return;
        }
        if let Some((row, col)) = self.locate(point.x, point.z) {
            let index = row * self.extent.cols + col;
            self.cells[index].accumulate(point.y);
        }
    }

    /// Add a whole cloud; the statistics are final for this frame afterwards
    pub fn ingest_all(&mut self, cloud: &PointCloud) {
        for point in cloud.valid_points() {
            self.ingest(point);
        }
        self.state = GridState::Finalized;
        log::trace!(
            "Grid finalized: {} points binned",
            self.cells.iter().map(|c| c.count as usize).sum::<usize>()
        );
    }

    /// Snapshot of one cell
    pub fn cell_at(&self, row: usize, col: usize) -> Option<GridCell> {
        if row >= self.extent.rows || col >= self.extent.cols {
            return None;
        }
        self.cells.get(row * self.extent.cols + col).copied()
    }

    /// Row and column of the cell owning (x, z), or `None` outside the extent
    pub fn locate(&self, x: f32, z: f32) -> Option<(usize, usize)> {
        if !self.extent.contains(x, z) {
            return None;
        }
        Some((bucket(&self.z_bounds, z), bucket(&self.x_bounds, x)))
    }

    /// Move the whole extent sideways; statistics are kept. A shift that
    /// would leave non-finite or collapsed bounds is refused.
    pub fn shift_x(&mut self, delta: f32) -> Result<()> {
        let e = self.extent;
        self.apply_shift(GridExtent::new(
            e.front,
            e.back,
            e.left + delta,
            e.right + delta,
            e.rows,
            e.cols,
        ))
    }

    /// Move the whole extent forward or back; statistics are kept
    pub fn shift_z(&mut self, delta: f32) -> Result<()> {
        let e = self.extent;
        self.apply_shift(GridExtent::new(
            e.front + delta,
            e.back + delta,
            e.left,
            e.right,
            e.rows,
            e.cols,
        ))
    }

    fn apply_shift(&mut self, shifted: Result<GridExtent>) -> Result<()> {
        self.extent = shifted.inspect_err(|e| log::warn!("Ignoring grid shift: {}", e))?;
        self.rebuild_bounds();
        Ok(())
    }

    /// Replace the bounds and tiling. On error the grid is left as it was.
    pub fn resize_extent(
        &mut self,
        front: f32,
        back: f32,
        left: f32,
        right: f32,
        rows: usize,
        cols: usize,
    ) -> Result<()> {
        let extent = GridExtent::new(front, back, left, right, rows, cols).inspect_err(|e| {
            log::warn!("Keeping previous grid: {}", e);
        })?;
        let floor = self.floor;
        *self = Self::with_extent(extent);
        self.floor = floor;
        log::debug!("Grid resized to {:?}", extent);
        Ok(())
    }

    /// Ignore points lower than `floor`
    pub fn set_floor(&mut self, floor: Option<f32>) {
        self.floor = floor;
    }

    pub fn floor(&self) -> Option<f32> {
        self.floor
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn extent(&self) -> &GridExtent {
        &self.extent
    }

    /// All cells, row-major
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Non-empty cell with the highest obstacle top
    pub fn tallest_cell(&self) -> Option<GridCell> {
        self.cells
            .iter()
            .filter(|c| !c.is_empty())
            .max_by(|a, b| a.max_height.total_cmp(&b.max_height))
            .copied()
    }

    pub fn corners(&self) -> Corners {
        let last_row = self.extent.rows - 1;
        let last_col = self.extent.cols - 1;
        let at = |row: usize, col: usize| self.cells[row * self.extent.cols + col];
        Corners {
            front_left: at(0, 0),
            front_right: at(0, last_col),
            back_left: at(last_row, 0),
            back_right: at(last_row, last_col),
        }
    }
}

fn edges(low: f32, high: f32, count: usize) -> Vec<f32> {
    let step = (high - low) / count as f32;
    let mut bounds: Vec<f32> = (0..count).map(|i| low + step * i as f32).collect();
    bounds.push(high);
    bounds
}

/// Index `i` with `bounds[i] <= v < bounds[i + 1]`, the last bucket closed.
/// `v` must lie within the outer bounds.
fn bucket(bounds: &[f32], v: f32) -> usize {
    let last = bounds.len() - 2;
    let span = bounds[last + 1] - bounds[0];
    let mut index = (((v - bounds[0]) / span) * (last + 1) as f32).floor() as usize;
    index = index.min(last);
    // Rounding in the estimate can land one off near an edge
    while index < last && v >= bounds[index + 1] {
        index += 1;
    }
    while index > 0 && v < bounds[index] {
        index -= 1;
    }
    index
}
