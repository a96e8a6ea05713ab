//! Ground-plane grid of obstacle heights.

pub mod cell;
pub mod spatial_grid;

pub use cell::GridCell;
pub use spatial_grid::{Corners, GridExtent, GridState, SpatialGrid};
