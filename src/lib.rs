//! skygrid: depth sensor perception for obstacle height mapping.
//!
//! A capture thread double-buffers depth and colour frames from a
//! [`device::Device`]; each processing tick projects the newest depth frame
//! into a [`cloud::PointCloud`] and bins it into a [`grid::SpatialGrid`] of
//! per-cell height extremes.

pub mod acquisition;
pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod grid;
pub mod pipeline;
#[cfg(feature = "viewer")]
pub mod visualization;

pub use acquisition::FrameAcquisition;
pub use cloud::{Calibration, Point3D, PointCloud, PointCloudProjector};
pub use config::Config;
pub use error::{Error, Result};
pub use grid::{GridCell, SpatialGrid};
pub use pipeline::{Perception, TickReport};
