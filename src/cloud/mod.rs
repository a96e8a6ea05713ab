//! Point cloud reconstruction and storage.

pub mod colour_map;
pub mod persistence;
pub mod point;
pub mod projector;

pub use colour_map::ramp_rgb;
pub use persistence::{export_cloud, import_cloud};
pub use point::{Point3D, PointCloud};
pub use projector::{project, Calibration, PointCloudProjector, ProjectionStats};
