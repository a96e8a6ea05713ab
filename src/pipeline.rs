//! Per-tick consumer: latest frames to point cloud to grid.

use crate::acquisition::{ColorFrame, DepthFrame, FrameAcquisition};
use crate::cloud::{Calibration, PointCloud, PointCloudProjector, ProjectionStats};
use crate::device::DepthEncoding;
use crate::error::Result;
use crate::grid::SpatialGrid;
use std::time::Instant;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Depth frame processed this tick, `None` when nothing new arrived
    pub depth_sequence: Option<u64>,
    /// Colour frame paired with it, if any
    pub color_sequence: Option<u64>,
    /// Depth format the processed frame was decoded with
    pub encoding: Option<DepthEncoding>,
    pub stats: ProjectionStats,
}

/// Owns the projector, the current cloud and the grid. Everything here is
/// mutated by a single processing context.
#[derive(Debug)]
pub struct Perception {
    projector: PointCloudProjector,
    cloud: PointCloud,
    grid: SpatialGrid,
    stalled: bool,
    frames: u64,
}

impl Perception {
    pub fn new(calibration: Calibration, grid: SpatialGrid) -> Self {
        let cloud = PointCloud::new(calibration.width, calibration.height);
        Self {
            projector: PointCloudProjector::new(calibration),
            cloud,
            grid,
            stalled: false,
            frames: 0,
        }
    }

    /// Process the newest frames from `acquisition`, if any.
    ///
    /// On `SignalLost` the cloud and grid keep the last processed frame.
    pub fn tick(&mut self, acquisition: &FrameAcquisition, now: Instant) -> Result<TickReport> {
        if let Err(e) = acquisition.check_signal(now) {
            if !self.stalled {
                log::warn!("{}", e);
                self.stalled = true;
            }
            return Err(e);
        }
        if self.stalled {
            log::info!("Depth signal recovered");
            self.stalled = false;
        }

        if !acquisition.take_depth_update() {
            return Ok(TickReport::default());
        }
        let Some(depth) = acquisition.latest_depth() else {
            return Ok(TickReport::default());
        };
        acquisition.take_color_update();
        let color = acquisition.latest_color();
        Ok(self.process_frames(&depth, color.as_deref()))
    }

    /// Project `depth` (and `color`) and rebuild the grid from it
    pub fn process_frames(&mut self, depth: &DepthFrame, color: Option<&ColorFrame>) -> TickReport {
        let stats = self.projector.project_into(depth, color, &mut self.cloud);
        self.grid.reset();
        self.grid.ingest_all(&self.cloud);

        self.frames += 1;
        if self.frames % 100 == 0 {
            log::debug!(
                "Processed {} frames, last {}: {} valid points",
                self.frames,
                depth.sequence,
                stats.valid
            );
        }

        TickReport {
            depth_sequence: Some(depth.sequence),
            color_sequence: color.map(|c| c.sequence),
            encoding: Some(
                depth
                    .encoding
                    .unwrap_or(self.projector.calibration().encoding),
            ),
            stats,
        }
    }

    /// Replace the current cloud, e.g. with an imported one, and rebuild the grid
    pub fn ingest_cloud(&mut self, cloud: PointCloud) {
        self.cloud = cloud;
        self.grid.reset();
        self.grid.ingest_all(&self.cloud);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Grid access for extent changes (`shift_x`, `resize_extent`, ...)
    pub fn grid_mut(&mut self) -> &mut SpatialGrid {
        &mut self.grid
    }
}
