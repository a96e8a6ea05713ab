//! Depth frame to point cloud back-projection.

use super::colour_map::ramp_rgb;
use super::point::{Point3D, PointCloud};
use crate::acquisition::{ColorFrame, DepthFrame};
use crate::config::CalibrationConfig;
use crate::device::{DepthEncoding, FRAME_HEIGHT, FRAME_WIDTH, RAW_NO_VALUE};
use crate::error::{Error, Result};

/// Raw disparity curve: metres = 1 / (raw * A + B)
const RAW_COEFF_A: f32 = -0.003_071_101_6;
const RAW_COEFF_B: f32 = 3.330_949_5;
const RAW_LUT_SIZE: usize = 2048;

/// Camera alignment parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub width: usize,
    pub height: usize,
    pub aspect_ratio: f32,
    /// Nearest trusted depth, metres
    pub min_depth: f32,
    /// Farthest trusted depth, metres
    pub max_depth: f32,
    pub scale_factor: f32,
    pub encoding: DepthEncoding,
    pub registration_offset_mm: i32,
    pub use_colour_map: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default(), DepthEncoding::default())
    }
}

impl Calibration {
    pub fn from_config(config: &CalibrationConfig, encoding: DepthEncoding) -> Self {
        Self {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            aspect_ratio: config.aspect_ratio,
            min_depth: config.min_depth,
            max_depth: config.max_depth,
            scale_factor: config.scale_factor,
            encoding,
            registration_offset_mm: config.registration_offset_mm,
            use_colour_map: config.use_colour_map,
        }
    }

    pub fn center_x(&self) -> f32 {
        self.width as f32 / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.height as f32 / 2.0
    }
}

/// Per-pass sample accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub valid: usize,
    /// Sentinel samples
    pub no_return: usize,
    /// Samples outside the legal range of the encoding
    pub out_of_range: usize,
}

/// Turns depth (and optional colour) frames into point clouds.
///
/// Stateless between frames: the output depends only on the inputs.
#[derive(Debug, Clone)]
pub struct PointCloudProjector {
    calibration: Calibration,
    raw_lut: Vec<f32>,
}

impl PointCloudProjector {
    pub fn new(calibration: Calibration) -> Self {
        let raw_lut = (0..RAW_LUT_SIZE as u16).map(raw_to_metres).collect();
        Self {
            calibration,
            raw_lut,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Default encoding, used for frames that do not carry their own
    pub fn set_encoding(&mut self, encoding: DepthEncoding) {
        self.calibration.encoding = encoding;
    }

    /// Metric depth of one sample in the calibrated encoding. `Ok(None)` for
    /// the sentinel.
    pub fn depth_of(&self, raw: u16) -> Result<Option<f32>> {
        self.depth_in(raw, self.calibration.encoding)
    }

    fn depth_in(&self, raw: u16, encoding: DepthEncoding) -> Result<Option<f32>> {
        let calibration = &self.calibration;
        if raw == encoding.sentinel() {
            return Ok(None);
        }

        let metres = match encoding {
            DepthEncoding::Raw11Bit => self
                .raw_lut
                .get(raw as usize)
                .copied()
                .unwrap_or(f32::NAN),
            DepthEncoding::Millimeter => raw as f32 / 1000.0,
            DepthEncoding::Registered => {
                (raw as i32 + calibration.registration_offset_mm) as f32 / 1000.0
            }
        };

        if !metres.is_finite() || metres < calibration.min_depth || metres > calibration.max_depth
        {
            return Err(Error::InvalidDepthSample { raw, encoding });
        }
        Ok(Some(metres))
    }

    /// Back-project a single pixel
    pub fn point_at(&self, px: usize, py: usize, z: f32) -> Point3D {
        let calibration = &self.calibration;
        let x = (px as f32 - calibration.center_x())
            * calibration.aspect_ratio
            * z
            * calibration.scale_factor;
        // Image rows grow downward; +y is up
        let y = (calibration.center_y() - py as f32) * z * calibration.scale_factor;
        Point3D::new(x, y, z)
    }

    /// Project a full frame into a new cloud
    pub fn project(&self, depth: &DepthFrame, color: Option<&ColorFrame>) -> PointCloud {
        let mut cloud = PointCloud::new(depth.width, depth.height);
        self.project_into(depth, color, &mut cloud);
        cloud
    }

    /// Project a full frame, overwriting every point of `cloud`
    pub fn project_into(
        &self,
        depth: &DepthFrame,
        color: Option<&ColorFrame>,
        cloud: &mut PointCloud,
    ) -> ProjectionStats {
        if cloud.width() != depth.width || cloud.height() != depth.height {
            cloud.reshape(depth.width, depth.height);
        }
        if depth.data.len() != cloud.len() {
            log::warn!(
                "Depth frame {} has {} samples for {} pixels",
                depth.sequence,
                depth.data.len(),
                cloud.len()
            );
            cloud.points_mut().fill(Point3D::INVALID);
        }
        let color = color.filter(|c| {
            c.width == depth.width
                && c.height == depth.height
                && matches!(c.channels, 1 | 3)
                && c.data.len() == c.pixel_count() * c.channels
        });

        // The frame's own tag wins over the calibration after a format change
        let encoding = depth.encoding.unwrap_or(self.calibration.encoding);
        let mut stats = ProjectionStats::default();
        let width = depth.width.max(1);
        for (i, (point, &raw)) in cloud.points_mut().iter_mut().zip(&depth.data).enumerate() {
            let z = match self.depth_in(raw, encoding) {
                Ok(Some(z)) => z,
                Ok(None) => {
                    stats.no_return += 1;
                    *point = Point3D::INVALID;
                    continue;
                }
                Err(_) => {
                    stats.out_of_range += 1;
                    *point = Point3D::INVALID;
                    continue;
                }
            };

            let (px, py) = (i % width, i / width);
            let mut projected = self.point_at(px, py, z);
            projected.color = match color {
                Some(frame) => frame.pixel(px, py).map(|samples| match samples {
                    [r, g, b] => [*r, *g, *b],
                    [grey] => [*grey; 3],
                    _ => [0; 3],
                }),
                None if self.calibration.use_colour_map => Some(ramp_rgb(
                    z,
                    self.calibration.min_depth,
                    self.calibration.max_depth,
                )),
                None => None,
            };
            *point = projected;
            stats.valid += 1;
        }

        log::trace!(
            "Projected frame {}: {} valid, {} no return, {} out of range",
            depth.sequence,
            stats.valid,
            stats.no_return,
            stats.out_of_range
        );
        stats
    }
}

/// Project a depth frame with the given calibration
pub fn project(
    depth: &DepthFrame,
    color: Option<&ColorFrame>,
    calibration: &Calibration,
) -> PointCloud {
    PointCloudProjector::new(calibration.clone()).project(depth, color)
}

fn raw_to_metres(raw: u16) -> f32 {
    if raw >= RAW_NO_VALUE {
        return f32::NAN;
    }
    let denominator = raw as f32 * RAW_COEFF_A + RAW_COEFF_B;
    if denominator <= 0.0 {
        return f32::NAN;
    }
    1.0 / denominator
}
