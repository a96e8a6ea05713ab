/// A reconstructed point, metres. Invalid points carry NaN coordinates so
/// they can never be mistaken for real geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub color: Option<[u8; 3]>,
}

impl Point3D {
    pub const INVALID: Point3D = Point3D {
        x: f32::NAN,
        y: f32::NAN,
        z: f32::NAN,
        color: None,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            color: None,
        }
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for Point3D {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Dense per-pixel point array in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    width: usize,
    height: usize,
    points: Vec<Point3D>,
}

impl PointCloud {
    /// A cloud of `width * height` invalid points
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            points: vec![Point3D::INVALID; width * height],
        }
    }

    pub fn from_points(width: usize, height: usize, points: Vec<Point3D>) -> Option<Self> {
        (points.len() == width * height).then_some(Self {
            width,
            height,
            points,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point for pixel column `px`, row `py`
    pub fn get(&self, px: usize, py: usize) -> Option<&Point3D> {
        if px >= self.width || py >= self.height {
            return None;
        }
        self.points.get(py * self.width + px)
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub(crate) fn points_mut(&mut self) -> &mut [Point3D] {
        &mut self.points
    }

    pub(crate) fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.points.clear();
        self.points.resize(width * height, Point3D::INVALID);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point3D> {
        self.points.iter()
    }

    pub fn valid_points(&self) -> impl Iterator<Item = &Point3D> {
        self.points.iter().filter(|p| p.is_valid())
    }

    pub fn valid_count(&self) -> usize {
        self.valid_points().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_is_not_finite() {
        assert!(!Point3D::INVALID.is_valid());
        assert!(Point3D::new(0.0, 0.0, 0.0).is_valid());
        assert!(!Point3D::new(1.0, f32::INFINITY, 1.0).is_valid());
    }

    #[test]
    fn test_new_cloud_is_all_invalid() {
        let cloud = PointCloud::new(4, 3);
        assert_eq!(cloud.len(), 12);
        assert_eq!(cloud.valid_count(), 0);
        assert!(cloud.get(4, 0).is_none());
        assert!(cloud.get(3, 2).is_some());
    }

    #[test]
    fn test_from_points_checks_shape() {
        assert!(PointCloud::from_points(2, 2, vec![Point3D::INVALID; 3]).is_none());
        let cloud = PointCloud::from_points(2, 1, vec![Point3D::new(1.0, 2.0, 3.0); 2]).unwrap();
        assert_eq!(cloud.get(1, 0).unwrap().z, 3.0);
    }
}
