/// One rectangle of the horizontal (x, z) plane with the height statistics
/// of the points that fell inside it this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
    pub x_min: f32,
    pub x_max: f32,
    pub z_min: f32,
    pub z_max: f32,
    /// Lowest y seen, `+inf` when empty
    pub min_height: f32,
    /// Highest y seen, `-inf` when empty
    pub max_height: f32,
    pub count: u32,
}

impl GridCell {
    pub(crate) fn new(row: usize, col: usize, x: (f32, f32), z: (f32, f32)) -> Self {
        Self {
            row,
            col,
            x_min: x.0,
            x_max: x.1,
            z_min: z.0,
            z_max: z.1,
            min_height: f32::INFINITY,
            max_height: f32::NEG_INFINITY,
            count: 0,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.min_height = f32::INFINITY;
        self.max_height = f32::NEG_INFINITY;
        self.count = 0;
    }

    pub(crate) fn accumulate(&mut self, y: f32) {
        self.min_height = self.min_height.min(y);
        self.max_height = self.max_height.max(y);
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Centre of the cell footprint as (x, z)
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.z_min + self.z_max) / 2.0,
        )
    }

    /// Footprint centre lifted to the obstacle top, `[x, y, z]`
    pub fn summit(&self) -> Option<[f32; 3]> {
        if self.is_empty() {
            return None;
        }
        let (x, z) = self.center();
        Some([x, self.max_height, z])
    }

    pub fn height_span(&self) -> Option<f32> {
        (!self.is_empty()).then(|| self.max_height - self.min_height)
    }

    /// Closed-rectangle test; ownership of shared edges is decided by the grid
    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.x_min && x <= self.x_max && z >= self.z_min && z <= self.z_max
    }
}
