use nalgebra::Point3;

/// Upper bound on the points kept for one map's visualization.
pub const MAX_VERTICES: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_unit(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }
}

/// Color new map clouds are drawn with unless configured otherwise.
pub const DEFAULT_CLOUD_COLOR: Rgb8 = Rgb8::new(221, 255, 25);

/// Sparse point cloud of a loaded map, in map-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f32>>,
    color: Rgb8,
}

impl PointCloud {
    /// Keeps at most [`MAX_VERTICES`] points; the rest are dropped.
    pub fn new(mut points: Vec<Point3<f32>>, color: Rgb8) -> Self {
        points.truncate(MAX_VERTICES);
        Self { points, color }
    }

    pub fn empty(color: Rgb8) -> Self {
        Self {
            points: Vec::new(),
            color,
        }
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn color(&self) -> Rgb8 {
        self.color
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
