use nalgebra::Vector3;

/// Earth-centered, Earth-fixed Cartesian coordinates (meters).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Ecef {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn as_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// Straight-line distance through the Earth (meters).
    pub fn distance(self, other: Ecef) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }
}

impl From<Vector3<f64>> for Ecef {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<[f64; 3]> for Ecef {
    fn from(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

#[cfg(test)]
mod tests {
    use super::Ecef;
    use nalgebra::Vector3;

    #[test]
    fn vector_conversions_agree() {
        let e = Ecef::new(1.0, -2.0, 3.5);
        assert_eq!(Ecef::from(e.to_vector()), e);
        assert_eq!(Ecef::from(e.as_array()), e);
        assert_eq!(e.to_vector(), Vector3::new(1.0, -2.0, 3.5));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Ecef::new(0.0, 0.0, 0.0);
        let b = Ecef::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(b), 5.0);
    }
}
