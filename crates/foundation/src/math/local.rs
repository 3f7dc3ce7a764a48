use nalgebra::{Matrix3, Vector3};

use super::{Ecef, Wgs84, wgs84_to_ecef};

/// Local East-North-Up coordinates (meters).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Enu {
    pub east: f64,
    pub north: f64,
    pub up: f64,
}

impl Enu {
    pub fn new(east: f64, north: f64, up: f64) -> Self {
        Self { east, north, up }
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.east, self.north, self.up)
    }
}

/// Rotation taking ENU axes at `origin` into ECEF axes.
///
/// Columns are the east, north and up unit vectors expressed in ECEF.
pub fn enu_rotation(origin: Wgs84) -> Matrix3<f64> {
    let lat = origin.lat_deg.to_radians();
    let lon = origin.lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    Matrix3::new(
        -sin_lon,
        -sin_lat * cos_lon,
        cos_lat * cos_lon,
        cos_lon,
        -sin_lat * sin_lon,
        cos_lat * sin_lon,
        0.0,
        cos_lat,
        sin_lat,
    )
}

pub fn ecef_to_enu(point: Ecef, origin: Wgs84) -> Enu {
    let d = point.to_vector() - wgs84_to_ecef(origin).to_vector();
    let local = enu_rotation(origin).transpose() * d;
    Enu::new(local.x, local.y, local.z)
}

pub fn enu_to_ecef(enu: Enu, origin: Wgs84) -> Ecef {
    let d = enu_rotation(origin) * enu.to_vector();
    Ecef::from(wgs84_to_ecef(origin).to_vector() + d)
}
