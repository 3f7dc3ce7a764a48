use super::Ecef;

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 semi-minor axis (meters).
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);
/// WGS84 second eccentricity squared.
pub const WGS84_EP2: f64 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
/// Mean Earth radius used for great-circle distances (meters).
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Geographic position as reported by GPS: degrees and meters above the ellipsoid.
///
/// An altitude of `0.0` is an ordinary value. Whether a fix exists at all is
/// tracked by the caller, never inferred from the numbers here.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Wgs84 {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Wgs84 {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }

    pub fn lat_lon(self) -> LatLon {
        LatLon::new(self.lat_deg, self.lon_deg)
    }
}

/// Planar geographic position (degrees), used where altitude is unknown or irrelevant.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LatLon {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl LatLon {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }
}

pub fn wgs84_to_ecef(geo: Wgs84) -> Ecef {
    let lat = geo.lat_deg.to_radians();
    let lon = geo.lon_deg.to_radians();
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let sin_lon = lon.sin();
    let cos_lon = lon.cos();

    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let x = (n + geo.alt_m) * cos_lat * cos_lon;
    let y = (n + geo.alt_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - WGS84_E2) + geo.alt_m) * sin_lat;

    Ecef::new(x, y, z)
}

/// Bowring's closed-form inverse.
///
/// Altitude uses `p·cosφ + z·sinφ − a·√(1 − e²sin²φ)`, which stays well
/// conditioned at the poles where `p / cosφ` does not.
pub fn ecef_to_wgs84(ecef: Ecef) -> Wgs84 {
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let lon = ecef.y.atan2(ecef.x);

    let theta = (ecef.z * WGS84_A).atan2(p * WGS84_B);
    let sin_theta = theta.sin();
    let cos_theta = theta.cos();

    let lat = (ecef.z + WGS84_EP2 * WGS84_B * sin_theta * sin_theta * sin_theta)
        .atan2(p - WGS84_E2 * WGS84_A * cos_theta * cos_theta * cos_theta);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let alt = p * cos_lat + ecef.z * sin_lat - WGS84_A * (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    Wgs84::new(lat.to_degrees(), lon.to_degrees(), alt)
}

/// Haversine distance on a sphere of [`MEAN_EARTH_RADIUS_M`].
pub fn great_circle_distance_m(a: LatLon, b: LatLon) -> f64 {
    let lat_a = a.lat_deg.to_radians();
    let lat_b = b.lat_deg.to_radians();
    let dlat = lat_b - lat_a;
    let dlon = (b.lon_deg - a.lon_deg).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
