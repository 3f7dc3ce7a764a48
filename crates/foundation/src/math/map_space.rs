//! Map-local ↔ ECEF transforms.
//!
//! Every loaded map carries a `mapToEcef` similarity transform: a rotation,
//! a uniform scale and an ECEF translation. Map-local points are right-handed
//! meters in the point cloud's own frame.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use super::{Ecef, Wgs84, ecef_to_wgs84, enu_rotation, wgs84_to_ecef};

/// Number of values in the map service's flat `mapToEcef` layout.
pub const MAP_TO_ECEF_LEN: usize = 13;

const ORTHONORMAL_EPS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum MapSpaceError {
    WrongLength { expected: usize, got: usize },
    NonFinite,
    InvalidScale(f64),
    NotARotation,
    NotAffine,
}

impl std::fmt::Display for MapSpaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapSpaceError::WrongLength { expected, got } => {
                write!(f, "mapToEcef has {got} values, expected {expected}")
            }
            MapSpaceError::NonFinite => write!(f, "mapToEcef contains non-finite values"),
            MapSpaceError::InvalidScale(s) => write!(f, "mapToEcef scale must be positive: {s}"),
            MapSpaceError::NotARotation => write!(f, "mapToEcef rotation is not orthonormal"),
            MapSpaceError::NotAffine => write!(f, "matrix bottom row is not [0, 0, 0, 1]"),
        }
    }
}

impl std::error::Error for MapSpaceError {}

/// Similarity transform from a map's local frame into ECEF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapToEcef {
    translation: Vector3<f64>,
    rotation: Rotation3<f64>,
    scale: f64,
}

impl MapToEcef {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: Rotation3::identity(),
            scale: 1.0,
        }
    }

    pub fn from_parts(
        translation: Ecef,
        rotation: Rotation3<f64>,
        scale: f64,
    ) -> Result<Self, MapSpaceError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(MapSpaceError::InvalidScale(scale));
        }
        let t = translation.to_vector();
        if !t.iter().all(|v| v.is_finite()) {
            return Err(MapSpaceError::NonFinite);
        }
        Ok(Self {
            translation: t,
            rotation,
            scale,
        })
    }

    /// Map frame whose axes are east, north and up at `origin`.
    pub fn enu_at(origin: Wgs84) -> Self {
        Self {
            translation: wgs84_to_ecef(origin).to_vector(),
            rotation: Rotation3::from_matrix_unchecked(enu_rotation(origin)),
            scale: 1.0,
        }
    }

    /// Parses the flat service layout `[tx, ty, tz, r00, r01, .., r22, scale]`
    /// with the rotation stored row-major.
    pub fn from_service_layout(values: &[f64]) -> Result<Self, MapSpaceError> {
        if values.len() != MAP_TO_ECEF_LEN {
            return Err(MapSpaceError::WrongLength {
                expected: MAP_TO_ECEF_LEN,
                got: values.len(),
            });
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(MapSpaceError::NonFinite);
        }

        let r = Matrix3::from_row_slice(&values[3..12]);
        let rotation = checked_rotation(&r)?;
        Self::from_parts(
            Ecef::new(values[0], values[1], values[2]),
            rotation,
            values[12],
        )
    }

    pub fn to_service_layout(&self) -> [f64; MAP_TO_ECEF_LEN] {
        let r = self.rotation.matrix();
        let mut out = [0.0; MAP_TO_ECEF_LEN];
        out[0] = self.translation.x;
        out[1] = self.translation.y;
        out[2] = self.translation.z;
        for row in 0..3 {
            for col in 0..3 {
                out[3 + row * 3 + col] = r[(row, col)];
            }
        }
        out[12] = self.scale;
        out
    }

    /// Accepts any 4×4 homogeneous matrix that is a rotation times a positive
    /// uniform scale plus translation.
    pub fn from_homogeneous(m: &Matrix4<f64>) -> Result<Self, MapSpaceError> {
        if !m.iter().all(|v| v.is_finite()) {
            return Err(MapSpaceError::NonFinite);
        }
        let bottom = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if bottom != [0.0, 0.0, 0.0, 1.0] {
            return Err(MapSpaceError::NotAffine);
        }

        let linear: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let det = linear.determinant();
        if det <= 0.0 {
            return Err(MapSpaceError::InvalidScale(det.cbrt()));
        }
        let scale = det.cbrt();
        let rotation = checked_rotation(&(linear / scale))?;
        let t = m.fixed_view::<3, 1>(0, 3).into_owned();

        Self::from_parts(Ecef::from(t), rotation, scale)
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(*self.rotation.matrix() * self.scale));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn translation(&self) -> Ecef {
        Ecef::from(self.translation)
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Geographic position of the map's local origin.
    pub fn origin_wgs84(&self) -> Wgs84 {
        ecef_to_wgs84(self.translation())
    }
}

fn checked_rotation(r: &Matrix3<f64>) -> Result<Rotation3<f64>, MapSpaceError> {
    let should_be_identity = r.transpose() * r;
    if (should_be_identity - Matrix3::identity()).amax() > ORTHONORMAL_EPS
        || r.determinant() <= 0.0
    {
        return Err(MapSpaceError::NotARotation);
    }
    // Snap to the nearest exact rotation so the inverse stays a transpose.
    Ok(Rotation3::from_matrix(r))
}

pub fn map_local_to_ecef(point: Vector3<f64>, map_to_ecef: &MapToEcef) -> Ecef {
    Ecef::from(map_to_ecef.translation + map_to_ecef.rotation * point * map_to_ecef.scale)
}

pub fn ecef_to_map_local(point: Ecef, map_to_ecef: &MapToEcef) -> Vector3<f64> {
    map_to_ecef.rotation.inverse() * (point.to_vector() - map_to_ecef.translation)
        / map_to_ecef.scale
}

pub fn map_local_to_wgs84(point: Vector3<f64>, map_to_ecef: &MapToEcef) -> Wgs84 {
    ecef_to_wgs84(map_local_to_ecef(point, map_to_ecef))
}

pub fn wgs84_to_map_local(geo: Wgs84, map_to_ecef: &MapToEcef) -> Vector3<f64> {
    ecef_to_map_local(wgs84_to_ecef(geo), map_to_ecef)
}

/// Orientation in map space → orientation in ECEF. Translation and scale are ignored.
pub fn rotation_map_to_ecef(
    rotation: UnitQuaternion<f64>,
    map_to_ecef: &MapToEcef,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&map_to_ecef.rotation) * rotation
}

pub fn rotation_ecef_to_map(
    rotation: UnitQuaternion<f64>,
    map_to_ecef: &MapToEcef,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&map_to_ecef.rotation).inverse() * rotation
}
