//! The most recent localization result and what can be derived from it.

use foundation::{map_local_to_wgs84, MapId, MapToEcef, Wgs84};
use nalgebra::{Isometry3, Matrix4, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use parking_lot::RwLock;
use runtime::{EventBus, Notification};
use tracing::{debug, info};

/// One localization result.
///
/// `map_to_tracking` maps map-local coordinates into the device tracking frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizedPose {
    pub valid: bool,
    pub map_id: MapId,
    pub map_to_tracking: Matrix4<f64>,
    pub map_to_ecef: MapToEcef,
    /// Localizer sequence number, increasing per result.
    pub seq: u64,
    pub timestamp_ms: u64,
}

impl LocalizedPose {
    pub fn tracking_to_map(&self) -> Option<Matrix4<f64>> {
        self.map_to_tracking.try_inverse()
    }

    pub fn tracking_point_to_map(&self, point: Vector3<f64>) -> Option<Vector3<f64>> {
        let m = self.tracking_to_map()?;
        Some(m.transform_point(&Point3::from(point)).coords)
    }

    pub fn tracking_point_to_wgs84(&self, point: Vector3<f64>) -> Option<Wgs84> {
        let local = self.tracking_point_to_map(point)?;
        Some(map_local_to_wgs84(local, &self.map_to_ecef))
    }

    /// Camera pose expressed in the map frame.
    pub fn camera_in_map(&self, camera: &Isometry3<f64>) -> Option<Isometry3<f64>> {
        let m = self.tracking_to_map()? * camera.to_homogeneous();
        let linear = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&linear));
        let translation = Translation3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        Some(Isometry3::from_parts(translation, rotation))
    }

    /// Geographic position of the device given its tracking-space camera pose.
    pub fn device_wgs84(&self, camera: &Isometry3<f64>) -> Option<Wgs84> {
        self.tracking_point_to_wgs84(camera.translation.vector)
    }
}

/// Holds exactly one pose: the latest. Readers get a copy.
#[derive(Debug)]
pub struct PoseStore {
    last: RwLock<Option<LocalizedPose>>,
    events: EventBus,
}

impl PoseStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            last: RwLock::new(None),
            events,
        }
    }

    /// Replaces the stored pose. Results older than the stored one are ignored.
    ///
    /// Returns `true` when a valid pose switched to a different map; a
    /// `Localized` notification is emitted in that case.
    pub fn update(&self, pose: LocalizedPose) -> bool {
        let previous = {
            let mut last = self.last.write();
            if let Some(current) = *last {
                if pose.seq < current.seq {
                    debug!(seq = pose.seq, current = current.seq, "stale pose dropped");
                    return false;
                }
            }
            last.replace(pose)
        };

        let map_changed = pose.valid
            && previous
                .filter(|p| p.valid)
                .map(|p| p.map_id != pose.map_id)
                .unwrap_or(true);
        if map_changed {
            info!(map_id = %pose.map_id, "localized against map");
            self.events.emit(Notification::Localized {
                map_id: pose.map_id,
            });
        }
        map_changed
    }

    pub fn last(&self) -> Option<LocalizedPose> {
        *self.last.read()
    }

    pub fn current_map(&self) -> Option<MapId> {
        self.last().filter(|p| p.valid).map(|p| p.map_id)
    }

    pub fn device_wgs84(&self, camera: &Isometry3<f64>) -> Option<Wgs84> {
        self.last()
            .filter(|p| p.valid)
            .and_then(|p| p.device_wgs84(camera))
    }

    pub fn clear(&self) {
        *self.last.write() = None;
    }
}
