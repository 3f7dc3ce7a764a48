//! Object-store records for scenes and AR objects.
//!
//! Field names follow the store's schema (`SceneGlobal`, `AROGlobal`).

use foundation::{MapId, Wgs84};
use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const SCENE_CLASS: &str = "SceneGlobal";
pub const OBJECT_CLASS: &str = "AROGlobal";

/// Free-form per-object payload.
pub type ObjectData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("orientation is the zero quaternion")]
    ZeroQuaternion,
    #[error("orientation has non-finite components")]
    NonFinite,
}

/// The set of objects authored against one map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "objectId")]
    pub id: String,
    #[serde(rename = "mapId")]
    pub map_id: i32,
    #[serde(rename = "AROs", default)]
    pub objects: Vec<String>,
}

impl Scene {
    pub fn map_id(&self) -> MapId {
        MapId::new(self.map_id)
    }

    /// Appends ids not already present, keeping order.
    pub fn add_unique(&mut self, ids: &[String]) {
        for id in ids {
            if !self.objects.contains(id) {
                self.objects.push(id.clone());
            }
        }
    }

    pub fn remove_all(&mut self, ids: &[String]) {
        self.objects.retain(|id| !ids.contains(id));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    #[serde(rename = "objectId")]
    pub id: String,
    #[serde(rename = "sceneId")]
    pub scene_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "prefabIndex", default)]
    pub prefab_index: i32,
    #[serde(default)]
    pub data: ObjectData,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub quaternion_x: f64,
    #[serde(default)]
    pub quaternion_y: f64,
    #[serde(default)]
    pub quaternion_z: f64,
    #[serde(default)]
    pub quaternion_w: f64,
}

impl RemoteObject {
    pub fn from_new(id: impl Into<String>, new: NewObject) -> Self {
        let mut object = Self {
            id: id.into(),
            scene_id: new.scene_id,
            author: new.author,
            prefab_index: new.prefab_index,
            data: new.data,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            quaternion_x: 0.0,
            quaternion_y: 0.0,
            quaternion_z: 0.0,
            quaternion_w: 0.0,
        };
        object.set_position(new.position);
        object.set_orientation(new.orientation);
        object
    }

    pub fn position(&self) -> Wgs84 {
        Wgs84::new(self.latitude, self.longitude, self.altitude)
    }

    pub fn set_position(&mut self, position: Wgs84) {
        self.latitude = position.lat_deg;
        self.longitude = position.lon_deg;
        self.altitude = position.alt_m;
    }

    /// Stored orientation as `[x, y, z, w]`.
    pub fn orientation(&self) -> [f64; 4] {
        [
            self.quaternion_x,
            self.quaternion_y,
            self.quaternion_z,
            self.quaternion_w,
        ]
    }

    pub fn set_orientation(&mut self, [x, y, z, w]: [f64; 4]) {
        self.quaternion_x = x;
        self.quaternion_y = y;
        self.quaternion_z = z;
        self.quaternion_w = w;
    }

    /// The stored orientation normalized; objects created without one carry
    /// all zeros, which is reported as an error.
    pub fn orientation_quat(&self) -> Result<UnitQuaternion<f64>, ObjectError> {
        let [x, y, z, w] = self.orientation();
        if ![x, y, z, w].iter().all(|v| v.is_finite()) {
            return Err(ObjectError::NonFinite);
        }
        let q = Quaternion::new(w, x, y, z);
        if q.norm() < 1e-9 {
            return Err(ObjectError::ZeroQuaternion);
        }
        Ok(UnitQuaternion::from_quaternion(q))
    }

    pub fn prefab(&self) -> Prefab {
        Prefab::from_data(&self.data)
    }
}

/// Fields of an object before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub scene_id: String,
    pub author: String,
    pub prefab_index: i32,
    pub data: ObjectData,
    pub position: Wgs84,
    pub orientation: [f64; 4],
}

/// Visual template a placeholder is spawned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefab {
    Poster { url: Option<String> },
    Diamond,
    Default,
}

impl Prefab {
    pub const KEY: &'static str = "Prefab";
    pub const POSTER_URL_KEY: &'static str = "PosterURL";

    pub fn from_data(data: &ObjectData) -> Self {
        match data.get(Self::KEY).and_then(Value::as_str) {
            Some("Poster") => Prefab::Poster {
                url: data
                    .get(Self::POSTER_URL_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            Some("AR Diamond") => Prefab::Diamond,
            _ => Prefab::Default,
        }
    }

    pub fn index(&self) -> i32 {
        match self {
            Prefab::Poster { .. } | Prefab::Default => 0,
            Prefab::Diamond => 1,
        }
    }

    /// Data payload that selects this prefab.
    pub fn to_data(&self) -> ObjectData {
        let mut data = ObjectData::new();
        match self {
            Prefab::Poster { url } => {
                data.insert(Self::KEY.into(), Value::from("Poster"));
                if let Some(url) = url {
                    data.insert(Self::POSTER_URL_KEY.into(), Value::from(url.as_str()));
                }
            }
            Prefab::Diamond => {
                data.insert(Self::KEY.into(), Value::from("AR Diamond"));
            }
            Prefab::Default => {}
        }
        data
    }
}
