use std::collections::BTreeMap;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::object::{ObjectData, Prefab};

/// Local stand-in for a remote object, positioned in its scene's map frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub object_id: String,
    pub prefab: Prefab,
    pub data: ObjectData,
    pub local_position: Vector3<f64>,
    pub local_rotation: UnitQuaternion<f64>,
    /// Hidden until the first field update has been applied.
    pub active: bool,
    /// False when the scene's map was not loaded and the position fell back
    /// to the map origin.
    pub anchored: bool,
}

impl Placeholder {
    fn new(object_id: &str, prefab: Prefab, data: ObjectData) -> Self {
        Self {
            object_id: object_id.to_string(),
            prefab,
            data,
            local_position: Vector3::zeros(),
            local_rotation: UnitQuaternion::identity(),
            active: false,
            anchored: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaceholderSet {
    items: BTreeMap<String, Placeholder>,
}

impl PlaceholderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a placeholder unless one exists; returns whether it was created.
    pub fn spawn(&mut self, object_id: &str, data: &ObjectData) -> bool {
        if self.items.contains_key(object_id) {
            return false;
        }
        let prefab = Prefab::from_data(data);
        debug!(object_id, prefab = ?prefab, "spawning placeholder");
        self.items.insert(
            object_id.to_string(),
            Placeholder::new(object_id, prefab, data.clone()),
        );
        true
    }

    pub fn get(&self, object_id: &str) -> Option<&Placeholder> {
        self.items.get(object_id)
    }

    pub fn get_mut(&mut self, object_id: &str) -> Option<&mut Placeholder> {
        self.items.get_mut(object_id)
    }

    pub fn destroy(&mut self, object_id: &str) -> Option<Placeholder> {
        self.items.remove(object_id)
    }

    /// Destroys every placeholder; returns how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Placeholder> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
