use std::collections::BTreeMap;

use foundation::MapHandle;
use nalgebra::Point3;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("empty map payload")]
    EmptyPayload,
    #[error("payload rejected: {0}")]
    Rejected(String),
}

/// Native map loader. Calls are synchronous and cheap relative to network I/O;
/// they are made from the lifecycle task only.
pub trait NativeMapEngine: Send + Sync {
    fn load_map(&self, bytes: &[u8]) -> Result<MapHandle, EngineError>;

    /// Freeing an unknown handle is a no-op.
    fn free_map(&self, handle: MapHandle);

    /// Up to `max_points` points of the map's sparse cloud, map-local.
    fn point_cloud(&self, handle: MapHandle, max_points: usize) -> Vec<Point3<f32>>;
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: i32,
    loaded: BTreeMap<MapHandle, usize>,
}

/// Engine without a localizer: accepts any non-empty payload and hands out
/// increasing handles. Used by the CLI and by tests.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    state: Mutex<HeadlessState>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded_handles(&self) -> Vec<MapHandle> {
        self.state.lock().loaded.keys().copied().collect()
    }
}

impl NativeMapEngine for HeadlessEngine {
    fn load_map(&self, bytes: &[u8]) -> Result<MapHandle, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::EmptyPayload);
        }
        let mut state = self.state.lock();
        let handle = MapHandle::new(state.next_handle);
        state.next_handle += 1;
        state.loaded.insert(handle, bytes.len());
        Ok(handle)
    }

    fn free_map(&self, handle: MapHandle) {
        self.state.lock().loaded.remove(&handle);
    }

    fn point_cloud(&self, _handle: MapHandle, _max_points: usize) -> Vec<Point3<f32>> {
        Vec::new()
    }
}
