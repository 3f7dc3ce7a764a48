use foundation::Wgs84;
use parking_lot::RwLock;

/// A GPS reading. Presence of a fix is explicit; `(0, 0, 0)` is a valid position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub position: Wgs84,
    pub timestamp_ms: u64,
}

pub trait LocationProvider: Send + Sync {
    /// Whether the platform location service is running and permitted.
    fn service_available(&self) -> bool;

    fn last_fix(&self) -> Option<GpsFix>;

    /// The fix to search with, or `None` when position is unknown.
    fn current_fix(&self) -> Option<GpsFix> {
        if self.service_available() {
            self.last_fix()
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct LocationState {
    available: bool,
    fix: Option<GpsFix>,
}

/// Location fed by a platform callback and read by the poller.
#[derive(Debug, Default)]
pub struct SharedLocation {
    state: RwLock<LocationState>,
}

impl SharedLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.state.write().available = available;
    }

    pub fn update(&self, position: Wgs84, timestamp_ms: u64) {
        let mut state = self.state.write();
        state.available = true;
        state.fix = Some(GpsFix {
            position,
            timestamp_ms,
        });
    }

    pub fn clear_fix(&self) {
        self.state.write().fix = None;
    }
}

impl LocationProvider for SharedLocation {
    fn service_available(&self) -> bool {
        self.state.read().available
    }

    fn last_fix(&self) -> Option<GpsFix> {
        self.state.read().fix
    }
}

/// Fixed position, e.g. from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLocation {
    fix: Option<GpsFix>,
}

impl StaticLocation {
    pub fn at(position: Wgs84) -> Self {
        Self {
            fix: Some(GpsFix {
                position,
                timestamp_ms: 0,
            }),
        }
    }

    pub fn unknown() -> Self {
        Self { fix: None }
    }
}

impl LocationProvider for StaticLocation {
    fn service_available(&self) -> bool {
        self.fix.is_some()
    }

    fn last_fix(&self) -> Option<GpsFix> {
        self.fix
    }
}
