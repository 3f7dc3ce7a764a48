/// Persistent map identity assigned by the remote map service.
///
/// Valid ids are strictly positive; the service never hands out `0`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(pub i32);

impl MapId {
    pub fn new(id: i32) -> Self {
        MapId(id)
    }

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for MapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime handle returned by the native map loader.
///
/// Only meaningful while the map stays loaded. Distinct from [`MapId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapHandle(pub i32);

impl MapHandle {
    pub fn new(handle: i32) -> Self {
        MapHandle(handle)
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for MapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
