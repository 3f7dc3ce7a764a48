use std::collections::BTreeMap;

use foundation::MapId;

/// Lifecycle states of a map as it moves through loading.
///
/// Requested → Fetching → Loading → Resident → Evicted, with Rejected as the
/// terminal state for payloads the native engine refused.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResidencyState {
    Requested,
    Fetching,
    Loading,
    Resident,
    Evicted,
    Rejected,
}

impl ResidencyState {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ResidencyState::Requested | ResidencyState::Fetching | ResidencyState::Loading
        )
    }
}

/// Per-map residency bookkeeping, keyed deterministically.
#[derive(Debug, Default, Clone)]
pub struct ResidencyTable {
    states: BTreeMap<MapId, ResidencyState>,
}

impl ResidencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: MapId) -> Option<ResidencyState> {
        self.states.get(&id).copied()
    }

    pub fn set(&mut self, id: MapId, state: ResidencyState) {
        self.states.insert(id, state);
    }

    /// Forgets a map, e.g. after a transient failure so the next poll retries it.
    pub fn clear(&mut self, id: MapId) {
        self.states.remove(&id);
    }

    /// Drops every `Evicted` entry; returns how many were dropped.
    pub fn prune_evicted(&mut self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, s| *s != ResidencyState::Evicted);
        before - self.states.len()
    }

    pub fn is_rejected(&self, id: MapId) -> bool {
        self.state(id) == Some(ResidencyState::Rejected)
    }

    pub fn rejected(&self) -> Vec<MapId> {
        self.with_state(ResidencyState::Rejected)
    }

    pub fn with_state(&self, state: ResidencyState) -> Vec<MapId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| *id)
            .collect()
    }
}
