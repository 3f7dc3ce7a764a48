//! Loading and unloading of nearby maps.
//!
//! `MapLifecycle` is the single writer of the [`MapRegistry`]. Each load goes
//! fetch payload → fetch map-to-ECEF → native load → register. The network
//! legs are awaited without holding any lock; after they complete the
//! registry is re-checked and the stop flag honored before anything is
//! mutated.

use std::collections::HashSet;
use std::sync::Arc;

use foundation::{MapHandle, MapId, MapToEcef};
use runtime::{CancelToken, EventBus, Notification};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cloud::{DEFAULT_CLOUD_COLOR, MAX_VERTICES, PointCloud, Rgb8};
use crate::engine::{EngineError, NativeMapEngine};
use crate::job::NearbyMapCandidate;
use crate::registry::{AnchorRoot, MapIdentity, RegistryConflict, SharedRegistry};
use crate::residency::{ResidencyState, ResidencyTable};
use crate::service::{AuthScope, MapPayload, MapService, ServiceError};

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub anchor: AnchorRoot,
    pub cloud_color: Rgb8,
    pub max_cloud_points: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            anchor: AnchorRoot::default(),
            cloud_color: DEFAULT_CLOUD_COLOR,
            max_cloud_points: MAX_VERTICES,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    /// Network or service failure; the map is retried on the next poll.
    #[error("fetching map {map_id} failed: {source}")]
    PayloadFetch {
        map_id: MapId,
        #[source]
        source: ServiceError,
    },
    /// The engine refused the payload; the map is not retried.
    #[error("native load of map {map_id} failed: {source}")]
    NativeLoad {
        map_id: MapId,
        #[source]
        source: EngineError,
    },
    #[error("map {0} was rejected by an earlier load")]
    PreviouslyRejected(MapId),
    #[error("registry conflict: {0}")]
    Conflict(#[from] RegistryConflict),
    #[error("load of map {0} cancelled")]
    Cancelled(MapId),
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub loaded: Vec<MapId>,
    pub unloaded: Vec<MapId>,
    pub failed: Vec<MapId>,
    pub skipped: Vec<MapId>,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.loaded.is_empty() && self.unloaded.is_empty() && self.failed.is_empty()
    }
}

pub struct MapLifecycle {
    engine: Arc<dyn NativeMapEngine>,
    service: Arc<dyn MapService>,
    registry: SharedRegistry,
    events: EventBus,
    cancel: CancelToken,
    config: LifecycleConfig,
    residency: ResidencyTable,
}

impl MapLifecycle {
    pub fn new(
        engine: Arc<dyn NativeMapEngine>,
        service: Arc<dyn MapService>,
        registry: SharedRegistry,
        events: EventBus,
        cancel: CancelToken,
    ) -> Self {
        Self {
            engine,
            service,
            registry,
            events,
            cancel,
            config: LifecycleConfig::default(),
            residency: ResidencyTable::new(),
        }
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn residency(&self) -> &ResidencyTable {
        &self.residency
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_loaded(&self, id: MapId) -> bool {
        self.registry.read().is_loaded(id)
    }

    /// Loads one map unless it is already registered.
    pub async fn load_map(&mut self, candidate: &NearbyMapCandidate) -> Result<MapHandle, LoadError> {
        let id = candidate.id;
        let existing = self.registry.read().handle_for_id(id);
        if let Some(handle) = existing {
            return Ok(handle);
        }
        if self.residency.is_rejected(id) {
            return Err(LoadError::PreviouslyRejected(id));
        }
        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled(id));
        }

        self.residency.set(id, ResidencyState::Fetching);
        let scope = AuthScope::for_privacy(candidate.privacy);
        let fetched = self.fetch(id, scope).await;

        if self.cancel.is_cancelled() {
            self.residency.clear(id);
            return Err(LoadError::Cancelled(id));
        }
        let (payload, map_to_ecef) = match fetched {
            Ok(parts) => parts,
            Err(source) => {
                self.residency.clear(id);
                return Err(LoadError::PayloadFetch { map_id: id, source });
            }
        };

        self.install(candidate, payload, map_to_ecef)
    }

    async fn fetch(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> Result<(MapPayload, MapToEcef), ServiceError> {
        let payload = self.service.fetch_payload(id, scope).await?;
        let map_to_ecef = self.service.fetch_map_to_ecef(id, scope).await?;
        Ok((payload, map_to_ecef))
    }

    fn install(
        &mut self,
        candidate: &NearbyMapCandidate,
        payload: MapPayload,
        map_to_ecef: MapToEcef,
    ) -> Result<MapHandle, LoadError> {
        let id = candidate.id;
        self.residency.set(id, ResidencyState::Loading);

        let mut registry = self.registry.write();
        // Another writer may have registered the map while we were fetching.
        if let Some(handle) = registry.handle_for_id(id) {
            self.residency.set(id, ResidencyState::Resident);
            return Ok(handle);
        }

        info!(
            map_id = %id,
            bytes = payload.len(),
            digest = %payload.digest(),
            "loading map"
        );
        let handle = match self.engine.load_map(payload.bytes()) {
            Ok(handle) => handle,
            Err(source) => {
                drop(registry);
                self.residency.set(id, ResidencyState::Rejected);
                warn!(map_id = %id, error = %source, "native engine rejected map");
                self.events.emit(Notification::MapLoadFailed {
                    map_id: id,
                    reason: source.to_string(),
                });
                return Err(LoadError::NativeLoad { map_id: id, source });
            }
        };

        let points = self
            .engine
            .point_cloud(handle, self.config.max_cloud_points.min(MAX_VERTICES));
        let identity = MapIdentity {
            id,
            name: candidate.name.clone(),
            privacy: candidate.privacy,
            color: self.config.cloud_color,
            map_to_ecef,
        };
        let cloud = PointCloud::new(points, self.config.cloud_color);

        if let Err(conflict) = registry.register(handle, identity, self.config.anchor, cloud) {
            drop(registry);
            error!(map_id = %id, %handle, %conflict, "registry refused freshly loaded map");
            debug_assert!(false, "registry conflict after native load: {conflict}");
            self.engine.free_map(handle);
            self.residency.clear(id);
            return Err(LoadError::Conflict(conflict));
        }
        drop(registry);

        self.residency.set(id, ResidencyState::Resident);
        self.events.emit(Notification::MapLoaded {
            map_id: id,
            handle,
            name: candidate.name.clone(),
        });
        Ok(handle)
    }

    /// Unloads a map if it is loaded; returns whether anything was freed.
    pub fn unload_map(&mut self, id: MapId) -> bool {
        let removed = self.registry.write().unregister_by_identity(id);
        let Some(mut entry) = removed else {
            return false;
        };
        self.engine.free_map(entry.handle);
        entry.cloud.clear();
        self.residency.set(id, ResidencyState::Evicted);
        info!(map_id = %id, handle = %entry.handle, "unloaded map");
        self.events.emit(Notification::MapUnloaded { map_id: id });
        true
    }

    /// Makes the loaded set equal to the first `max_loaded` candidates.
    ///
    /// Missing window members are loaded in order, then every loaded map
    /// outside the window is unloaded. Running it twice with the same input
    /// does nothing the second time. Maps evicted by the previous pass are
    /// forgotten first, so the residency table only tracks recent maps.
    pub async fn reconcile(
        &mut self,
        candidates: &[NearbyMapCandidate],
        max_loaded: usize,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if self.cancel.is_cancelled() {
            return summary;
        }
        self.residency.prune_evicted();

        let window = &candidates[..candidates.len().min(max_loaded)];
        for candidate in window {
            if self.is_loaded(candidate.id) {
                continue;
            }
            match self.load_map(candidate).await {
                Ok(_) => summary.loaded.push(candidate.id),
                Err(LoadError::PreviouslyRejected(id)) => summary.skipped.push(id),
                Err(LoadError::Cancelled(_)) => return summary,
                Err(err) => {
                    warn!(map_id = %candidate.id, error = %err, "map load failed");
                    summary.failed.push(candidate.id);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return summary;
        }

        let keep: HashSet<MapId> = window.iter().map(|c| c.id).collect();
        let stale: Vec<MapId> = self
            .registry
            .read()
            .loaded_ids()
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        for id in stale {
            if self.unload_map(id) {
                summary.unloaded.push(id);
            }
        }

        debug!(
            loaded = summary.loaded.len(),
            unloaded = summary.unloaded.len(),
            failed = summary.failed.len(),
            "reconciled nearby maps"
        );
        summary
    }

    /// Frees every loaded map. Used on teardown, so it ignores the stop flag.
    pub fn unload_all(&mut self) -> Vec<MapId> {
        let ids = self.registry.read().loaded_ids();
        ids.into_iter().filter(|id| self.unload_map(*id)).collect()
    }
}
