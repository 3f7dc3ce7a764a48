//! In-memory doubles shared by this crate's tests.

use std::collections::{HashMap, HashSet};

use foundation::{MapHandle, MapId, MapToEcef, Wgs84};
use nalgebra::Point3;
use parking_lot::Mutex;
use runtime::CancelToken;

use crate::engine::{EngineError, HeadlessEngine, NativeMapEngine};
use crate::job::{MapJob, MapStatus};
use crate::service::{AuthScope, BoxFuture, MapPayload, MapService, NearbyQuery, ServiceError};

/// Payload bytes the [`CountingEngine`] refuses to load.
pub const BAD_PAYLOAD: &[u8] = b"bad";

pub fn job(id: i32, lat: f64, lon: f64) -> MapJob {
    MapJob {
        id,
        kind: 0,
        version: String::new(),
        creator: 1,
        size: 0,
        status: MapStatus::Done,
        privacy: "0".into(),
        name: format!("map-{id}"),
        latitude: lat,
        longitude: lon,
        altitude: 0.0,
        created: String::new(),
        modified: String::new(),
    }
}

#[derive(Default)]
struct FakeState {
    private_jobs: Vec<MapJob>,
    public_jobs: Vec<MapJob>,
    payloads: HashMap<MapId, Vec<u8>>,
    failing_payloads: HashSet<MapId>,
    fail_listing: bool,
    cancel_on_fetch: Option<CancelToken>,
    queries: Vec<NearbyQuery>,
    fetches: Vec<(MapId, AuthScope)>,
}

#[derive(Default)]
pub struct FakeMapService {
    state: Mutex<FakeState>,
}

impl FakeMapService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_private(&self, job: MapJob, payload: &[u8]) {
        let mut state = self.state.lock();
        state.payloads.insert(job.map_id(), payload.to_vec());
        state.private_jobs.push(job);
    }

    pub fn add_public(&self, mut job: MapJob, payload: &[u8]) {
        job.privacy = "1".into();
        let mut state = self.state.lock();
        state.payloads.insert(job.map_id(), payload.to_vec());
        state.public_jobs.push(job);
    }

    pub fn set_private(&self, jobs: Vec<MapJob>) {
        let mut state = self.state.lock();
        for job in &jobs {
            state.payloads.entry(job.map_id()).or_insert_with(|| vec![1]);
        }
        state.private_jobs = jobs;
    }

    pub fn fail_payload(&self, id: MapId, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_payloads.insert(id);
        } else {
            state.failing_payloads.remove(&id);
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    /// Cancels `token` while a payload request is in flight.
    pub fn cancel_during_fetch(&self, token: CancelToken) {
        self.state.lock().cancel_on_fetch = Some(token);
    }

    pub fn queries(&self) -> Vec<NearbyQuery> {
        self.state.lock().queries.clone()
    }

    pub fn fetches(&self) -> Vec<(MapId, AuthScope)> {
        self.state.lock().fetches.clone()
    }
}

impl MapService for FakeMapService {
    fn list_maps(&self, query: NearbyQuery) -> BoxFuture<'_, Result<Vec<MapJob>, ServiceError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.queries.push(query);
            if state.fail_listing {
                return Err(ServiceError::Transport("listing unavailable".into()));
            }
            Ok(match query.scope {
                AuthScope::Token => state.private_jobs.clone(),
                AuthScope::Anonymous => state.public_jobs.clone(),
            })
        })
    }

    fn fetch_payload(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapPayload, ServiceError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.fetches.push((id, scope));
            if let Some(token) = &state.cancel_on_fetch {
                token.cancel();
            }
            if state.failing_payloads.contains(&id) {
                return Err(ServiceError::Transport("payload unavailable".into()));
            }
            state
                .payloads
                .get(&id)
                .cloned()
                .map(MapPayload::new)
                .ok_or(ServiceError::NotFound(id))
        })
    }

    fn fetch_map_to_ecef(
        &self,
        id: MapId,
        _scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapToEcef, ServiceError>> {
        Box::pin(async move {
            let state = self.state.lock();
            state
                .private_jobs
                .iter()
                .chain(state.public_jobs.iter())
                .find(|j| j.map_id() == id)
                .map(|j| MapToEcef::enu_at(Wgs84::new(j.latitude, j.longitude, j.altitude)))
                .ok_or(ServiceError::NotFound(id))
        })
    }
}

/// Headless engine that counts calls and refuses [`BAD_PAYLOAD`].
#[derive(Default)]
pub struct CountingEngine {
    inner: HeadlessEngine,
    loads: Mutex<Vec<MapHandle>>,
    frees: Mutex<Vec<MapHandle>>,
    attempts: Mutex<usize>,
}

impl CountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    pub fn free_count(&self) -> usize {
        self.frees.lock().len()
    }

    pub fn live_handles(&self) -> Vec<MapHandle> {
        self.inner.loaded_handles()
    }
}

impl NativeMapEngine for CountingEngine {
    fn load_map(&self, bytes: &[u8]) -> Result<MapHandle, EngineError> {
        *self.attempts.lock() += 1;
        if bytes == BAD_PAYLOAD {
            return Err(EngineError::Rejected("corrupt map".into()));
        }
        let handle = self.inner.load_map(bytes)?;
        self.loads.lock().push(handle);
        Ok(handle)
    }

    fn free_map(&self, handle: MapHandle) {
        self.frees.lock().push(handle);
        self.inner.free_map(handle);
    }

    fn point_cloud(&self, _handle: MapHandle, max_points: usize) -> Vec<Point3<f32>> {
        vec![Point3::new(0.0, 1.0, 0.0); max_points.min(3)]
    }
}
