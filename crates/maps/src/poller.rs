//! Periodic nearby-map discovery.
//!
//! Every cycle lists maps around the current GPS fix (or all maps when there
//! is none), ranks them by distance and hands the ranking to the lifecycle.
//! A failed cycle is retried with exponential backoff; a stop request ends
//! the loop at the next check without waiting out the sleep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use foundation::{LatLon, MapId};
use runtime::{Backoff, BackoffConfig, CancelToken};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{eligible_candidates, MapJob, NearbyMapCandidate};
use crate::lifecycle::{MapLifecycle, ReconcileSummary};
use crate::location::LocationProvider;
use crate::ranking::rank_by_distance;
use crate::service::{AuthScope, MapService, NearbyQuery, ServiceError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(4000);
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 50.0;
pub const DEFAULT_MAX_LOADED_MAPS: usize = 8;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub radius_m: f64,
    pub max_loaded: usize,
    /// Also list maps shared publicly by other users.
    pub include_public: bool,
    pub request_timeout: Duration,
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            radius_m: DEFAULT_SEARCH_RADIUS_M,
            max_loaded: DEFAULT_MAX_LOADED_MAPS,
            include_public: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("map listing failed: {0}")]
    Service(#[from] ServiceError),
    #[error("map listing timed out after {0:?}")]
    Timeout(Duration),
    #[error("poller stopped")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub center: Option<LatLon>,
    pub candidates: Vec<MapId>,
    pub summary: ReconcileSummary,
}

pub struct NearbyMapPoller {
    service: Arc<dyn MapService>,
    location: Arc<dyn LocationProvider>,
    lifecycle: MapLifecycle,
    config: PollerConfig,
    cancel: CancelToken,
    state: PollerState,
    backoff: Backoff,
    candidates: Vec<NearbyMapCandidate>,
    all_maps: BTreeMap<MapId, MapJob>,
}

impl NearbyMapPoller {
    /// The poller stops when the lifecycle's cancel token fires.
    pub fn new(
        service: Arc<dyn MapService>,
        location: Arc<dyn LocationProvider>,
        lifecycle: MapLifecycle,
        config: PollerConfig,
    ) -> Self {
        let backoff = Backoff::new(BackoffConfig {
            base: config.interval,
            factor: 2,
            max: config.max_backoff.max(config.interval),
        });
        let cancel = lifecycle.cancel_token().clone();
        Self {
            service,
            location,
            lifecycle,
            config,
            cancel,
            state: PollerState::Idle,
            backoff,
            candidates: Vec::new(),
            all_maps: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Ranked candidates from the most recent successful cycle.
    pub fn candidates(&self) -> &[NearbyMapCandidate] {
        &self.candidates
    }

    /// Ids the localizer should try, nearest first.
    pub fn candidate_ids(&self) -> Vec<MapId> {
        self.candidates.iter().map(|c| c.id).collect()
    }

    /// Every listed map, failed ones included.
    pub fn all_maps(&self) -> &BTreeMap<MapId, MapJob> {
        &self.all_maps
    }

    pub fn lifecycle(&self) -> &MapLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut MapLifecycle {
        &mut self.lifecycle
    }

    pub fn into_lifecycle(self) -> MapLifecycle {
        self.lifecycle
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs one discovery cycle.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        if self.cancel.is_cancelled() {
            self.state = PollerState::Cancelled;
            return Err(PollError::Cancelled);
        }
        self.state = PollerState::Polling;
        let result = self.cycle().await;
        self.state = if self.cancel.is_cancelled() {
            PollerState::Cancelled
        } else {
            PollerState::Idle
        };
        result
    }

    async fn cycle(&mut self) -> Result<PollOutcome, PollError> {
        let center = self.location.current_fix().map(|f| f.position.lat_lon());

        let mut jobs = self.list(center, AuthScope::Token).await?;
        if self.config.include_public {
            jobs.extend(self.list(center, AuthScope::Anonymous).await?);
        }

        if self.cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let mut all_maps = BTreeMap::new();
        for job in &jobs {
            all_maps.entry(job.map_id()).or_insert_with(|| job.clone());
        }
        self.all_maps = all_maps;
        self.candidates = rank_by_distance(eligible_candidates(&jobs), center);
        debug!(
            listed = jobs.len(),
            eligible = self.candidates.len(),
            has_fix = center.is_some(),
            "nearby maps listed"
        );

        let summary = self
            .lifecycle
            .reconcile(&self.candidates, self.config.max_loaded)
            .await;
        Ok(PollOutcome {
            center,
            candidates: self.candidate_ids(),
            summary,
        })
    }

    async fn list(
        &self,
        center: Option<LatLon>,
        scope: AuthScope,
    ) -> Result<Vec<MapJob>, PollError> {
        let query = NearbyQuery {
            center,
            radius_m: self.config.radius_m,
            scope,
        };
        tokio::time::timeout(self.config.request_timeout, self.service.list_maps(query))
            .await
            .map_err(|_| PollError::Timeout(self.config.request_timeout))?
            .map_err(PollError::from)
    }

    /// Polls until stopped. Successful cycles are spaced by the configured
    /// interval; failures back off up to the configured maximum.
    pub async fn run(&mut self) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            radius_m = self.config.radius_m,
            max_loaded = self.config.max_loaded,
            "nearby map polling started"
        );
        loop {
            let delay = match self.poll_once().await {
                Ok(outcome) => {
                    self.backoff.reset();
                    if !outcome.summary.is_noop() {
                        info!(
                            loaded = ?outcome.summary.loaded,
                            unloaded = ?outcome.summary.unloaded,
                            failed = ?outcome.summary.failed,
                            "nearby maps updated"
                        );
                    }
                    self.config.interval
                }
                Err(PollError::Cancelled) => break,
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %err,
                        failures = self.backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "nearby map poll failed"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.state = PollerState::Cancelled;
        info!("nearby map polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessEngine;
    use crate::location::{SharedLocation, StaticLocation};
    use crate::registry::shared_registry;
    use crate::testing::{job, FakeMapService};
    use crate::{MapStatus, Privacy};
    use foundation::Wgs84;
    use pretty_assertions::assert_eq;
    use runtime::EventBus;

    fn poller_with(
        service: Arc<FakeMapService>,
        location: Arc<dyn LocationProvider>,
        config: PollerConfig,
    ) -> NearbyMapPoller {
        let lifecycle = MapLifecycle::new(
            Arc::new(HeadlessEngine::new()),
            service.clone(),
            shared_registry(),
            EventBus::new(),
            CancelToken::new(),
        );
        NearbyMapPoller::new(service, location, lifecycle, config)
    }

    fn here() -> Arc<dyn LocationProvider> {
        Arc::new(StaticLocation::at(Wgs84::new(0.0, 0.0, 0.0)))
    }

    #[tokio::test]
    async fn cycle_ranks_filters_and_loads() {
        let service = Arc::new(FakeMapService::new());
        let mut failed = job(7, 0.0, 0.0001);
        failed.status = MapStatus::Failed;
        service.set_private(vec![job(1, 0.0, 0.001), job(2, 0.0, 0.0002), failed]);

        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome.candidates, vec![MapId::new(2), MapId::new(1)]);
        assert_eq!(poller.all_maps().len(), 3);
        assert_eq!(
            poller.lifecycle().registry().read().loaded_ids(),
            vec![MapId::new(1), MapId::new(2)]
        );
        assert_eq!(poller.state(), PollerState::Idle);

        let query = service.queries()[0];
        assert_eq!(query.center, Some(LatLon::new(0.0, 0.0)));
        assert_eq!(query.radius_m, DEFAULT_SEARCH_RADIUS_M);
    }

    #[tokio::test]
    async fn max_loaded_caps_the_window() {
        let service = Arc::new(FakeMapService::new());
        service.set_private((1..=4).map(|id| job(id, 0.0, id as f64 * 1e-4)).collect());
        let config = PollerConfig {
            max_loaded: 2,
            ..PollerConfig::default()
        };

        let mut poller = poller_with(service, here(), config);
        poller.poll_once().await.unwrap();
        assert_eq!(
            poller.lifecycle().registry().read().loaded_ids(),
            vec![MapId::new(1), MapId::new(2)]
        );
    }

    #[tokio::test]
    async fn no_fix_lists_everything_in_listing_order() {
        let service = Arc::new(FakeMapService::new());
        service.set_private(vec![job(9, 50.0, 50.0), job(3, 0.0, 0.0)]);
        let location = Arc::new(SharedLocation::new());

        let mut poller = poller_with(service.clone(), location, PollerConfig::default());
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome.center, None);
        assert_eq!(outcome.candidates, vec![MapId::new(9), MapId::new(3)]);
        assert_eq!(service.queries()[0].center, None);
    }

    #[tokio::test]
    async fn public_maps_are_listed_when_enabled() {
        let service = Arc::new(FakeMapService::new());
        service.add_private(job(1, 0.0, 0.0002), &[1]);
        service.add_public(job(2, 0.0, 0.0001), &[2]);
        let config = PollerConfig {
            include_public: true,
            ..PollerConfig::default()
        };

        let mut poller = poller_with(service.clone(), here(), config);
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome.candidates, vec![MapId::new(2), MapId::new(1)]);
        let scopes: Vec<AuthScope> = service.queries().iter().map(|q| q.scope).collect();
        assert_eq!(scopes, vec![AuthScope::Token, AuthScope::Anonymous]);
    }

    #[tokio::test]
    async fn overlapping_listings_keep_the_private_record() {
        let service = Arc::new(FakeMapService::new());
        service.add_private(job(4, 0.0, 0.0), &[1]);
        service.add_public(job(4, 0.0, 0.0), &[1]);
        let config = PollerConfig {
            include_public: true,
            ..PollerConfig::default()
        };

        let mut poller = poller_with(service, here(), config);
        poller.poll_once().await.unwrap();

        assert_eq!(poller.candidates().len(), 1);
        assert_eq!(poller.candidates()[0].privacy, Privacy::Private);
        assert_eq!(poller.all_maps()[&MapId::new(4)].privacy(), Privacy::Private);
    }

    #[tokio::test]
    async fn candidate_set_is_replaced_each_cycle() {
        let service = Arc::new(FakeMapService::new());
        service.set_private(vec![job(1, 0.0, 0.0), job(2, 0.0, 0.0)]);
        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        poller.poll_once().await.unwrap();

        service.set_private(vec![job(3, 0.0, 0.0)]);
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(poller.candidate_ids(), vec![MapId::new(3)]);
        assert_eq!(poller.all_maps().keys().copied().collect::<Vec<_>>(), vec![MapId::new(3)]);
        assert_eq!(outcome.summary.unloaded, vec![MapId::new(1), MapId::new(2)]);
    }

    #[tokio::test]
    async fn listing_failure_keeps_previous_state() {
        let service = Arc::new(FakeMapService::new());
        service.set_private(vec![job(1, 0.0, 0.0)]);
        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        poller.poll_once().await.unwrap();

        service.fail_listing(true);
        assert!(matches!(poller.poll_once().await, Err(PollError::Service(_))));
        assert_eq!(poller.candidate_ids(), vec![MapId::new(1)]);
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn stopped_poller_does_not_poll() {
        let service = Arc::new(FakeMapService::new());
        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        poller.stop();

        assert!(matches!(poller.poll_once().await, Err(PollError::Cancelled)));
        assert_eq!(poller.state(), PollerState::Cancelled);
        assert!(service.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_interval_until_stopped() {
        let service = Arc::new(FakeMapService::new());
        service.set_private(vec![job(1, 0.0, 0.0)]);
        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        let cancel = poller.lifecycle().cancel_token().clone();

        let task = tokio::spawn(async move {
            poller.run().await;
            poller
        });

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        cancel.cancel();
        let poller = task.await.unwrap();

        // Polls at t = 0, 4 s and 8 s.
        assert_eq!(service.queries().len(), 3);
        assert_eq!(poller.state(), PollerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off() {
        let service = Arc::new(FakeMapService::new());
        service.fail_listing(true);
        let mut poller = poller_with(service.clone(), here(), PollerConfig::default());
        let cancel = poller.lifecycle().cancel_token().clone();

        let task = tokio::spawn(async move { poller.run().await });

        // Attempts at t = 0, 4 s, 12 s; the next would be at 28 s.
        tokio::time::sleep(Duration::from_secs(20)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(service.queries().len(), 3);
    }
}
