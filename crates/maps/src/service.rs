//! Remote map service abstraction.
//!
//! The service lists maps near a position, serves map payloads and serves
//! the map-to-ECEF transform of each map. Implementations must be
//! `Send + Sync`; methods return boxed futures so the trait stays
//! dyn-compatible.

use std::future::Future;
use std::pin::Pin;

use base64::Engine as _;
use foundation::{LatLon, MapId, MapSpaceError, MapToEcef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{MapJob, Privacy};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a request carries the user's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    Token,
    Anonymous,
}

impl AuthScope {
    /// Private maps need the token; public ones are fetched anonymously.
    pub fn for_privacy(privacy: Privacy) -> Self {
        match privacy {
            Privacy::Private => AuthScope::Token,
            Privacy::Public => AuthScope::Anonymous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    /// `None` lists every map visible to the scope, regardless of position.
    pub center: Option<LatLon>,
    pub radius_m: f64,
    pub scope: AuthScope,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service error: {0}")]
    Remote(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid map transform: {0}")]
    Transform(#[from] MapSpaceError),
    #[error("map {0} not found")]
    NotFound(MapId),
}

/// Raw map bytes as handed to the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPayload {
    bytes: Vec<u8>,
}

impl MapPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ServiceError> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Self::new)
            .map_err(|e| ServiceError::Decode(format!("map payload is not base64: {e}")))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content digest, logged on load so payload changes are traceable.
    pub fn digest(&self) -> String {
        blake3::hash(&self.bytes).to_hex().to_string()
    }
}

pub trait MapService: Send + Sync {
    /// Lists maps around `query.center` within `query.radius_m`.
    fn list_maps(&self, query: NearbyQuery) -> BoxFuture<'_, Result<Vec<MapJob>, ServiceError>>;

    fn fetch_payload(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapPayload, ServiceError>>;

    fn fetch_map_to_ecef(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapToEcef, ServiceError>>;
}

/// Value of the `error` field on success.
pub const SERVICE_OK: &str = "none";

fn default_error() -> String {
    SERVICE_OK.to_string()
}

fn check_error(error: &str) -> Result<(), ServiceError> {
    if error == SERVICE_OK {
        Ok(())
    } else {
        Err(ServiceError::Remote(error.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    #[serde(default = "default_error")]
    pub error: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub jobs: Vec<MapJob>,
}

impl JobListResponse {
    pub fn into_jobs(self) -> Result<Vec<MapJob>, ServiceError> {
        check_error(&self.error)?;
        Ok(self.jobs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPayloadResponse {
    #[serde(default = "default_error")]
    pub error: String,
    #[serde(default)]
    pub b64: String,
}

impl MapPayloadResponse {
    pub fn into_payload(self) -> Result<MapPayload, ServiceError> {
        check_error(&self.error)?;
        MapPayload::from_base64(&self.b64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapToEcefResponse {
    #[serde(default = "default_error")]
    pub error: String,
    #[serde(default)]
    pub ecef: Vec<f64>,
}

impl MapToEcefResponse {
    pub fn into_transform(self) -> Result<MapToEcef, ServiceError> {
        check_error(&self.error)?;
        Ok(MapToEcef::from_service_layout(&self.ecef)?)
    }
}
