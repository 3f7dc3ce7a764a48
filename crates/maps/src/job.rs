//! Map records as the remote map service lists them.
//!
//! [`MapJob`] mirrors the service's JSON. Everything downstream works on
//! [`NearbyMapCandidate`], which keeps only what ranking and loading need.

use foundation::{LatLon, MapId};
use serde::{Deserialize, Serialize};

/// Processing state of a map on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    Pending,
    Processing,
    Sparse,
    Done,
    Failed,
    /// Any status string this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl MapStatus {
    /// Failed maps are never offered for loading.
    pub fn is_eligible(self) -> bool {
        self != MapStatus::Failed
    }
}

/// Who may download a map's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privacy {
    Private,
    Public,
}

impl Privacy {
    /// Service encoding: `"1"` is public, everything else is private.
    pub fn from_wire(raw: &str) -> Self {
        if raw.trim() == "1" {
            Privacy::Public
        } else {
            Privacy::Private
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Privacy::Private => "0",
            Privacy::Public => "1",
        }
    }
}

/// One entry of the service's `jobs` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapJob {
    pub id: i32,
    #[serde(rename = "type", default)]
    pub kind: i32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub creator: i32,
    #[serde(default)]
    pub size: i64,
    pub status: MapStatus,
    #[serde(default = "default_privacy")]
    pub privacy: String,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub modified: String,
}

fn default_privacy() -> String {
    Privacy::Private.as_wire().to_string()
}

impl MapJob {
    pub fn map_id(&self) -> MapId {
        MapId::new(self.id)
    }

    pub fn privacy(&self) -> Privacy {
        Privacy::from_wire(&self.privacy)
    }

    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }
}

/// A map eligible for loading, as seen by ranking and the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyMapCandidate {
    pub id: MapId,
    pub name: String,
    pub privacy: Privacy,
    pub position: LatLon,
    pub status: MapStatus,
}

impl NearbyMapCandidate {
    pub fn from_job(job: &MapJob) -> Self {
        Self {
            id: job.map_id(),
            name: job.name.clone(),
            privacy: job.privacy(),
            position: job.position(),
            status: job.status,
        }
    }
}

/// Turns listed jobs into candidates: drops failed maps, invalid ids and
/// repeated ids (the first listing wins), and keeps listing order otherwise.
pub fn eligible_candidates<'a>(
    jobs: impl IntoIterator<Item = &'a MapJob>,
) -> Vec<NearbyMapCandidate> {
    let mut seen = std::collections::HashSet::new();
    jobs.into_iter()
        .filter(|job| job.status.is_eligible() && job.map_id().is_valid())
        .filter(|job| seen.insert(job.id))
        .map(NearbyMapCandidate::from_job)
        .collect()
}
