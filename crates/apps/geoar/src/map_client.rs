//! HTTP client for the remote map service.
//!
//! Every endpoint takes a JSON POST body and answers with JSON carrying an
//! `error` field that is `"none"` on success.

use std::time::Duration;

use foundation::{MapId, MapToEcef};
use maps::{
    AuthScope, BoxFuture, JobListResponse, MapJob, MapPayload, MapPayloadResponse, MapService,
    MapToEcefResponse, NearbyQuery, ServiceError,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub const LIST_ENDPOINT: &str = "list";
pub const GEOLIST_ENDPOINT: &str = "geolist";
pub const MAP_ENDPOINT: &str = "map";
pub const ECEF_ENDPOINT: &str = "ecef";

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GeoListRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    latitude: f64,
    longitude: f64,
    radius: f64,
}

#[derive(Debug, Serialize)]
struct MapRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    id: i32,
}

pub struct RestMapService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RestMapService {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn token(&self, scope: AuthScope) -> Option<&str> {
        match scope {
            AuthScope::Token => self.token.as_deref(),
            AuthScope::Anonymous => None,
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, ServiceError> {
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(%url, "map service request");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<R>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

impl MapService for RestMapService {
    fn list_maps(&self, query: NearbyQuery) -> BoxFuture<'_, Result<Vec<MapJob>, ServiceError>> {
        Box::pin(async move {
            let token = self.token(query.scope);
            let resp: JobListResponse = match query.center {
                Some(center) => {
                    let body = GeoListRequest {
                        token,
                        latitude: center.lat_deg,
                        longitude: center.lon_deg,
                        radius: query.radius_m,
                    };
                    self.post(GEOLIST_ENDPOINT, &body).await?
                }
                None => self.post(LIST_ENDPOINT, &ListRequest { token }).await?,
            };
            resp.into_jobs()
        })
    }

    fn fetch_payload(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapPayload, ServiceError>> {
        Box::pin(async move {
            let body = MapRequest {
                token: self.token(scope),
                id: id.0,
            };
            let resp: MapPayloadResponse = self.post(MAP_ENDPOINT, &body).await?;
            resp.into_payload()
        })
    }

    fn fetch_map_to_ecef(
        &self,
        id: MapId,
        scope: AuthScope,
    ) -> BoxFuture<'_, Result<MapToEcef, ServiceError>> {
        Box::pin(async move {
            let body = MapRequest {
                token: self.token(scope),
                id: id.0,
            };
            let resp: MapToEcefResponse = self.post(ECEF_ENDPOINT, &body).await?;
            resp.into_transform()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn anonymous_requests_omit_token() {
        let service =
            RestMapService::new("https://maps.example/", Some("secret".into()), Duration::from_secs(1))
                .unwrap();
        assert_eq!(service.base_url, "https://maps.example");
        assert_eq!(service.token(AuthScope::Token), Some("secret"));
        assert_eq!(service.token(AuthScope::Anonymous), None);

        let body = MapRequest {
            token: service.token(AuthScope::Anonymous),
            id: 7,
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"id": 7}));
    }

    #[test]
    fn geolist_body_shape() {
        let body = GeoListRequest {
            token: Some("t"),
            latitude: 60.0,
            longitude: 24.0,
            radius: 50.0,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"token": "t", "latitude": 60.0, "longitude": 24.0, "radius": 50.0})
        );
    }
}
