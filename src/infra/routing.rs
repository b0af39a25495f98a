//! Thin asynchronous client for an OpenRouteService-compatible routing API.
//!
//! - Geocodes both endpoints, then requests a driving route between them.
//! - The whole exchange is bounded by a single timeout; callers fall back on
//!   any error.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::util::config::RoutingConfig;
use crate::util::version::user_agent;

const GEOCODE_PATH: &str = "geocode/search";
const DIRECTIONS_PATH: &str = "v2/directions/driving-car";

/// Why a live distance lookup did not produce a value.
///
/// Always recovered by the resolver through the static table.
#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("distance resolution failed: no routing API key configured")]
    MissingCredentials,
    #[error("distance resolution failed: invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("distance resolution failed: http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("distance resolution failed: timed out after {0:?}")]
    Timeout(Duration),
    #[error("distance resolution failed: no location found for {0:?}")]
    NotFound(String),
    #[error("distance resolution failed: no driving route returned")]
    NoRoute,
}

/// Longitude, latitude.
pub type Coordinates = (f64, f64);

#[derive(Clone, Debug)]
pub struct RoutingClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl RoutingClient {
    pub fn new(config: &RoutingConfig) -> Result<Self, DistanceError> {
        let base_url = Url::parse(&config.base_url)?;
        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            timeout: config.timeout(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Driving distance in kilometers between two place labels.
    pub async fn driving_distance_km(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<f64, DistanceError> {
        if self.api_key.is_none() {
            return Err(DistanceError::MissingCredentials);
        }

        tokio::time::timeout(self.timeout, async {
            let start = self.geocode(origin).await?;
            let end = self.geocode(destination).await?;
            self.route_km(start, end).await
        })
        .await
        .map_err(|_| DistanceError::Timeout(self.timeout))?
    }

    pub async fn geocode(&self, label: &str) -> Result<Coordinates, DistanceError> {
        let mut url = self.url(GEOCODE_PATH)?;
        url.query_pairs_mut()
            .append_pair("api_key", self.key())
            .append_pair("text", label)
            .append_pair("size", "1");

        let response: FeatureCollection<PointGeometry, serde_json::Value> =
            self.fetch(url).await?;
        let coordinates = response
            .features
            .into_iter()
            .next()
            .and_then(|feature| match feature.geometry.coordinates.as_slice() {
                [lon, lat, ..] => Some((*lon, *lat)),
                _ => None,
            })
            .ok_or_else(|| DistanceError::NotFound(label.to_string()))?;

        debug!(label, lon = coordinates.0, lat = coordinates.1, "geocoded");
        Ok(coordinates)
    }

    async fn route_km(&self, start: Coordinates, end: Coordinates) -> Result<f64, DistanceError> {
        let mut url = self.url(DIRECTIONS_PATH)?;
        url.query_pairs_mut()
            .append_pair("api_key", self.key())
            .append_pair("start", &format!("{},{}", start.0, start.1))
            .append_pair("end", &format!("{},{}", end.0, end.1));

        let response: FeatureCollection<serde_json::Value, RouteProperties> =
            self.fetch(url).await?;
        response
            .features
            .into_iter()
            .next()
            .and_then(|feature| feature.properties.summary.distance)
            .filter(|meters| meters.is_finite() && *meters > 0.0)
            .map(|meters| meters / 1000.0)
            .ok_or(DistanceError::NoRoute)
    }

    async fn fetch<T>(&self, url: Url) -> Result<T, DistanceError>
    where
        T: DeserializeOwned,
    {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection<G, P> {
    #[serde(default = "Vec::new")]
    features: Vec<Feature<G, P>>,
}

#[derive(Debug, Deserialize)]
struct Feature<G, P> {
    geometry: G,
    properties: P,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RouteProperties {
    summary: RouteSummary,
}

#[derive(Debug, Deserialize)]
struct RouteSummary {
    /// Meters.
    #[serde(default)]
    distance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client = RoutingClient::new(&RoutingConfig::default()).unwrap();
        assert!(!client.is_configured());
        let error = client.driving_distance_km("Paris", "Lyon").await.unwrap_err();
        assert!(matches!(error, DistanceError::MissingCredentials));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let config = RoutingConfig {
            base_url: "not a url".into(),
            ..RoutingConfig::default()
        };
        assert!(matches!(
            RoutingClient::new(&config),
            Err(DistanceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn route_payload_parses_summary_distance() {
        let payload = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[2.35, 48.85], [4.83, 45.76]]},
                "properties": {"summary": {"distance": 465123.4, "duration": 16000.0}}
            }]
        }"#;
        let parsed: FeatureCollection<serde_json::Value, RouteProperties> =
            serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.features[0].properties.summary.distance, Some(465123.4));
    }
}
