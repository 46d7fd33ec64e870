//! "Where am I?" capability used by `fetch_by_current_location`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt::Debug, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

use crate::{Config, model::Coordinates};

const IP_API_URL: &str = "http://ip-api.com";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location request timed out")]
    Timeout,
    #[error("location service unavailable")]
    Unavailable,
}

impl GeolocationError {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeolocationError::PermissionDenied => "permission_denied",
            GeolocationError::Timeout => "timeout",
            GeolocationError::Unavailable => "unavailable",
        }
    }
}

#[async_trait]
pub trait Geolocator: Send + Sync + Debug {
    async fn locate(&self) -> Result<Coordinates, GeolocationError>;
}

/// Always answers with a configured position, or `Unavailable` when none is set.
#[derive(Debug, Clone, Default)]
pub struct FixedLocation(pub Option<Coordinates>);

#[async_trait]
impl Geolocator for FixedLocation {
    async fn locate(&self) -> Result<Coordinates, GeolocationError> {
        self.0.ok_or(GeolocationError::Unavailable)
    }
}

/// Approximate position derived from the public IP address.
#[derive(Debug, Clone)]
pub struct IpGeolocator {
    base_url: String,
    timeout: Duration,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl IpGeolocator {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_base_url(IP_API_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }
}

/// The configured home position when set, otherwise an IP lookup bounded by
/// the configured request timeout.
pub fn geolocator_from_config(config: &Config) -> Result<Arc<dyn Geolocator>, reqwest::Error> {
    Ok(match config.home {
        Some(home) => Arc::new(FixedLocation(Some(home))),
        None => Arc::new(IpGeolocator::new(Duration::from_secs(config.request_timeout_secs))?),
    })
}

#[async_trait]
impl Geolocator for IpGeolocator {
    async fn locate(&self) -> Result<Coordinates, GeolocationError> {
        let url = format!("{}/json/", self.base_url);
        debug!(%url, timeout = ?self.timeout, "looking up position by IP");

        let res = self
            .http
            .get(&url)
            .query(&[("fields", "status,lat,lon")])
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "IP geolocation request failed");
                if e.is_timeout() {
                    GeolocationError::Timeout
                } else {
                    GeolocationError::Unavailable
                }
            })?;

        if !res.status().is_success() {
            debug!(status = %res.status(), "IP geolocation returned error status");
            return Err(GeolocationError::Unavailable);
        }

        let body: IpApiResponse = res.json().await.map_err(|e| {
            debug!(error = %e, "IP geolocation parse error");
            GeolocationError::Unavailable
        })?;

        match (body.status.as_str(), body.lat, body.lon) {
            ("success", Some(lat), Some(lon)) => Ok(Coordinates::new(lat, lon)),
            _ => Err(GeolocationError::Unavailable),
        }
    }
}
