use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};
use thiserror::Error;

use crate::{
    Config,
    model::{AirQualitySample, Coordinates, CurrentConditions, ForecastSeries, Place, Query},
    provider::openweather::OpenWeatherProvider,
};

pub mod openweather;

/// Raw outcome of a failed provider call, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no API key configured")]
    MissingCredential,

    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Whether a credential is available. Checked before any request is made.
    fn has_credential(&self) -> bool;

    async fn current(&self, query: &Query) -> Result<CurrentConditions, ProviderError>;

    async fn forecast(&self, query: &Query) -> Result<ForecastSeries, ProviderError>;

    async fn air_quality(&self, at: Coordinates) -> Result<AirQualitySample, ProviderError>;
}

/// City-name autocomplete.
#[async_trait]
pub trait PlaceSuggester: Send + Sync + Debug {
    async fn suggest(&self, query: &str, limit: u8) -> Result<Vec<Place>, ProviderError>;
}

/// Construct the OpenWeather provider from config.
///
/// A missing API key is not an error here; it surfaces as a configuration
/// error on the first fetch instead.
pub fn provider_from_config(config: &Config) -> anyhow::Result<OpenWeatherProvider> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let mut provider = OpenWeatherProvider::new(config.api_key(), timeout)?;

    if let Some(base_url) = config.provider.base_url.as_deref() {
        provider = provider.with_base_url(base_url);
    }
    provider = provider.with_lang(&config.locale);

    Ok(provider)
}
