//! Core library for the `weatherdash` dashboard.
//!
//! This crate defines:
//! - A self-enforced daily quota on provider calls ([`QuotaTracker`])
//! - Fetch orchestration with mandatory and best-effort resources ([`WeatherService`])
//! - A bounded, deduplicated favorites list ([`FavoritesStore`])
//! - Typed errors, their classification and locale-driven rendering
//! - The OpenWeather provider, configuration and pluggable persistence
//!
//! It is used by `weatherdash-cli`, but can also be reused by other front ends.

pub mod clock;
pub mod config;
pub mod error;
pub mod favorites;
pub mod geolocation;
pub mod i18n;
pub mod model;
pub mod provider;
pub mod quota;
pub mod service;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ProviderConfig};
pub use error::{ErrorKind, WeatherError, classify};
pub use favorites::{AddOutcome, FavoriteCity, FavoritesStore, ToggleOutcome};
pub use geolocation::{
    FixedLocation, GeolocationError, Geolocator, IpGeolocator, geolocator_from_config,
};
pub use i18n::MessageCatalog;
pub use model::{
    AirQualitySample, Coordinates, CurrentConditions, ForecastSeries, Place, Query,
    WeatherSnapshot,
};
pub use provider::{
    PlaceSuggester, ProviderError, WeatherProvider, openweather::OpenWeatherProvider,
};
pub use quota::{QuotaStatus, QuotaTracker};
pub use service::{DashboardState, FetchPhase, WeatherService};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
