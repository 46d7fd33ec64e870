//! Fetch orchestration: one mandatory call, two best-effort calls.
//!
//! Every fetch runs the same pipeline:
//!
//! 1. no credential → [`WeatherError::Configuration`], nothing sent;
//! 2. fewer than [`CALLS_PER_FETCH`] calls left today →
//!    [`WeatherError::QuotaExceeded`], nothing sent;
//! 3. current conditions (mandatory): failure aborts and clears the result;
//! 4. forecast (best-effort), by the same query;
//! 5. air quality (best-effort), by the coordinates resolved in step 3.
//!
//! Steps 1 and 2 run before anything else, including geolocation and input
//! validation.
//!
//! Best-effort failures never become the fetch's error. They are logged and
//! reported in [`WeatherSnapshot::supplementary_failures`].
//!
//! The calls within a fetch are strictly sequential. Overlapping fetches both
//! run to completion and each caller gets its own result, but only the most
//! recently started one may publish into [`DashboardState`].

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info, warn};

use crate::{
    error::{FailureOutcome, WeatherError, classify},
    geolocation::Geolocator,
    model::{
        AirQualitySample, Coordinates, CurrentConditions, ForecastSeries, Place, Query, Resource,
        SupplementaryFailure, WeatherSnapshot,
    },
    provider::WeatherProvider,
    quota::QuotaTracker,
};

/// Worst-case provider calls per fetch, reserved up front.
pub const CALLS_PER_FETCH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPhase {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// What the UI renders. Read it with [`WeatherService::state`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub phase: FetchPhase,
    pub place: Option<Place>,
    pub current: Option<CurrentConditions>,
    pub forecast: Option<ForecastSeries>,
    pub air_quality: Option<AirQualitySample>,
    pub error: Option<WeatherError>,
    pub supplementary_failures: Vec<SupplementaryFailure>,
}

impl DashboardState {
    pub fn loading(&self) -> bool {
        self.phase == FetchPhase::Loading
    }
}

#[derive(Debug)]
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    quota: Arc<QuotaTracker>,
    geolocator: Arc<dyn Geolocator>,
    state: Mutex<DashboardState>,
    generation: AtomicU64,
}

impl WeatherService {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        quota: Arc<QuotaTracker>,
        geolocator: Arc<dyn Geolocator>,
    ) -> Self {
        Self {
            provider,
            quota,
            geolocator,
            state: Mutex::new(DashboardState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> DashboardState {
        self.lock_state().clone()
    }

    pub async fn fetch_by_city(&self, name: &str) -> Result<WeatherSnapshot, WeatherError> {
        let generation = self.begin();
        let name = name.trim();

        let result = match self.preflight() {
            Err(err) => Err(err),
            Ok(()) if name.is_empty() => Err(WeatherError::NotFound { query: String::new() }),
            Ok(()) => self.fetch(&Query::City(name.to_string())).await,
        };

        self.publish(generation, &result);
        result
    }

    pub async fn fetch_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let generation = self.begin();

        let result = match self.preflight() {
            Ok(()) => self.fetch(&Query::Coordinates(Coordinates::new(lat, lon))).await,
            Err(err) => Err(err),
        };

        self.publish(generation, &result);
        result
    }

    /// Resolves the current position once the pre-flight checks pass. A
    /// geolocation failure is reported without touching the provider.
    pub async fn fetch_by_current_location(&self) -> Result<WeatherSnapshot, WeatherError> {
        let generation = self.begin();

        let result = match self.preflight() {
            Ok(()) => self.locate_and_fetch().await,
            Err(err) => Err(err),
        };

        self.publish(generation, &result);
        result
    }

    /// Resets to the idle state. Fetches still in flight will not publish.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_state() = DashboardState::default();
    }

    /// Credential and quota checks. Nothing may touch the network before
    /// these pass.
    fn preflight(&self) -> Result<(), WeatherError> {
        if !self.provider.has_credential() {
            warn!("no API key configured, skipping fetch");
            return Err(classify(FailureOutcome::MissingCredential));
        }

        if !self.quota.check_quota(CALLS_PER_FETCH) {
            let retry_after = self.quota.time_until_reset();
            warn!(remaining = self.quota.remaining(), ?retry_after, "daily quota exhausted");
            return Err(classify(FailureOutcome::QuotaExhausted { retry_after }));
        }

        Ok(())
    }

    async fn locate_and_fetch(&self) -> Result<WeatherSnapshot, WeatherError> {
        match self.geolocator.locate().await {
            Ok(at) => {
                debug!(%at, "resolved current location");
                self.fetch(&Query::Coordinates(at)).await
            }
            Err(reason) => {
                warn!(%reason, "geolocation failed");
                Err(classify(FailureOutcome::Geolocation(&reason)))
            }
        }
    }

    /// Runs the provider calls. Callers must have passed [`Self::preflight`].
    async fn fetch(&self, query: &Query) -> Result<WeatherSnapshot, WeatherError> {
        let current = match self.provider.current(query).await {
            Ok(current) => current,
            Err(error) => {
                let err = classify(FailureOutcome::Provider { error: &error, query });
                warn!(%query, %error, kind = %err.kind(), "current conditions fetch failed");
                return Err(err);
            }
        };
        self.quota.consume(1);

        let mut supplementary_failures = Vec::new();

        let forecast = match self.provider.forecast(query).await {
            Ok(forecast) => {
                self.quota.consume(1);
                Some(forecast)
            }
            Err(error) => {
                warn!(%query, %error, "forecast fetch failed, continuing without it");
                supplementary_failures.push(SupplementaryFailure {
                    resource: Resource::Forecast,
                    error: classify(FailureOutcome::Provider { error: &error, query }),
                });
                None
            }
        };

        let at = current.coordinates;
        let air_quality = match self.provider.air_quality(at).await {
            Ok(sample) => {
                self.quota.consume(1);
                Some(sample)
            }
            Err(error) => {
                warn!(%at, %error, "air quality fetch failed, continuing without it");
                supplementary_failures.push(SupplementaryFailure {
                    resource: Resource::AirQuality,
                    error: classify(FailureOutcome::Provider {
                        error: &error,
                        query: &Query::Coordinates(at),
                    }),
                });
                None
            }
        };

        info!(
            place = %current.location_name,
            forecast = forecast.is_some(),
            air_quality = air_quality.is_some(),
            "weather fetched"
        );

        Ok(WeatherSnapshot {
            place: current.place(),
            current,
            forecast,
            air_quality,
            supplementary_failures,
        })
    }

    fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock_state();
        state.phase = FetchPhase::Loading;
        state.error = None;
        generation
    }

    fn publish(&self, generation: u64, result: &Result<WeatherSnapshot, WeatherError>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding result of superseded fetch");
            return;
        }

        let next = match result {
            Ok(snapshot) => DashboardState {
                phase: FetchPhase::Success,
                place: Some(snapshot.place.clone()),
                current: Some(snapshot.current.clone()),
                forecast: snapshot.forecast.clone(),
                air_quality: snapshot.air_quality.clone(),
                error: None,
                supplementary_failures: snapshot.supplementary_failures.clone(),
            },
            Err(err) => DashboardState {
                phase: FetchPhase::Error,
                error: Some(err.clone()),
                ..DashboardState::default()
            },
        };

        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, DashboardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        error::ErrorKind,
        geolocation::{FixedLocation, GeolocationError},
        model::{AirQualityIndex, Pollutants},
        provider::ProviderError,
        quota::{DAILY_LIMIT, QUOTA_STORAGE_KEY},
        storage::MemoryStore,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::{sync::atomic::AtomicUsize, time::Duration};

    fn conditions(name: &str, at: Coordinates) -> CurrentConditions {
        CurrentConditions {
            location_name: name.to_string(),
            country: Some("FR".into()),
            coordinates: at,
            temperature_c: 18.0,
            feels_like_c: 17.5,
            temp_min_c: 16.0,
            temp_max_c: 20.0,
            humidity_pct: 60,
            pressure_hpa: 1012,
            wind_speed_mps: 3.0,
            wind_deg: Some(180),
            cloudiness_pct: Some(20),
            visibility_m: Some(10_000),
            condition: "few clouds".into(),
            icon: Some("02d".into()),
            sunrise: None,
            sunset: None,
            observation_time: epoch(),
            timezone_offset_secs: 7200,
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    #[derive(Debug, Default)]
    struct FakeProvider {
        no_credential: bool,
        current_error: Option<ProviderError>,
        forecast_error: Option<ProviderError>,
        air_error: Option<ProviderError>,
        slow_city: Option<String>,
        calls: Mutex<Vec<Resource>>,
    }

    impl FakeProvider {
        fn calls(&self) -> Vec<Resource> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, resource: Resource) {
            self.calls.lock().unwrap().push(resource);
        }
    }

    #[async_trait]
    impl WeatherProvider for FakeProvider {
        fn has_credential(&self) -> bool {
            !self.no_credential
        }

        async fn current(&self, query: &Query) -> Result<CurrentConditions, ProviderError> {
            self.record(Resource::CurrentConditions);
            if let (Some(slow), Query::City(name)) = (&self.slow_city, query) {
                if slow == name {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                }
            }
            if let Some(err) = &self.current_error {
                return Err(err.clone());
            }
            Ok(match query {
                Query::City(name) => conditions(name, Coordinates::new(48.85, 2.35)),
                Query::Coordinates(at) => conditions("Somewhere", *at),
            })
        }

        async fn forecast(&self, query: &Query) -> Result<ForecastSeries, ProviderError> {
            self.record(Resource::Forecast);
            if let Some(err) = &self.forecast_error {
                return Err(err.clone());
            }
            Ok(ForecastSeries {
                location_name: query.to_string(),
                country: None,
                timezone_offset_secs: 0,
                entries: Vec::new(),
            })
        }

        async fn air_quality(&self, _at: Coordinates) -> Result<AirQualitySample, ProviderError> {
            self.record(Resource::AirQuality);
            if let Some(err) = &self.air_error {
                return Err(err.clone());
            }
            Ok(AirQualitySample {
                index: AirQualityIndex::Fair,
                components: Pollutants::default(),
                measured_at: epoch(),
            })
        }
    }

    struct Harness {
        service: WeatherService,
        provider: Arc<FakeProvider>,
        quota: Arc<QuotaTracker>,
    }

    /// Counts lookups so tests can tell whether geolocation was attempted.
    #[derive(Debug, Default)]
    struct CountingLocator {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Geolocator for CountingLocator {
        async fn locate(&self) -> Result<Coordinates, GeolocationError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Coordinates::new(59.33, 18.07))
        }
    }

    fn harness_with_locator(
        provider: FakeProvider,
        store: MemoryStore,
        geolocator: Arc<dyn Geolocator>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::at("2024-05-01T12:00:00+02:00").unwrap());
        let quota = Arc::new(QuotaTracker::new(Arc::new(store), clock));
        let provider = Arc::new(provider);
        let service = WeatherService::new(provider.clone(), quota.clone(), geolocator);
        Harness { service, provider, quota }
    }

    fn harness_with(
        provider: FakeProvider,
        store: MemoryStore,
        location: Option<Coordinates>,
    ) -> Harness {
        harness_with_locator(provider, store, Arc::new(FixedLocation(location)))
    }

    fn harness(provider: FakeProvider) -> Harness {
        harness_with(provider, MemoryStore::new(), None)
    }

    fn transport() -> ProviderError {
        ProviderError::Transport("connection reset by peer".into())
    }

    #[tokio::test]
    async fn full_success_consumes_three_calls() {
        let h = harness(FakeProvider::default());

        let snapshot = h.service.fetch_by_city("Paris").await.unwrap();

        assert_eq!(snapshot.current.location_name, "Paris");
        assert!(snapshot.forecast.is_some());
        assert!(snapshot.air_quality.is_some());
        assert!(snapshot.supplementary_failures.is_empty());
        assert_eq!(
            h.provider.calls(),
            vec![Resource::CurrentConditions, Resource::Forecast, Resource::AirQuality]
        );
        assert_eq!(h.quota.status().used, 3);

        let state = h.service.state();
        assert_eq!(state.phase, FetchPhase::Success);
        assert!(!state.loading());
        assert_eq!(state.place.unwrap().name, "Paris");
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_call() {
        let h = harness(FakeProvider { no_credential: true, ..Default::default() });

        let err = h.service.fetch_by_city("Paris").await.unwrap_err();

        assert_eq!(err, WeatherError::Configuration);
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.quota.status().used, 0);
    }

    #[tokio::test]
    async fn quota_pre_check_blocks_network() {
        let store = MemoryStore::new()
            .with_value(QUOTA_STORAGE_KEY, r#"{"count":998,"date":"2024-05-01","resetAt":0}"#);
        let h = harness_with(FakeProvider::default(), store, None);

        let err = h.service.fetch_by_city("Paris").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12 * 3600)));
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.quota.status().used, 998);
    }

    #[tokio::test]
    async fn unauthorized_current_clears_everything() {
        let failing = harness(FakeProvider {
            current_error: Some(ProviderError::Status {
                status: 401,
                body: "Invalid API key".into(),
            }),
            ..Default::default()
        });
        let err = failing.service.fetch_by_city("Paris").await.unwrap_err();

        assert_eq!(err, WeatherError::Authentication);
        let state = failing.service.state();
        assert_eq!(state.phase, FetchPhase::Error);
        assert!(state.current.is_none() && state.forecast.is_none() && state.air_quality.is_none());
        assert_eq!(state.error, Some(WeatherError::Authentication));
        assert_eq!(failing.provider.calls(), vec![Resource::CurrentConditions]);
        assert_eq!(failing.quota.status().used, 0);
    }

    #[tokio::test]
    async fn unknown_city_is_not_found() {
        let h = harness(FakeProvider {
            current_error: Some(ProviderError::Status {
                status: 404,
                body: "city not found".into(),
            }),
            ..Default::default()
        });

        let err = h.service.fetch_by_city("Atlantis").await.unwrap_err();
        assert_eq!(err, WeatherError::NotFound { query: "Atlantis".into() });
        assert!(h.service.state().place.is_none());
    }

    #[tokio::test]
    async fn forecast_failure_is_absorbed() {
        let h = harness(FakeProvider { forecast_error: Some(transport()), ..Default::default() });

        let snapshot = h.service.fetch_by_city("Paris").await.unwrap();

        assert!(snapshot.forecast.is_none());
        assert!(snapshot.air_quality.is_some());
        assert_eq!(snapshot.supplementary_failures.len(), 1);
        assert_eq!(snapshot.supplementary_failures[0].resource, Resource::Forecast);
        assert_eq!(snapshot.supplementary_failures[0].error.kind(), ErrorKind::Network);

        let state = h.service.state();
        assert!(state.error.is_none());
        assert!(state.current.is_some());
        assert_eq!(state.phase, FetchPhase::Success);
        // Only the two successful calls count.
        assert_eq!(h.quota.status().used, 2);
    }

    #[tokio::test]
    async fn both_best_effort_failures_still_succeed() {
        let h = harness(FakeProvider {
            forecast_error: Some(transport()),
            air_error: Some(ProviderError::Status { status: 500, body: String::new() }),
            ..Default::default()
        });

        let snapshot = h.service.fetch_by_coordinates(10.0, 20.0).await.unwrap();

        assert!(snapshot.forecast.is_none() && snapshot.air_quality.is_none());
        assert_eq!(snapshot.current.coordinates, Coordinates::new(10.0, 20.0));
        assert_eq!(h.service.state().error, None);
        assert_eq!(h.quota.status().used, 1);
    }

    #[tokio::test]
    async fn coordinate_404_is_network_not_found() {
        let h = harness(FakeProvider {
            current_error: Some(ProviderError::Status { status: 404, body: String::new() }),
            ..Default::default()
        });
        let err = h.service.fetch_by_coordinates(0.0, 0.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn geolocation_failure_skips_network() {
        let h = harness(FakeProvider::default());

        let err = h.service.fetch_by_current_location().await.unwrap_err();

        assert_eq!(err, WeatherError::Geolocation(GeolocationError::Unavailable));
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.service.state().phase, FetchPhase::Error);
    }

    #[tokio::test]
    async fn current_location_forwards_coordinates() {
        let here = Coordinates::new(59.33, 18.07);
        let h = harness_with(FakeProvider::default(), MemoryStore::new(), Some(here));

        let snapshot = h.service.fetch_by_current_location().await.unwrap();
        assert_eq!(snapshot.current.coordinates, here);
    }

    #[tokio::test]
    async fn blank_city_is_not_sent() {
        let h = harness(FakeProvider::default());
        let err = h.service.fetch_by_city("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn blank_city_without_credential_is_a_configuration_error() {
        let h = harness(FakeProvider { no_credential: true, ..Default::default() });
        let err = h.service.fetch_by_city("  ").await.unwrap_err();
        assert_eq!(err, WeatherError::Configuration);
    }

    #[tokio::test]
    async fn current_location_checks_credential_before_locating() {
        let locator = Arc::new(CountingLocator::default());
        let h = harness_with_locator(
            FakeProvider { no_credential: true, ..Default::default() },
            MemoryStore::new(),
            locator.clone(),
        );

        let err = h.service.fetch_by_current_location().await.unwrap_err();

        assert_eq!(err, WeatherError::Configuration);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 0);
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn current_location_checks_quota_before_locating() {
        let store = MemoryStore::new().with_value(
            QUOTA_STORAGE_KEY,
            &format!(r#"{{"count":{DAILY_LIMIT},"date":"2024-05-01","resetAt":0}}"#),
        );
        let locator = Arc::new(CountingLocator::default());
        let h = harness_with_locator(FakeProvider::default(), store, locator.clone());

        let err = h.service.fetch_by_current_location().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 0);
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.quota.status().used, DAILY_LIMIT);
    }

    #[tokio::test]
    async fn current_location_locates_once_when_allowed() {
        let locator = Arc::new(CountingLocator::default());
        let h = harness_with_locator(FakeProvider::default(), MemoryStore::new(), locator.clone());

        let snapshot = h.service.fetch_by_current_location().await.unwrap();

        assert_eq!(snapshot.current.coordinates, Coordinates::new(59.33, 18.07));
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn state_is_loading_while_a_fetch_is_in_flight() {
        let h = harness(FakeProvider { slow_city: Some("Slowtown".into()), ..Default::default() });
        assert_eq!(h.service.state().phase, FetchPhase::Idle);

        // Leave an error behind so loading has something to clear.
        h.service.fetch_by_city(" ").await.unwrap_err();
        assert_eq!(h.service.state().phase, FetchPhase::Error);

        let (result, during) = tokio::join!(h.service.fetch_by_city("Slowtown"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.service.state()
        });

        assert!(during.loading());
        assert_eq!(during.error, None);
        assert!(during.current.is_none());

        result.unwrap();
        let after = h.service.state();
        assert!(!after.loading());
        assert_eq!(after.phase, FetchPhase::Success);
    }

    #[tokio::test]
    async fn clear_resets_state() {
        let h = harness(FakeProvider::default());
        h.service.fetch_by_city("Paris").await.unwrap();

        h.service.clear();

        assert_eq!(h.service.state(), DashboardState::default());
    }

    #[tokio::test]
    async fn superseded_fetch_does_not_publish() {
        let h = harness(FakeProvider { slow_city: Some("Slowtown".into()), ..Default::default() });

        let (slow, fast) = tokio::join!(
            h.service.fetch_by_city("Slowtown"),
            h.service.fetch_by_city("Fasttown"),
        );

        // Both callers get their own result...
        assert_eq!(slow.unwrap().current.location_name, "Slowtown");
        assert_eq!(fast.unwrap().current.location_name, "Fasttown");
        // ...but the slower, older fetch does not overwrite the newer one.
        let state = h.service.state();
        assert_eq!(state.current.unwrap().location_name, "Fasttown");
        assert_eq!(state.phase, FetchPhase::Success);
    }

    #[tokio::test]
    async fn exhausted_after_daily_limit() {
        let store = MemoryStore::new().with_value(
            QUOTA_STORAGE_KEY,
            &format!(r#"{{"count":{},"date":"2024-05-01","resetAt":0}}"#, DAILY_LIMIT - 3),
        );
        let h = harness_with(FakeProvider::default(), store, None);

        h.service.fetch_by_city("Paris").await.unwrap();
        assert!(h.quota.is_exhausted());

        let err = h.service.fetch_by_city("Paris").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }
}
