//! End-to-end tests: `WeatherService` driving the real OpenWeather provider
//! against a mock server, with quota state in a temporary directory.

use std::{sync::Arc, time::Duration};

use tempfile::TempDir;
use weatherdash_core::{
    ErrorKind, FixedLocation, JsonFileStore, ManualClock, OpenWeatherProvider, PlaceSuggester,
    QuotaTracker, WeatherError, WeatherService, model::AirQualityIndex, model::Resource,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn current_json() -> serde_json::Value {
    serde_json::json!({
        "coord": {"lon": -0.1257, "lat": 51.5085},
        "weather": [{"id": 803, "main": "Clouds", "description": "broken clouds", "icon": "04d"}],
        "main": {
            "temp": 14.2, "feels_like": 13.6, "temp_min": 12.9, "temp_max": 15.4,
            "pressure": 1015, "humidity": 72
        },
        "visibility": 10000,
        "wind": {"speed": 4.1, "deg": 240},
        "clouds": {"all": 75},
        "dt": 1714560000,
        "sys": {"country": "GB", "sunrise": 1714537200, "sunset": 1714591800},
        "timezone": 3600,
        "name": "London"
    })
}

fn forecast_json() -> serde_json::Value {
    let entry = |dt: i64, temp: f64, desc: &str| {
        serde_json::json!({
            "dt": dt,
            "main": {"temp": temp, "feels_like": temp - 1.0, "humidity": 70},
            "weather": [{"description": desc, "icon": "10d"}],
            "wind": {"speed": 3.0},
            "pop": 0.3
        })
    };
    serde_json::json!({
        "city": {"name": "London", "country": "GB", "timezone": 3600},
        "list": [
            entry(1714564800, 15.0, "light rain"),
            entry(1714575600, 13.0, "light rain"),
            entry(1714651200, 17.0, "clear sky"),
        ]
    })
}

fn air_json() -> serde_json::Value {
    serde_json::json!({
        "coord": {"lon": -0.1257, "lat": 51.5085},
        "list": [{
            "main": {"aqi": 2},
            "components": {
                "co": 230.3, "no": 0.1, "no2": 12.5, "o3": 60.1,
                "so2": 1.2, "pm2_5": 4.3, "pm10": 6.8, "nh3": 0.9
            },
            "dt": 1714560000
        }]
    })
}

fn ok(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

async fn mount(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(response)
        .mount(server)
        .await;
}

struct Setup {
    service: WeatherService,
    quota: Arc<QuotaTracker>,
    dir: TempDir,
}

fn setup(server: &MockServer, api_key: Option<&str>) -> Setup {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::at("2024-05-01T12:00:00+01:00").unwrap());
    let quota = Arc::new(QuotaTracker::new(Arc::new(JsonFileStore::new(dir.path())), clock));

    let provider = OpenWeatherProvider::new(api_key.map(str::to_string), Duration::from_secs(2))
        .unwrap()
        .with_base_url(&server.uri())
        .with_lang("en");

    let geolocator = Arc::new(FixedLocation(None));
    let service = WeatherService::new(Arc::new(provider), quota.clone(), geolocator);
    Setup { service, quota, dir }
}

#[tokio::test]
async fn fetch_by_city_parses_all_three_resources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("q", "London"))
        .and(query_param("appid", "test-key"))
        .and(query_param("units", "metric"))
        .respond_with(ok(current_json()))
        .expect(1)
        .mount(&server)
        .await;
    mount(&server, "/data/2.5/forecast", ok(forecast_json())).await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/air_pollution"))
        .and(query_param("lat", "51.5085"))
        .and(query_param("lon", "-0.1257"))
        .respond_with(ok(air_json()))
        .mount(&server)
        .await;

    let s = setup(&server, Some("test-key"));
    let snapshot = s.service.fetch_by_city("London").await.expect("fetch should succeed");

    assert_eq!(snapshot.current.location_name, "London");
    assert_eq!(snapshot.current.country.as_deref(), Some("GB"));
    assert_eq!(snapshot.current.condition, "broken clouds");
    assert_eq!(snapshot.current.humidity_pct, 72);
    assert_eq!(snapshot.place.country, "GB");

    let forecast = snapshot.forecast.expect("forecast present");
    assert_eq!(forecast.entries.len(), 3);
    let days = forecast.daily();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].condition, "light rain");
    assert_eq!(days[0].max_c, 15.0);

    let air = snapshot.air_quality.expect("air quality present");
    assert_eq!(air.index, AirQualityIndex::Fair);
    assert_eq!(air.components.pm2_5, 4.3);

    assert_eq!(s.quota.status().used, 3);
}

#[tokio::test]
async fn quota_survives_a_new_tracker_on_the_same_directory() {
    let server = MockServer::start().await;
    mount(&server, "/data/2.5/weather", ok(current_json())).await;
    mount(&server, "/data/2.5/forecast", ok(forecast_json())).await;
    mount(&server, "/data/2.5/air_pollution", ok(air_json())).await;

    let s = setup(&server, Some("k"));
    s.service.fetch_by_coordinates(51.5085, -0.1257).await.unwrap();

    let clock = Arc::new(ManualClock::at("2024-05-01T18:00:00+01:00").unwrap());
    let reopened = QuotaTracker::new(Arc::new(JsonFileStore::new(s.dir.path())), clock);
    assert_eq!(reopened.status().used, 3);
}

#[tokio::test]
async fn unauthorized_current_stops_the_pipeline() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(401).set_body_string(r#"{"cod":401,"message":"Invalid API key."}"#),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .respond_with(ok(forecast_json()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/air_pollution"))
        .respond_with(ok(air_json()))
        .expect(0)
        .mount(&server)
        .await;

    let s = setup(&server, Some("not-yet-active"));
    let err = s.service.fetch_by_city("London").await.unwrap_err();

    assert_eq!(err, WeatherError::Authentication);
    let state = s.service.state();
    assert!(state.current.is_none() && state.forecast.is_none() && state.air_quality.is_none());
    assert_eq!(s.quota.status().used, 0);
}

#[tokio::test]
async fn unknown_city_is_not_found() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(404).set_body_string(r#"{"cod":"404","message":"city not found"}"#),
    )
    .await;

    let s = setup(&server, Some("k"));
    let err = s.service.fetch_by_city("Qwertyville").await.unwrap_err();
    assert_eq!(err, WeatherError::NotFound { query: "Qwertyville".into() });
}

#[tokio::test]
async fn forecast_outage_keeps_current_and_air_quality() {
    let server = MockServer::start().await;
    mount(&server, "/data/2.5/weather", ok(current_json())).await;
    mount(&server, "/data/2.5/forecast", ResponseTemplate::new(503)).await;
    mount(&server, "/data/2.5/air_pollution", ok(air_json())).await;

    let s = setup(&server, Some("k"));
    let snapshot = s.service.fetch_by_city("London").await.unwrap();

    assert!(snapshot.forecast.is_none());
    assert!(snapshot.air_quality.is_some());
    assert_eq!(snapshot.supplementary_failures.len(), 1);
    assert_eq!(snapshot.supplementary_failures[0].resource, Resource::Forecast);
    assert_eq!(s.service.state().error, None);
    assert_eq!(s.quota.status().used, 2);
}

#[tokio::test]
async fn malformed_air_quality_is_absorbed() {
    let server = MockServer::start().await;
    mount(&server, "/data/2.5/weather", ok(current_json())).await;
    mount(&server, "/data/2.5/forecast", ok(forecast_json())).await;
    mount(
        &server,
        "/data/2.5/air_pollution",
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"list": []})),
    )
    .await;

    let s = setup(&server, Some("k"));
    let snapshot = s.service.fetch_by_city("London").await.unwrap();

    assert!(snapshot.air_quality.is_none());
    assert_eq!(snapshot.supplementary_failures[0].error.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn missing_key_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let s = setup(&server, None);
    let err = s.service.fetch_by_city("London").await.unwrap_err();
    assert_eq!(err, WeatherError::Configuration);
}

#[tokio::test]
async fn suggestions_map_geocoding_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "Springfield"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "name": "Springfield", "lat": 39.80, "lon": -89.64,
                "country": "US", "state": "Illinois"
            },
            {
                "name": "Springfield", "lat": 37.21, "lon": -93.29,
                "country": "US", "state": "Missouri"
            }
        ])))
        .mount(&server)
        .await;

    let provider = OpenWeatherProvider::new(Some("k".into()), Duration::from_secs(2))
        .unwrap()
        .with_base_url(&server.uri());
    let places = provider.suggest("Springfield", 2).await.unwrap();

    assert_eq!(places.len(), 2);
    assert_eq!(places[1].state.as_deref(), Some("Missouri"));
    assert_eq!(places[0].display_name(), "Springfield, Illinois, US");
}
