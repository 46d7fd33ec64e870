use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

use crate::model::{
    AirQualityIndex, AirQualitySample, Coordinates, CurrentConditions, ForecastEntry,
    ForecastSeries, Place, Pollutants, Query,
};

use super::{PlaceSuggester, ProviderError, WeatherProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: Option<String>,
    base_url: String,
    lang: Option<String>,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: None,
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Language for condition descriptions, e.g. "en" or "es".
    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = Some(lang.to_string()).filter(|l| !l.is_empty());
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingCredential)?;
        let url = format!("{}{}", self.base_url, path);

        debug!(endpoint = path, what, "OpenWeather request");

        let mut request = self
            .http
            .get(&url)
            .query(params)
            .query(&[("appid", api_key), ("units", "metric")]);
        if let Some(lang) = &self.lang {
            request = request.query(&[("lang", lang.as_str())]);
        }

        let res = request.send().await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            debug!(endpoint = path, %status, "OpenWeather request failed");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("OpenWeather {what} JSON: {e}")))
    }
}

fn query_params(query: &Query) -> Vec<(&'static str, String)> {
    match query {
        Query::City(name) => vec![("q", name.clone())],
        Query::Coordinates(c) => coordinate_params(*c),
    }
}

fn coordinate_params(c: Coordinates) -> Vec<(&'static str, String)> {
    vec![("lat", c.lat.to_string()), ("lon", c.lon.to_string())]
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
    #[serde(default)]
    pressure: u32,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
    #[serde(default)]
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    #[serde(default)]
    deg: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct OwClouds {
    all: u8,
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    country: Option<String>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    coord: OwCoord,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    clouds: Option<OwClouds>,
    #[serde(default)]
    visibility: Option<u32>,
    #[serde(default)]
    sys: OwSys,
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    name: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    pop: f64,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwAirMain {
    aqi: u8,
}

#[derive(Debug, Deserialize)]
struct OwAirEntry {
    dt: i64,
    main: OwAirMain,
    components: Pollutants,
}

#[derive(Debug, Deserialize)]
struct OwAirResponse {
    list: Vec<OwAirEntry>,
}

#[derive(Debug, Deserialize)]
struct OwGeoEntry {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: String,
    #[serde(default)]
    state: Option<String>,
}

fn describe(weather: &[OwWeather]) -> (String, Option<String>) {
    weather
        .first()
        .map(|w| (w.description.clone(), w.icon.clone()))
        .unwrap_or_else(|| ("Unknown".to_string(), None))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn current(&self, query: &Query) -> Result<CurrentConditions, ProviderError> {
        let parsed: OwCurrentResponse = self
            .get_json("/data/2.5/weather", "current weather", &query_params(query))
            .await?;

        let (condition, icon) = describe(&parsed.weather);

        Ok(CurrentConditions {
            location_name: parsed.name,
            country: parsed.sys.country,
            coordinates: Coordinates::new(parsed.coord.lat, parsed.coord.lon),
            temperature_c: parsed.main.temp,
            feels_like_c: parsed.main.feels_like,
            temp_min_c: parsed.main.temp_min.unwrap_or(parsed.main.temp),
            temp_max_c: parsed.main.temp_max.unwrap_or(parsed.main.temp),
            humidity_pct: parsed.main.humidity,
            pressure_hpa: parsed.main.pressure,
            wind_speed_mps: parsed.wind.speed,
            wind_deg: parsed.wind.deg,
            cloudiness_pct: parsed.clouds.map(|c| c.all),
            visibility_m: parsed.visibility,
            condition,
            icon,
            sunrise: parsed.sys.sunrise.and_then(unix_to_utc),
            sunset: parsed.sys.sunset.and_then(unix_to_utc),
            observation_time: unix_to_utc(parsed.dt).unwrap_or_else(Utc::now),
            timezone_offset_secs: parsed.timezone,
        })
    }

    async fn forecast(&self, query: &Query) -> Result<ForecastSeries, ProviderError> {
        let parsed: OwForecastResponse = self
            .get_json("/data/2.5/forecast", "forecast", &query_params(query))
            .await?;

        let entries = parsed
            .list
            .into_iter()
            .filter_map(|e| {
                let time = unix_to_utc(e.dt)?;
                let (condition, icon) = describe(&e.weather);
                Some(ForecastEntry {
                    time,
                    temperature_c: e.main.temp,
                    feels_like_c: e.main.feels_like,
                    humidity_pct: e.main.humidity,
                    wind_speed_mps: e.wind.speed,
                    precipitation_chance: e.pop,
                    condition,
                    icon,
                })
            })
            .collect();

        Ok(ForecastSeries {
            location_name: parsed.city.name,
            country: parsed.city.country,
            timezone_offset_secs: parsed.city.timezone,
            entries,
        })
    }

    async fn air_quality(&self, at: Coordinates) -> Result<AirQualitySample, ProviderError> {
        let parsed: OwAirResponse = self
            .get_json("/data/2.5/air_pollution", "air pollution", &coordinate_params(at))
            .await?;

        let entry = parsed
            .list
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::Decode("air pollution response contained no data".into())
            })?;

        let aqi = entry.main.aqi;
        let index = AirQualityIndex::from_index(aqi).ok_or_else(|| {
            ProviderError::Decode(format!("air quality index out of range: {aqi}"))
        })?;

        Ok(AirQualitySample {
            index,
            components: entry.components,
            measured_at: unix_to_utc(entry.dt).unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl PlaceSuggester for OpenWeatherProvider {
    async fn suggest(&self, query: &str, limit: u8) -> Result<Vec<Place>, ProviderError> {
        let params = [("q", query.to_string()), ("limit", limit.to_string())];
        let parsed: Vec<OwGeoEntry> = self.get_json("/geo/1.0/direct", "geocoding", &params).await?;

        Ok(parsed
            .into_iter()
            .map(|g| Place {
                name: g.name,
                country: g.country,
                state: g.state,
                lat: g.lat,
                lon: g.lon,
            })
            .collect())
    }
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(150);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 203);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let provider = OpenWeatherProvider::new(Some("  ".into()), Duration::from_secs(1)).unwrap();
        assert!(!provider.has_credential());
    }

    #[tokio::test]
    async fn request_without_key_fails_before_network() {
        let provider = OpenWeatherProvider::new(None, Duration::from_secs(1))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let err = provider.current(&Query::City("Oslo".into())).await.unwrap_err();
        assert_eq!(err, ProviderError::MissingCredential);
    }

    #[test]
    fn coordinate_query_params() {
        let params = query_params(&Query::Coordinates(Coordinates::new(51.5, -0.12)));
        assert_eq!(params, vec![("lat", "51.5".to_string()), ("lon", "-0.12".to_string())]);
    }
}
