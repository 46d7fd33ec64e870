use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::error::WeatherError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// A named location, as returned by place suggestions or resolved from a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    pub fn display_name(&self) -> String {
        match &self.state {
            Some(state) if !state.is_empty() => {
                format!("{}, {}, {}", self.name, state, self.country)
            }
            _ => format!("{}, {}", self.name, self.country),
        }
    }
}

/// How a location was asked for. Only name queries can be "not found".
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    City(String),
    Coordinates(Coordinates),
}

impl Query {
    pub fn is_by_name(&self) -> bool {
        matches!(self, Query::City(_))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::City(name) => f.write_str(name),
            Query::Coordinates(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub location_name: String,
    pub country: Option<String>,
    pub coordinates: Coordinates,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub humidity_pct: u8,
    pub pressure_hpa: u32,
    pub wind_speed_mps: f64,
    pub wind_deg: Option<u16>,
    pub cloudiness_pct: Option<u8>,
    pub visibility_m: Option<u32>,
    pub condition: String,
    pub icon: Option<String>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub observation_time: DateTime<Utc>,
    /// Offset of the location's local time from UTC, in seconds.
    pub timezone_offset_secs: i32,
}

impl CurrentConditions {
    pub fn place(&self) -> Place {
        Place {
            name: self.location_name.clone(),
            country: self.country.clone().unwrap_or_default(),
            state: None,
            lat: self.coordinates.lat,
            lon: self.coordinates.lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub time: DateTime<Utc>,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    /// Probability of precipitation, 0.0..=1.0.
    pub precipitation_chance: f64,
    pub condition: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub location_name: String,
    pub country: Option<String>,
    pub timezone_offset_secs: i32,
    pub entries: Vec<ForecastEntry>,
}

/// One calendar day of the multi-day view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub min_c: f64,
    pub max_c: f64,
    pub condition: String,
    pub icon: Option<String>,
    pub precipitation_chance: f64,
}

impl ForecastSeries {
    /// Folds the 3-hourly entries into per-day summaries, keyed by the
    /// location's local date. The condition shown is the most frequent one of
    /// the day, ties going to the earliest.
    pub fn daily(&self) -> Vec<DailySummary> {
        struct Acc<'a> {
            min: f64,
            max: f64,
            pop: f64,
            conditions: Vec<(&'a ForecastEntry, usize)>,
        }

        let offset = Duration::seconds(i64::from(self.timezone_offset_secs));
        let mut days: BTreeMap<NaiveDate, Acc<'_>> = BTreeMap::new();

        for entry in &self.entries {
            let date = (entry.time + offset).date_naive();
            let acc = days.entry(date).or_insert_with(|| Acc {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                pop: 0.0,
                conditions: Vec::new(),
            });
            acc.min = acc.min.min(entry.temperature_c);
            acc.max = acc.max.max(entry.temperature_c);
            acc.pop = acc.pop.max(entry.precipitation_chance);
            match acc.conditions.iter_mut().find(|(e, _)| e.condition == entry.condition) {
                Some((_, n)) => *n += 1,
                None => acc.conditions.push((entry, 1)),
            }
        }

        days.into_iter()
            .filter_map(|(date, acc)| {
                let mut dominant: Option<(&ForecastEntry, usize)> = None;
                for &(entry, n) in &acc.conditions {
                    if dominant.is_none_or(|(_, best)| n > best) {
                        dominant = Some((entry, n));
                    }
                }
                let (entry, _) = dominant?;
                Some(DailySummary {
                    date,
                    min_c: acc.min,
                    max_c: acc.max,
                    condition: entry.condition.clone(),
                    icon: entry.icon.clone(),
                    precipitation_chance: acc.pop,
                })
            })
            .collect()
    }
}

/// OpenWeather's 1..=5 air quality index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirQualityIndex {
    Good,
    Fair,
    Moderate,
    Poor,
    VeryPoor,
}

impl AirQualityIndex {
    pub fn from_index(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Good),
            2 => Some(Self::Fair),
            3 => Some(Self::Moderate),
            4 => Some(Self::Poor),
            5 => Some(Self::VeryPoor),
            _ => None,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            Self::Good => 1,
            Self::Fair => 2,
            Self::Moderate => 3,
            Self::Poor => 4,
            Self::VeryPoor => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Moderate => "moderate",
            Self::Poor => "poor",
            Self::VeryPoor => "very_poor",
        }
    }
}

/// Pollutant concentrations in μg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pollutants {
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualitySample {
    pub index: AirQualityIndex,
    pub components: Pollutants,
    pub measured_at: DateTime<Utc>,
}

/// The three resources fetched per location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    CurrentConditions,
    Forecast,
    AirQuality,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::CurrentConditions => "current conditions",
            Resource::Forecast => "forecast",
            Resource::AirQuality => "air quality",
        })
    }
}

/// A best-effort resource that could not be fetched. Never surfaced as the
/// fetch's error; callers decide whether to show it.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplementaryFailure {
    pub resource: Resource,
    pub error: WeatherError,
}

/// Result of one successful fetch. Replaced wholesale on the next fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub place: Place,
    pub current: CurrentConditions,
    pub forecast: Option<ForecastSeries>,
    pub air_quality: Option<AirQualitySample>,
    pub supplementary_failures: Vec<SupplementaryFailure>,
}
