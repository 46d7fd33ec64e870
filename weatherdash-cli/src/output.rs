//! Plain-text rendering of core types.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use weatherdash_core::{
    FavoriteCity, Place, QuotaStatus, WeatherSnapshot,
    model::{AirQualityIndex, AirQualitySample, CurrentConditions, ForecastSeries},
};

pub fn print_snapshot(snapshot: &WeatherSnapshot, is_favorite: bool) {
    print_current(&snapshot.current, is_favorite);

    match &snapshot.forecast {
        Some(forecast) => print_forecast(forecast),
        None => println!("\nForecast: unavailable"),
    }

    match &snapshot.air_quality {
        Some(air) => print_air_quality(air),
        None => println!("\nAir quality: unavailable"),
    }
}

fn print_current(c: &CurrentConditions, is_favorite: bool) {
    let star = if is_favorite { " ★" } else { "" };
    let country = c.country.as_deref().map(|cc| format!(", {cc}")).unwrap_or_default();

    println!("{}{country}{star}  ({})", c.location_name, c.coordinates);
    println!("  {}", capitalize(&c.condition));
    println!(
        "  {:.1}°C (feels like {:.1}°C), min {:.1}°C / max {:.1}°C",
        c.temperature_c, c.feels_like_c, c.temp_min_c, c.temp_max_c
    );
    println!("  Humidity {}%, pressure {} hPa", c.humidity_pct, c.pressure_hpa);

    let direction = c.wind_deg.map(|d| format!(" from {}", compass(d))).unwrap_or_default();
    println!("  Wind {:.1} m/s{direction}", c.wind_speed_mps);

    if let Some(v) = c.visibility_m {
        println!("  Visibility {:.1} km", f64::from(v) / 1000.0);
    }

    let offset = FixedOffset::east_opt(c.timezone_offset_secs).unwrap_or_else(|| Utc.fix());
    if let (Some(rise), Some(set)) = (c.sunrise, c.sunset) {
        println!(
            "  Sunrise {}, sunset {}",
            rise.with_timezone(&offset).format("%H:%M"),
            set.with_timezone(&offset).format("%H:%M")
        );
    }
    println!("  Observed {}", local_time(c.observation_time));
}

fn print_forecast(forecast: &ForecastSeries) {
    let days = forecast.daily();
    if days.is_empty() {
        println!("\nForecast: no data");
        return;
    }

    println!("\nForecast");
    for day in days {
        println!(
            "  {}  {:>5.1}°C / {:>5.1}°C  {:>3.0}% rain  {}",
            day.date.format("%a %d %b"),
            day.min_c,
            day.max_c,
            day.precipitation_chance * 100.0,
            day.condition
        );
    }
}

fn print_air_quality(air: &AirQualitySample) {
    let label = match air.index {
        AirQualityIndex::Good => "Good",
        AirQualityIndex::Fair => "Fair",
        AirQualityIndex::Moderate => "Moderate",
        AirQualityIndex::Poor => "Poor",
        AirQualityIndex::VeryPoor => "Very poor",
    };
    println!("\nAir quality: {label} ({}/5)", air.index.value());
    println!(
        "  PM2.5 {:.1}  PM10 {:.1}  O₃ {:.1}  NO₂ {:.1}  μg/m³",
        air.components.pm2_5, air.components.pm10, air.components.o3, air.components.no2
    );
}

pub fn print_quota(status: &QuotaStatus) {
    println!("Provider calls today ({}): {}/{}", status.date, status.used, status.limit);
    println!("Remaining: {}", status.remaining);
    println!("Resets at: {}", local_time(status.reset_at));
}

pub fn print_places(places: &[Place]) {
    if places.is_empty() {
        println!("No matches.");
        return;
    }
    for place in places {
        println!("  {}  ({})", place.display_name(), place.coordinates());
    }
}

pub fn print_favorites(favorites: &[FavoriteCity], max: usize) {
    if favorites.is_empty() {
        println!("No favorites yet. Add one with `weatherdash favorites add <city>`.");
        return;
    }

    println!("Favorites ({}/{max})", favorites.len());
    for fav in favorites {
        let added = local_time(fav.added_at);
        println!("  {:<36} {}  (added {added})", fav.id, fav.place().display_name());
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn compass(deg: u16) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    POINTS[((f64::from(deg % 360) + 22.5) / 45.0) as usize % 8]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
