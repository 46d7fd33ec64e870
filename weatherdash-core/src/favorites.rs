//! Saved places, bounded and deduplicated.
//!
//! Identity is derived from the name, country and coordinates rounded to two
//! decimals (roughly 1 km), so repeated lookups of the same city collapse to a
//! single entry. Two distinct places that close together also collapse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    model::Place,
    storage::{self, KeyValueStore},
};

pub const FAVORITES_STORAGE_KEY: &str = "weather_favorites";
pub const MAX_FAVORITES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteCity {
    pub id: String,
    pub name: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub added_at: DateTime<Utc>,
}

impl FavoriteCity {
    pub fn place(&self) -> Place {
        Place {
            name: self.name.clone(),
            country: self.country.clone(),
            state: self.state.clone(),
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoritesRecord {
    cities: Vec<FavoriteCity>,
    max_favorites: usize,
}

/// Deterministic identity key for a place.
pub fn favorite_id(place: &Place) -> String {
    format!(
        "{}-{}-{}-{}",
        place.name.trim().to_lowercase(),
        place.country.trim().to_lowercase(),
        round2(place.lat),
        round2(place.lon)
    )
}

fn round2(v: f64) -> String {
    // `+ 0.0` folds -0.0 into 0.0 so both print the same.
    format!("{:.2}", (v * 100.0).round() / 100.0 + 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    CapacityReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    /// Not a member and the store is full; nothing changed.
    Rejected,
}

#[derive(Debug)]
pub struct FavoritesStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cities: Mutex<Vec<FavoriteCity>>,
}

impl FavoritesStore {
    /// Loads the persisted collection. Corrupt data yields an empty store;
    /// duplicate ids and entries past capacity are dropped.
    pub fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let cities = storage::load_json::<FavoritesRecord>(store.as_ref(), FAVORITES_STORAGE_KEY)
            .map(|record| normalize(record.cities))
            .unwrap_or_default();

        debug!(count = cities.len(), "loaded favorites");

        Self {
            store,
            clock,
            cities: Mutex::new(cities),
        }
    }

    pub fn favorites(&self) -> Vec<FavoriteCity> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_reached(&self) -> bool {
        self.len() >= MAX_FAVORITES
    }

    pub fn get(&self, id: &str) -> Option<FavoriteCity> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn is_favorite(&self, place: &Place) -> bool {
        let id = favorite_id(place);
        self.lock().iter().any(|c| c.id == id)
    }

    pub fn add(&self, place: &Place) -> AddOutcome {
        let mut cities = self.lock();
        let outcome = self.add_locked(&mut cities, place);
        if outcome == AddOutcome::Added {
            self.persist(&cities);
        }
        outcome
    }

    /// Removes by id. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut cities = self.lock();
        let before = cities.len();
        cities.retain(|c| c.id != id);
        let removed = cities.len() != before;

        if removed {
            info!(id, "favorite removed");
            self.persist(&cities);
        }
        removed
    }

    pub fn toggle(&self, place: &Place) -> ToggleOutcome {
        let id = favorite_id(place);
        let mut cities = self.lock();

        let outcome = if let Some(pos) = cities.iter().position(|c| c.id == id) {
            cities.remove(pos);
            info!(id, "favorite removed");
            ToggleOutcome::Removed
        } else {
            match self.add_locked(&mut cities, place) {
                AddOutcome::Added => ToggleOutcome::Added,
                AddOutcome::AlreadyPresent | AddOutcome::CapacityReached => ToggleOutcome::Rejected,
            }
        };

        if outcome != ToggleOutcome::Rejected {
            self.persist(&cities);
        }
        outcome
    }

    pub fn clear(&self) {
        let mut cities = self.lock();
        cities.clear();
        info!("favorites cleared");
        self.persist(&cities);
    }

    fn add_locked(&self, cities: &mut Vec<FavoriteCity>, place: &Place) -> AddOutcome {
        let id = favorite_id(place);

        if cities.iter().any(|c| c.id == id) {
            debug!(id, "favorite already present");
            return AddOutcome::AlreadyPresent;
        }
        if cities.len() >= MAX_FAVORITES {
            warn!(id, max = MAX_FAVORITES, "favorites full, not adding");
            return AddOutcome::CapacityReached;
        }

        cities.push(FavoriteCity {
            id: id.clone(),
            name: place.name.clone(),
            country: place.country.clone(),
            state: place.state.clone(),
            lat: place.lat,
            lon: place.lon,
            added_at: self.clock.now(),
        });
        info!(id, "favorite added");
        AddOutcome::Added
    }

    fn persist(&self, cities: &[FavoriteCity]) {
        let record = FavoritesRecord {
            cities: cities.to_vec(),
            max_favorites: MAX_FAVORITES,
        };
        if let Err(e) = storage::save_json(self.store.as_ref(), FAVORITES_STORAGE_KEY, &record) {
            warn!(error = %e, "failed to persist favorites; keeping in-memory list");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FavoriteCity>> {
        self.cities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize(cities: Vec<FavoriteCity>) -> Vec<FavoriteCity> {
    let mut seen = HashSet::new();
    let mut out: Vec<FavoriteCity> =
        cities.into_iter().filter(|c| seen.insert(c.id.clone())).collect();
    if out.len() > MAX_FAVORITES {
        warn!(stored = out.len(), max = MAX_FAVORITES, "dropping favorites past capacity");
        out.truncate(MAX_FAVORITES);
    }
    out
}
