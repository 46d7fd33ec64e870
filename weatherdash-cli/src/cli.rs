use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use inquire::{Confirm, CustomType, Password, PasswordDisplayMode, Select};
use std::{fmt, fs, sync::Arc};
use tracing::debug;
use weatherdash_core::{
    AddOutcome, Clock, Config, Coordinates, FavoritesStore, JsonFileStore, KeyValueStore,
    MessageCatalog, OpenWeatherProvider, Place, PlaceSuggester, Query, QuotaTracker, SystemClock,
    ToggleOutcome, WeatherError, WeatherProvider, WeatherService, WeatherSnapshot,
    error::{FailureOutcome, classify},
    favorites::MAX_FAVORITES,
    geolocator_from_config,
    provider::provider_from_config,
};

use crate::{logging, output};

const BUILTIN_MESSAGES: &str = include_str!("../locales/messages.toml");
const SUGGESTION_LIMIT: u8 = 5;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weatherdash", version, about = "Personal weather dashboard")]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Language for messages, e.g. "en" or "es". Defaults to the configured locale.
    #[arg(long, global = true)]
    pub locale: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set the API key, locale and home location.
    Configure,

    #[command(flatten)]
    Dashboard(DashboardCommand),
}

/// Commands that read or change dashboard data.
#[derive(Debug, Subcommand)]
pub enum DashboardCommand {
    /// Show current weather, forecast and air quality for a city or coordinates.
    Show {
        /// City name, e.g. "London" or "London,GB".
        #[arg(required_unless_present = "lat", conflicts_with_all = ["lat", "lon"])]
        city: Option<String>,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Show weather for the current location.
    Here,

    /// List places matching a name.
    Search {
        query: String,

        #[arg(long, default_value_t = SUGGESTION_LIMIT)]
        limit: u8,
    },

    /// Show today's provider call budget.
    Quota,

    /// Manage saved places.
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum FavoritesAction {
    /// List saved places.
    List,
    /// Look up a place by name and save it.
    Add { query: String },
    /// Remove a saved place by id.
    Remove { id: String },
    /// Save a place, or remove it if already saved.
    Toggle { query: String },
    /// Show weather for a saved place.
    Show { id: String },
    /// Remove all saved places.
    Clear,
}

/// Wiring shared by the commands.
struct App {
    config: Config,
    locale: String,
    catalog: MessageCatalog,
    provider: Arc<OpenWeatherProvider>,
    quota: Arc<QuotaTracker>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl App {
    fn new(config: Config, locale: Option<String>) -> anyhow::Result<Self> {
        let locale = locale.unwrap_or_else(|| config.locale.clone());
        let catalog = load_catalog()?;

        let data_dir = Config::data_dir()?;
        debug!(path = %data_dir.display(), "using data directory");
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(data_dir));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let provider =
            Arc::new(provider_from_config(&config).context("Failed to build HTTP client")?);
        let quota = Arc::new(QuotaTracker::new(store.clone(), clock.clone()));

        Ok(Self { config, locale, catalog, provider, quota, store, clock })
    }

    fn service(&self) -> anyhow::Result<WeatherService> {
        let geolocator =
            geolocator_from_config(&self.config).context("Failed to build HTTP client")?;
        Ok(WeatherService::new(self.provider.clone(), self.quota.clone(), geolocator))
    }

    fn favorites(&self) -> FavoritesStore {
        FavoritesStore::load(self.store.clone(), self.clock.clone())
    }

    /// Message `key` in the active locale.
    fn say(&self, key: &str, args: &[(&str, &str)]) -> String {
        self.catalog.render(&self.locale, key, args)
    }

    /// Turns a typed error into a localized, user-facing one.
    fn fail(&self, err: &WeatherError) -> anyhow::Error {
        anyhow!(err.localize(&self.catalog, &self.locale))
    }

    fn show(&self, result: Result<WeatherSnapshot, WeatherError>) -> anyhow::Result<()> {
        let snapshot = result.map_err(|e| self.fail(&e))?;
        let is_favorite = self.favorites().is_favorite(&snapshot.place);
        output::print_snapshot(&snapshot, is_favorite);
        Ok(())
    }

    /// Place lookups go through the same daily budget as weather fetches.
    async fn suggest(&self, query: &str, limit: u8) -> anyhow::Result<Vec<Place>> {
        if !self.provider.has_credential() {
            return Err(self.fail(&classify(FailureOutcome::MissingCredential)));
        }
        if !self.quota.check_quota(1) {
            let retry_after = self.quota.time_until_reset();
            return Err(self.fail(&classify(FailureOutcome::QuotaExhausted { retry_after })));
        }

        let places = self.provider.suggest(query, limit).await.map_err(|error| {
            let query = Query::City(query.to_string());
            self.fail(&classify(FailureOutcome::Provider { error: &error, query: &query }))
        })?;
        self.quota.consume(1);
        Ok(places)
    }

    /// Resolves a name to one place, asking the user when several match.
    async fn resolve_place(&self, query: &str) -> anyhow::Result<Place> {
        let mut places = self.suggest(query, SUGGESTION_LIMIT).await?;

        match places.len() {
            0 => Err(self.fail(&WeatherError::NotFound { query: query.to_string() })),
            1 => Ok(places.remove(0)),
            _ => {
                let options = places.into_iter().map(PlaceOption).collect();
                let chosen = Select::new(&self.say("place_prompt", &[]), options).prompt()?;
                Ok(chosen.0)
            }
        }
    }
}

struct PlaceOption(Place);

impl fmt::Display for PlaceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0.display_name(), self.0.coordinates())
    }
}

/// Built-in messages, overlaid with `messages.toml` next to the config file if present.
fn load_catalog() -> anyhow::Result<MessageCatalog> {
    let mut catalog = MessageCatalog::from_toml_str(BUILTIN_MESSAGES)?;

    let config_path = Config::config_file_path()?;
    if let Some(dir) = config_path.parent() {
        let path = dir.join("messages.toml");
        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read message catalog: {}", path.display()))?;
            catalog.merge(MessageCatalog::from_toml_str(&contents)?);
        }
    }

    Ok(catalog)
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load()?;
        logging::init(&config.log_level, self.verbose);

        match self.command {
            Command::Configure => configure(config),
            Command::Dashboard(command) => App::new(config, self.locale)?.run(command).await,
        }
    }
}

impl App {
    async fn run(&self, command: DashboardCommand) -> anyhow::Result<()> {
        match command {
            DashboardCommand::Show { city: Some(city), .. } => {
                let service = self.service()?;
                self.show(service.fetch_by_city(&city).await)
            }
            DashboardCommand::Show { lat, lon, .. } => {
                let (Some(lat), Some(lon)) = (lat, lon) else {
                    return Err(anyhow!("Provide a city or both --lat and --lon."));
                };
                let service = self.service()?;
                self.show(service.fetch_by_coordinates(lat, lon).await)
            }
            DashboardCommand::Here => {
                let service = self.service()?;
                self.show(service.fetch_by_current_location().await)
            }
            DashboardCommand::Search { query, limit } => {
                let places = self.suggest(&query, limit).await?;
                output::print_places(&places);
                Ok(())
            }
            DashboardCommand::Quota => {
                output::print_quota(&self.quota.status());
                Ok(())
            }
            DashboardCommand::Favorites { action } => self.run_favorites(action).await,
        }
    }

    async fn run_favorites(&self, action: FavoritesAction) -> anyhow::Result<()> {
        let favorites = self.favorites();
        let max = MAX_FAVORITES.to_string();

        match action {
            FavoritesAction::List => {
                output::print_favorites(&favorites.favorites(), MAX_FAVORITES);
            }
            FavoritesAction::Add { query } => {
                if favorites.max_reached() {
                    let full = self.say("favorites_full", &[("max", max.as_str())]);
                    return Err(anyhow!(full));
                }
                let place = self.resolve_place(&query).await?;
                let name = place.display_name();
                let key = match favorites.add(&place) {
                    AddOutcome::Added => "favorite_added",
                    AddOutcome::AlreadyPresent => "favorite_exists",
                    AddOutcome::CapacityReached => "favorites_full",
                };
                let args = [("place", name.as_str()), ("max", max.as_str())];
                println!("{}", self.say(key, &args));
            }
            FavoritesAction::Toggle { query } => {
                let place = self.resolve_place(&query).await?;
                let name = place.display_name();
                let key = match favorites.toggle(&place) {
                    ToggleOutcome::Added => "favorite_added",
                    ToggleOutcome::Removed => "favorite_removed",
                    ToggleOutcome::Rejected => "favorites_full",
                };
                let args = [("place", name.as_str()), ("max", max.as_str())];
                println!("{}", self.say(key, &args));
            }
            FavoritesAction::Remove { id } => {
                let fav = favorites.get(&id).ok_or_else(|| self.missing_favorite(&id))?;
                favorites.remove(&id);
                let name = fav.place().display_name();
                println!("{}", self.say("favorite_removed", &[("place", name.as_str())]));
            }
            FavoritesAction::Show { id } => {
                let fav = favorites.get(&id).ok_or_else(|| self.missing_favorite(&id))?;
                let service = self.service()?;
                self.show(service.fetch_by_coordinates(fav.lat, fav.lon).await)?;
            }
            FavoritesAction::Clear => {
                let confirmed = Confirm::new(&self.say("favorites_clear_confirm", &[]))
                    .with_default(false)
                    .prompt()?;
                if confirmed {
                    favorites.clear();
                    println!("{}", self.say("favorites_cleared", &[]));
                }
            }
        }

        Ok(())
    }

    fn missing_favorite(&self, id: &str) -> anyhow::Error {
        anyhow!(self.say("favorite_missing", &[("id", id)]))
    }
}

fn configure(mut config: Config) -> anyhow::Result<()> {
    let api_key = Password::new("OpenWeather API key:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .with_help_message("Leave empty to keep the current key")
        .prompt()?;
    if !api_key.trim().is_empty() {
        config.set_api_key(api_key.trim().to_string());
    }

    let catalog = MessageCatalog::from_toml_str(BUILTIN_MESSAGES)?;
    let mut locales: Vec<String> = catalog.locales().map(str::to_string).collect();
    locales.sort();
    let start = locales.iter().position(|l| *l == config.locale).unwrap_or(0);
    config.locale = Select::new("Locale:", locales).with_starting_cursor(start).prompt()?;

    if Confirm::new("Set a fixed home location for `weatherdash here`?")
        .with_default(config.home.is_some())
        .prompt()?
    {
        let lat = CustomType::<f64>::new("Latitude:").prompt()?;
        let lon = CustomType::<f64>::new("Longitude:").prompt()?;
        config.home = Some(Coordinates::new(lat, lon));
    } else {
        config.home = None;
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());

    if !config.has_api_key() {
        println!("No API key set yet; fetches will fail until one is configured.");
    }
    Ok(())
}
