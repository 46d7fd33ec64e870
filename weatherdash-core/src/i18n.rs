//! Locale-indexed message catalog for rendering [`WeatherError`]s.
//!
//! Catalogs are TOML documents with one table per locale, keyed by
//! [`ErrorKind`]:
//!
//! ```toml
//! [en]
//! not_found = "No location named \"{query}\"."
//! quota_exceeded = "Daily limit reached. Try again in {hours}h {minutes}m."
//! ```
//!
//! Templates may use `{query}`, `{status}`, `{detail}`, `{hours}`, `{minutes}`
//! and `{seconds}`; placeholders that don't apply to an error are left as-is.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::error::{ErrorKind, WeatherError};

pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    tables: HashMap<String, HashMap<String, String>>,
}

impl MessageCatalog {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let tables = toml::from_str(contents).context("Failed to parse message catalog TOML")?;
        Ok(Self { tables })
    }

    /// Merges another catalog in; its entries win on conflict.
    pub fn merge(&mut self, other: MessageCatalog) {
        for (locale, table) in other.tables {
            self.tables.entry(locale).or_default().extend(table);
        }
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn has_locale(&self, locale: &str) -> bool {
        self.tables.contains_key(locale)
    }

    /// Looks up a message, trying `es-MX`, then `es`, then [`DEFAULT_LOCALE`].
    pub fn message(&self, locale: &str, key: &str) -> Option<&str> {
        let base = locale.split(['-', '_']).next().unwrap_or(locale);

        [locale, base, DEFAULT_LOCALE]
            .into_iter()
            .filter_map(|l| self.tables.get(l))
            .find_map(|table| table.get(key))
            .map(String::as_str)
    }

    pub fn template(&self, locale: &str, kind: ErrorKind) -> Option<&str> {
        self.message(locale, kind.as_str())
    }

    /// Renders `key` with `{name}` placeholders filled from `args`. A missing
    /// message renders as the key itself.
    pub fn render(&self, locale: &str, key: &str, args: &[(&str, &str)]) -> String {
        let Some(template) = self.message(locale, key) else {
            return key.to_string();
        };

        args.iter().fold(template.to_string(), |out, (name, value)| {
            out.replace(&format!("{{{name}}}"), value)
        })
    }
}

impl WeatherError {
    /// Renders the error for `locale`. Falls back to the kind's key when the
    /// catalog has nothing for it.
    pub fn localize(&self, catalog: &MessageCatalog, locale: &str) -> String {
        let kind = self.kind();
        let Some(template) = catalog.template(locale, kind) else {
            return kind.as_str().to_string();
        };

        let mut out = template.to_string();
        match self {
            WeatherError::NotFound { query } => {
                out = out.replace("{query}", query);
            }
            WeatherError::QuotaExceeded { retry_after_secs } => {
                let secs = *retry_after_secs;
                out = out
                    .replace("{hours}", &(secs / 3600).to_string())
                    .replace("{minutes}", &((secs % 3600) / 60).to_string())
                    .replace("{seconds}", &secs.to_string());
            }
            WeatherError::Network { status, detail } => {
                let status = status.map(|s| s.to_string()).unwrap_or_default();
                out = out.replace("{status}", &status).replace("{detail}", detail);
            }
            WeatherError::Geolocation(reason) => {
                out = out.replace("{detail}", reason.as_str());
            }
            WeatherError::Configuration | WeatherError::Authentication => {}
        }
        out
    }
}
