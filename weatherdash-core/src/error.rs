//! Typed, user-displayable errors and the classifier that produces them.
//!
//! Nothing here carries user-facing language. `Display` output is meant for
//! logs; text shown to people comes from a [`MessageCatalog`](crate::i18n::MessageCatalog).

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

use crate::{geolocation::GeolocationError, model::Query, provider::ProviderError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeatherError {
    #[error("no provider credential configured")]
    Configuration,

    #[error("daily request quota exhausted, resets in {retry_after_secs}s")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("provider rejected the credential")]
    Authentication,

    #[error("no location found for '{query}'")]
    NotFound { query: String },

    #[error("network error: {detail}")]
    Network { status: Option<u16>, detail: String },

    #[error("geolocation failed: {0}")]
    Geolocation(GeolocationError),
}

/// The bare kind of a [`WeatherError`], used as the message catalog key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    QuotaExceeded,
    Authentication,
    NotFound,
    Network,
    Geolocation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Network => "network",
            ErrorKind::Geolocation => "geolocation",
        }
    }

    pub const fn all() -> &'static [ErrorKind] {
        &[
            ErrorKind::Configuration,
            ErrorKind::QuotaExceeded,
            ErrorKind::Authentication,
            ErrorKind::NotFound,
            ErrorKind::Network,
            ErrorKind::Geolocation,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WeatherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeatherError::Configuration => ErrorKind::Configuration,
            WeatherError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            WeatherError::Authentication => ErrorKind::Authentication,
            WeatherError::NotFound { .. } => ErrorKind::NotFound,
            WeatherError::Network { .. } => ErrorKind::Network,
            WeatherError::Geolocation(_) => ErrorKind::Geolocation,
        }
    }

    /// Whether repeating the same request, unchanged, may succeed.
    ///
    /// Configuration and authentication need operator action, a missing
    /// location needs a different query, and the quota only frees up at the
    /// next local midnight.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WeatherError::Network { .. } | WeatherError::Geolocation(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WeatherError::QuotaExceeded { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Everything that can go wrong before or during a provider call.
#[derive(Debug, Clone, Copy)]
pub enum FailureOutcome<'a> {
    MissingCredential,
    QuotaExhausted { retry_after: Duration },
    Provider { error: &'a ProviderError, query: &'a Query },
    Geolocation(&'a GeolocationError),
}

/// Maps a failure to the error kind shown to the user.
pub fn classify(outcome: FailureOutcome<'_>) -> WeatherError {
    match outcome {
        FailureOutcome::MissingCredential => WeatherError::Configuration,
        FailureOutcome::QuotaExhausted { retry_after } => WeatherError::QuotaExceeded {
            retry_after_secs: retry_after.as_secs(),
        },
        FailureOutcome::Provider { error, query } => match error {
            ProviderError::MissingCredential => WeatherError::Configuration,
            ProviderError::Status { status: 401, .. } => WeatherError::Authentication,
            ProviderError::Status { status: 404, .. } if query.is_by_name() => {
                WeatherError::NotFound { query: query.to_string() }
            }
            ProviderError::Status { status, body } => WeatherError::Network {
                status: Some(*status),
                detail: body.clone(),
            },
            ProviderError::Transport(detail) | ProviderError::Decode(detail) => {
                WeatherError::Network { status: None, detail: detail.clone() }
            }
        },
        FailureOutcome::Geolocation(reason) => WeatherError::Geolocation(reason.clone()),
    }
}
