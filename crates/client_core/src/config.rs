use std::{fs, time::Duration};

use serde::Deserialize;
use shared::domain::Language;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "crop-assist.toml";
pub const DEFAULT_ORIGIN_URL: &str = "http://localhost:5173";
/// Port the backend listens on when it shares a host with the client.
pub const BACKEND_FALLBACK_PORT: u16 = 8000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend url '{url}': {source}")]
    InvalidBackendUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid origin url '{url}': {source}")]
    InvalidOriginUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("cannot derive a backend address from origin '{0}'")]
    UnsupportedOrigin(String),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub backend_url: Option<String>,
    pub origin_url: String,
    pub request_timeout_secs: u64,
    pub language: Language,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: None,
            origin_url: DEFAULT_ORIGIN_URL.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            language: Language::En,
        }
    }
}

impl ClientSettings {
    /// `None` when the timeout is disabled (`request_timeout_secs = 0`).
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn resolve_backend_base(&self) -> Result<String, ConfigError> {
        resolve_backend_base(self.backend_url.as_deref(), &self.origin_url)
    }
}

pub fn load_settings() -> ClientSettings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Layers the settings file and then the environment over the defaults.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = match file.map(toml::from_str::<ClientSettings>) {
        Some(Ok(parsed)) => parsed,
        Some(Err(err)) => {
            warn!("config: ignoring unreadable {SETTINGS_FILE}: {err}");
            ClientSettings::default()
        }
        None => ClientSettings::default(),
    };

    if let Some(v) = env("BACKEND_URL") {
        settings.backend_url = Some(v);
    }
    if let Some(v) = env("APP__BACKEND_URL") {
        settings.backend_url = Some(v);
    }

    if let Some(v) = env("APP__ORIGIN_URL") {
        settings.origin_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.request_timeout_secs = parsed,
            Err(_) => warn!("config: ignoring APP__REQUEST_TIMEOUT_SECS={v}"),
        }
    }

    if let Some(v) = env("APP__LANGUAGE") {
        match v.parse::<Language>() {
            Ok(language) => settings.language = language,
            Err(err) => warn!("config: ignoring APP__LANGUAGE: {err}"),
        }
    }

    settings
}

/// An explicit, non-blank override wins and loses at most one trailing `/`.
/// Otherwise the backend is the origin's host on [`BACKEND_FALLBACK_PORT`].
pub fn resolve_backend_base(
    override_url: Option<&str>,
    origin_url: &str,
) -> Result<String, ConfigError> {
    if let Some(raw) = override_url.map(str::trim).filter(|raw| !raw.is_empty()) {
        Url::parse(raw).map_err(|source| ConfigError::InvalidBackendUrl {
            url: raw.to_string(),
            source,
        })?;
        return Ok(raw.strip_suffix('/').unwrap_or(raw).to_string());
    }

    let origin_url = origin_url.trim();
    let mut origin = Url::parse(origin_url).map_err(|source| ConfigError::InvalidOriginUrl {
        url: origin_url.to_string(),
        source,
    })?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedOrigin(origin_url.to_string()));
    }
    origin
        .set_port(Some(BACKEND_FALLBACK_PORT))
        .map_err(|()| ConfigError::UnsupportedOrigin(origin_url.to_string()))?;

    Ok(origin.origin().ascii_serialization())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
