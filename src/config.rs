//! Application settings read from the environment.

use std::env;
use std::str::FromStr;

use crate::database::StoreConfig;
use crate::error::ConfigError;
use crate::gemini::GeminiConfig;

/// HTTP server and upload settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_file_size_mb: usize,
    pub log_level: String,
    pub analysis_concurrency: usize,
}

impl ServerConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = ServerConfig {
            host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("API_PORT", lookup, 8000)?,
            max_file_size_mb: parse_or("MAX_FILE_SIZE_MB", lookup, 50)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            analysis_concurrency: parse_or("ANALYSIS_CONCURRENCY", lookup, 4)?,
        };

        if config.max_file_size_mb == 0 {
            return Err(invalid("MAX_FILE_SIZE_MB", "0", "must be greater than 0"));
        }
        if config.analysis_concurrency == 0 {
            return Err(invalid("ANALYSIS_CONCURRENCY", "0", "must be greater than 0"));
        }

        Ok(config)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// All settings needed to run the service.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub store: StoreConfig,
}

impl Settings {
    /// Create settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Settings {
            server: ServerConfig::from_lookup(&lookup)?,
            gemini: GeminiConfig::from_lookup(&lookup)?,
            store: StoreConfig::from_lookup(&lookup)?,
        })
    }
}

/// Parse an optional setting, falling back to `default` when it is unset or blank.
pub(crate) fn parse_or<T, F>(key: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        _ => Ok(default),
    }
}

pub(crate) fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::VectorBackend;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.max_file_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(settings.store.backend, VectorBackend::Memory);
        assert_eq!(settings.store.collection_name, "invoice_analysis");
        assert_eq!(settings.store.embedding_dimension, 768);
        assert_eq!(settings.gemini.chat_model, "gemini-2.0-flash");
        assert!(settings.gemini.api_key.is_empty());
    }

    #[test]
    fn test_qdrant_selected_when_url_present() {
        let settings =
            Settings::from_lookup(lookup_from(&[("QDRANT_URL", "http://localhost:6334")]))
                .unwrap();
        assert_eq!(settings.store.backend, VectorBackend::Qdrant);
        assert_eq!(settings.store.url.as_deref(), Some("http://localhost:6334"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Settings::from_lookup(lookup_from(&[("API_PORT", "eighty")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("MAX_FILE_SIZE_MB", "0")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("TEMPERATURE", "3.5")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("VECTOR_STORE", "qdrant")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("VECTOR_STORE", "chroma")])).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[("API_PORT", "  ")])).unwrap();
        assert_eq!(settings.server.port, 8000);
    }
}
