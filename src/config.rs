//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for core settings.

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};

/// Top-level settings loaded from `Config.toml` and then overridden
/// (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// MongoDB connection string
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,

    /// Database holding `collabPods`, `podCooldowns` and `messages`
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Connect and server-selection timeout (e.g. "10s")
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Where to write the Prometheus text exposition after a run
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database_name() -> String {
    "studencollab".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mongodb_uri: default_mongodb_uri(),
            database_name: default_database_name(),
            connect_timeout: default_connect_timeout(),
            metrics_file: None,
        }
    }
}

impl Settings {
    /// Load settings from `<name>.toml` (if present), then apply overrides
    /// from these environment variables:
    ///
    /// - `APP__MONGODB_URI`
    /// - `APP__DATABASE_NAME`
    /// - `APP__CONNECT_TIMEOUT`
    /// - `APP__METRICS_FILE`
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::with_name(name).required(false))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Parse settings from an in-memory TOML document. No env overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("APP__MONGODB_URI") {
            self.mongodb_uri = val;
        }
        if let Ok(val) = env::var("APP__DATABASE_NAME") {
            self.database_name = val;
        }
        if let Ok(val) = env::var("APP__CONNECT_TIMEOUT") {
            self.connect_timeout =
                humantime::parse_duration(&val).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        if let Ok(val) = env::var("APP__METRICS_FILE") {
            self.metrics_file = Some(PathBuf::from(val));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn parses_all_fields() {
        let settings = Settings::from_toml_str(
            r#"
            mongodb_uri = "mongodb://db.internal:27017/?replicaSet=rs0"
            database_name = "campus"
            connect_timeout = "2m 30s"
            metrics_file = "/var/lib/node_exporter/schema_upgrade.prom"
            "#,
        )
        .unwrap();

        assert_eq!(settings.mongodb_uri, "mongodb://db.internal:27017/?replicaSet=rs0");
        assert_eq!(settings.database_name, "campus");
        assert_eq!(settings.connect_timeout, Duration::from_secs(150));
        assert_eq!(
            settings.metrics_file.as_deref(),
            Some(std::path::Path::new("/var/lib/node_exporter/schema_upgrade.prom"))
        );
    }

    #[test]
    fn rejects_bad_duration() {
        assert!(Settings::from_toml_str(r#"connect_timeout = "soon""#).is_err());
    }
}
