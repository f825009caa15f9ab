//! Configuration management for the climate prediction service

use crate::models::ModelPaths;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "CLIMATE_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub store: StoreConfig,
    pub sessions: SessionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for predictions
    pub predict_subject: String,
    /// Request/reply subject for a user's prediction history
    pub history_subject: String,
    /// Subject carrying session open/close events from the credential service
    pub session_subject: String,
}

/// ML models configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// ONNX export of the AC temperature regressor
    pub regressor_path: String,
    /// ONNX export of the light status classifier
    pub classifier_path: String,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

impl ModelsConfig {
    pub fn paths(&self) -> ModelPaths {
        ModelPaths {
            regressor_path: PathBuf::from(&self.regressor_path),
            classifier_path: PathBuf::from(&self.classifier_path),
        }
    }
}

/// Prediction store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON-lines file holding every served prediction
    pub path: String,
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of sessions opened by this process, in seconds
    pub ttl_secs: i64,
    /// How often expired sessions are purged, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_purge_interval() -> u64 {
    300
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of requests handled concurrently
    pub workers: usize,
    /// Interval between metrics summaries, in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `CLIMATE_CONFIG` or the default file
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// Environment variables prefixed `CLIMATE__` override file values,
    /// e.g. `CLIMATE__STORE__PATH=/var/lib/climate/predictions.jsonl`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("CLIMATE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                predict_subject: "climate.predict".to_string(),
                history_subject: "climate.history".to_string(),
                session_subject: "climate.sessions".to_string(),
            },
            models: ModelsConfig {
                regressor_path: "ml/model/ac_temperature_regressor.onnx".to_string(),
                classifier_path: "ml/model/light_status_classifier.onnx".to_string(),
                onnx_threads: 1,
            },
            store: StoreConfig {
                path: "data/predictions.jsonl".to_string(),
            },
            sessions: SessionConfig {
                ttl_secs: 3600,
                purge_interval_secs: default_purge_interval(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                metrics_interval_secs: default_metrics_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.predict_subject, "climate.predict");
        assert_eq!(config.sessions.ttl_secs, 3600);
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(
            config.models.paths().classifier_path,
            PathBuf::from("ml/model/light_status_classifier.onnx")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[nats]
url = "nats://broker:4222"
predict_subject = "p"
history_subject = "h"
session_subject = "s"

[models]
regressor_path = "/models/reg.onnx"
classifier_path = "/models/cls.onnx"

[store]
path = "/tmp/predictions.jsonl"

[sessions]
ttl_secs = 60

[pipeline]
workers = 2

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();

        assert_eq!(config.nats.url, "nats://broker:4222");
        assert_eq!(config.models.regressor_path, "/models/reg.onnx");
        assert_eq!(config.models.onnx_threads, 1);
        assert_eq!(config.sessions.purge_interval_secs, 300);
        assert_eq!(config.pipeline.metrics_interval_secs, 60);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load_from_path("does/not/exist.toml").is_err());
    }
}
