use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::domain::error::{AppError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "equipment.toml";
pub const ENV_PREFIX: &str = "EQUIPMENT_";

/// Number of datasets kept by default
pub const DEFAULT_WINDOW_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[validate(nested)]
    pub history: HistoryConfig,
    /// `tracing` filter used when `RUST_LOG` is not set
    #[validate(length(min = 1))]
    pub log_filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(range(min = 1))]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[validate(length(min = 1))]
    pub database_url: String,
    pub blob_backend: BlobBackend,
    #[validate(length(min = 1))]
    pub media_root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HistoryConfig {
    #[validate(range(min = 1, max = 100))]
    pub window_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                max_upload_bytes: 10 * 1024 * 1024,
            },
            storage: StorageConfig {
                database_url: "sqlite://data/history.db".to_string(),
                blob_backend: BlobBackend::Local,
                media_root: "data/media".to_string(),
            },
            history: HistoryConfig {
                window_size: DEFAULT_WINDOW_SIZE,
            },
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `EQUIPMENT_*` variables
    /// (`EQUIPMENT_HISTORY__WINDOW_SIZE=7`).
    pub fn figment(config_file: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_file.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self> {
        let config_file = std::env::var("EQUIPMENT_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_figment(Self::figment(config_file))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| AppError::ValidationError(format!("Invalid configuration: {}", e)))?;
        config
            .validate()
            .map_err(|e| AppError::ValidationError(format!("Invalid configuration: {}", e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.window_size, 5);
        assert_eq!(config.storage.blob_backend, BlobBackend::Local);
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "equipment.toml",
                r#"
                log_filter = "debug"

                [server]
                port = 9100

                [storage]
                blob_backend = "memory"
                "#,
            )?;
            jail.set_env("EQUIPMENT_HISTORY__WINDOW_SIZE", "7");
            jail.set_env("EQUIPMENT_SERVER__HOST", "0.0.0.0");

            let config = AppConfig::from_figment(AppConfig::figment("equipment.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.storage.blob_backend, BlobBackend::Memory);
            assert_eq!(config.history.window_size, 7);
            assert_eq!(config.log_filter, "debug");
            assert_eq!(config.storage.media_root, "data/media");
            Ok(())
        });
    }

    #[test]
    fn test_window_size_out_of_range_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("EQUIPMENT_HISTORY__WINDOW_SIZE", "0");
            let err = AppConfig::from_figment(AppConfig::figment("missing.toml")).unwrap_err();
            assert!(matches!(err, AppError::ValidationError(_)));
            Ok(())
        });
    }
}
