//! Run configuration, read once by the entry point.
//!
//! ```toml
//! [warehouse]
//! database_url = "sparkify.db"
//!
//! [iam_role]
//! arn = "arn:aws:iam::123456789012:role/dwhRole"
//!
//! [s3]
//! log_data = "s3://udacity-dend/log_data"
//! log_jsonpath = "s3://udacity-dend/log_json_path.json"
//! song_data = "s3://udacity-dend/song_data"
//!
//! [load]
//! object_store_root = "./data"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::staging::{Credentials, ErrorTolerance, SourceError, SourceLocation};

/// Environment variable that replaces `warehouse.database_url`.
pub const DATABASE_URL_ENV: &str = "DWH_DATABASE_URL";

const DEFAULT_REGION: &str = "us-west-2";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid location for {key}: {source}")]
    Location {
        key: &'static str,
        #[source]
        source: SourceError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub iam_role: IamRoleConfig,
    pub s3: S3Config,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IamRoleConfig {
    pub arn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub log_data: String,
    /// JSONPaths descriptor for the event logs. Keys are matched by name when absent.
    pub log_jsonpath: Option<String>,
    pub song_data: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Rejected rows tolerated per staging table; 0 fails on the first one.
    pub max_errors: usize,
    /// Local directory mirroring `s3://` buckets.
    pub object_store_root: Option<PathBuf>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Source locations parsed from the `[s3]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub log_data: SourceLocation,
    pub log_jsonpath: Option<SourceLocation>,
    pub song_data: SourceLocation,
}

impl Config {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?
            .with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the environment, looked up through `var`.
    pub fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var(DATABASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Using database URL from {}", DATABASE_URL_ENV);
            self.warehouse.database_url = url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warehouse.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("warehouse.database_url"));
        }
        if self.iam_role.arn.trim().is_empty() {
            return Err(ConfigError::Missing("iam_role.arn"));
        }
        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::Missing("s3.region"));
        }
        self.sources()?;
        Ok(())
    }

    pub fn sources(&self) -> Result<Sources, ConfigError> {
        let parse = |key: &'static str, value: &str| {
            SourceLocation::parse(value).map_err(|source| ConfigError::Location { key, source })
        };
        Ok(Sources {
            log_data: parse("s3.log_data", &self.s3.log_data)?,
            log_jsonpath: self
                .s3
                .log_jsonpath
                .as_deref()
                .filter(|v| !v.trim().is_empty() && v.trim() != "auto")
                .map(|v| parse("s3.log_jsonpath", v))
                .transpose()?,
            song_data: parse("s3.song_data", &self.s3.song_data)?,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            iam_role: self.iam_role.arn.clone(),
        }
    }

    pub fn tolerance(&self) -> ErrorTolerance {
        ErrorTolerance::best_effort(self.load.max_errors)
    }
}
