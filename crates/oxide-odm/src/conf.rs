//! Connection settings.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{OdmError, Result};
use crate::proxy::RetryPolicy;

/// Database name used when neither the settings nor the URI name one.
pub const DEFAULT_DATABASE: &str = "oxide";

fn default_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    100
}

/// Resolved connection settings.
///
/// # Example
///
/// ```ignore
/// let settings = Settings::from_json(r#"{"mongodb_uri": "mongodb://localhost/blog"}"#)?;
/// assert_eq!(settings.database_name(), "blog");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Connection URI, e.g. `mongodb://localhost:27017/app`.
    pub mongodb_uri: String,
    /// Database name; defaults to the URI path.
    #[serde(default)]
    pub database: Option<String>,
    /// Transient-error retries.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base retry delay in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Extra client options passed to the driver.
    #[serde(default)]
    pub client_settings: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Creates settings for `uri` with default retry behavior.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            mongodb_uri: uri.into(),
            database: None,
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            client_settings: serde_json::Map::new(),
        }
    }

    /// Reads settings from `OXIDE_ODM_*` environment variables.
    ///
    /// `OXIDE_ODM_MONGODB_URI` is required; `OXIDE_ODM_DATABASE`,
    /// `OXIDE_ODM_RETRIES` and `OXIDE_ODM_RETRY_DELAY_MS` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let uri = var("OXIDE_ODM_MONGODB_URI")
            .ok_or_else(|| OdmError::Config("OXIDE_ODM_MONGODB_URI is not set".to_string()))?;

        let mut settings = Self::new(uri);
        settings.database = var("OXIDE_ODM_DATABASE");

        if let Some(retries) = var("OXIDE_ODM_RETRIES") {
            settings.retries = retries.parse().map_err(|e| {
                OdmError::Config(format!("OXIDE_ODM_RETRIES must be an integer: {e}"))
            })?;
        }
        if let Some(delay) = var("OXIDE_ODM_RETRY_DELAY_MS") {
            settings.retry_delay_ms = delay.parse().map_err(|e| {
                OdmError::Config(format!("OXIDE_ODM_RETRY_DELAY_MS must be an integer: {e}"))
            })?;
        }

        settings.check()?;
        Ok(settings)
    }

    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| OdmError::Config(e.to_string()))?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<()> {
        match self.hosts_and_path() {
            Some((hosts, _)) if !hosts.is_empty() => Ok(()),
            _ => Err(OdmError::Config(format!(
                "mongodb_uri must look like mongodb://host[:port][/database], got `{}`",
                self.mongodb_uri
            ))),
        }
    }

    /// Splits the URI into its host list and database path.
    fn hosts_and_path(&self) -> Option<(&str, &str)> {
        let rest = self
            .mongodb_uri
            .strip_prefix("mongodb://")
            .or_else(|| self.mongodb_uri.strip_prefix("mongodb+srv://"))?;
        let rest = rest.split('?').next().unwrap_or_default();
        let rest = rest.rsplit_once('@').map_or(rest, |(_, hosts)| hosts);
        Some(rest.split_once('/').unwrap_or((rest, "")))
    }

    /// Returns the database to use: the explicit name, else the URI path,
    /// else [`DEFAULT_DATABASE`].
    pub fn database_name(&self) -> String {
        if let Some(name) = &self.database {
            return name.clone();
        }
        self.hosts_and_path()
            .map(|(_, path)| path)
            .filter(|path| !path.is_empty())
            .map_or_else(|| DEFAULT_DATABASE.to_string(), ToString::to_string)
    }

    /// Returns the retry policy for the driver proxy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }
}
