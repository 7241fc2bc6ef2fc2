//! Runtime configuration for sync clients.
//!
//! `SyncSettings` is read from a JSON file and then overridden from the
//! environment, so the CLI and tests share one loading path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{PollIntervals, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_BASE_URL: &str = "COURIER_API_BASE_URL";
pub const ENV_USER_ID: &str = "COURIER_USER_ID";
pub const ENV_DB_PATH: &str = "COURIER_DB_PATH";

/// Endpoint, identity and timing knobs for the sync engine.
///
/// Every field has a default, so an empty `{}` file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub api_base_url: Option<String>,
    pub user_id: Option<String>,
    pub db_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub catch_up_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub resubscribe_delay_ms: u64,
    pub storage_retry_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            user_id: None,
            db_path: None,
            poll_interval_ms: 2000,
            catch_up_interval_ms: 500,
            request_timeout_ms: 10_000,
            resubscribe_delay_ms: 5000,
            storage_retry_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SyncSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut settings = Self::parse(&raw)
            .map_err(|error| Error::Config(format!("{}: {error}", path.display())))?;
        settings.normalize();
        Ok(settings)
    }

    /// Parse a JSON document without touching the filesystem.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(raw)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.normalize();
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Apply `COURIER_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(user) = normalize_text_option(lookup(ENV_USER_ID)) {
            self.user_id = Some(user);
        }
        if let Some(path) = normalize_text_option(lookup(ENV_DB_PATH)) {
            self.db_path = Some(PathBuf::from(path));
        }
        self.normalize();
    }

    pub fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.user_id = normalize_text_option(self.user_id.take());
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(format!(
                    "api_base_url must include http:// or https:// (got '{url}')"
                )));
            }
        }

        for (field, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("catch_up_interval_ms", self.catch_up_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("resubscribe_delay_ms", self.resubscribe_delay_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }

        if self.storage_retry_attempts == 0 {
            return Err(Error::Config(
                "storage_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_api_base_url(&self) -> Result<&str> {
        self.api_base_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "api_base_url is not configured (set it in the config file or {ENV_API_BASE_URL})"
            ))
        })
    }

    pub fn require_user_id(&self) -> Result<&str> {
        self.user_id.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "user_id is not configured (set it in the config file or {ENV_USER_ID})"
            ))
        })
    }

    pub const fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            poll: Duration::from_millis(self.poll_interval_ms),
            catch_up: Duration::from_millis(self.catch_up_interval_ms),
        }
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.storage_retry_attempts)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}
