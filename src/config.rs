//! Configuration loading.
//!
//! Settings are layered, lowest priority first:
//!
//! 1. built-in defaults
//! 2. TOML config file (`--config PATH`, else the default path below)
//! 3. `GITHUB_TOKEN` / `STACKEXCHANGE_KEY` environment variables
//! 4. command-line flags (applied by the binary)
//!
//! The default config path is `$XDG_CONFIG_HOME/demand-signals/config.toml`,
//! falling back to `$HOME/.config/demand-signals/config.toml`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::api::{HttpTimeouts, ThrottlePolicy};
use crate::collectors::CollectorOptions;
use crate::collectors::trends::TrendsSettings;
use crate::metrics::Pacing;

/// Directory name under the config base directory.
const APP_DIR: &str = "demand-signals";

/// Environment variable holding the GitHub token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Environment variable holding the Stack Exchange key.
pub const STACKEXCHANGE_KEY_ENV: &str = "STACKEXCHANGE_KEY";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// TOML-backed file configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// GitHub personal access token.
    pub github_token: Option<String>,
    /// Stack Exchange API key.
    pub stackexchange_key: Option<String>,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Requests per call before giving up on throttling.
    pub max_attempts: Option<u32>,
    /// Wait after a throttling response without hints, in seconds.
    pub fallback_wait_secs: Option<u64>,
    /// Pause between batch keys in milliseconds.
    pub key_delay_ms: Option<u64>,
    /// Pause between search-interest requests in milliseconds.
    pub chunk_delay_ms: Option<u64>,
    /// Search-interest host language, e.g. `en-US`.
    pub trends_language: Option<String>,
    /// Search-interest timezone offset in minutes.
    pub trends_tz: Option<i32>,
}

impl FileConfig {
    /// Validates values against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_range("request_timeout_secs", self.request_timeout_secs, 1, 3600, "range 1..=3600")?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600, "range 1..=3600")?;
        validate_range("max_attempts", self.max_attempts, 1, 20, "range 1..=20")?;
        validate_range("fallback_wait_secs", self.fallback_wait_secs, 1, 3600, "range 1..=3600")?;
        validate_range("key_delay_ms", self.key_delay_ms, 0, 60_000, "range 0..=60000")?;
        validate_range("chunk_delay_ms", self.chunk_delay_ms, 0, 60_000, "range 0..=60000")?;
        validate_range("trends_tz", self.trends_tz, -720, 840, "range -720..=840")?;

        match &self.trends_language {
            Some(language) if language.trim().is_empty() => Err(ConfigError::Invalid {
                field: "trends_language",
                value: format!("{language:?}"),
                expected: "a non-empty language tag such as \"en-US\"",
            }),
            _ => Ok(()),
        }
    }
}

fn validate_range<T>(
    field: &'static str,
    value: Option<T>,
    min: T,
    max: T,
    expected: &'static str,
) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    let Some(value) = value else {
        return Ok(());
    };
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

/// Parses and validates config file contents.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys and
/// [`ConfigError::Invalid`] for out-of-range values.
pub fn parse_config_str(raw: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Reads, parses and validates a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
/// [`parse_config_str`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw, path)
}

/// Resolves the default config path from the process environment.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    resolve_default_config_path_with(|name| std::env::var_os(name))
}

/// Resolves the default config path using `lookup` for environment variables.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/demand-signals/config.toml`
/// 2. `$HOME/.config/demand-signals/config.toml`
pub fn resolve_default_config_path_with<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

    if let Some(xdg_config_home) = non_empty("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = non_empty("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Path that was consulted, if any.
    pub path: Option<PathBuf>,
    /// Parsed config when a file existed.
    pub config: Option<FileConfig>,
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional: a missing
/// file yields an empty [`LoadedConfig::config`].
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file exists but cannot be read, parsed,
/// or validated, or if an explicit path is missing.
pub fn load_config(explicit: Option<&Path>, default_path: Option<PathBuf>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let Some(path) = default_path else {
        return Ok(LoadedConfig::default());
    };
    if !path.exists() {
        return Ok(LoadedConfig {
            path: Some(path),
            config: None,
        });
    }
    let config = load_file_config(&path)?;
    Ok(LoadedConfig {
        path: Some(path),
        config: Some(config),
    })
}

/// Effective settings after layering file and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// GitHub token sent as `Authorization: token <T>`.
    pub github_token: Option<String>,
    /// Stack Exchange key sent as the `key` query parameter.
    pub stackexchange_key: Option<String>,
    /// HTTP connect and request timeouts.
    pub timeouts: HttpTimeouts,
    /// Retry policy for throttled responses.
    pub policy: ThrottlePolicy,
    /// Overrides the collectors' pause between keys.
    pub key_delay: Option<Duration>,
    /// Overrides the search-interest pause between requests.
    pub chunk_delay: Option<Duration>,
    /// Search-interest host language and timezone.
    pub trends: TrendsSettings,
}

impl Settings {
    /// Layers `file` over defaults, then credentials from `env` over the file.
    pub fn resolve<F>(file: Option<&FileConfig>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.cloned().unwrap_or_default();
        let env_value = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let defaults = HttpTimeouts::default();
        let timeouts = HttpTimeouts {
            connect: file
                .connect_timeout_secs
                .map_or(defaults.connect, Duration::from_secs),
            request: file
                .request_timeout_secs
                .map_or(defaults.request, Duration::from_secs),
        };

        let mut policy = file
            .max_attempts
            .map_or_else(ThrottlePolicy::default, ThrottlePolicy::with_max_attempts);
        if let Some(secs) = file.fallback_wait_secs {
            policy = policy.with_fallback_wait(Duration::from_secs(secs));
        }

        let trends_defaults = TrendsSettings::default();
        Self {
            github_token: env_value(GITHUB_TOKEN_ENV).or(file.github_token),
            stackexchange_key: env_value(STACKEXCHANGE_KEY_ENV).or(file.stackexchange_key),
            timeouts,
            policy,
            key_delay: file.key_delay_ms.map(Duration::from_millis),
            chunk_delay: file.chunk_delay_ms.map(Duration::from_millis),
            trends: TrendsSettings {
                language: file.trends_language.unwrap_or(trends_defaults.language),
                tz_offset_minutes: file.trends_tz.unwrap_or(trends_defaults.tz_offset_minutes),
            },
        }
    }

    /// Options for a key-batched collector whose own pacing is `default_pacing`.
    #[must_use]
    pub fn collector_options(&self, credential: Option<String>, default_pacing: Pacing) -> CollectorOptions {
        let mut pacing = default_pacing;
        if let Some(delay) = self.key_delay {
            pacing.between_keys = delay;
        }
        CollectorOptions {
            base_url: None,
            credential,
            timeouts: self.timeouts,
            policy: self.policy.clone(),
            pacing: Some(pacing),
        }
    }

    /// Options for the search-interest collector.
    #[must_use]
    pub fn trends_options(&self) -> CollectorOptions {
        CollectorOptions {
            base_url: None,
            credential: None,
            timeouts: self.timeouts,
            policy: self.policy.clone(),
            pacing: self.chunk_delay.map(Pacing::fixed),
        }
    }
}
