//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{LtcError, Result};

static SQL_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("identifier pattern is valid")
});

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub paths: PathsConfig,
}

/// Fact source location and query bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub database: PathBuf,
    pub claims_table: String,
    pub policy_table: String,
    /// Upper bound for a single request against the source.
    pub query_timeout_ms: u64,
    /// Extra attempts after a retryable source failure.
    pub retries: u32,
}

/// Result cache policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

/// Request-shaping defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub default_row_limit: usize,
    pub default_top_n: usize,
    pub max_row_limit: usize,
}

/// Filesystem paths used by ltcm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            log::warn!("HOME not set, falling back to /tmp for ltcm paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database: home_dir()
                .join(".local")
                .join("share")
                .join("ltcm")
                .join("facts.sqlite3"),
            claims_table: "CLAIMS_FACT".to_string(),
            policy_table: "POLICY_FACT".to_string(),
            query_timeout_ms: 30_000,
            retries: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_row_limit: 100,
            default_top_n: 10,
            max_row_limit: 10_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: home_dir().join(".config").join("ltcm").join("config.toml"),
        }
    }
}

impl SourceConfig {
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LtcError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(LtcError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        log::debug!(
            "loaded config from {} (hash {})",
            cfg.paths.config_file.display(),
            cfg.stable_hash()?
        );
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // source
        if let Some(raw) = lookup("LTC_SOURCE_DATABASE") {
            self.source.database = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("LTC_SOURCE_CLAIMS_TABLE") {
            self.source.claims_table = raw;
        }
        if let Some(raw) = lookup("LTC_SOURCE_POLICY_TABLE") {
            self.source.policy_table = raw;
        }
        if let Some(raw) = lookup("LTC_SOURCE_QUERY_TIMEOUT_MS") {
            self.source.query_timeout_ms = parse_env("LTC_SOURCE_QUERY_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("LTC_SOURCE_RETRIES") {
            self.source.retries = parse_env("LTC_SOURCE_RETRIES", &raw)?;
        }

        // cache
        if let Some(raw) = lookup("LTC_CACHE_ENABLED") {
            self.cache.enabled = parse_env("LTC_CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("LTC_CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = parse_env("LTC_CACHE_TTL_SECONDS", &raw)?;
        }

        // engine
        if let Some(raw) = lookup("LTC_ENGINE_DEFAULT_ROW_LIMIT") {
            self.engine.default_row_limit = parse_env("LTC_ENGINE_DEFAULT_ROW_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("LTC_ENGINE_DEFAULT_TOP_N") {
            self.engine.default_top_n = parse_env("LTC_ENGINE_DEFAULT_TOP_N", &raw)?;
        }
        if let Some(raw) = lookup("LTC_ENGINE_MAX_ROW_LIMIT") {
            self.engine.max_row_limit = parse_env("LTC_ENGINE_MAX_ROW_LIMIT", &raw)?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.source.claims_table = self.source.claims_table.trim().to_string();
        self.source.policy_table = self.source.policy_table.trim().to_string();
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("source.claims_table", &self.source.claims_table),
            ("source.policy_table", &self.source.policy_table),
        ] {
            if !is_sql_identifier(value) {
                return Err(LtcError::InvalidConfig {
                    details: format!("{name} must be a plain SQL identifier, got {value:?}"),
                });
            }
        }

        if self.source.claims_table.eq_ignore_ascii_case(&self.source.policy_table) {
            return Err(LtcError::InvalidConfig {
                details: "source.claims_table and source.policy_table must differ".to_string(),
            });
        }

        if self.source.query_timeout_ms == 0 {
            return Err(LtcError::InvalidConfig {
                details: "source.query_timeout_ms must be > 0".to_string(),
            });
        }

        // One bounded retry is the contract; anything larger would hide outages.
        if self.source.retries > 3 {
            return Err(LtcError::InvalidConfig {
                details: format!("source.retries must be <= 3, got {}", self.source.retries),
            });
        }

        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return Err(LtcError::InvalidConfig {
                details: "cache.ttl_seconds must be > 0 when cache.enabled=true".to_string(),
            });
        }

        if self.engine.max_row_limit == 0 {
            return Err(LtcError::InvalidConfig {
                details: "engine.max_row_limit must be >= 1".to_string(),
            });
        }

        for (name, value) in [
            ("engine.default_row_limit", self.engine.default_row_limit),
            ("engine.default_top_n", self.engine.default_top_n),
        ] {
            if value == 0 || value > self.engine.max_row_limit {
                return Err(LtcError::InvalidConfig {
                    details: format!(
                        "{name} must be in [1, {}], got {value}",
                        self.engine.max_row_limit
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Whether `value` can be spliced into SQL as a bare table name.
pub fn is_sql_identifier(value: &str) -> bool {
    SQL_IDENTIFIER.is_match(value)
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| LtcError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
