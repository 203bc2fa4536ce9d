use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::cache::ResolutionCache;
use crate::coordinator::DEFAULT_TASK_TIME_LIMIT;
use crate::error::UsiError;
use crate::http::DEFAULT_TIMEOUT_SECS;
use crate::providers::Backend;

pub const DEFAULT_CONFIG_FILE: &str = "usi-resolver.json";
pub const DEFAULT_WORKERS: usize = 4;

/// On-disk configuration. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub task_time_limit_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub backends: Option<Vec<Backend>>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub cache_dir: Utf8PathBuf,
    pub http_timeout: Duration,
    pub task_time_limit: Duration,
    /// Zero disables the worker pool.
    pub workers: usize,
    /// `None` enables every backend.
    pub backends: Option<BTreeSet<Backend>>,
    pub user_agent: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `usi-resolver.json` in the working directory.
    ///
    /// A missing default file yields the defaults; an explicit path must exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolverConfig, UsiError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| UsiError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| UsiError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolverConfig, UsiError> {
        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => ResolutionCache::default_root()?,
        };
        Ok(ResolverConfig {
            cache_dir,
            http_timeout: Duration::from_secs(
                config.http_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            task_time_limit: config
                .task_time_limit_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TASK_TIME_LIMIT),
            workers: config.workers.unwrap_or(DEFAULT_WORKERS),
            backends: config
                .backends
                .map(|backends| backends.into_iter().collect()),
            user_agent: config.user_agent,
        })
    }
}
