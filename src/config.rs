// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Settings
//!
//! Process-level settings read from TOML: the worker pool shape, where mail
//! is queued and which `git` to use. Lookup order is an explicit `--config`
//! file, then `deployflow.toml` in the platform config directory, then
//! built-in defaults. Environment variables override whichever was loaded.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{FlowError, FlowResult};
use crate::execution::PoolConfig;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "deployflow.toml";

/// Overrides `pool.max_workers`
pub const MAX_WORKERS_ENV: &str = "DEPLOYFLOW_MAX_WORKERS";

/// Overrides `pool.idle_timeout_secs`
pub const IDLE_TIMEOUT_ENV: &str = "DEPLOYFLOW_IDLE_TIMEOUT";

/// Overrides the config directory
pub const CONFIG_DIR_ENV: &str = "DEPLOYFLOW_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub pool: PoolConfig,

    /// Directory the outbox mailer writes `.eml` files into
    pub outbox_dir: PathBuf,

    /// Explicit `git` binary; located on `PATH` when unset
    pub git: Option<PathBuf>,

    /// Where the pool size was last set from
    #[serde(skip)]
    pool_origin: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            outbox_dir: PathBuf::from(".deployflow/outbox"),
            git: None,
            pool_origin: None,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> FlowResult<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Load from `path`, which must exist
    pub fn from_file(path: &Path) -> FlowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FlowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let mut settings = Self::from_toml(&content).map_err(|e| FlowError::InvalidSettings {
            origin: file_origin(path),
            message: e.to_string(),
        })?;
        settings.pool_origin = Some(file_origin(path));
        Ok(settings)
    }

    /// Load settings and apply environment overrides.
    ///
    /// `explicit` must exist when given; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> FlowResult<Self> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> FlowResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MAX_WORKERS_ENV) {
            let max_workers = parse_override(MAX_WORKERS_ENV, &value)?;
            self.set_max_workers(max_workers, &format!("${}", MAX_WORKERS_ENV));
        }
        if let Some(value) = lookup(IDLE_TIMEOUT_ENV) {
            self.pool.idle_timeout_secs = parse_override(IDLE_TIMEOUT_ENV, &value)?;
            debug!(idle_timeout_secs = self.pool.idle_timeout_secs, "Idle timeout overridden");
        }
        Ok(())
    }

    /// Set the pool size, remembering `origin` for error messages
    pub fn set_max_workers(&mut self, max_workers: usize, origin: &str) {
        self.pool.max_workers = max_workers;
        self.pool_origin = Some(origin.to_string());
        debug!(max_workers, origin, "Pool size overridden");
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.pool.max_workers == 0 {
            return Err(FlowError::InvalidSettings {
                origin: self
                    .pool_origin
                    .clone()
                    .unwrap_or_else(|| "built-in defaults".to_string()),
                message: "pool.max_workers must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> FlowResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| FlowError::InvalidSettings {
            origin: format!("${}", key),
            message: format!("'{}': {}", value, e),
        })
}

fn file_origin(path: &Path) -> String {
    format!("'{}'", path.display())
}

/// Default settings file location, if a config directory can be determined
pub fn default_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join(SETTINGS_FILE));
    }
    ProjectDirs::from("", "", "deployflow").map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}
