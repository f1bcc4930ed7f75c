//! Adapter configuration.
//!
//! Precedence, highest first: an explicit path, the `AQLBRIDGE_CONFIG` path,
//! `./aqlbridge.toml`, `<config dir>/aqlbridge/aqlbridge.toml`, then built-in
//! defaults. The first file found is used. `AQLBRIDGE_URL`,
//! `AQLBRIDGE_DATABASE`, `AQLBRIDGE_USERNAME` and `AQLBRIDGE_PASSWORD` then
//! override the connection section.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::DbError;

pub const CONFIG_ENV: &str = "AQLBRIDGE_CONFIG";
pub const CONFIG_FILE: &str = "aqlbridge.toml";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { url: "http://127.0.0.1:8529".into(), database: "_system".into(), username: None, password: None }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplicationConfig {
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub chunk_size: Option<u64>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 1000, request_timeout_ms: 30_000, chunk_size: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// log4rs file; takes precedence over `log_dir`.
    pub config_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), config_file: None, log_dir: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdapterConfig {
    pub connection: ConnectionConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
}

impl AdapterConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns `Config` for malformed TOML or invalid values.
    pub fn from_toml_str(s: &str) -> Result<Self, DbError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns `Io` if the file cannot be read, `Config` if it is invalid.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&text)?;
        if cfg.connection.password.is_some() {
            warn!("{} stores a password; prefer AQLBRIDGE_PASSWORD", path.display());
        }
        Ok(cfg)
    }

    /// Resolves configuration from files and the process environment.
    ///
    /// # Errors
    /// Returns `Config` if the selected file or the final values are invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self, DbError> {
        Self::load_with(explicit, |k| std::env::var(k).ok())
    }

    /// [`load`](Self::load) with a caller-supplied environment lookup.
    ///
    /// # Errors
    /// See [`load`](Self::load).
    pub fn load_with<F>(explicit: Option<&Path>, env: F) -> Result<Self, DbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match candidate_paths(explicit, &env).into_iter().find(|p| p.is_file()) {
            Some(path) => {
                debug!("loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                if let Some(p) = explicit {
                    return Err(DbError::Config(format!("config file {} not found", p.display())));
                }
                Self::default()
            }
        };
        cfg.apply_env(&env);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, env: &F) {
        let c = &mut self.connection;
        if let Some(v) = env("AQLBRIDGE_URL") {
            c.url = v;
        }
        if let Some(v) = env("AQLBRIDGE_DATABASE") {
            c.database = v;
        }
        if let Some(v) = env("AQLBRIDGE_USERNAME") {
            c.username = Some(v);
        }
        if let Some(v) = env("AQLBRIDGE_PASSWORD") {
            c.password = Some(v);
        }
    }

    /// # Errors
    /// Returns `Config` naming the first invalid value.
    pub fn validate(&self) -> Result<(), DbError> {
        let url = self.connection.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DbError::Config(format!("connection.url must be http(s), got `{url}`")));
        }
        if self.connection.database.trim().is_empty() {
            return Err(DbError::Config("connection.database must not be empty".into()));
        }
        if self.replication.poll_interval_ms == 0 {
            return Err(DbError::Config("replication.poll_interval_ms must be greater than 0".into()));
        }
        if self.replication.request_timeout_ms == 0 {
            return Err(DbError::Config("replication.request_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

fn candidate_paths<F: Fn(&str) -> Option<String>>(explicit: Option<&Path>, env: &F) -> Vec<PathBuf> {
    if let Some(p) = explicit {
        return vec![p.to_path_buf()];
    }
    let mut paths = Vec::new();
    if let Some(p) = env(CONFIG_ENV) {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join(CONFIG_FILE));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join("aqlbridge").join(CONFIG_FILE));
    }
    paths
}
