//! Shared configuration for applications embedding driftsync.
//!
//! TOML settings layered with `DRIFTSYNC_` environment variables,
//! passphrase resolution (env + keyring + plaintext), translation to
//! `driftsync_core::EngineConfig`, storage wiring, and tracing setup.
//! Core never reads files; it receives a pre-built `EngineConfig` and
//! storage backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use driftsync_core::config::DEFAULT_PROBE_URL;
use driftsync_core::{EngineConfig, MemoryStorage, StorageBackend, StorageError};
use driftsync_io::{EncryptedStorage, FileStorage};

const KEYRING_SERVICE: &str = "driftsync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("encryption is enabled for '{prefix}' but no passphrase is configured")]
    NoPassphrase { prefix: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML settings structs ───────────────────────────────────────────

/// Top-level TOML settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub online: OnlineSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Debounce window; rapid edits inside it coalesce.
    #[serde(default)]
    pub min_command_age_secs: u64,

    #[serde(default = "default_period")]
    pub seconds_between_syncs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            min_command_age_secs: 0,
            seconds_between_syncs: default_period(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}
fn default_period() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local; nothing survives a restart.
    Memory,
    #[default]
    File,
}

/// Where the two documents live and whether they are encrypted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageKind,

    /// Prefix of the `-data` and `-state` documents.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Directory for file storage. Defaults to the platform data dir.
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub encrypt: bool,

    /// Environment variable holding the passphrase.
    #[serde(default = "default_passphrase_env")]
    pub passphrase_env: String,

    /// Passphrase (plaintext, prefer keyring or env var).
    pub passphrase: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            prefix: default_prefix(),
            dir: None,
            encrypt: false,
            passphrase_env: default_passphrase_env(),
            passphrase: None,
        }
    }
}

fn default_prefix() -> String {
    "sync-service".into()
}
fn default_passphrase_env() -> String {
    "DRIFTSYNC_PASSPHRASE".into()
}

/// Reachability probe used to decide whether a tick may dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OnlineSettings {
    /// When false the engine assumes it is always online.
    #[serde(default = "default_true")]
    pub probe: bool,

    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for OnlineSettings {
    fn default() -> Self {
        Self {
            probe: true,
            probe_url: default_probe_url(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.into()
}
fn default_probe_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Turns on debug-level engine logs.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub format: LogFormat,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "driftsync", "driftsync")
}

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for file storage.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn home_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("driftsync");
    p
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load settings from the canonical path and the environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from `path`, then `DRIFTSYNC_` variables.
///
/// Nested keys use a double underscore, e.g.
/// `DRIFTSYNC_SYNC__SECONDS_BETWEEN_SYNCS=10`.
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DRIFTSYNC_").split("__"));

    let settings: Settings = figment.extract()?;
    debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Serialize settings to TOML at `path`.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Settings {
    /// Build the engine configuration, clamping out-of-range values.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let probe_url = if self.online.probe {
            let url = self
                .online
                .probe_url
                .parse()
                .map_err(|_| ConfigError::Validation {
                    field: "online.probe_url".into(),
                    reason: format!("invalid URL: {}", self.online.probe_url),
                })?;
            Some(url)
        } else {
            None
        };

        if self.storage.prefix.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "storage.prefix".into(),
                reason: "must not be empty".into(),
            });
        }

        Ok(EngineConfig {
            max_concurrent_requests: self.sync.max_concurrent_requests,
            min_command_age_secs: self.sync.min_command_age_secs,
            seconds_between_syncs: self.sync.seconds_between_syncs,
            storage_prefix: self.storage.prefix.clone(),
            probe_url,
            probe_timeout: Duration::from_secs(self.online.timeout_secs.max(1)),
        }
        .normalized())
    }
}

// ── Passphrase resolution ───────────────────────────────────────────

/// Resolve the encryption passphrase.
pub fn resolve_passphrase(storage: &StorageSettings) -> Result<SecretString, ConfigError> {
    // 1. Env var
    if let Ok(val) = std::env::var(&storage.passphrase_env) {
        if !val.is_empty() {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{}/passphrase", storage.prefix))
    {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in settings
    if let Some(ref passphrase) = storage.passphrase {
        return Ok(SecretString::from(passphrase.clone()));
    }

    Err(ConfigError::NoPassphrase {
        prefix: storage.prefix.clone(),
    })
}

// ── Storage wiring ──────────────────────────────────────────────────

/// Construct the storage backend the settings describe.
pub fn build_storage(settings: &Settings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    let storage = &settings.storage;
    let base: Arc<dyn StorageBackend> = match storage.backend {
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::File => {
            let dir = storage.dir.clone().unwrap_or_else(data_dir);
            debug!(dir = %dir.display(), "using file storage");
            Arc::new(FileStorage::new(dir))
        }
    };

    if !storage.encrypt {
        return Ok(base);
    }
    let passphrase = resolve_passphrase(storage)?;
    Ok(Arc::new(EncryptedStorage::new(base, &passphrase)?))
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// level derived from `logging.debug`. A second call is a no-op.
pub fn init_tracing(logging: &LoggingSettings) {
    let filter = if logging.debug {
        "warn,driftsync_core=debug,driftsync_io=debug,driftsync_config=debug"
    } else {
        "warn,driftsync_core=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let result = match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init(),
    };
    if result.is_err() {
        debug!("tracing subscriber already installed");
    }
}
