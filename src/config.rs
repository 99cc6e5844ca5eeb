//! Layered TOML configuration (spec §3 Collection config, §4.1 RPC defaults).
//!
//! Loading follows the teacher's two-layer precedence: a user-wide file
//! under `dirs::config_dir()`, then a project-local file, merged with the
//! project file overriding the user file field-by-field. Collections are the
//! one place where the merge is list-aware: a project file can add new
//! collection configs or replace one by name without needing to repeat the
//! user file's entries.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RPC_CONCURRENCY: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("collection '{0}' already configured")]
    DuplicateCollection(String),
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),
}

/// Which embedding provider a collection is configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Remote,
}

/// Per-collection embedding configuration (spec §3 Collection, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default = "default_model_name")]
    pub model: String,
    pub dimensions: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auto_generate: bool,
    /// Name of an environment variable holding the remote provider's
    /// credential. Never the credential itself — config files are plain text.
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_model_name() -> String {
    "local-minilm".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_embed_timeout_ms() -> u64 {
    10_000
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            provider: ProviderKind::Local,
            model: default_model_name(),
            dimensions: 384,
            batch_size: default_batch_size(),
            timeout_ms: default_embed_timeout_ms(),
            auto_generate: true,
            credential_env: None,
            api_base: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_rpc_concurrency")]
    pub rpc_concurrency: usize,
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}
fn default_rpc_concurrency() -> usize {
    DEFAULT_RPC_CONCURRENCY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: default_rpc_timeout(),
            rpc_concurrency: default_rpc_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "collection")]
    pub collections: Vec<CollectionConfig>,
}

impl Config {
    /// Load user config then project config, merging project-over-user.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let user_path = dirs::config_dir().map(|d| d.join("hybridstore").join("config.toml"));
        let user = match user_path {
            Some(ref p) if p.exists() => Self::read(p)?,
            _ => Config::default(),
        };

        let project_path = project_root.join(".hybridstore.toml");
        let project = if project_path.exists() {
            Some(Self::read(&project_path)?)
        } else {
            None
        };

        Ok(match project {
            Some(project) => user.override_with(project),
            None => user,
        })
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge `other` over `self`: scalar fields in `other` win; collections
    /// are merged by name (replace-if-present, append-if-new), matching the
    /// teacher's reference-merge semantics in `config.rs`.
    fn override_with(mut self, other: Config) -> Config {
        self.server = other.server;
        for incoming in other.collections {
            if let Some(existing) = self
                .collections
                .iter_mut()
                .find(|c| c.name == incoming.name)
            {
                *existing = incoming;
            } else {
                self.collections.push(incoming);
            }
        }
        self
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn add_collection(&mut self, cfg: CollectionConfig) -> Result<(), ConfigError> {
        if self.collections.iter().any(|c| c.name == cfg.name) {
            return Err(ConfigError::DuplicateCollection(cfg.name));
        }
        self.collections.push(cfg);
        Ok(())
    }

    /// Write to the project-local config file, restricting permissions to
    /// owner-only on Unix (matches the teacher's config file hardening).
    pub fn save(&self, project_root: &Path) -> Result<(), ConfigError> {
        let path = project_root.join(".hybridstore.toml");
        let text = toml::to_string_pretty(self)?;
        fs::write(&path, text).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}
