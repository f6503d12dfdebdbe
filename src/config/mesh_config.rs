//! ctxmesh configuration file handling
//!
//! Loads and manages the ~/.config/ctxmesh/config.yaml file.

use crate::dispatch::RetryPolicy;
use crate::Result;
use ctxmesh_registry::{ModuleId, ModuleRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Address override for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAddress {
    pub id: ModuleId,
    pub url: String,
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process map, lost on restart
    #[default]
    Memory,
    /// SQLite file shared across restarts
    Sqlite,
    /// No caching; the cached path always recomputes
    Disabled,
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackend,

    /// SQLite database path (sqlite backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Default time-to-live of cached results, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: None,
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// ctxmesh configuration
///
/// Every field has a default, so an empty file is a valid configuration
/// pointing at the modules' default local addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Module address overrides
    #[serde(default)]
    pub modules: Vec<ModuleAddress>,

    /// Modules queried when a request names none
    #[serde(default = "default_modules")]
    pub default_modules: Vec<ModuleId>,

    /// Deadline for each module call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Bearer token forwarded to module endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub server: ServerSettings,
}

fn default_modules() -> Vec<ModuleId> {
    ModuleId::ALL.to_vec()
}

fn default_call_timeout_secs() -> u64 {
    10
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshConfig {
    /// Configuration with all defaults
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            default_modules: default_modules(),
            call_timeout_secs: default_call_timeout_secs(),
            retry: RetryPolicy::default(),
            cache: CacheSettings::default(),
            auth_token: None,
            server: ServerSettings::default(),
        }
    }

    /// Load configuration from the default path (~/.config/ctxmesh/config.yaml)
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::MeshError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading ctxmesh configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = if content.trim().is_empty() {
            Self::new()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            overrides = config.modules.len(),
            default_modules = config.default_modules.len(),
            call_timeout_secs = config.call_timeout_secs,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` if given, else the default path, else built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    tracing::debug!("No config file, using defaults");
                    Ok(Self::new())
                }
            }
        }
    }

    /// Save configuration to the default path
    pub fn save_default(&self) -> Result<()> {
        let path = Self::default_path();
        self.save(&path)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving ctxmesh configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/ctxmesh/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("ctxmesh");
        path.push("config.yaml");
        path
    }

    /// Registry with this configuration's address overrides applied
    pub fn registry(&self) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for address in &self.modules {
            registry.set_address(address.id, address.url.clone());
        }
        registry
    }

    /// Per-call deadline
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Override one module's address
    pub fn set_module_url(&mut self, id: ModuleId, url: impl Into<String>) {
        let url = url.into();
        match self.modules.iter_mut().find(|m| m.id == id) {
            Some(existing) => existing.url = url,
            None => self.modules.push(ModuleAddress { id, url }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::new();
        assert_eq!(config.default_modules, ModuleId::ALL.to_vec());
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
modules:
  - id: finbot
    url: http://finbot.internal:9000/finbot/query
default_modules: [finbot, mubot]
cache:
  backend: sqlite
  path: /tmp/ctxmesh.db
"#;
        let config: MeshConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_modules, vec![ModuleId::Finbot, ModuleId::Mubot]);
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.call_timeout_secs, 10);

        let registry = config.registry();
        assert_eq!(
            registry.endpoint(ModuleId::Finbot).url,
            "http://finbot.internal:9000/finbot/query"
        );
        assert_eq!(
            registry.endpoint(ModuleId::Mubot).url,
            ModuleId::Mubot.default_url()
        );
    }

    #[test]
    fn test_unknown_module_in_yaml_rejected() {
        let yaml = "default_modules: [finbot, payroll]\n";
        assert!(serde_yaml::from_str::<MeshConfig>(yaml).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = MeshConfig::new();
        config.set_module_url(ModuleId::Dese, "http://dese:1/q");
        config.set_module_url(ModuleId::Dese, "http://dese:2/q");
        config.auth_token = Some("secret".to_string());
        config.save(&path).unwrap();

        let loaded = MeshConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.modules.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = MeshConfig::load(temp_dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(crate::MeshError::Config(_))));
    }

    #[test]
    fn test_load_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();

        assert_eq!(MeshConfig::load(&path).unwrap(), MeshConfig::new());
    }
}
