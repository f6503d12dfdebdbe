//! Module registry for the ctxmesh aggregation engine
//!
//! A static, read-only table of the backend modules the engine knows how to
//! query. Each module has a fixed priority weight (higher wins ties) and a
//! network address for its query endpoint.
//!
//! # Example
//!
//! ```
//! use ctxmesh_registry::{ModuleId, ModuleRegistry};
//!
//! let registry = ModuleRegistry::new()
//!     .with_address(ModuleId::Mubot, "http://mubot.internal:8080/mubot/query");
//!
//! assert_eq!(ModuleId::Finbot.priority(), 4);
//! assert_eq!(
//!     registry.endpoint(ModuleId::Finbot).url,
//!     "http://localhost:5555/finbot/query"
//! );
//!
//! let parsed: ModuleId = "accounting-bot".parse()?;
//! assert_eq!(parsed, ModuleId::Mubot);
//! # Ok::<(), ctxmesh_registry::Error>(())
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while resolving module identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Module list is empty")]
    EmptyModuleList,
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Priority weight of a module. Higher wins.
pub type ModulePriority = u8;

/// Identifier of a known backend module
///
/// The set is closed: anything not listed here is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleId {
    /// Finance bot
    Finbot,
    /// Accounting bot
    Mubot,
    /// Analytics bot
    Dese,
    /// Observability bot
    Observability,
}

impl ModuleId {
    /// Every known module, in default query order
    pub const ALL: [ModuleId; 4] = [
        ModuleId::Finbot,
        ModuleId::Mubot,
        ModuleId::Dese,
        ModuleId::Observability,
    ];

    /// Canonical short name, as used on the wire and in URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleId::Finbot => "finbot",
            ModuleId::Mubot => "mubot",
            ModuleId::Dese => "dese",
            ModuleId::Observability => "observability",
        }
    }

    /// Fixed priority weight
    pub fn priority(&self) -> ModulePriority {
        match self {
            ModuleId::Finbot => 4,
            ModuleId::Mubot => 3,
            ModuleId::Dese => 2,
            ModuleId::Observability => 1,
        }
    }

    /// Default local port of the module's query endpoint
    pub fn default_port(&self) -> u16 {
        match self {
            ModuleId::Finbot => 5555,
            ModuleId::Mubot => 5556,
            ModuleId::Dese => 5557,
            ModuleId::Observability => 5558,
        }
    }

    /// Default query endpoint URL
    pub fn default_url(&self) -> String {
        format!(
            "http://localhost:{}/{}/query",
            self.default_port(),
            self.as_str()
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModuleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finbot" | "finance-bot" => Ok(ModuleId::Finbot),
            "mubot" | "accounting-bot" => Ok(ModuleId::Mubot),
            "dese" | "analytics-bot" => Ok(ModuleId::Dese),
            "observability" | "observability-bot" => Ok(ModuleId::Observability),
            _ => Err(Error::UnknownModule(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a list of module names, rejecting unknown names and empty lists
pub fn parse_modules<I, S>(names: I) -> Result<Vec<ModuleId>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let modules = names
        .into_iter()
        .map(|name| name.as_ref().parse())
        .collect::<Result<Vec<ModuleId>>>()?;

    if modules.is_empty() {
        return Err(Error::EmptyModuleList);
    }

    Ok(modules)
}

/// Network address of one module's query endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEndpoint {
    pub id: ModuleId,
    pub url: String,
}

impl ModuleEndpoint {
    /// Priority weight of the module behind this endpoint
    pub fn priority(&self) -> ModulePriority {
        self.id.priority()
    }
}

/// Registry mapping every known module to its endpoint
///
/// Always holds exactly one endpoint per [`ModuleId`]; addresses can be
/// overridden but modules cannot be added or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRegistry {
    endpoints: Vec<ModuleEndpoint>,
}

impl ModuleRegistry {
    /// Registry with default local addresses
    pub fn new() -> Self {
        let endpoints = ModuleId::ALL
            .iter()
            .map(|id| ModuleEndpoint {
                id: *id,
                url: id.default_url(),
            })
            .collect();

        Self { endpoints }
    }

    /// Override the address of one module
    pub fn with_address(mut self, id: ModuleId, url: impl Into<String>) -> Self {
        self.set_address(id, url);
        self
    }

    /// Override the address of one module in place
    pub fn set_address(&mut self, id: ModuleId, url: impl Into<String>) {
        self.endpoints[id.index()].url = url.into();
    }

    /// Endpoint for a module
    pub fn endpoint(&self, id: ModuleId) -> &ModuleEndpoint {
        &self.endpoints[id.index()]
    }

    /// All endpoints in default order
    pub fn endpoints(&self) -> &[ModuleEndpoint] {
        &self.endpoints
    }

    /// All module identifiers in default order
    pub fn modules(&self) -> Vec<ModuleId> {
        self.endpoints.iter().map(|e| e.id).collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_strictly_ordered() {
        let priorities: Vec<_> = ModuleId::ALL.iter().map(|m| m.priority()).collect();
        for pair in priorities.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("finbot".parse::<ModuleId>().unwrap(), ModuleId::Finbot);
        assert_eq!("Finance-Bot".parse::<ModuleId>().unwrap(), ModuleId::Finbot);
        assert_eq!("analytics-bot".parse::<ModuleId>().unwrap(), ModuleId::Dese);
        assert_eq!(
            "observability-bot".parse::<ModuleId>().unwrap(),
            ModuleId::Observability
        );
    }

    #[test]
    fn test_parse_unknown() {
        let err = "crm".parse::<ModuleId>().unwrap_err();
        assert_eq!(err, Error::UnknownModule("crm".to_string()));
    }

    #[test]
    fn test_parse_modules() {
        let modules = parse_modules(["mubot", "finbot"]).unwrap();
        assert_eq!(modules, vec![ModuleId::Mubot, ModuleId::Finbot]);

        assert_eq!(
            parse_modules(Vec::<String>::new()).unwrap_err(),
            Error::EmptyModuleList
        );
        assert!(parse_modules(["finbot", "nope"]).is_err());
    }

    #[test]
    fn test_serde_roundtrip_names() {
        let json = serde_json::to_string(&ModuleId::Observability).unwrap();
        assert_eq!(json, "\"observability\"");

        let parsed: ModuleId = serde_json::from_str("\"mubot\"").unwrap();
        assert_eq!(parsed, ModuleId::Mubot);

        assert!(serde_json::from_str::<ModuleId>("\"inventory\"").is_err());
    }

    #[test]
    fn test_registry_defaults_and_override() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.endpoints().len(), 4);
        assert_eq!(
            registry.endpoint(ModuleId::Dese).url,
            "http://localhost:5557/dese/query"
        );

        let registry = registry.with_address(ModuleId::Dese, "http://dese:9000/q");
        assert_eq!(registry.endpoint(ModuleId::Dese).url, "http://dese:9000/q");
        assert_eq!(registry.endpoint(ModuleId::Dese).priority(), 2);
        assert_eq!(registry.modules(), ModuleId::ALL.to_vec());
    }
}
