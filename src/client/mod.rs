//! Module Client
//!
//! One request/response exchange against a single module's query endpoint.
//! Every kind of failure (transport, non-2xx, unreadable body, deadline)
//! comes back as a [`ModuleError`]; nothing is raised past the dispatcher.

mod http;

pub use http::HttpModuleClient;

use crate::context::{ModuleContext, ModuleQuery};
use async_trait::async_trait;
use ctxmesh_registry::ModuleEndpoint;
use std::time::Duration;
use thiserror::Error;

/// Why a module produced no context
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("module returned status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl ModuleError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleError::Transport(_) => "transport",
            ModuleError::Status(_) => "status",
            ModuleError::MalformedBody(_) => "malformed",
            ModuleError::DeadlineExceeded(_) => "deadline",
        }
    }
}

/// Performs a single query against one module
#[async_trait]
pub trait ModuleClient: Send + Sync {
    /// Query `endpoint`, returning the module's context or why it failed
    async fn query(
        &self,
        endpoint: &ModuleEndpoint,
        request: &ModuleQuery,
    ) -> Result<ModuleContext, ModuleError>;
}
