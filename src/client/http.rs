//! HTTP module client

use super::{ModuleClient, ModuleError};
use crate::context::{ModuleContext, ModuleQuery, Payload};
use async_trait::async_trait;
use ctxmesh_registry::ModuleEndpoint;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Module client speaking JSON over HTTP
///
/// POSTs `{query, context}` to the module endpoint. The payload is taken from
/// `response.context`, then `response`, then the whole body; a payload that
/// is not an object is wrapped as `{"value": ...}`.
#[derive(Debug, Clone)]
pub struct HttpModuleClient {
    client: Client,
    auth_token: Option<String>,
}

impl HttpModuleClient {
    /// Client with a fresh connection pool
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Client reusing an existing reqwest pool
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            auth_token: None,
        }
    }

    /// Forward a bearer token to every module
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Pull the module payload out of a response body
    pub fn extract_payload(body: Value) -> Payload {
        let raw = match body {
            Value::Object(mut object) => match object.remove("response") {
                Some(Value::Object(mut response)) => match response.remove("context") {
                    Some(context) if !context.is_null() => context,
                    _ => Value::Object(response),
                },
                Some(response) if !response.is_null() => response,
                _ => Value::Object(object),
            },
            other => other,
        };

        match raw {
            Value::Object(object) => object,
            other => {
                let mut wrapped = Payload::new();
                wrapped.insert("value".to_string(), other);
                wrapped
            }
        }
    }

    /// Diagnostic label for the endpoint that answered
    fn source_label(endpoint: &ModuleEndpoint) -> String {
        format!("{}-mcp-server@{}", endpoint.id, endpoint.url)
    }
}

impl Default for HttpModuleClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleClient for HttpModuleClient {
    async fn query(
        &self,
        endpoint: &ModuleEndpoint,
        request: &ModuleQuery,
    ) -> Result<ModuleContext, ModuleError> {
        let mut http_request = self.client.post(&endpoint.url).json(request);
        if let Some(token) = &self.auth_token {
            http_request = http_request.bearer_auth(token);
        }

        let response = http_request.send().await.map_err(|e| {
            warn!(module = %endpoint.id, url = %endpoint.url, error = %e, "Module request failed");
            ModuleError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                module = %endpoint.id,
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or("unknown"),
                "Module returned error status"
            );
            return Err(ModuleError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| {
            warn!(module = %endpoint.id, error = %e, "Failed to read module response");
            ModuleError::Transport(e.to_string())
        })?;

        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(module = %endpoint.id, error = %e, "Module response is not JSON");
            ModuleError::MalformedBody(e.to_string())
        })?;

        let payload = Self::extract_payload(body);
        debug!(module = %endpoint.id, keys = payload.len(), "Module context received");

        Ok(ModuleContext::new(
            endpoint.id,
            payload,
            Self::source_label(endpoint),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxmesh_registry::ModuleId;
    use serde_json::json;

    #[test]
    fn test_extract_nested_context() {
        let payload = HttpModuleClient::extract_payload(json!({
            "response": {"context": {"revenue": 10}, "other": 1}
        }));
        assert_eq!(Value::Object(payload), json!({"revenue": 10}));
    }

    #[test]
    fn test_extract_response() {
        let payload = HttpModuleClient::extract_payload(json!({
            "response": {"revenue": 10}
        }));
        assert_eq!(Value::Object(payload), json!({"revenue": 10}));
    }

    #[test]
    fn test_extract_body_fallback() {
        let payload = HttpModuleClient::extract_payload(json!({"revenue": 10}));
        assert_eq!(Value::Object(payload), json!({"revenue": 10}));
    }

    #[test]
    fn test_extract_wraps_scalars() {
        let payload = HttpModuleClient::extract_payload(json!({"response": "ok"}));
        assert_eq!(Value::Object(payload), json!({"value": "ok"}));

        let payload = HttpModuleClient::extract_payload(json!([1, 2]));
        assert_eq!(Value::Object(payload), json!({"value": [1, 2]}));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = ModuleEndpoint {
            id: ModuleId::Finbot,
            url: format!("http://127.0.0.1:{}/finbot/query", port),
        };
        let request = ModuleQuery {
            query: json!("q"),
            context: Payload::new(),
        };

        let err = HttpModuleClient::new()
            .query(&endpoint, &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
