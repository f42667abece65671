/// RPC channel to a node's control-plane endpoint.
///
/// The channel carries named GraphQL operations and a deletion primitive.
/// It is shared by every component that talks to the same node and must
/// multiplex concurrent requests safely; the HTTP implementation does so
/// because each request is an independent POST.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::RpcError;

/// One named mutation or query.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// Top-level field of the result; also names the operation
    pub key: &'static str,
    pub query: String,
    pub variables: Value,
}

impl RpcRequest {
    pub fn new(key: &'static str, query: impl Into<String>, variables: Value) -> Self {
        Self {
            key,
            query: query.into(),
            variables,
        }
    }
}

#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Endpoint identity; two channels with the same endpoint reach the same node.
    fn endpoint(&self) -> &str;

    /// Execute a request and return the value under `req.key`.
    async fn request(&self, req: RpcRequest) -> Result<Value, RpcError>;

    /// Delete a remote object by id.
    async fn delete(&self, id: &str) -> Result<(), RpcError>;

    /// Close the channel. Later requests fail with `RpcError::Closed`.
    async fn close(&self);
}

/// Opens channels to endpoints named in the environment document.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcChannel>, RpcError>;
}

// ── GraphQL over HTTP ────────────────────────────────────────

#[derive(Deserialize)]
struct GqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GqlError>,
}

#[derive(Deserialize)]
struct GqlError {
    message: String,
}

pub struct GqlChannel {
    http: reqwest::Client,
    endpoint: String,
    closed: AtomicBool,
}

impl GqlChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            closed: AtomicBool::new(false),
        })
    }

    async fn execute(&self, operation: &str, query: &str, variables: &Value) -> Result<Option<Value>, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        debug!(endpoint = %self.endpoint, operation, "GraphQL request");
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::BAD_REQUEST {
            return Err(RpcError::Transport(format!("HTTP {}", status.as_u16())));
        }

        let body: GqlResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !body.errors.is_empty() {
            let message = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RpcError::Application {
                operation: operation.to_string(),
                message,
            });
        }
        Ok(body.data)
    }
}

#[async_trait]
impl RpcChannel for GqlChannel {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, req: RpcRequest) -> Result<Value, RpcError> {
        let data = self.execute(req.key, &req.query, &req.variables).await?;
        data.and_then(|mut d| d.get_mut(req.key).map(Value::take))
            .ok_or_else(|| RpcError::MalformedResponse {
                operation: req.key.to_string(),
                message: format!("missing '{}' in data", req.key),
            })
    }

    async fn delete(&self, id: &str) -> Result<(), RpcError> {
        let data = self
            .execute(
                "delete",
                "mutation delete($id: ID!) { delete(id: $id) }",
                &json!({ "id": id }),
            )
            .await?;
        match data.as_ref().and_then(|d| d["delete"].as_bool()) {
            Some(true) => Ok(()),
            _ => Err(RpcError::Application {
                operation: "delete".to_string(),
                message: format!("object {id} was not deleted"),
            }),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(endpoint = %self.endpoint, "Closed control channel");
        }
    }
}

/// Connects to GraphQL endpoints over HTTP.
pub struct GqlConnector {
    pub timeout: Duration,
}

impl Connector for GqlConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcChannel>, RpcError> {
        Ok(Arc::new(GqlChannel::new(endpoint, self.timeout)?))
    }
}
