/// Remote control client for one node.
///
/// `ControlClient` carries the operations every engine role supports:
/// activation, restart with health check, version query, Ethernet port
/// creation and closing. `ForwarderControl` and `GeneratorControl` add the
/// role-specific operations on top of a shared client; `RoleControl` tags a
/// node's client with the role it plays.

use std::sync::Arc;
use std::time::Duration;

use fwbench_protocol::activation::{ActivationArgs, Role};
use fwbench_protocol::fetch::{FetchCounters, FetchTaskDef, FetcherConfig, FileServerConfig, ProducerConfig};
use fwbench_protocol::locator::FaceLocator;
use fwbench_protocol::{
    DEFAULT_HEALTH_ATTEMPTS, DEFAULT_HEALTH_INTERVAL_MS, DEFAULT_RESTART_SETTLE_MS, ETH_PORT_DRIVER,
    ETH_PORT_MTU,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{RpcChannel, RpcRequest};
use crate::error::{Error, Result, RpcError};

/// Timing of `ControlClient::restart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Wait after the shutdown request before the first health check
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Wait before each health check
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            settle_ms: DEFAULT_RESTART_SETTLE_MS,
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            max_attempts: DEFAULT_HEALTH_ATTEMPTS,
        }
    }
}

fn default_settle_ms() -> u64 { DEFAULT_RESTART_SETTLE_MS }
fn default_interval_ms() -> u64 { DEFAULT_HEALTH_INTERVAL_MS }
fn default_max_attempts() -> u32 { DEFAULT_HEALTH_ATTEMPTS }

/// Sleep unless cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

fn string_id(operation: &str, value: &Value, field: &str) -> std::result::Result<String, RpcError> {
    match &value[field] {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(RpcError::MalformedResponse {
            operation: operation.to_string(),
            message: format!("missing '{field}'"),
        }),
    }
}

#[derive(Clone)]
pub struct ControlClient {
    channel: Arc<dyn RpcChannel>,
    restart: RestartPolicy,
}

impl ControlClient {
    pub fn new(channel: Arc<dyn RpcChannel>, restart: RestartPolicy) -> Self {
        Self { channel, restart }
    }

    pub fn endpoint(&self) -> &str {
        self.channel.endpoint()
    }

    /// Activate the engine into the role carried by `args`. No retry.
    pub async fn activate(&self, args: &ActivationArgs) -> Result<()> {
        let role = args.role();
        info!(endpoint = %self.endpoint(), role = %role, "Activating");
        self.channel
            .request(RpcRequest::new(
                "activate",
                format!("mutation activate($arg: JSON!) {{ activate({role}: $arg) }}"),
                json!({ "arg": args.arg() }),
            ))
            .await?;
        Ok(())
    }

    /// Engine version; doubles as the health check.
    pub async fn version(&self) -> Result<String> {
        let v = self
            .channel
            .request(RpcRequest::new("version", "{ version { version } }", json!({})))
            .await?;
        Ok(string_id("version", &v, "version")?)
    }

    /// Restart the engine and wait until it answers a health check.
    ///
    /// Issues at most `max_attempts` health checks after the settle delay.
    /// Observes `cancel` during every wait.
    pub async fn restart(&self, cancel: &CancellationToken) -> Result<()> {
        let policy = self.restart;
        info!(endpoint = %self.endpoint(), "Restarting engine");
        self.channel
            .request(RpcRequest::new(
                "shutdown",
                "mutation { shutdown(restart: true) }",
                json!({}),
            ))
            .await?;

        sleep_or_cancel(Duration::from_millis(policy.settle_ms), cancel).await?;
        for attempt in 1..=policy.max_attempts {
            sleep_or_cancel(Duration::from_millis(policy.interval_ms), cancel).await?;
            match self.version().await {
                Ok(version) => {
                    info!(endpoint = %self.endpoint(), attempt, version = %version, "Engine is back");
                    return Ok(());
                }
                Err(e) => debug!(endpoint = %self.endpoint(), attempt, error = %e, "Health check failed"),
            }
        }

        warn!(endpoint = %self.endpoint(), attempts = policy.max_attempts, "Restart timeout");
        Err(Error::RestartTimeout { attempts: policy.max_attempts })
    }

    /// Create a PCI Ethernet port and return its id.
    pub async fn create_eth_port(&self, pci_addr: &str, rx_flow_queues: usize) -> Result<String> {
        let v = self
            .channel
            .request(RpcRequest::new(
                "createEthPort",
                format!(
                    "mutation createEthPort($pciAddr: String!, $mtu: Int!, $rxFlowQueues: Int!) {{
                        createEthPort(driver: {ETH_PORT_DRIVER}, pciAddr: $pciAddr, mtu: $mtu, rxFlowQueues: $rxFlowQueues) {{ id }}
                    }}"
                ),
                json!({
                    "pciAddr": pci_addr,
                    "mtu": ETH_PORT_MTU,
                    "rxFlowQueues": rx_flow_queues,
                }),
            ))
            .await?;
        Ok(string_id("createEthPort", &v, "id")?)
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

// ── Forwarder ────────────────────────────────────────────────

#[derive(Clone)]
pub struct ForwarderControl {
    base: ControlClient,
}

impl ForwarderControl {
    pub fn new(base: ControlClient) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ControlClient {
        &self.base
    }

    pub async fn create_face(&self, locator: &FaceLocator) -> Result<String> {
        let v = self
            .base
            .channel
            .request(RpcRequest::new(
                "createFace",
                "mutation createFace($locator: JSON!) { createFace(locator: $locator) { id } }",
                json!({ "locator": locator }),
            ))
            .await?;
        Ok(string_id("createFace", &v, "id")?)
    }

    pub async fn insert_fib_entry(&self, name: &str, nexthops: &[String]) -> Result<String> {
        let v = self
            .base
            .channel
            .request(RpcRequest::new(
                "insertFibEntry",
                "mutation insertFibEntry($name: Name!, $nexthops: [ID!]!) {
                    insertFibEntry(name: $name, nexthops: $nexthops) { id }
                }",
                json!({ "name": name, "nexthops": nexthops }),
            ))
            .await?;
        Ok(string_id("insertFibEntry", &v, "id")?)
    }

    /// Point `name` at forwarding thread `value`; returns the NDT index.
    pub async fn update_ndt(&self, name: &str, value: usize) -> Result<u64> {
        let v = self
            .base
            .channel
            .request(RpcRequest::new(
                "updateNdt",
                "mutation updateNdt($name: Name!, $value: Int!) { updateNdt(name: $name, value: $value) { index } }",
                json!({ "name": name, "value": value }),
            ))
            .await?;
        v["index"].as_u64().ok_or_else(|| {
            RpcError::MalformedResponse {
                operation: "updateNdt".to_string(),
                message: "missing 'index'".to_string(),
            }
            .into()
        })
    }
}

// ── Traffic generator ────────────────────────────────────────

/// Server side of a traffic generator.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerConfig {
    Producer(ProducerConfig),
    FileServer(FileServerConfig),
}

/// Object ids returned by `startTrafficGen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficGenIds {
    pub id: String,
    pub face: String,
    pub server: String,
    pub fetcher: String,
}

#[derive(Clone)]
pub struct GeneratorControl {
    base: ControlClient,
}

impl GeneratorControl {
    pub fn new(base: ControlClient) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ControlClient {
        &self.base
    }

    pub async fn start_traffic_gen(
        &self,
        face: &FaceLocator,
        server: &ServerConfig,
        fetcher: &FetcherConfig,
    ) -> Result<TrafficGenIds> {
        let (server_field, server_type, server_value) = match server {
            ServerConfig::Producer(p) => ("producer", "TgpConfigInput", json!(p)),
            ServerConfig::FileServer(s) => ("fileServer", "FileServerConfigInput", json!(s)),
        };
        let query = format!(
            "mutation startTrafficGen($face: JSON!, ${server_field}: {server_type}!, $fetcher: FetcherConfigInput!) {{
                startTrafficGen(face: $face, {server_field}: ${server_field}, fetcher: $fetcher) {{
                    id
                    face {{ id }}
                    {server_field} {{ id }}
                    fetcher {{ id }}
                }}
            }}"
        );
        let mut variables = json!({ "face": face, "fetcher": fetcher });
        variables[server_field] = server_value;

        let v = self
            .base
            .channel
            .request(RpcRequest::new("startTrafficGen", query, variables))
            .await?;
        let op = "startTrafficGen";
        Ok(TrafficGenIds {
            id: string_id(op, &v, "id")?,
            face: string_id(op, &v["face"], "id")?,
            server: string_id(op, &v[server_field], "id")?,
            fetcher: string_id(op, &v["fetcher"], "id")?,
        })
    }

    /// Start one fetch task on `fetcher`; returns the task id.
    pub async fn fetch(&self, fetcher: &str, task: &FetchTaskDef) -> Result<String> {
        let v = self
            .base
            .channel
            .request(RpcRequest::new(
                "fetch",
                "mutation fetch($fetcher: ID!, $task: FetchTaskDefInput!) { fetch(fetcher: $fetcher, task: $task) { id } }",
                json!({ "fetcher": fetcher, "task": task }),
            ))
            .await?;
        Ok(string_id("fetch", &v, "id")?)
    }

    pub async fn fetch_counters(&self, id: &str) -> Result<FetchCounters> {
        let mut v = self
            .base
            .channel
            .request(RpcRequest::new(
                "node",
                "query fetchCounters($id: ID!) { node(id: $id) { ... on FetchTaskContext { counters } } }",
                json!({ "id": id }),
            ))
            .await?;
        serde_json::from_value(v["counters"].take()).map_err(|e| {
            RpcError::MalformedResponse {
                operation: "node".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Stop a fetch task.
    pub async fn delete(&self, id: &str) -> Result<()> {
        Ok(self.base.channel.delete(id).await?)
    }
}

/// A node's client tagged with the role it plays.
#[derive(Clone)]
pub enum RoleControl {
    Forwarder(ForwarderControl),
    Generator(GeneratorControl),
}

impl RoleControl {
    pub fn for_role(role: Role, base: ControlClient) -> Self {
        match role {
            Role::Forwarder => Self::Forwarder(ForwarderControl::new(base)),
            Role::Trafficgen => Self::Generator(GeneratorControl::new(base)),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Forwarder(_) => Role::Forwarder,
            Self::Generator(_) => Role::Trafficgen,
        }
    }

    pub fn base(&self) -> &ControlClient {
        match self {
            Self::Forwarder(c) => c.base(),
            Self::Generator(c) => c.base(),
        }
    }

    pub async fn activate(&self, args: &ActivationArgs) -> Result<()> {
        debug_assert_eq!(args.role(), self.role());
        self.base().activate(args).await
    }

    pub async fn restart(&self, cancel: &CancellationToken) -> Result<()> {
        self.base().restart(cancel).await
    }

    pub async fn close(&self) {
        self.base().close().await
    }
}
