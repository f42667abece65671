//! In-memory control plane shared by the integration tests.
//!
//! `MockChannel` answers every operation the controller issues, records each
//! call, and can be told to fail an operation or delay fetch task creation.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fwbench_control::{Connector, RpcChannel, RpcError, RpcRequest};
use fwbench_protocol::env::ServerEnv;
use fwbench_protocol::options::BenchmarkOptions;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct Call {
    pub key: String,
    pub query: String,
    pub variables: Value,
}

pub struct MockChannel {
    endpoint: String,
    calls: Mutex<Vec<Call>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    failures: Mutex<HashMap<String, RpcError>>,
    /// Fail only the n-th (1-based) call of an operation
    nth_failures: Mutex<HashMap<String, (usize, RpcError)>>,
    call_counts: Mutex<HashMap<String, usize>>,
    /// Remaining `version` calls that fail
    version_failures: AtomicU32,
    /// Polls after which a fetch task reports finished
    finish_after: AtomicU64,
    polls: Mutex<HashMap<String, u64>>,
    /// Delay fetch creation so later flows complete first
    reorder_fetch: AtomicBool,
}

impl MockChannel {
    pub fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            failures: Mutex::new(HashMap::new()),
            nth_failures: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
            version_failures: AtomicU32::new(0),
            finish_after: AtomicU64::new(2),
            polls: Mutex::new(HashMap::new()),
            reorder_fetch: AtomicBool::new(false),
        })
    }

    pub fn fail(&self, key: &str, err: RpcError) {
        self.failures.lock().unwrap().insert(key.to_string(), err);
    }

    /// Fail the `n`-th call of `key` (1-based, in issue order) and no other.
    pub fn fail_nth(&self, key: &str, n: usize, err: RpcError) {
        self.nth_failures.lock().unwrap().insert(key.to_string(), (n, err));
    }

    pub fn fail_versions(&self, n: u32) {
        self.version_failures.store(n, Ordering::SeqCst);
    }

    pub fn finish_after(&self, polls: u64) {
        self.finish_after.store(polls, Ordering::SeqCst);
    }

    pub fn reorder_fetch(&self) {
        self.reorder_fetch.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, key: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.key == key).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn id(&self, kind: &str) -> String {
        format!("{kind}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, key: &str, query: &str, variables: &Value) {
        self.calls.lock().unwrap().push(Call {
            key: key.to_string(),
            query: query.to_string(),
            variables: variables.clone(),
        });
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, req: RpcRequest) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        self.record(req.key, &req.query, &req.variables);
        if let Some(err) = self.failures.lock().unwrap().get(req.key) {
            return Err(err.clone());
        }
        let issued = {
            let mut counts = self.call_counts.lock().unwrap();
            let n = counts.entry(req.key.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some((nth, err)) = self.nth_failures.lock().unwrap().get(req.key) {
            if *nth == issued {
                return Err(err.clone());
            }
        }

        match req.key {
            "activate" | "shutdown" => Ok(json!(true)),
            "version" => {
                let remaining = self.version_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.version_failures.store(remaining - 1, Ordering::SeqCst);
                    return Err(RpcError::Transport("connection refused".into()));
                }
                Ok(json!({ "version": "v1" }))
            }
            "createEthPort" => Ok(json!({ "id": self.id("port") })),
            "createFace" => Ok(json!({ "id": self.id("face") })),
            "insertFibEntry" => Ok(json!({ "id": self.id("fib") })),
            "updateNdt" => Ok(json!({ "index": 0 })),
            "startTrafficGen" => Ok(json!({
                "id": self.id("tg"),
                "face": { "id": self.id("face") },
                "producer": { "id": self.id("producer") },
                "fileServer": { "id": self.id("fileserver") },
                "fetcher": { "id": self.id("fetcher") },
            })),
            "fetch" => {
                let prefix = req.variables["task"]["prefix"].as_str().unwrap_or_default().to_string();
                if self.reorder_fetch.load(Ordering::SeqCst) {
                    let flow: u64 = prefix.split('/').nth(2).and_then(|f| f.parse().ok()).unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(flow * 10))).await;
                }
                // id assigned on completion, so it also reveals completion order
                Ok(json!({ "id": format!("{}#{}", prefix, self.id("task")) }))
            }
            "node" => {
                let id = req.variables["id"].as_str().unwrap_or_default().to_string();
                let mut polls = self.polls.lock().unwrap();
                let n = polls.entry(id).or_insert(0);
                *n += 1;
                let finished = (*n >= self.finish_after.load(Ordering::SeqCst)).then_some(*n * 1_000_000);
                Ok(json!({
                    "counters": {
                        "elapsed": *n * 1_000_000,
                        "finished": finished,
                        "sRtt": 50_000,
                        "nRxData": *n * 100,
                        "nTxRetx": 0,
                    }
                }))
            }
            other => Err(RpcError::Application {
                operation: other.to_string(),
                message: "unknown operation".into(),
            }),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        self.record("delete", "", &json!({ "id": id }));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one `MockChannel` per endpoint.
#[derive(Default)]
pub struct MockConnector {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    refused: Mutex<HashSet<String>>,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channel for `endpoint`, created on first use.
    pub fn channel(&self, endpoint: &str) -> Arc<MockChannel> {
        self.channels
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_insert_with(|| MockChannel::new(endpoint))
            .clone()
    }

    /// Make every connect to `endpoint` fail.
    pub fn refuse(&self, endpoint: &str) {
        self.refused.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn all_calls(&self) -> Vec<Call> {
        self.channels.lock().unwrap().values().flat_map(|c| c.calls()).collect()
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcChannel>, RpcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(endpoint) {
            return Err(RpcError::Transport(format!("{endpoint}: connection refused")));
        }
        let channel = self.channel(endpoint);
        channel.closed.store(false, Ordering::SeqCst);
        Ok(channel)
    }
}

pub const F: &str = "mock://f";
pub const A: &str = "mock://a";
pub const B: &str = "mock://b";

/// Three separate nodes with `f`, `a` and `b` primary cores.
pub fn env(f: usize, a: usize, b: usize) -> ServerEnv {
    let cores = |n: usize| (0..n as u32).collect::<Vec<_>>();
    ServerEnv {
        f_gqlserver: F.into(),
        f_cores_primary: cores(f),
        f_cores_secondary: vec![],
        f_port_a: "04:00.0".into(),
        f_vlan_a: Some(101),
        f_hwaddr_a: "02:00:00:00:0f:0a".into(),
        f_port_b: "04:00.1".into(),
        f_vlan_b: Some(102),
        f_hwaddr_b: "02:00:00:00:0f:0b".into(),
        a_gqlserver: A.into(),
        a_cores_primary: cores(a),
        a_cores_secondary: vec![],
        a_port_f: "05:00.0".into(),
        a_vlan_f: Some(101),
        a_hwaddr_f: "02:00:00:00:0a:0f".into(),
        b_gqlserver: B.into(),
        b_cores_primary: cores(b),
        b_cores_secondary: vec![],
        b_port_f: "06:00.0".into(),
        b_vlan_f: Some(102),
        b_hwaddr_f: "02:00:00:00:0b:0f".into(),
    }
}

/// Small bidirectional experiment whose fetch tasks finish by segment count.
pub fn quick_options() -> BenchmarkOptions {
    BenchmarkOptions {
        n_flows: 2,
        traffic_dir: 2,
        warmup: 0,
        duration: 0,
        segment_end: 1000,
        ..Default::default()
    }
}
