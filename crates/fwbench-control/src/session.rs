/// Benchmark session state machine.
///
/// ```text
/// Idle → Validating → Activating → TrialLoop → Stopping → Idle
///             │            │            │
///             └─→ Idle     └─→ Failed   └─→ Failed
/// ```
///
/// Validation rejects before any channel is opened. Activation runs on all
/// nodes concurrently; a failure there leaves already-activated nodes as they
/// are (no rollback) and the session becomes unusable. The trial loop checks
/// the cancellation token only between trials, so a trial in flight always
/// completes and is recorded. Teardown is best-effort and always closes every
/// channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fwbench_protocol::activation::{ActivationArgs, Role};
use fwbench_protocol::env::{NodeLabel, ServerEnv};
use fwbench_protocol::fetch::{flow_prefix, FetcherConfig, FileServerConfig, ProducerConfig};
use fwbench_protocol::locator::FaceLocator;
use fwbench_protocol::options::{BenchmarkOptions, FaceScheme, ProducerKind};
use fwbench_protocol::result::TrialResult;
use fwbench_protocol::{now_us, DEFAULT_POLL_INTERVAL_MS};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::budget::{self, NodeBudget};
use crate::channel::Connector;
use crate::client::{
    ControlClient, ForwarderControl, GeneratorControl, RestartPolicy, RoleControl, ServerConfig, TrafficGenIds,
};
use crate::error::{Error, Result};
use crate::fetch::FetchOrchestrator;
use crate::trial::{self, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Validating,
    Activating,
    TrialLoop,
    Stopping,
    Failed,
}

/// Observable session status for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
    /// Trials recorded in the current run
    pub trials: usize,
}

/// Controller-side tuning, the `[control]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Stop after this many trials; unset = until cancelled
    #[serde(default)]
    pub max_trials: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: default_request_timeout_ms(),
            max_trials: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 { DEFAULT_POLL_INTERVAL_MS }
fn default_request_timeout_ms() -> u64 { 30_000 }

/// A connected node: one channel, one client.
struct Node {
    budget: NodeBudget,
    client: ControlClient,
}

/// A traffic generator after `startTrafficGen`.
struct GeneratorSetup {
    label: NodeLabel,
    control: GeneratorControl,
    ids: TrafficGenIds,
}

pub struct Session {
    env: ServerEnv,
    opts: BenchmarkOptions,
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    status: watch::Sender<SessionStatus>,
    results_tx: broadcast::Sender<TrialResult>,
    results: Vec<TrialResult>,
}

impl Session {
    pub fn new(
        env: ServerEnv,
        opts: BenchmarkOptions,
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Idle,
            message: String::new(),
            trials: 0,
        });
        Self {
            env,
            opts,
            settings,
            connector,
            status,
            results_tx: broadcast::channel(64).0,
            results: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Each trial result as it is recorded.
    pub fn subscribe_results(&self) -> broadcast::Receiver<TrialResult> {
        self.results_tx.subscribe()
    }

    /// Results of the current or last run, in recording order.
    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    fn set_state(&self, state: SessionState, message: impl Into<String>) {
        let message = message.into();
        info!(state = ?state, message = %message, "Session state");
        self.status.send_modify(|s| {
            s.state = state;
            s.message = message;
        });
    }

    fn fail(&self, err: Error) -> Error {
        error!(error = %err, "Session failed");
        self.set_state(SessionState::Failed, err.to_string());
        err
    }

    /// Run a session until `cancel` fires or `max_trials` trials are recorded.
    ///
    /// Cancellation is a normal stop and returns `Ok` with the recorded
    /// results. Any error leaves the session `Failed` (or back in `Idle` when
    /// validation rejected the configuration).
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<&[TrialResult]> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Failed => return Err(Error::Unusable),
            other => return Err(Error::InvalidState(other)),
        }
        self.results.clear();
        self.status.send_modify(|s| s.trials = 0);

        // ── Validating ──
        self.set_state(SessionState::Validating, "validating resource budget");
        if let Err(msg) = self.opts.validate() {
            let err = Error::InvalidOptions(msg);
            self.set_state(SessionState::Idle, err.to_string());
            return Err(err);
        }
        let plan = match budget::validate(&self.opts, &self.env) {
            Ok(plan) => plan,
            Err(shortfalls) => {
                let err = Error::InsufficientCores(shortfalls);
                warn!(error = %err, "Configuration rejected");
                self.set_state(SessionState::Idle, err.to_string());
                return Err(err);
            }
        };
        if cancel.is_cancelled() {
            self.set_state(SessionState::Idle, "cancelled before activation");
            return Ok(&self.results);
        }

        // ── Activating ──
        self.set_state(SessionState::Activating, "starting forwarder and traffic generator");
        let nodes = match self.connect(plan).await {
            Ok(nodes) => nodes,
            Err(e) => return Err(self.fail(e)),
        };
        let mut directions = match self.activate(&nodes).await {
            Ok(directions) => directions,
            Err(e) => {
                warn!("Activation failed; nodes already activated are left as-is, restart them to recover");
                close_all(&nodes).await;
                return Err(self.fail(e));
            }
        };

        // ── TrialLoop ──
        let outcome = self.trial_loop(&mut directions, &cancel).await;

        // ── Stopping ──
        if outcome.is_ok() {
            self.set_state(SessionState::Stopping, "stopping");
        }
        teardown(&mut directions, &nodes).await;

        match outcome {
            Ok(()) => {
                let n = self.results.len();
                self.set_state(SessionState::Idle, format!("finished after {n} trials"));
                Ok(&self.results)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Open one channel per node. If any connect fails, the channels opened
    /// so far are closed before the error is returned.
    async fn connect(&self, plan: Vec<NodeBudget>) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(plan.len());
        for budget in plan {
            let channel = match self.connector.connect(&budget.endpoint) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(endpoint = %budget.endpoint, error = %e, "Connect failed");
                    close_all(&nodes).await;
                    return Err(e.into());
                }
            };
            info!(
                endpoint = %budget.endpoint,
                labels = ?budget.labels,
                need = budget.need,
                avail = budget.avail,
                "Connected to node"
            );
            nodes.push(Node {
                client: ControlClient::new(channel, self.settings.restart),
                budget,
            });
        }
        Ok(nodes)
    }

    /// Activate every node concurrently and set up its resources. Waits for
    /// all nodes before reporting the first failure.
    async fn activate(&self, nodes: &[Node]) -> Result<Vec<Direction>> {
        let results = join_all(nodes.iter().map(|node| self.setup_node(node))).await;
        let mut generators = Vec::new();
        for result in results {
            generators.extend(result?);
        }

        let mut directions = Vec::new();
        for consumer in [NodeLabel::A, NodeLabel::B] {
            if consumer == NodeLabel::B && !self.opts.bidirectional() {
                continue;
            }
            let Some(gen) = generators.iter().find(|g| g.label == consumer) else {
                continue;
            };
            let Some(producer) = consumer.peer() else {
                continue;
            };
            info!(consumer = %consumer, producer = %producer, traffic_gen = %gen.ids.id, "Traffic direction ready");
            directions.push(Direction {
                consumer,
                producer,
                fetch: FetchOrchestrator::new(gen.control.clone(), gen.ids.fetcher.clone()),
            });
        }
        Ok(directions)
    }

    /// Activate each role hosted on `node` exactly once, then create its
    /// resources. Requests to one node are issued in sequence.
    async fn setup_node(&self, node: &Node) -> Result<Vec<GeneratorSetup>> {
        let mut roles = Vec::new();
        if node.budget.hosts(NodeLabel::F) {
            roles.push(Role::Forwarder);
        }
        if node.budget.labels.iter().any(|l| l.is_generator()) {
            roles.push(Role::Trafficgen);
        }

        let gen_labels: Vec<NodeLabel> = node.budget.labels.iter().copied().filter(|l| l.is_generator()).collect();
        let mut generators = Vec::new();
        for role in roles {
            let args = match role {
                Role::Forwarder => ActivationArgs::forwarder(self.env.cores_primary(NodeLabel::F), &self.opts),
                Role::Trafficgen => ActivationArgs::trafficgen(self.env.cores_primary(gen_labels[0])),
            };
            let control = RoleControl::for_role(role, node.client.clone());
            control.activate(&args).await?;
            match control {
                RoleControl::Forwarder(fwd) => self.setup_forwarder(&fwd).await?,
                RoleControl::Generator(gen) => {
                    for &label in &gen_labels {
                        generators.push(self.setup_generator(&gen, label).await?);
                    }
                }
            }
        }
        Ok(generators)
    }

    fn face_params(&self, gen: NodeLabel) -> (usize, FaceScheme, u8) {
        match gen {
            NodeLabel::B => (self.opts.face_b_rx_queues, self.opts.face_b_scheme, 2),
            _ => (self.opts.face_a_rx_queues, self.opts.face_a_scheme, 1),
        }
    }

    async fn setup_forwarder(&self, fwd: &ForwarderControl) -> Result<()> {
        for gen in [NodeLabel::A, NodeLabel::B] {
            let (rx_queues, scheme, subnet) = self.face_params(gen);
            let (Some(local), Some(remote)) = (self.env.forwarder_end(gen), self.env.generator_end(gen)) else {
                continue;
            };
            let port = fwd.base().create_eth_port(&local.port, rx_queues).await?;
            let locator = FaceLocator::for_link(scheme, &local, &remote, subnet, true);
            let face = fwd.create_face(&locator).await?;
            info!(toward = %gen, scheme = locator.scheme(), port = %port, face = %face, "Forwarder face created");

            let nexthops = [face];
            for flow in 0..self.opts.n_flows {
                let name = flow_prefix(gen, flow, self.opts.interest_name_len);
                fwd.insert_fib_entry(&name, &nexthops).await?;
                fwd.update_ndt(&name, flow % self.opts.n_fwds).await?;
            }
        }
        Ok(())
    }

    async fn setup_generator(&self, gen: &GeneratorControl, label: NodeLabel) -> Result<GeneratorSetup> {
        let (rx_queues, scheme, subnet) = self.face_params(label);
        let (local, remote) = match (self.env.generator_end(label), self.env.forwarder_end(label)) {
            (Some(local), Some(remote)) => (local, remote),
            _ => return Err(Error::InvalidOptions(format!("{label} is not a traffic generator"))),
        };
        gen.base().create_eth_port(&local.port, rx_queues).await?;

        let face = FaceLocator::for_link(scheme, &local, &remote, subnet, false);
        let server = match self.opts.producer_kind {
            ProducerKind::Pingserver => ServerConfig::Producer(ProducerConfig::for_label(label, &self.opts)),
            ProducerKind::Fileserver => ServerConfig::FileServer(FileServerConfig::for_label(label, &self.opts)),
        };
        let fetcher = FetcherConfig {
            n_threads: self.opts.n_consumer_threads,
            n_tasks: self.opts.n_flows,
        };
        let ids = gen.start_traffic_gen(&face, &server, &fetcher).await?;
        info!(label = %label, traffic_gen = %ids.id, fetcher = %ids.fetcher, "Traffic generator started");
        Ok(GeneratorSetup {
            label,
            control: gen.clone(),
            ids,
        })
    }

    async fn trial_loop(&mut self, directions: &mut [Direction], cancel: &CancellationToken) -> Result<()> {
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let mut last_timestamp = 0;
        loop {
            if cancel.is_cancelled() {
                info!("Cancellation observed, leaving trial loop");
                return Ok(());
            }
            let trial = self.results.len() + 1;
            if self.settings.max_trials.is_some_and(|max| trial > max) {
                return Ok(());
            }

            self.set_state(SessionState::TrialLoop, format!("running trial {trial}"));
            let started = Instant::now();
            let measured = trial::run(directions, &self.opts, poll_interval).await?;

            // Strictly increasing even when trials finish within the same microsecond
            let timestamp_us = now_us().max(last_timestamp + 1);
            last_timestamp = timestamp_us;
            let result = TrialResult {
                trial,
                timestamp_us,
                elapsed_ms: started.elapsed().as_millis() as u64,
                directions: measured,
            };
            info!(
                trial,
                data_rate = result.total_data_rate(),
                goodput_mbps = result.total_goodput_mbps(),
                "Trial recorded"
            );
            self.results.push(result.clone());
            let _ = self.results_tx.send(result);
            self.status.send_modify(|s| s.trials = trial);
        }
    }
}

async fn close_all(nodes: &[Node]) {
    join_all(nodes.iter().map(|n| n.client.close())).await;
}

/// Stop leftover fetch tasks and close every channel. Failures are logged.
async fn teardown(directions: &mut [Direction], nodes: &[Node]) {
    join_all(directions.iter_mut().map(|d| async move {
        if let Err(e) = d.fetch.stop_all().await {
            warn!(consumer = %d.consumer, error = %e, "Fetch task teardown incomplete");
        }
    }))
    .await;
    close_all(nodes).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_from_empty_toml() {
        let settings: SessionSettings = toml::from_str("").unwrap();
        assert_eq!(settings, SessionSettings::default());
        assert_eq!(settings.restart.settle_ms, 20_000);
        assert_eq!(settings.restart.max_attempts, 30);
        assert_eq!(settings.max_trials, None);
    }

    #[test]
    fn settings_partial_override() {
        let settings: SessionSettings = toml::from_str(
            r#"
            poll_interval_ms = 250
            max_trials = 5

            [restart]
            settle_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.max_trials, Some(5));
        assert_eq!(settings.restart.settle_ms, 5000);
        assert_eq!(settings.restart.interval_ms, 1000);
    }

    #[test]
    fn status_serializes_state_name() {
        let status = SessionStatus {
            state: SessionState::TrialLoop,
            message: "running trial 1".into(),
            trials: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "trial_loop");
    }
}
