/// Experiment options.
///
/// These are the knobs an operator edits before starting a benchmark. They
/// serialize in camelCase so the same document can be written as TOML under
/// `[options]` or piped in as JSON.

use serde::{Deserialize, Serialize};

/// Face transport between a generator and the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceScheme {
    Ether,
    Vxlan,
}

/// Which side replies to Interests on a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    Pingserver,
    Fileserver,
}

/// How Data names relate to the Interest names the fetcher sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMatch {
    Exact,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkOptions {
    #[serde(default = "default_scheme")]
    pub face_a_scheme: FaceScheme,
    #[serde(default = "default_one")]
    pub face_a_rx_queues: usize,
    #[serde(default = "default_scheme")]
    pub face_b_scheme: FaceScheme,
    #[serde(default = "default_one")]
    pub face_b_rx_queues: usize,
    /// Forwarding threads on the forwarder
    #[serde(default = "default_n_fwds")]
    pub n_fwds: usize,
    /// 1 = A fetches from B only, 2 = both directions
    #[serde(default = "default_traffic_dir")]
    pub traffic_dir: u8,
    #[serde(default = "default_producer_kind")]
    pub producer_kind: ProducerKind,
    #[serde(default = "default_one")]
    pub n_producer_threads: usize,
    #[serde(default = "default_one")]
    pub n_consumer_threads: usize,
    /// Fetch tasks per direction, one name prefix each
    #[serde(default = "default_n_flows")]
    pub n_flows: usize,
    /// Interest name length in components, including the segment number
    #[serde(default = "default_interest_name_len")]
    pub interest_name_len: usize,
    #[serde(default = "default_data_match")]
    pub data_match: DataMatch,
    #[serde(default = "default_payload_len")]
    pub payload_len: usize,
    /// Exclusive last segment; 0 = unbounded
    #[serde(default)]
    pub segment_end: u64,
    /// Seconds excluded from the measurement at the start of each trial
    #[serde(default)]
    pub warmup: u64,
    /// Measured seconds per trial; 0 = until all fetch tasks finish
    #[serde(default = "default_duration")]
    pub duration: u64,
    /// Directory the file server serves, on each generator host
    #[serde(default = "default_file_server_root")]
    pub file_server_root: String,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            face_a_scheme: FaceScheme::Ether,
            face_a_rx_queues: 1,
            face_b_scheme: FaceScheme::Ether,
            face_b_rx_queues: 1,
            n_fwds: 4,
            traffic_dir: 2,
            producer_kind: ProducerKind::Pingserver,
            n_producer_threads: 1,
            n_consumer_threads: 1,
            n_flows: 4,
            interest_name_len: 4,
            data_match: DataMatch::Exact,
            payload_len: 1000,
            segment_end: 0,
            warmup: 0,
            duration: 60,
            file_server_root: default_file_server_root(),
        }
    }
}

fn default_scheme() -> FaceScheme { FaceScheme::Ether }
fn default_one() -> usize { 1 }
fn default_n_fwds() -> usize { 4 }
fn default_traffic_dir() -> u8 { 2 }
fn default_producer_kind() -> ProducerKind { ProducerKind::Pingserver }
fn default_n_flows() -> usize { 4 }
fn default_interest_name_len() -> usize { 4 }
fn default_data_match() -> DataMatch { DataMatch::Exact }
fn default_payload_len() -> usize { 1000 }
fn default_duration() -> u64 { 60 }
fn default_file_server_root() -> String { "/tmp/fwbench".to_string() }

impl BenchmarkOptions {
    /// Check option ranges. Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let counts = [
            ("faceARxQueues", self.face_a_rx_queues),
            ("faceBRxQueues", self.face_b_rx_queues),
            ("nFwds", self.n_fwds),
            ("nProducerThreads", self.n_producer_threads),
            ("nConsumerThreads", self.n_consumer_threads),
            ("nFlows", self.n_flows),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, n)| *n == 0) {
            return Err(format!("{name} must be at least 1"));
        }
        // prefix label + flow number + segment number
        if self.interest_name_len < 3 {
            return Err("interestNameLen must be at least 3".to_string());
        }
        if !matches!(self.traffic_dir, 1 | 2) {
            return Err(format!("trafficDir must be 1 or 2, got {}", self.traffic_dir));
        }
        if self.segment_end == 0 && self.duration == 0 {
            return Err("either segmentEnd or duration must be non-zero".to_string());
        }
        if self.producer_kind == ProducerKind::Fileserver && !self.file_server_root.starts_with('/') {
            return Err(format!("fileServerRoot must be an absolute path, got '{}'", self.file_server_root));
        }
        Ok(())
    }

    /// Whether B also fetches from A.
    pub fn bidirectional(&self) -> bool {
        self.traffic_dir == 2
    }
}
