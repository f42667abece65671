/// Traffic generator payloads: producer, file server and fetcher configs,
/// fetch task definitions and the counters a fetch task reports.

use serde::{Deserialize, Serialize};

use crate::env::NodeLabel;
use crate::options::{BenchmarkOptions, DataMatch};

// ── Producer side ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    pub payload_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_period: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerPattern {
    pub prefix: String,
    pub replies: Vec<ProducerReply>,
}

/// Ping server config (`TgpConfigInput`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerConfig {
    pub n_threads: usize,
    pub patterns: Vec<ProducerPattern>,
}

impl ProducerConfig {
    /// Reply to every Interest under `/<label>` with a fixed-size payload.
    pub fn for_label(label: NodeLabel, opts: &BenchmarkOptions) -> Self {
        let suffix = match opts.data_match {
            DataMatch::Exact => None,
            DataMatch::Prefix => Some("/d".to_string()),
        };
        Self {
            n_threads: opts.n_producer_threads,
            patterns: vec![ProducerPattern {
                prefix: format!("/{label}"),
                replies: vec![ProducerReply {
                    suffix,
                    payload_len: opts.payload_len,
                    freshness_period: None,
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileServerMount {
    pub prefix: String,
    pub path: String,
}

/// File server config (`FileServerConfigInput`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileServerConfig {
    pub n_threads: usize,
    pub mounts: Vec<FileServerMount>,
    pub segment_len: usize,
}

impl FileServerConfig {
    pub fn for_label(label: NodeLabel, opts: &BenchmarkOptions) -> Self {
        Self {
            n_threads: opts.n_producer_threads,
            mounts: vec![FileServerMount {
                prefix: format!("/{label}"),
                path: opts.file_server_root.clone(),
            }],
            segment_len: opts.payload_len,
        }
    }
}

// ── Fetcher side ─────────────────────────────────────────────

/// Fetcher config (`FetcherConfigInput`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherConfig {
    pub n_threads: usize,
    pub n_tasks: usize,
}

/// One fetch task: retrieve segments under `prefix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTaskDef {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub can_be_prefix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_begin: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_end: Option<u64>,
}

/// Name prefix of flow `flow` served by generator `label`, padded so that the
/// Interest name (prefix plus segment number) has `name_len` components.
pub fn flow_prefix(label: NodeLabel, flow: usize, name_len: usize) -> String {
    let mut name = format!("/{label}/{flow}");
    for i in 2..name_len.saturating_sub(1) {
        name.push_str(&format!("/p{i}"));
    }
    name
}

/// Task definitions for a generator fetching every flow served by `peer`.
pub fn task_defs(peer: NodeLabel, opts: &BenchmarkOptions) -> Vec<FetchTaskDef> {
    (0..opts.n_flows)
        .map(|flow| FetchTaskDef {
            prefix: flow_prefix(peer, flow, opts.interest_name_len),
            can_be_prefix: opts.data_match == DataMatch::Prefix,
            segment_begin: (opts.segment_end > 0).then_some(0),
            segment_end: (opts.segment_end > 0).then_some(opts.segment_end),
        })
        .collect()
}

/// Progress counters of one fetch task. Durations are in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchCounters {
    pub elapsed: u64,
    /// Set once the task has retrieved its whole segment range
    pub finished: Option<u64>,
    pub last_rtt: u64,
    pub s_rtt: u64,
    pub rto: u64,
    pub cwnd: u64,
    pub n_in_flight: u64,
    pub n_tx_retx: u64,
    pub n_rx_data: u64,
}

impl FetchCounters {
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Counters accumulated since `baseline` was sampled.
    pub fn since(&self, baseline: &FetchCounters) -> FetchCounters {
        FetchCounters {
            elapsed: self.elapsed.saturating_sub(baseline.elapsed),
            n_tx_retx: self.n_tx_retx.saturating_sub(baseline.n_tx_retx),
            n_rx_data: self.n_rx_data.saturating_sub(baseline.n_rx_data),
            ..self.clone()
        }
    }
}
