/// Trial result records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::env::NodeLabel;
use crate::fetch::FetchCounters;

/// Measurement of one traffic direction, e.g. A fetching from B.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionResult {
    /// Fetching generator
    pub consumer: NodeLabel,
    /// Producing generator
    pub producer: NodeLabel,
    pub n_rx_data: u64,
    pub n_tx_retx: u64,
    /// Data packets per second
    pub data_rate: f64,
    /// Payload goodput in Mbit/s
    pub goodput_mbps: f64,
    /// Mean smoothed RTT across tasks, in milliseconds
    pub mean_srtt_ms: f64,
}

impl DirectionResult {
    /// Summarize the per-task counter deltas of one direction.
    pub fn from_counters(
        consumer: NodeLabel,
        producer: NodeLabel,
        counters: &[FetchCounters],
        elapsed: Duration,
        payload_len: usize,
    ) -> Self {
        let n_rx_data: u64 = counters.iter().map(|c| c.n_rx_data).sum();
        let n_tx_retx: u64 = counters.iter().map(|c| c.n_tx_retx).sum();
        let secs = elapsed.as_secs_f64();
        let data_rate = if secs > 0.0 { n_rx_data as f64 / secs } else { 0.0 };
        let goodput_mbps = data_rate * payload_len as f64 * 8.0 / 1_000_000.0;
        let mean_srtt_ms = if counters.is_empty() {
            0.0
        } else {
            counters.iter().map(|c| c.s_rtt as f64).sum::<f64>() / counters.len() as f64 / 1_000_000.0
        };
        Self {
            consumer,
            producer,
            n_rx_data,
            n_tx_retx,
            data_rate,
            goodput_mbps,
            mean_srtt_ms,
        }
    }

    pub fn label(&self) -> String {
        format!("{}→{}", self.producer, self.consumer)
    }
}

/// One completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    /// 1-based trial number within the session
    pub trial: usize,
    /// Completion time, microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Wall-clock duration of the trial, warmup included
    pub elapsed_ms: u64,
    pub directions: Vec<DirectionResult>,
}

impl TrialResult {
    /// Sum of data rates over all directions.
    pub fn total_data_rate(&self) -> f64 {
        self.directions.iter().map(|d| d.data_rate).sum()
    }

    pub fn total_goodput_mbps(&self) -> f64 {
        self.directions.iter().map(|d| d.goodput_mbps).sum()
    }
}
