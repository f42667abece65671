/// One trial: every consuming generator fetches its peer's flows while the
/// controller polls progress, then the tasks are stopped and counters
/// summarized.

use std::time::{Duration, Instant};

use fwbench_protocol::env::NodeLabel;
use fwbench_protocol::fetch::{task_defs, FetchCounters};
use fwbench_protocol::options::BenchmarkOptions;
use fwbench_protocol::result::DirectionResult;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fetch::FetchOrchestrator;

/// A generator fetching from its peer.
pub struct Direction {
    pub consumer: NodeLabel,
    pub producer: NodeLabel,
    pub fetch: FetchOrchestrator,
}

/// Measure every direction concurrently. Returns results in direction order,
/// or the first error after all directions have finished and cleaned up.
pub async fn run(
    directions: &mut [Direction],
    opts: &BenchmarkOptions,
    poll_interval: Duration,
) -> Result<Vec<DirectionResult>> {
    join_all(directions.iter_mut().map(|d| measure(d, opts, poll_interval)))
        .await
        .into_iter()
        .collect()
}

async fn measure(dir: &mut Direction, opts: &BenchmarkOptions, poll_interval: Duration) -> Result<DirectionResult> {
    let defs = task_defs(dir.producer, opts);
    let ids = dir.fetch.start(&defs).await?;

    let measured = poll_until_done(&dir.fetch, &ids, opts, poll_interval).await;
    let stopped = dir.fetch.stop(&ids).await;

    let (elapsed, counters) = match (measured, stopped) {
        (Ok(m), Ok(())) => m,
        (Err(e), stopped) => {
            if let Err(stop_err) = stopped {
                warn!(consumer = %dir.consumer, error = %stop_err, "Stop after failed poll was incomplete");
            }
            return Err(e);
        }
        (Ok(_), Err(e)) => return Err(e),
    };

    let result = DirectionResult::from_counters(dir.consumer, dir.producer, &counters, elapsed, opts.payload_len);
    debug!(
        direction = %result.label(),
        n_rx_data = result.n_rx_data,
        data_rate = result.data_rate,
        "Direction measured"
    );
    Ok(result)
}

/// Poll until every task has finished or the trial time is up. Returns the
/// measured interval and per-task counters accumulated after warmup.
async fn poll_until_done(
    fetch: &FetchOrchestrator,
    ids: &[String],
    opts: &BenchmarkOptions,
    poll_interval: Duration,
) -> Result<(Duration, Vec<FetchCounters>)> {
    let start = Instant::now();
    let warmup = Duration::from_secs(opts.warmup);
    let limit = (opts.duration > 0).then(|| warmup + Duration::from_secs(opts.duration));
    let mut baseline: Option<(Instant, Vec<FetchCounters>)> = None;

    loop {
        tokio::time::sleep(poll_interval).await;
        let counters = fetch.poll(ids).await?;
        let now = Instant::now();
        let running = now.duration_since(start);

        let finished = counters.iter().all(FetchCounters::is_finished);
        let timed_out = limit.is_some_and(|l| running >= l);
        if finished || timed_out {
            let (since, base) = baseline
                .unwrap_or_else(|| (start, vec![FetchCounters::default(); counters.len()]));
            let delta = counters.iter().zip(&base).map(|(c, b)| c.since(b)).collect();
            return Ok((now.duration_since(since), delta));
        }

        if baseline.is_none() && !warmup.is_zero() && running >= warmup {
            debug!(fetcher = %fetch.fetcher(), "Warmup complete");
            baseline = Some((now, counters));
        }
    }
}
