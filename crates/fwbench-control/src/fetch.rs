/// Fetch task orchestration on one traffic generator.
///
/// Every request in a batch is issued concurrently and joined with an
/// all-complete barrier; outputs keep the order of the inputs. The
/// orchestrator remembers which tasks are still running so each one receives
/// exactly one stop request, whether the trial ends normally or aborts.

use fwbench_protocol::fetch::{FetchCounters, FetchTaskDef};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::GeneratorControl;
use crate::error::Result;

pub struct FetchOrchestrator {
    client: GeneratorControl,
    fetcher: String,
    outstanding: Vec<String>,
}

impl FetchOrchestrator {
    pub fn new(client: GeneratorControl, fetcher: impl Into<String>) -> Self {
        Self {
            client,
            fetcher: fetcher.into(),
            outstanding: Vec::new(),
        }
    }

    pub fn fetcher(&self) -> &str {
        &self.fetcher
    }

    /// Tasks started and not yet stopped.
    pub fn outstanding(&self) -> &[String] {
        &self.outstanding
    }

    /// Start one task per definition; ids come back in definition order.
    ///
    /// If any creation fails, the tasks that were created are stopped before
    /// the first error is returned.
    pub async fn start(&mut self, defs: &[FetchTaskDef]) -> Result<Vec<String>> {
        let results = join_all(defs.iter().map(|def| self.client.fetch(&self.fetcher, def))).await;

        let mut ids = Vec::with_capacity(defs.len());
        let mut first_err = None;
        for result in results {
            match result {
                Ok(id) => ids.push(id),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(e) => warn!(fetcher = %self.fetcher, error = %e, "Fetch task creation failed"),
            }
        }
        self.outstanding.extend(ids.iter().cloned());
        debug!(fetcher = %self.fetcher, started = ids.len(), requested = defs.len(), "Started fetch tasks");

        if let Some(e) = first_err {
            if let Err(stop_err) = self.stop(&ids).await {
                warn!(fetcher = %self.fetcher, error = %stop_err, "Cleanup after failed start was incomplete");
            }
            return Err(e);
        }
        Ok(ids)
    }

    /// Read counters of each task, in input order.
    pub async fn poll(&self, ids: &[String]) -> Result<Vec<FetchCounters>> {
        join_all(ids.iter().map(|id| self.client.fetch_counters(id)))
            .await
            .into_iter()
            .collect()
    }

    /// Stop each task. Ids that are not outstanding are skipped, so a task is
    /// never stopped twice. All deletions are attempted; the first failure is
    /// returned once they complete.
    pub async fn stop(&mut self, ids: &[String]) -> Result<()> {
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            match self.outstanding.iter().position(|o| o == id) {
                Some(pos) => targets.push(self.outstanding.swap_remove(pos)),
                None => warn!(fetcher = %self.fetcher, id = %id, "Fetch task is not running, skipping stop"),
            }
        }

        let results = join_all(targets.iter().map(|id| self.client.delete(id))).await;
        let mut first_err = None;
        for (id, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                warn!(fetcher = %self.fetcher, id = %id, error = %e, "Failed to stop fetch task");
                first_err.get_or_insert(e);
            }
        }
        debug!(fetcher = %self.fetcher, stopped = targets.len(), "Stopped fetch tasks");
        first_err.map_or(Ok(()), Err)
    }

    /// Stop every outstanding task.
    pub async fn stop_all(&mut self) -> Result<()> {
        let ids = self.outstanding.clone();
        self.stop(&ids).await
    }
}
