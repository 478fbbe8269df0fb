//! Fan-out/fan-in of power-off jobs for one shutdown cycle.
//!
//! The coordinator has two phases separated by [`JobCoordinator::seal`]:
//! while enumeration runs, [`JobCollector`]s append records under a mutex;
//! once sealed, the records are handed off and no further record can be
//! added. Launching happens only after the hand-off.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use autohalt_core::{JobId, JobOutcome, JobRecord, JobStage, VmLocation};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::backend::{HostService, PowerOpMode};
use crate::job::PowerOffJob;
use crate::session::SessionRef;

#[derive(Debug, Default)]
struct JobCollection {
    records: Vec<JobRecord>,
    next_id: usize,
    sealed: bool,
}

fn lock(collection: &Mutex<JobCollection>) -> MutexGuard<'_, JobCollection> {
    // Nothing panics while holding the lock, and a shutdown must not be
    // abandoned over a poisoned mutex.
    collection.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of the job collection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobCollector {
    collection: Arc<Mutex<JobCollection>>,
}

impl JobCollector {
    /// Append a job for `location` and return its sequence number.
    ///
    /// Does not start the job. Returns `None` if the coordinator has already
    /// been sealed; the location is then dropped with a warning.
    pub fn collect(&self, location: VmLocation) -> Option<JobId> {
        let mut collection = lock(&self.collection);
        if collection.sealed {
            tracing::warn!(%location, "job collection already sealed, ignoring VM");
            return None;
        }
        let id = JobId(collection.next_id);
        collection.next_id += 1;
        collection.records.push(JobRecord::new(id, location));
        Some(id)
    }
}

/// Owns the job collection of one cycle and runs its jobs.
#[derive(Debug, Default)]
pub struct JobCoordinator {
    collection: Arc<Mutex<JobCollection>>,
}

impl JobCoordinator {
    /// Create a coordinator with an empty, unsealed collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer handle for the enumeration callback.
    #[must_use]
    pub fn collector(&self) -> JobCollector {
        JobCollector {
            collection: Arc::clone(&self.collection),
        }
    }

    /// Seal the collection and take every record in one locked step.
    ///
    /// Records come back in collection order. A second call returns nothing.
    #[must_use]
    pub fn seal(&self) -> Vec<JobRecord> {
        let mut collection = lock(&self.collection);
        collection.sealed = true;
        std::mem::take(&mut collection.records)
    }

    /// Seal the collection, start every job concurrently, then wait for all
    /// of them.
    ///
    /// All jobs are spawned before the first join. The join is unconditional:
    /// failed jobs are waited for like successful ones, and a job task that
    /// dies without an outcome is reported as failed at [`JobStage::Join`].
    pub async fn launch_all_and_join<S>(&self, session: &SessionRef<S>, mode: PowerOpMode) -> BatchReport
    where
        S: HostService + ?Sized + 'static,
    {
        let records = self.seal();
        tracing::info!(count = records.len(), "launching power-off jobs");

        let mut launched = Vec::with_capacity(records.len());
        let mut tasks = JoinSet::new();
        for record in records {
            launched.push(record.id);
            let job = PowerOffJob::new(record, session.clone(), mode);
            tasks.spawn(async move {
                let id = job.id();
                (id, job.run().await)
            });
        }

        tracing::info!("waiting for all jobs to finish");
        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => tracing::error!(error = %e, "power-off task ended abnormally"),
            }
        }
        for id in launched {
            outcomes
                .entry(id)
                .or_insert_with(|| JobOutcome::failed(JobStage::Join, "task ended without an outcome"));
        }
        tracing::info!("all jobs quit");

        BatchReport { outcomes }
    }
}

/// Outcome of every job launched by one [`JobCoordinator::launch_all_and_join`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// One entry per launched job.
    pub outcomes: BTreeMap<JobId, JobOutcome>,
}

impl BatchReport {
    /// Number of jobs launched and joined.
    #[must_use]
    pub fn launched(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of VMs powered off.
    #[must_use]
    pub fn powered_off(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_powered_off()).count()
    }

    /// Jobs that ended early, in sequence order.
    pub fn failures(&self) -> impl Iterator<Item = (JobId, &JobOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_powered_off())
            .map(|(id, o)| (*id, o))
    }
}
