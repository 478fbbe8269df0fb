//! One shutdown cycle: connect, enumerate, power off everything, disconnect.

use std::sync::Arc;

use autohalt_core::{CycleId, ShutdownPhase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use crate::backend::HostService;
use crate::coordinator::{BatchReport, JobCoordinator};
use crate::enumerator::enumerate_running;
use crate::session::HostSession;
use crate::HostConfig;

/// How a shutdown cycle ended.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub enum CycleOutcome {
    /// Every launched job was joined and the session was closed.
    Completed {
        /// Per-job results.
        batch: BatchReport,
        /// Set if listing VMs failed part way. The VMs found before the
        /// failure were still powered off.
        enumeration_error: Option<String>,
    },
    /// The cycle gave up before any job was created.
    Aborted {
        /// Phase in which the cycle gave up.
        at: ShutdownPhase,
        /// Human-readable description of the failure.
        reason: String,
    },
}

/// Summary of one shutdown cycle, for logging and tests.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct CycleReport {
    /// Correlation id used in the cycle's tracing span.
    pub cycle: CycleId,
    /// Phase the state machine ended in.
    pub phase: ShutdownPhase,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub finished_at: DateTime<Utc>,
    /// How the cycle ended.
    pub outcome: CycleOutcome,
}

impl CycleReport {
    /// Returns `true` if the cycle reached [`ShutdownPhase::Done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Per-job results, if the cycle got as far as launching jobs.
    #[must_use]
    pub fn batch(&self) -> Option<&BatchReport> {
        match &self.outcome {
            CycleOutcome::Completed { batch, .. } => Some(batch),
            CycleOutcome::Aborted { .. } => None,
        }
    }
}

/// Runs shutdown cycles against one control service.
pub struct ShutdownPipeline<S: HostService + ?Sized + 'static> {
    service: Arc<S>,
    config: HostConfig,
}

impl<S: HostService + ?Sized + 'static> ShutdownPipeline<S> {
    /// Create a pipeline for `service`.
    #[must_use]
    pub fn new(service: Arc<S>, config: HostConfig) -> Self {
        Self { service, config }
    }

    /// Run one complete cycle and report how it went.
    ///
    /// Never fails: a connection failure aborts the cycle, an enumeration
    /// failure keeps the VMs found so far, and a failing VM only ends its
    /// own job. Returns once every launched job has finished and the
    /// session is closed.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = CycleId::new();
        let span = tracing::info_span!("shutdown_cycle", %cycle);
        self.drive(cycle).instrument(span).await
    }

    async fn drive(&self, cycle: CycleId) -> CycleReport {
        let started_at = Utc::now();
        let mut phase = ShutdownPhase::Idle;

        advance(&mut phase, ShutdownPhase::Connecting);
        let session = match HostSession::connect(Arc::clone(&self.service), self.config.provider).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "giving up this shutdown cycle");
                advance(&mut phase, ShutdownPhase::Idle);
                return CycleReport {
                    cycle,
                    phase,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: CycleOutcome::Aborted {
                        at: ShutdownPhase::Connecting,
                        reason: e.to_string(),
                    },
                };
            }
        };

        advance(&mut phase, ShutdownPhase::Enumerating);
        let coordinator = JobCoordinator::new();
        let collector = coordinator.collector();
        let enumeration_error = match enumerate_running(&session, move |location| {
            if let Some(id) = collector.collect(location) {
                tracing::debug!(job = %id, "power-off job queued");
            }
        })
        .await
        {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "continuing with the VMs found so far");
                Some(e.to_string())
            }
        };

        advance(&mut phase, ShutdownPhase::PoweringOff);
        let batch = coordinator
            .launch_all_and_join(&session.share(), self.config.power_mode)
            .await;
        session.disconnect();

        advance(&mut phase, ShutdownPhase::Done);
        let mut failed = 0usize;
        for (job, outcome) in batch.failures() {
            failed += 1;
            tracing::warn!(%job, ?outcome, "VM left running");
        }
        tracing::info!(
            launched = batch.launched(),
            powered_off = batch.powered_off(),
            failed,
            "shutdown cycle done"
        );

        CycleReport {
            cycle,
            phase,
            started_at,
            finished_at: Utc::now(),
            outcome: CycleOutcome::Completed {
                batch,
                enumeration_error,
            },
        }
    }
}

fn advance(phase: &mut ShutdownPhase, next: ShutdownPhase) {
    match phase.advance(next) {
        Ok(()) => tracing::debug!(%phase, "phase changed"),
        Err(e) => tracing::error!(error = %e, "unexpected phase transition"),
    }
}
