//! Power-off job: drives one VM from open to powered off.

use autohalt_core::{JobId, JobOutcome, JobRecord, JobStage};
use tracing::Instrument;

use crate::backend::{HostService, JobProperty, PowerOpMode};
use crate::handle::HandleGuard;
use crate::session::SessionRef;
use crate::{ExecutorError, HostError};

/// One independent unit of work: open a VM, then power it off.
///
/// A failure at either step ends this job only. Nothing is retried.
pub struct PowerOffJob<S: HostService + ?Sized> {
    record: JobRecord,
    session: SessionRef<S>,
    mode: PowerOpMode,
}

impl<S: HostService + ?Sized> PowerOffJob<S> {
    /// Create a job for `record` that issues requests through `session`.
    #[must_use]
    pub fn new(record: JobRecord, session: SessionRef<S>, mode: PowerOpMode) -> Self {
        Self { record, session, mode }
    }

    /// The job's sequence number.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.record.id
    }

    /// Run the job to completion and report how it ended.
    ///
    /// Every handle acquired along the way has been released by the time
    /// this returns.
    pub async fn run(self) -> JobOutcome {
        let id = self.record.id;
        let span = tracing::info_span!("power_off_job", job = %id);
        async move {
            tracing::info!(location = %self.record.location, "start power-off job");
            let outcome = match self.drive().await {
                Ok(()) => JobOutcome::PoweredOff,
                Err((stage, e)) => {
                    tracing::error!(error = %e, %stage, "power-off job failed");
                    JobOutcome::failed(stage, e)
                }
            };
            tracing::info!(?outcome, "quit power-off job");
            outcome
        }
        .instrument(span)
        .await
    }

    /// Each error is tagged with the step that issued the failing call.
    async fn drive(&self) -> Result<(), (JobStage, ExecutorError)> {
        let service = self.session.service();
        let id = self.record.id;
        let location = &self.record.location;

        tracing::info!("opening VM");
        let open_job = HandleGuard::job(service, service.open_vm(self.session.host(), location.as_str()));
        tracing::debug!(handle = %open_job.raw(), "open job issued");
        let vm = service
            .wait(open_job.raw(), JobProperty::ResultHandle)
            .await
            .and_then(|vm| vm.ok_or(HostError::MissingResult(open_job.raw())))
            .map_err(|source| {
                let e = ExecutorError::Open {
                    job: id,
                    location: location.clone(),
                    source,
                };
                (JobStage::Open, e)
            })?;
        let vm = HandleGuard::vm(service, vm);
        tracing::debug!(handle = %vm.raw(), "VM opened");

        tracing::info!(mode = ?self.mode, "powering off VM");
        let power_job = HandleGuard::job(service, service.power_off(vm.raw(), self.mode));
        tracing::debug!(handle = %power_job.raw(), "power-off job issued");
        service
            .wait(power_job.raw(), JobProperty::None)
            .await
            .map_err(|source| {
                let e = ExecutorError::PowerOff {
                    job: id,
                    location: location.clone(),
                    source,
                };
                (JobStage::PowerOff, e)
            })?;

        tracing::info!("VM powered off");
        Ok(())
    }
}
