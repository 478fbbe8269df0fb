//! Running-VM discovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use autohalt_core::VmLocation;

use crate::backend::{DiscoverySink, HostService, JobProperty};
use crate::handle::HandleGuard;
use crate::session::HostSession;
use crate::ExecutorError;

/// List the running VMs on the session's host.
///
/// `on_found` receives an owned copy of each VM location as the host reports
/// it, before this function returns. It runs on whatever context the control
/// service reports discoveries from, so it must return quickly and must not
/// wait on the enumeration itself. Blank locations are skipped.
///
/// Returns the number of locations passed to `on_found`.
///
/// # Errors
/// Returns [`ExecutorError::Enumerate`] if the host fails the listing.
/// Locations already passed to `on_found` stay valid.
pub async fn enumerate_running<S, F>(
    session: &HostSession<S>,
    mut on_found: F,
) -> Result<usize, ExecutorError>
where
    S: HostService + ?Sized,
    F: FnMut(VmLocation) + Send + 'static,
{
    let found = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&found);
    let sink: DiscoverySink = Box::new(move |raw: &str| match VmLocation::parse(raw) {
        Ok(location) => {
            tracing::info!(%location, "found running VM");
            counter.fetch_add(1, Ordering::Relaxed);
            on_found(location);
        }
        Err(e) => tracing::warn!(error = %e, "skipping discovered VM"),
    });

    tracing::info!("finding running VMs");
    let service = session.service();
    let job = HandleGuard::job(&**service, service.find_running_vms(session.host(), sink));
    tracing::debug!(job = %job.raw(), "find job issued");

    service
        .wait(job.raw(), JobProperty::None)
        .await
        .map_err(ExecutorError::Enumerate)?;

    let count = found.load(Ordering::Relaxed);
    tracing::info!(count, "finished finding running VMs");
    Ok(count)
}
