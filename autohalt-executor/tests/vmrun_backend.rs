//! The `vmrun` backend driven through a full shutdown cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use autohalt_executor::{enumerate_running, HostConfig, HostSession, ServiceProvider, ShutdownPipeline, VmrunService};

#[cfg(unix)]
fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("autohalt-vmrun-{}", uuid::Uuid::new_v4()));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        panic!("cannot create {}: {e}", dir.display());
    }
    dir
}

#[cfg(unix)]
fn write(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        panic!("cannot write {}: {e}", path.display());
    }
}

/// A stand-in `vmrun` that lists two VMs and records each stop as a
/// `<vmx>.<mode>` marker file.
#[cfg(unix)]
fn fake_vmrun(dir: &Path, running: &[PathBuf]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let mut list = format!("Total running VMs: {}\n", running.len());
    for vm in running {
        list.push_str(&vm.display().to_string());
        list.push('\n');
    }
    let script = format!(
        "#!/bin/sh\ncase \"$3\" in\n  list) printf '%s' '{list}' ;;\n  stop) : > \"$4.$5\" ;;\n  *) echo \"Error: unknown command $3\"; exit 1 ;;\nesac\n"
    );
    let path = dir.join("vmrun");
    write(&path, &script);
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)) {
        panic!("cannot make {} executable: {e}", path.display());
    }
    path
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cycle_stops_every_listed_vm_through_vmrun() {
    let dir = scratch_dir();
    let present = [dir.join("a.vmx"), dir.join("b.vmx")];
    for vm in &present {
        write(vm, "config.version = \"8\"\n");
    }
    // Listed but deleted from disk: the open step must fail for it alone.
    let missing = dir.join("gone.vmx");
    let listed = [present[0].clone(), missing.clone(), present[1].clone()];

    let config = HostConfig::new(fake_vmrun(&dir, &listed));
    let service = Arc::new(VmrunService::from_config(&config));
    let report = ShutdownPipeline::new(Arc::clone(&service), config).run_cycle().await;

    assert!(report.is_done(), "cycle must finish: {:?}", report.outcome);
    let batch = report.batch().unwrap_or_else(|| panic!("expected a batch, got {:?}", report.outcome));
    assert_eq!(batch.launched(), 3);
    assert_eq!(batch.powered_off(), 2);
    for vm in &present {
        let marker = PathBuf::from(format!("{}.soft", vm.display()));
        assert!(marker.exists(), "{} was not stopped", vm.display());
    }
    assert!(!PathBuf::from(format!("{}.soft", missing.display())).exists());
    assert_eq!(service.live_handles(), 0, "every handle must be released");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
#[ignore = "requires a VMware install with vmrun on PATH"]
async fn real_vmrun_lists_running_vms() {
    let service = Arc::new(VmrunService::new(PathBuf::from("vmrun")));
    let session = match HostSession::connect(service, ServiceProvider::Workstation).await {
        Ok(session) => session,
        Err(e) => panic!("connect failed: {e}"),
    };
    let result = enumerate_running(&session, |location| println!("{location}")).await;
    assert!(result.is_ok(), "listing failed: {result:?}");
}
