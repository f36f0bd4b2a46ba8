//! Best-effort cleanup of headless browsers left behind by crashed runs.
//!
//! Only processes that look like a headless Chromium are touched, so a
//! desktop browser on the same machine survives the sweep.

use sysinfo::System;

/// Whether a process name and argument list describe a headless Chromium.
#[must_use]
pub fn is_orphaned_headless_browser(name: &str, args: &[String]) -> bool {
    let name = name.to_ascii_lowercase();
    if !name.contains("chrom") {
        return false;
    }
    args.iter().any(|arg| arg.starts_with("--headless"))
}

/// Kill leftover headless browser processes and return how many were killed.
///
/// Never fails; problems are logged and the sweep moves on.
pub async fn sweep_orphaned_browsers() -> usize {
    match tokio::task::spawn_blocking(sweep_blocking).await {
        Ok(killed) => killed,
        Err(e) => {
            tracing::warn!("Orphan browser sweep did not complete: {}", e);
            0
        }
    }
}

fn sweep_blocking() -> usize {
    tracing::info!("Checking for orphaned headless browsers");

    let mut system = System::new_all();
    system.refresh_all();
    let own_pid = sysinfo::get_current_pid().ok();

    let mut killed = 0;
    for (pid, process) in system.processes() {
        if Some(*pid) == own_pid {
            continue;
        }

        let name = process.name().to_string_lossy();
        let args: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        if !is_orphaned_headless_browser(&name, &args) {
            continue;
        }

        if process.kill() {
            tracing::info!(pid = %pid, "Killed orphaned browser process");
            killed += 1;
        } else {
            tracing::warn!(pid = %pid, "Failed to kill orphaned browser process");
        }
    }

    if killed == 0 {
        tracing::info!("No orphaned browsers found");
    } else {
        tracing::warn!("Sweep finished: {} orphaned browser processes killed", killed);
    }
    killed
}
