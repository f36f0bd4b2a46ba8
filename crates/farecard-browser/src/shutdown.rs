//! Signal-driven shutdown without owning the browser.
//!
//! The listener keeps a `Weak` reference to the launcher. When a signal
//! arrives it upgrades the reference; if the run already finished and dropped
//! its handle, there is nothing to clean up.

use crate::actions::LaneLauncher;
use std::future::Future;
use std::sync::Weak;
use tokio::task::JoinHandle;

/// Spawn a task that closes the browser on Ctrl-C (and SIGTERM/SIGHUP on unix).
pub fn spawn_shutdown_listener<L>(launcher: Weak<L>) -> JoinHandle<()>
where
    L: LaneLauncher + 'static,
{
    spawn_shutdown_on(launcher, wait_for_signal())
}

/// Spawn a task that closes the browser once `trigger` resolves.
pub fn spawn_shutdown_on<L, F>(launcher: Weak<L>, trigger: F) -> JoinHandle<()>
where
    L: LaneLauncher + 'static,
    F: Future<Output = &'static str> + Send + 'static,
{
    tokio::spawn(async move {
        let signal = trigger.await;
        tracing::warn!("Received {}, closing browser", signal);

        let Some(launcher) = launcher.upgrade() else {
            tracing::debug!("Browser already released, nothing to close");
            return;
        };

        if let Err(e) = launcher.shutdown().await {
            tracing::error!("Failed to close browser after {}: {}", signal, e);
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut hup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
