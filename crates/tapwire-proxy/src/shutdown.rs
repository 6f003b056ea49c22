//! Shutdown coordination.
//!
//! The trigger is an OS interrupt (SIGINT/SIGTERM) or, when configured,
//! an inactivity timeout tracked against the last handled request. The
//! caller flips a watch channel that every listener observes, then
//! drains with a bounded deadline.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Tracks the time of the last handled request.
pub struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until a shutdown trigger fires: interrupt signal, terminate
/// signal, or the optional inactivity timeout.
pub async fn wait_for_trigger(inactivity_timeout: Option<Duration>, activity: &ActivityTracker) {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("interrupt received, initiating graceful shutdown"),
        _ = terminate => info!("terminate signal received, initiating graceful shutdown"),
        _ = idle_expired(inactivity_timeout, activity) => {
            info!("inactivity timeout reached, initiating graceful shutdown");
        }
    }
}

async fn idle_expired(timeout: Option<Duration>, activity: &ActivityTracker) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= timeout {
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}
