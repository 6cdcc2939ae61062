//! Heartbeat supervisor.
//!
//! Sends a `Heartbeat` frame every `interval` over a caller-supplied
//! writer closure, and watches a shared "last response seen" clock that
//! the session endpoint refreshes on receipt of the peer's own
//! heartbeats. If that clock goes stale past `timeout`, the supervisor
//! fires its timeout callback and stops.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Shared liveness clock, updated whenever a `Heartbeat` is received from
/// the peer. Cheap to clone and share across the read loop and the
/// supervisor task.
#[derive(Debug, Clone)]
pub struct LivenessClock {
    last_response_unix: Arc<AtomicI64>,
}

impl LivenessClock {
    /// A clock initialized to "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_response_unix: Arc::new(AtomicI64::new(Utc::now().timestamp())),
        }
    }

    /// Record that a heartbeat was just seen.
    pub fn note_response(&self) {
        self.last_response_unix
            .store(Utc::now().timestamp(), Ordering::SeqCst);
    }

    /// Seconds since the last recorded response.
    #[must_use]
    pub fn seconds_since_response(&self) -> i64 {
        Utc::now().timestamp() - self.last_response_unix.load(Ordering::SeqCst)
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A running heartbeat supervisor. Dropping or calling [`stop`](Self::stop)
/// tears down the background task.
pub struct HeartbeatSupervisor {
    shutdown: watch::Sender<bool>,
}

impl HeartbeatSupervisor {
    /// Spawn a supervisor that calls `send` every `interval` and `on_timeout`
    /// once `clock` goes stale past `timeout`, or once `send` itself fails.
    ///
    /// `send` and `on_timeout` both run on the current tokio runtime.
    pub fn spawn<S, Fut, T>(
        clock: LivenessClock,
        interval: Duration,
        timeout: Duration,
        send: S,
        on_timeout: T,
    ) -> Self
    where
        S: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
        T: FnOnce() + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("heartbeat supervisor stopped");
                        return;
                    }
                }

                if *shutdown_rx.borrow() {
                    return;
                }

                if !send().await {
                    warn!("heartbeat send failed, treating as timeout");
                    on_timeout();
                    return;
                }

                let stale = clock.seconds_since_response();
                if stale > timeout.as_secs() as i64 {
                    warn!(stale_secs = stale, "heartbeat timeout");
                    on_timeout();
                    return;
                }
            }
        });

        Self { shutdown }
    }

    /// Signal the supervisor task to stop. Idempotent; returns immediately
    /// without waiting for the task to actually exit (it wakes within the
    /// next poll, well under 1 s).
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
