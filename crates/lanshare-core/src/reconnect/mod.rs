//! Reconnect supervisor.
//!
//! Bounded-retry loop that re-establishes a session with a trusted peer
//! after an unorderly disconnect: each attempt first tries the last known
//! IP, and falls back to UDP discovery for the peer's device id if that
//! dial fails.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A running reconnect supervisor. Dropping or calling
/// [`stop`](Self::stop) cancels any attempt still in progress between
/// retries.
pub struct ReconnectSupervisor {
    shutdown: watch::Sender<bool>,
}

impl ReconnectSupervisor {
    /// Spawn a supervisor that attempts up to `max_attempts` reconnects,
    /// `interval` apart.
    ///
    /// `dial(ip)` performs a full reconnect handshake against `ip` and
    /// resolves to whether it succeeded. `discover()` is invoked only when
    /// dialing `last_known_ip` fails (or no IP is known yet), and should
    /// resolve to a freshly discovered IP if one was found. `on_success`
    /// is called with the IP that worked; `on_failed` once attempts are
    /// exhausted.
    pub fn spawn<D, DFut, C, CFut>(
        last_known_ip: Option<IpAddr>,
        interval: Duration,
        max_attempts: u32,
        dial: D,
        discover: C,
        on_success: impl FnOnce(IpAddr) + Send + 'static,
        on_failed: impl FnOnce() + Send + 'static,
    ) -> Self
    where
        D: Fn(IpAddr) -> DFut + Send + 'static,
        DFut: Future<Output = bool> + Send,
        C: Fn() -> CFut + Send + 'static,
        CFut: Future<Output = Option<IpAddr>> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut known_ip = last_known_ip;

            for attempt in 1..=max_attempts {
                if *shutdown_rx.borrow() {
                    return;
                }

                debug!(attempt, max_attempts, "reconnect attempt");

                if let Some(ip) = known_ip {
                    if dial(ip).await {
                        info!(%ip, attempt, "reconnected to last known ip");
                        on_success(ip);
                        return;
                    }
                }

                if let Some(ip) = discover().await {
                    known_ip = Some(ip);
                    if dial(ip).await {
                        info!(%ip, attempt, "reconnected via discovery");
                        on_success(ip);
                        return;
                    }
                }

                if attempt == max_attempts {
                    break;
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("reconnect supervisor stopped mid-wait");
                        return;
                    }
                }
            }

            warn!(max_attempts, "reconnect attempts exhausted");
            on_failed();
        });

        Self { shutdown }
    }

    /// Signal the supervisor to stop before its next attempt. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn ip(octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, octet))
    }

    #[tokio::test]
    async fn succeeds_on_last_known_ip_first_try() {
        let target = ip(10);
        let notify = Arc::new(Notify::new());
        let result = Arc::new(std::sync::Mutex::new(None));

        let notify_clone = Arc::clone(&notify);
        let result_clone = Arc::clone(&result);
        let _supervisor = ReconnectSupervisor::spawn(
            Some(target),
            Duration::from_millis(10),
            5,
            move |dial_ip| async move { dial_ip == target },
            || async { None },
            move |success_ip| {
                *result_clone.lock().unwrap() = Some(success_ip);
                notify_clone.notify_one();
            },
            || {},
        );

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
        assert_eq!(*result.lock().unwrap(), Some(target));
    }

    #[tokio::test]
    async fn falls_back_to_discovery_when_last_ip_fails() {
        let discovered = ip(99);
        let notify = Arc::new(Notify::new());
        let result = Arc::new(std::sync::Mutex::new(None));

        let notify_clone = Arc::clone(&notify);
        let result_clone = Arc::clone(&result);
        let _supervisor = ReconnectSupervisor::spawn(
            Some(ip(1)),
            Duration::from_millis(10),
            5,
            move |dial_ip| async move { dial_ip == discovered },
            move || async move { Some(discovered) },
            move |success_ip| {
                *result_clone.lock().unwrap() = Some(success_ip);
                notify_clone.notify_one();
            },
            || {},
        );

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
        assert_eq!(*result.lock().unwrap(), Some(discovered));
    }

    #[tokio::test]
    async fn fires_on_failed_after_exhausting_attempts() {
        let notify = Arc::new(Notify::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let notify_clone = Arc::clone(&notify);
        let attempts_clone = Arc::clone(&attempts);
        let _supervisor = ReconnectSupervisor::spawn(
            None,
            Duration::from_millis(1),
            3,
            move |_ip| {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            || async { None },
            |_ip| {},
            move || notify_clone.notify_one(),
        );

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_prevents_further_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let supervisor = ReconnectSupervisor::spawn(
            Some(ip(1)),
            Duration::from_secs(10),
            5,
            move |_ip| {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            || async { None },
            |_ip| {},
            || {},
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        supervisor.stop();
        let after_stop = attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), after_stop);
    }
}
