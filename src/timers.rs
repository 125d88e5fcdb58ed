// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::lease::Lease;

pub type TimerCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Holds the three one-shot timer tasks derived from a granted lease.
/// Invariant: at most one of each is armed at a time. `cancel()` clears
/// all three atomically and is idempotent; `arm()` always cancels any
/// previously armed timers first.
#[derive(Debug, Default)]
pub struct LeaseTimers {
    renewal: Option<JoinHandle<()>>,
    rebinding: Option<JoinHandle<()>>,
    expiration: Option<JoinHandle<()>>,
}

impl LeaseTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels and drops all three timer tasks. Safe to call when nothing
    /// is armed.
    pub fn cancel(&mut self) {
        for handle in [
            self.renewal.take(),
            self.rebinding.take(),
            self.expiration.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    /// (Re)schedules all three timers from the current moment, using
    /// `lease`'s remaining T1/T2/lease-time durations. A non-positive
    /// remaining duration means the corresponding callback runs on the
    /// next scheduler tick (`sleep(ZERO)` resolves immediately rather than
    /// literally synchronously, matching the teacher's async-sleep idiom).
    pub fn arm(
        &mut self,
        lease: &Lease,
        on_renewal: TimerCallback,
        on_rebinding: TimerCallback,
        on_expiration: TimerCallback,
    ) {
        self.cancel();
        self.renewal = Some(spawn_one_shot(lease.seconds_to_renewal(), on_renewal));
        self.rebinding = Some(spawn_one_shot(lease.seconds_to_rebinding(), on_rebinding));
        self.expiration = Some(spawn_one_shot(lease.seconds_to_expiration(), on_expiration));
    }

    pub fn is_armed(&self) -> bool {
        self.renewal.is_some() || self.rebinding.is_some() || self.expiration.is_some()
    }
}

fn spawn_one_shot(delay: Duration, callback: TimerCallback) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        callback().await;
    })
}

impl Drop for LeaseTimers {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn sample_lease(lease_time: u32, t1: u32, t2: u32) -> Lease {
        Lease {
            interface: "eth0".into(),
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_id: Ipv4Addr::new(192, 0, 2, 1),
            server_mac: [0; 6],
            obtained_at: crate::lease::SerializableTime::from_system_time(SystemTime::now()),
            lease_time,
            renewal_time: t1,
            rebinding_time: t2,
            options: Default::default(),
        }
    }

    fn counting_callback(counter: Arc<AtomicUsize>) -> TimerCallback {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let mut timers = LeaseTimers::new();
        timers.cancel();
        timers.cancel();
        assert!(!timers.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn arm_fires_all_three_callbacks_in_order() {
        let renewal = Arc::new(AtomicUsize::new(0));
        let rebinding = Arc::new(AtomicUsize::new(0));
        let expiration = Arc::new(AtomicUsize::new(0));
        let mut timers = LeaseTimers::new();
        timers.arm(
            &sample_lease(600, 300, 525),
            counting_callback(renewal.clone()),
            counting_callback(rebinding.clone()),
            counting_callback(expiration.clone()),
        );
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert_eq!(renewal.load(Ordering::SeqCst), 1);
        assert_eq!(rebinding.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;
        assert_eq!(rebinding.load(Ordering::SeqCst), 1);
        assert_eq!(expiration.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(expiration.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_timers() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let noop = || -> TimerCallback { Arc::new(|| Box::pin(async {})) };
        let mut timers = LeaseTimers::new();
        timers.arm(
            &sample_lease(600, 300, 525),
            counting_callback(first.clone()),
            noop(),
            noop(),
        );
        timers.arm(
            &sample_lease(600, 300, 525),
            counting_callback(second.clone()),
            noop(),
            noop(),
        );
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert_eq!(first.load(Ordering::SeqCst), 0, "superseded timer must not fire");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
