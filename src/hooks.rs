// SPDX-License-Identifier: Apache-2.0

use std::pin::Pin;
use std::sync::Arc;

use futures::Future;

use crate::error::DhcpError;
use crate::lease::Lease;

/// Lifecycle events a hook can subscribe to.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Trigger {
    Bound,
    Renewed,
    Rebound,
    Expired,
    Unbound,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Bound => "BOUND",
                Self::Renewed => "RENEWED",
                Self::Rebound => "REBOUND",
                Self::Expired => "EXPIRED",
                Self::Unbound => "UNBOUND",
            }
        )
    }
}

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DhcpError>> + Send + 'a>>;

/// User code invoked at defined lifecycle transitions. Implementors
/// declare the triggers they care about via `triggers()`; `call()` is
/// only ever invoked for a trigger present in that set.
pub trait Hook: Send + Sync {
    fn triggers(&self) -> &[Trigger];
    fn call<'a>(&'a self, lease: &'a Lease, trigger: Trigger) -> HookFuture<'a>;
}

/// An ordered, trigger-tagged collection of hooks, run in registration
/// order. A hook failure is logged and does not stop later hooks from
/// running nor abort the client.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookSet {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self { hooks }
    }

    pub async fn run(&self, lease: &Lease, trigger: Trigger) {
        for hook in &self.hooks {
            if !hook.triggers().contains(&trigger) {
                continue;
            }
            if let Err(e) = hook.call(lease, trigger).await {
                log::warn!("hook failed on {trigger} trigger: {e}");
            }
        }
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("count", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    struct CountingHook {
        triggers: Vec<Trigger>,
        count: Arc<AtomicUsize>,
    }

    impl Hook for CountingHook {
        fn triggers(&self) -> &[Trigger] {
            &self.triggers
        }

        fn call<'a>(&'a self, _lease: &'a Lease, _trigger: Trigger) -> HookFuture<'a> {
            Box::pin(async move {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn dummy_lease() -> Lease {
        Lease {
            interface: "eth0".into(),
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_id: Ipv4Addr::new(192, 0, 2, 1),
            server_mac: [0; 6],
            obtained_at: crate::lease::SerializableTime::from_system_time(SystemTime::now()),
            lease_time: 600,
            renewal_time: 300,
            rebinding_time: 525,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn only_subscribed_triggers_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let hooks = HookSet::new(vec![Arc::new(CountingHook {
            triggers: vec![Trigger::Bound, Trigger::Renewed],
            count: count.clone(),
        })]);
        let lease = dummy_lease();
        hooks.run(&lease, Trigger::Bound).await;
        hooks.run(&lease, Trigger::Expired).await;
        hooks.run(&lease, Trigger::Renewed).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
