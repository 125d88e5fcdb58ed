// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use crate::hooks::Hook;
use crate::lease_store::{JsonFileLeaseStore, LeaseStore};
use crate::retransmit::{default_schedule_factory, ScheduleFactory};
use crate::state::State;
use crate::wire::default_parameter_request_list;

const DEFAULT_REQUESTING_TIMEOUT_SECS: u32 = 30;
const DEFAULT_REBOOTING_TIMEOUT_SECS: u32 = 10;

/// Configuration for a single `Client` instance, following the
/// `DhcpV4Config::new(iface).set_*()` builder idiom.
pub struct ClientConfig {
    pub(crate) interface: String,
    pub(crate) lease_store: Arc<dyn LeaseStore>,
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
    pub(crate) requested_parameters: Vec<u8>,
    pub(crate) timeouts: HashMap<State, u32>,
    pub(crate) retransmission: ScheduleFactory,
    pub(crate) write_pidfile: bool,
    pub(crate) release: bool,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("interface", &self.interface)
            .field("hooks", &self.hooks.len())
            .field("requested_parameters", &self.requested_parameters)
            .field("timeouts", &self.timeouts)
            .field("write_pidfile", &self.write_pidfile)
            .field("release", &self.release)
            .finish()
    }
}

fn default_timeouts() -> HashMap<State, u32> {
    let mut m = HashMap::new();
    m.insert(State::Rebooting, DEFAULT_REBOOTING_TIMEOUT_SECS);
    m.insert(State::Requesting, DEFAULT_REQUESTING_TIMEOUT_SECS);
    m
}

impl ClientConfig {
    /// A config bound to `interface`, with every other field defaulted:
    /// in-memory-free JSON-file lease store rooted at the current working
    /// directory, no hooks, the standard parameter-request-list, the
    /// default `REBOOTING`/`REQUESTING` watchdog timeouts, randomised
    /// exponential back-off, no pidfile, RELEASE-on-exit enabled.
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            lease_store: Arc::new(JsonFileLeaseStore::new(".")),
            hooks: Vec::new(),
            requested_parameters: default_parameter_request_list(),
            timeouts: default_timeouts(),
            retransmission: default_schedule_factory(),
            write_pidfile: false,
            release: true,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn set_lease_store(&mut self, store: Arc<dyn LeaseStore>) -> &mut Self {
        self.lease_store = store;
        self
    }

    pub fn set_hooks(&mut self, hooks: Vec<Arc<dyn Hook>>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    pub fn set_requested_parameters(&mut self, params: Vec<u8>) -> &mut Self {
        self.requested_parameters = params;
        self
    }

    pub fn set_timeout(&mut self, state: State, seconds: u32) -> &mut Self {
        self.timeouts.insert(state, seconds);
        self
    }

    pub fn clear_timeout(&mut self, state: State) -> &mut Self {
        self.timeouts.remove(&state);
        self
    }

    pub fn set_retransmission(&mut self, factory: ScheduleFactory) -> &mut Self {
        self.retransmission = factory;
        self
    }

    pub fn set_write_pidfile(&mut self, enabled: bool) -> &mut Self {
        self.write_pidfile = enabled;
        self
    }

    pub fn set_release(&mut self, enabled: bool) -> &mut Self {
        self.release = enabled;
        self
    }

    pub(crate) fn pidfile_path(&self) -> std::path::PathBuf {
        std::env::current_dir()
            .unwrap_or_default()
            .join(format!("{}.pid", self.interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ClientConfig::new("eth0");
        assert_eq!(cfg.timeouts.get(&State::Rebooting), Some(&10));
        assert_eq!(cfg.timeouts.get(&State::Requesting), Some(&30));
        assert!(cfg.release);
        assert!(!cfg.write_pidfile);
    }
}
