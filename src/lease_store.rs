// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{DhcpError, ErrorKind};
use crate::lease::Lease;

/// Persists and loads leases keyed by interface name. Pluggable: the wire
/// format and backing medium are entirely up to the implementor, the core
/// only ever calls `load`/`dump`.
pub trait LeaseStore: Send + Sync {
    fn load(&self, interface: &str) -> Result<Option<Lease>, DhcpError>;
    fn dump(&self, lease: &Lease) -> Result<(), DhcpError>;
}

/// Writes `<dir>/<interface>.lease.json` on `dump`, reads it back on
/// `load`. Missing or unparsable files are treated as "no lease", not an
/// error: a corrupt lease file should not prevent the client from
/// re-acquiring one.
#[derive(Debug, Clone)]
pub struct JsonFileLeaseStore {
    dir: PathBuf,
}

impl JsonFileLeaseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, interface: &str) -> PathBuf {
        self.dir.join(format!("{interface}.lease.json"))
    }
}

impl LeaseStore for JsonFileLeaseStore {
    fn load(&self, interface: &str) -> Result<Option<Lease>, DhcpError> {
        let path = self.path_for(interface);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Lease>(&data) {
            Ok(lease) => Ok(Some(lease)),
            Err(e) => {
                log::warn!("ignoring unparsable lease file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn dump(&self, lease: &Lease) -> Result<(), DhcpError> {
        let path = self.path_for(&lease.interface);
        let data = serde_json::to_string_pretty(lease).map_err(|e| {
            DhcpError::new(ErrorKind::Bug, format!("failed to serialize lease: {e}"))
        })?;
        std::fs::write(&path, data)?;
        Ok(())
    }
}

/// Prints the lease as JSON to stdout on every `dump`; never persists
/// anything, so `load` always returns `None`. Matches the "print to
/// stdout and let the caller redirect it" store used by one-shot CLI
/// invocations.
#[derive(Debug, Clone, Default)]
pub struct StdoutLeaseStore;

impl LeaseStore for StdoutLeaseStore {
    fn load(&self, _interface: &str) -> Result<Option<Lease>, DhcpError> {
        Ok(None)
    }

    fn dump(&self, lease: &Lease) -> Result<(), DhcpError> {
        let data = serde_json::to_string(lease).map_err(|e| {
            DhcpError::new(ErrorKind::Bug, format!("failed to serialize lease: {e}"))
        })?;
        println!("{data}");
        Ok(())
    }
}

/// Keeps leases in an in-memory map, keyed by interface. Useful for tests
/// and for short-lived processes that should not touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl LeaseStore for MemoryLeaseStore {
    fn load(&self, interface: &str) -> Result<Option<Lease>, DhcpError> {
        Ok(self
            .leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(interface)
            .cloned())
    }

    fn dump(&self, lease: &Lease) -> Result<(), DhcpError> {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(lease.interface.clone(), lease.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample(interface: &str) -> Lease {
        Lease {
            interface: interface.to_string(),
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_id: Ipv4Addr::new(192, 0, 2, 1),
            server_mac: [1, 2, 3, 4, 5, 6],
            obtained_at: crate::lease::SerializableTime::now(),
            lease_time: 600,
            renewal_time: 300,
            rebinding_time: 525,
            options: Default::default(),
        }
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryLeaseStore::default();
        let lease = sample("eth0");
        store.dump(&lease).unwrap();
        assert_eq!(store.load("eth0").unwrap(), Some(lease));
        assert_eq!(store.load("eth1").unwrap(), None);
    }

    #[test]
    fn json_file_store_round_trips() {
        let dir = std::env::temp_dir().join(format!(
            "dhcp4-client-core-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileLeaseStore::new(&dir);
        let lease = sample("eth9");
        store.dump(&lease).unwrap();
        assert_eq!(store.load("eth9").unwrap(), Some(lease));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn json_file_store_missing_file_is_none_not_error() {
        let dir = std::env::temp_dir();
        let store = JsonFileLeaseStore::new(dir);
        assert_eq!(store.load("nonexistent-iface-xyz").unwrap(), None);
    }

    #[test]
    fn stdout_store_never_loads_anything() {
        let store = StdoutLeaseStore;
        let lease = sample("eth0");
        store.dump(&lease).unwrap();
        assert_eq!(store.load("eth0").unwrap(), None);
    }
}
