// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{bug, DhcpError};
use crate::wire::DhcpV4Message;

/// The subset of DHCP options this client requests and retains. Mirrors
/// the defaults in `ClientConfig::requested_parameters`.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct LeaseOptions {
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Option<Vec<Ipv4Addr>>,
    pub dns_servers: Option<Vec<Ipv4Addr>>,
    pub domain_name: Option<String>,
}

/// An immutable record granted by a server from a received ACK. The
/// `obtained_at` timestamp is the moment the *request* that produced this
/// lease was sent, not the moment the ACK arrived (RFC 2131: the lease
/// clock starts at request time).
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub interface: String,
    pub yiaddr: Ipv4Addr,
    pub server_id: Ipv4Addr,
    pub server_mac: [u8; 6],
    pub obtained_at: SerializableTime,
    pub lease_time: u32,
    pub renewal_time: u32,
    pub rebinding_time: u32,
    pub options: LeaseOptions,
}

/// `SystemTime` does not serialize directly; store seconds-since-epoch so
/// JSON-backed stores round-trip exactly.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct SerializableTime(u64);

impl SerializableTime {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(t: SystemTime) -> Self {
        let secs = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn to_system_time(self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.0)
    }
}

impl Lease {
    /// Builds a lease from an ACK message, remembering `sent_at` as the
    /// moment the request that elicited this ACK was transmitted.
    pub fn from_ack(
        interface: &str,
        ack: &DhcpV4Message,
        server_mac: [u8; 6],
        sent_at: SystemTime,
    ) -> Result<Self, DhcpError> {
        let yiaddr = ack.yiaddr;
        let server_id = ack.server_id.ok_or_else(|| {
            bug("ACK missing server identifier option")
        })?;
        Ok(Self {
            interface: interface.to_string(),
            yiaddr,
            server_id,
            server_mac,
            obtained_at: SerializableTime::from_system_time(sent_at),
            lease_time: ack.lease_time.unwrap_or(0),
            renewal_time: ack
                .renewal_time
                .unwrap_or_else(|| ack.lease_time.unwrap_or(0) / 2),
            rebinding_time: ack
                .rebinding_time
                .unwrap_or_else(|| ack.lease_time.unwrap_or(0) * 7 / 8),
            options: LeaseOptions {
                subnet_mask: ack.subnet_mask,
                routers: ack.routers.clone(),
                dns_servers: ack.dns_servers.clone(),
                domain_name: ack.domain_name.clone(),
            },
        })
    }

    fn elapsed(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.obtained_at.to_system_time())
            .unwrap_or(Duration::ZERO)
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= Duration::from_secs(self.lease_time.into())
    }

    pub fn renewal_due(&self) -> bool {
        self.elapsed() >= Duration::from_secs(self.renewal_time.into())
    }

    pub fn rebinding_due(&self) -> bool {
        self.elapsed() >= Duration::from_secs(self.rebinding_time.into())
    }

    /// Remaining seconds until renewal (T1), clamped to zero.
    pub fn seconds_to_renewal(&self) -> Duration {
        Duration::from_secs(self.renewal_time.into())
            .saturating_sub(self.elapsed())
    }

    /// Remaining seconds until rebinding (T2), clamped to zero.
    pub fn seconds_to_rebinding(&self) -> Duration {
        Duration::from_secs(self.rebinding_time.into())
            .saturating_sub(self.elapsed())
    }

    /// Remaining seconds until expiration, clamped to zero.
    pub fn seconds_to_expiration(&self) -> Duration {
        Duration::from_secs(self.lease_time.into())
            .saturating_sub(self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lease(lease_time: u32, t1: u32, t2: u32) -> Lease {
        Lease {
            interface: "eth0".to_string(),
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_id: Ipv4Addr::new(192, 0, 2, 1),
            server_mac: [0, 1, 2, 3, 4, 5],
            obtained_at: SerializableTime::now(),
            lease_time,
            renewal_time: t1,
            rebinding_time: t2,
            options: LeaseOptions::default(),
        }
    }

    #[test]
    fn fresh_lease_is_not_expired() {
        let lease = sample_lease(600, 300, 525);
        assert!(!lease.expired());
        assert!(!lease.renewal_due());
        assert!(!lease.rebinding_due());
    }

    #[test]
    fn backdated_lease_is_expired() {
        let mut lease = sample_lease(600, 300, 525);
        lease.obtained_at = SerializableTime::from_system_time(
            SystemTime::now() - Duration::from_secs(1000),
        );
        assert!(lease.expired());
        assert!(lease.renewal_due());
        assert!(lease.rebinding_due());
        assert_eq!(lease.seconds_to_expiration(), Duration::ZERO);
    }
}
