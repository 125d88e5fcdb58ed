// SPDX-License-Identifier: Apache-2.0

//! An asynchronous DHCPv4 client core implementing the RFC 2131 state
//! machine: transaction-id discipline, retransmission scheduling, lease
//! timers and a pluggable hook/lease-store boundary, independent of any
//! particular raw-socket implementation.

pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod lease;
pub mod lease_store;
pub mod raw_socket;
pub mod receiver;
pub mod retransmit;
pub mod sender;
pub mod socket;
pub mod state;
pub mod timers;
pub mod wire;
pub mod xid;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{DhcpError, DhcpResult, ErrorKind};
pub use hooks::{Hook, HookSet, Trigger};
pub use lease::Lease;
pub use lease_store::{JsonFileLeaseStore, LeaseStore, MemoryLeaseStore, StdoutLeaseStore};
pub use raw_socket::EthernetDhcpSocket;
pub use socket::RawDhcpSocket;
pub use state::State;
