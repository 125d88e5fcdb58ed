// SPDX-License-Identifier: Apache-2.0

//! The raw-socket boundary the state machine is built against. `RawSocket`
//! is the concrete `AF_PACKET`-backed implementation; anything satisfying
//! `RawDhcpSocket` (a mock in tests, a proxy variant, …) can stand in for
//! it since the client is generic over the trait rather than tied to one
//! concrete type.

use std::future::Future;
use std::net::Ipv4Addr;

use crate::error::DhcpError;
use crate::state::State;
use crate::wire::{DhcpV4Message, DhcpV4MessageType};

/// A decoded inbound DHCP datagram plus the link-layer source address,
/// needed to remember which MAC answered (used for proxy-mode RELEASE and
/// diagnostics).
#[derive(Debug, Clone)]
pub struct ReceivedDhcpMessage {
    pub dhcp: DhcpV4Message,
    pub eth_src: [u8; 6],
}

/// An outbound DHCP datagram staged for transmission. `issuing_state`
/// records which client state produced it, used by the sender loop to
/// decide eligibility after shutdown (§4.4) and by the xid discipline.
#[derive(Debug, Clone)]
pub struct SentDhcpMessage {
    pub message_type: DhcpV4MessageType,
    pub dhcp: DhcpV4Message,
    pub issuing_state: State,
    /// Set only for RENEWING/REBINDING REQUESTs and for RELEASE: overrides
    /// the sender's default back-off with the RFC 2131 §4.4.5 halving
    /// schedule timed against this deadline (T2, lease expiry, or "now"
    /// for a RELEASE, which should fire once and never repeat).
    pub retransmit_deadline: Option<tokio::time::Instant>,
}

impl SentDhcpMessage {
    pub fn with_retransmit_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.retransmit_deadline = Some(deadline);
        self
    }
}

/// The operations the core needs from a raw DHCP socket. Consumed, not
/// owned: the core never builds or parses link-layer frames itself, it
/// only calls through this trait.
pub trait RawDhcpSocket: Send + Sync {
    fn get(&self) -> impl Future<Output = Result<ReceivedDhcpMessage, DhcpError>> + Send;

    /// Encodes and transmits `msg`. May fail with an `ENETDOWN`-flavored
    /// `DhcpError` (`DhcpError::is_network_down()`), in which case the
    /// caller's loop must terminate rather than retry.
    fn put(&self, msg: &SentDhcpMessage) -> impl Future<Output = Result<(), DhcpError>> + Send;
}

/// Message builders, kept alongside the trait since they are the other
/// half of the "what goes over the wire" boundary (§6).
pub fn discover(parameter_request_list: &[u8]) -> SentDhcpMessage {
    let mut dhcp = crate::wire::discover_message();
    dhcp.parameter_request_list = parameter_request_list.to_vec();
    SentDhcpMessage {
        message_type: DhcpV4MessageType::Discover,
        dhcp,
        issuing_state: State::Selecting,
        retransmit_deadline: None,
    }
}

pub fn request_for_offer(
    parameter_request_list: &[u8],
    offer: &ReceivedDhcpMessage,
) -> SentDhcpMessage {
    let mut dhcp = crate::wire::request_message_for_offer(&offer.dhcp);
    dhcp.parameter_request_list = parameter_request_list.to_vec();
    SentDhcpMessage {
        message_type: DhcpV4MessageType::Request,
        dhcp,
        issuing_state: State::Requesting,
        retransmit_deadline: None,
    }
}

pub fn request_for_lease(
    parameter_request_list: &[u8],
    lease: &crate::lease::Lease,
    issuing_state: State,
) -> SentDhcpMessage {
    let mut dhcp = crate::wire::request_message_for_lease(lease, issuing_state);
    dhcp.parameter_request_list = parameter_request_list.to_vec();
    SentDhcpMessage {
        message_type: DhcpV4MessageType::Request,
        dhcp,
        issuing_state,
        retransmit_deadline: None,
    }
}

/// Builds the RELEASE to send on the way out. Stamped with a deadline of
/// "now" so the sender's schedule yields zero on the very first call and
/// the message is transmitted exactly once rather than retried forever.
pub fn release(lease: &crate::lease::Lease) -> SentDhcpMessage {
    SentDhcpMessage {
        message_type: DhcpV4MessageType::Release,
        dhcp: crate::wire::release_message(lease),
        // RELEASE is only ever sent on the way to OFF and is never
        // matched against a reply, so it does not need a request-issuing
        // state; `OFF` is the honest answer here, and `Xid::for_state`
        // encodes it as the harmless "invalid" sentinel.
        issuing_state: State::Off,
        retransmit_deadline: Some(tokio::time::Instant::now()),
    }
}

pub(crate) const BROADCAST_IP: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);
