// SPDX-License-Identifier: Apache-2.0

//! Thin translation layer between this crate's domain types and
//! `dhcproto`'s wire-format `v4::Message`. Kept separate from `lease.rs`
//! and the state machine so the FSM never has to know about option codes.

use std::net::Ipv4Addr;

use dhcproto::v4::{self, DhcpOption, MessageType as WireMessageType, OptionCode};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};

use crate::error::{DhcpError, ErrorKind};
use crate::lease::Lease;
use crate::state::State;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum DhcpV4MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpV4MessageType {
    fn to_wire(self) -> WireMessageType {
        match self {
            Self::Discover => WireMessageType::Discover,
            Self::Offer => WireMessageType::Offer,
            Self::Request => WireMessageType::Request,
            Self::Decline => WireMessageType::Decline,
            Self::Ack => WireMessageType::Ack,
            Self::Nak => WireMessageType::Nak,
            Self::Release => WireMessageType::Release,
            Self::Inform => WireMessageType::Inform,
        }
    }

    fn from_wire(t: WireMessageType) -> Option<Self> {
        Some(match t {
            WireMessageType::Discover => Self::Discover,
            WireMessageType::Offer => Self::Offer,
            WireMessageType::Request => Self::Request,
            WireMessageType::Decline => Self::Decline,
            WireMessageType::Ack => Self::Ack,
            WireMessageType::Nak => Self::Nak,
            WireMessageType::Release => Self::Release,
            WireMessageType::Inform => Self::Inform,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DhcpV4MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Discover => "DISCOVER",
                Self::Offer => "OFFER",
                Self::Request => "REQUEST",
                Self::Decline => "DECLINE",
                Self::Ack => "ACK",
                Self::Nak => "NAK",
                Self::Release => "RELEASE",
                Self::Inform => "INFORM",
            }
        )
    }
}

/// A decoded DHCP option map plus the handful of header fields the client
/// cares about. Built from a wire `v4::Message` on receive, or used to
/// stage an outbound message before it is handed to the socket.
#[derive(Debug, Clone)]
pub struct DhcpV4Message {
    pub message_type: Option<DhcpV4MessageType>,
    pub xid: u32,
    pub secs: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub chaddr: [u8; 6],
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub renewal_time: Option<u32>,
    pub rebinding_time: Option<u32>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Option<Vec<Ipv4Addr>>,
    pub dns_servers: Option<Vec<Ipv4Addr>>,
    pub domain_name: Option<String>,
    pub parameter_request_list: Vec<u8>,
}

impl Default for DhcpV4Message {
    fn default() -> Self {
        Self {
            message_type: None,
            xid: 0,
            secs: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 6],
            requested_ip: None,
            server_id: None,
            lease_time: None,
            renewal_time: None,
            rebinding_time: None,
            subnet_mask: None,
            routers: None,
            dns_servers: None,
            domain_name: None,
            parameter_request_list: Vec::new(),
        }
    }
}

/// The default parameter-request-list, per `ClientConfig::requested_parameters`.
pub fn default_parameter_request_list() -> Vec<u8> {
    vec![
        OptionCode::SubnetMask.into(),
        OptionCode::Router.into(),
        OptionCode::DomainNameServer.into(),
        OptionCode::DomainName.into(),
        OptionCode::AddressLeaseTime.into(),
        OptionCode::Renewal.into(),
        OptionCode::Rebinding.into(),
    ]
}

impl DhcpV4Message {
    pub fn parse(buffer: &[u8]) -> Result<Self, DhcpError> {
        let mut decoder = Decoder::new(buffer);
        let msg = v4::Message::decode(&mut decoder).map_err(|e| {
            DhcpError::new(ErrorKind::NotSupported, format!("malformed DHCP packet: {e}"))
        })?;
        let mut out = Self {
            xid: msg.xid(),
            secs: msg.secs(),
            ciaddr: msg.ciaddr(),
            yiaddr: msg.yiaddr(),
            chaddr: {
                let mut a = [0u8; 6];
                a.copy_from_slice(&msg.chaddr()[..6]);
                a
            },
            ..Default::default()
        };
        for (code, opt) in msg.opts().iter() {
            match opt {
                DhcpOption::MessageType(t) => {
                    out.message_type = DhcpV4MessageType::from_wire(*t);
                }
                DhcpOption::RequestedIpAddress(ip) => out.requested_ip = Some(*ip),
                DhcpOption::ServerIdentifier(ip) => out.server_id = Some(*ip),
                DhcpOption::AddressLeaseTime(t) => out.lease_time = Some(*t),
                DhcpOption::Renewal(t) => out.renewal_time = Some(*t),
                DhcpOption::Rebinding(t) => out.rebinding_time = Some(*t),
                DhcpOption::SubnetMask(ip) => out.subnet_mask = Some(*ip),
                DhcpOption::Router(ips) => out.routers = Some(ips.clone()),
                DhcpOption::DomainNameServer(ips) => out.dns_servers = Some(ips.clone()),
                DhcpOption::DomainName(name) => out.domain_name = Some(name.to_string()),
                _ => {
                    let _ = code;
                }
            }
        }
        Ok(out)
    }

    /// Assembles the wire message, stamping `secs` and `xid` at the call
    /// site (the sender loop fills these in fresh before every send).
    pub fn encode(
        &self,
        message_type: DhcpV4MessageType,
        xid: u32,
        secs: u16,
        chaddr: [u8; 6],
        parameter_request_list: &[u8],
    ) -> Result<Vec<u8>, DhcpError> {
        let mut msg = v4::Message::default();
        msg.set_xid(xid)
            .set_secs(secs)
            .set_chaddr(&chaddr)
            .set_ciaddr(self.ciaddr)
            .set_yiaddr(self.yiaddr);
        let opts = msg.opts_mut();
        opts.insert(DhcpOption::MessageType(message_type.to_wire()));
        if let Some(ip) = self.requested_ip {
            opts.insert(DhcpOption::RequestedIpAddress(ip));
        }
        if let Some(ip) = self.server_id {
            opts.insert(DhcpOption::ServerIdentifier(ip));
        }
        if !parameter_request_list.is_empty() {
            opts.insert(DhcpOption::ParameterRequestList(
                parameter_request_list
                    .iter()
                    .map(|c| OptionCode::from(*c))
                    .collect(),
            ));
        }
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        msg.encode(&mut encoder).map_err(|e| {
            DhcpError::new(ErrorKind::Bug, format!("failed to encode DHCP message: {e}"))
        })?;
        Ok(buf)
    }
}

/// Builds the outbound option set for a REQUEST tied to `lease`, selecting
/// unicast-to-server identifying fields for `RENEWING` and broadcast
/// identifying fields (requested-IP, no server-id) for `REBOOTING` /
/// `REBINDING`, per RFC 2131 table 4.
pub fn request_message_for_lease(lease: &Lease, issuing_state: State) -> DhcpV4Message {
    let mut msg = DhcpV4Message::default();
    match issuing_state {
        State::Renewing => {
            // Unicast: ciaddr set, no server-id/requested-ip needed.
            msg.ciaddr = lease.yiaddr;
        }
        State::Rebooting | State::Rebinding => {
            msg.requested_ip = Some(lease.yiaddr);
        }
        _ => {
            msg.requested_ip = Some(lease.yiaddr);
        }
    }
    msg.yiaddr = lease.yiaddr;
    msg
}

pub fn request_message_for_offer(offer: &DhcpV4Message) -> DhcpV4Message {
    let mut msg = DhcpV4Message::default();
    msg.requested_ip = Some(offer.yiaddr);
    msg.server_id = offer.server_id;
    msg
}

pub fn discover_message() -> DhcpV4Message {
    DhcpV4Message::default()
}

pub fn release_message(lease: &Lease) -> DhcpV4Message {
    let mut msg = DhcpV4Message::default();
    msg.ciaddr = lease.yiaddr;
    msg.server_id = Some(lease.server_id);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_preserves_header_fields() {
        let msg = discover_message();
        let bytes = msg
            .encode(
                DhcpV4MessageType::Discover,
                0xAABBCCDD,
                7,
                [0, 1, 2, 3, 4, 5],
                &default_parameter_request_list(),
            )
            .unwrap();
        let parsed = DhcpV4Message::parse(&bytes).unwrap();
        assert_eq!(parsed.xid, 0xAABBCCDD);
        assert_eq!(parsed.secs, 7);
        assert_eq!(parsed.message_type, Some(DhcpV4MessageType::Discover));
    }
}
