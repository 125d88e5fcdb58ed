// SPDX-License-Identifier: Apache-2.0

//! Concrete `AF_PACKET` implementation of [`RawDhcpSocket`]. This module
//! exists so the crate is runnable end-to-end; its internal framing is not
//! part of the state machine's tested surface (§1, out of scope).

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd};

use etherparse::PacketBuilder;
use nix::libc;
use nix::sys::socket::{
    bind, socket, AddressFamily, LinkAddr, MsgFlags, SockFlag, SockProtocol, SockType,
    SockaddrLike,
};
use tokio::io::unix::AsyncFd;

use crate::error::{DhcpError, ErrorKind};
use crate::socket::{ReceivedDhcpMessage, RawDhcpSocket, SentDhcpMessage, BROADCAST_IP};
use crate::wire::DhcpV4Message;

pub(crate) const SERVER_PORT: u16 = 67;
pub(crate) const CLIENT_PORT: u16 = 68;
const BROADCAST_MAC: [u8; 6] = [0xff; 6];
const MAX_FRAME_LEN: usize = 1500;

/// An `AF_PACKET` datagram socket bound to a single interface, sending and
/// receiving raw Ethernet+IPv4+UDP DHCP frames.
pub struct EthernetDhcpSocket {
    fd: AsyncFd<OwnedFd>,
    iface_index: i32,
    src_mac: [u8; 6],
}

impl EthernetDhcpSocket {
    pub fn open(interface: &str, src_mac: [u8; 6]) -> Result<Self, DhcpError> {
        let iface_index = interface_index(interface)?;
        let fd = socket(
            AddressFamily::Packet,
            SockType::Datagram,
            SockFlag::SOCK_NONBLOCK,
            Some(SockProtocol::EthAll),
        )
        .map_err(|e| DhcpError::new(ErrorKind::Io, format!("socket(2) failed: {e}")))?;

        let sll = nix::libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: iface_index,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        let addr = unsafe {
            LinkAddr::from_raw(
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                Some(std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t),
            )
        }
        .ok_or_else(|| DhcpError::new(ErrorKind::Bug, "failed to construct link-layer address"))?;
        bind(fd.as_raw_fd(), &addr)
            .map_err(|e| DhcpError::new(ErrorKind::Io, format!("bind(2) failed: {e}")))?;

        log::debug!("opened raw DHCP socket on {interface} (ifindex {iface_index})");
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            iface_index,
            src_mac,
        })
    }

    fn build_frame(
        &self,
        dst_mac: [u8; 6],
        dst_ip: Ipv4Addr,
        payload: &[u8],
    ) -> Result<Vec<u8>, DhcpError> {
        let builder = PacketBuilder::ethernet2(self.src_mac, dst_mac)
            .ipv4(Ipv4Addr::UNSPECIFIED.octets(), dst_ip.octets(), 64)
            .udp(CLIENT_PORT, SERVER_PORT);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder
            .write(&mut out, payload)
            .map_err(|e| DhcpError::new(ErrorKind::Bug, format!("failed to build frame: {e}")))?;
        Ok(out)
    }
}

impl RawDhcpSocket for EthernetDhcpSocket {
    async fn get(&self) -> Result<ReceivedDhcpMessage, DhcpError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|fd| {
                nix::sys::socket::recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty())
                    .map_err(std::io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    let (eth_src, udp_payload) = parse_frame(&buf[..n])?;
                    let dhcp = DhcpV4Message::parse(udp_payload)?;
                    return Ok(ReceivedDhcpMessage { dhcp, eth_src });
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn put(&self, msg: &SentDhcpMessage) -> Result<(), DhcpError> {
        let payload = msg.dhcp.encode(
            msg.message_type,
            msg.dhcp.xid,
            msg.dhcp.secs,
            self.src_mac,
            &msg.dhcp.parameter_request_list,
        )?;
        // Always link-layer broadcast: resolving the server's MAC for a
        // RENEWING unicast would need ARP, which this adapter doesn't do.
        // The server still sees the IP-layer unicast/broadcast distinction
        // through `ciaddr`/the destination IP, which is what RFC 2131
        // actually requires servers to honor.
        let frame = self.build_frame(BROADCAST_MAC, BROADCAST_IP, &payload)?;
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| {
                nix::sys::socket::send(fd.as_raw_fd(), &frame, MsgFlags::empty())
                    .map_err(std::io::Error::from)
            }) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }
}

fn parse_frame(frame: &[u8]) -> Result<([u8; 6], &[u8]), DhcpError> {
    let (eth, rest) = etherparse::Ethernet2Header::from_slice(frame)
        .map_err(|e| DhcpError::new(ErrorKind::NotSupported, format!("bad ethernet frame: {e}")))?;
    let (ip, rest) = etherparse::Ipv4Header::from_slice(rest)
        .map_err(|e| DhcpError::new(ErrorKind::NotSupported, format!("bad ipv4 header: {e}")))?;
    let _ = ip;
    let (udp, payload) = etherparse::UdpHeader::from_slice(rest)
        .map_err(|e| DhcpError::new(ErrorKind::NotSupported, format!("bad udp header: {e}")))?;
    if udp.destination_port != CLIENT_PORT {
        return Err(DhcpError::new(
            ErrorKind::NotSupported,
            "not a DHCP client-port datagram",
        ));
    }
    Ok((eth.source, payload))
}

fn interface_index(interface: &str) -> Result<i32, DhcpError> {
    let c_name = std::ffi::CString::new(interface).map_err(|_| {
        DhcpError::new(ErrorKind::InvalidArgument, "interface name contains a NUL byte")
    })?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(DhcpError::new(
            ErrorKind::InvalidArgument,
            format!("no such interface: {interface}"),
        ));
    }
    Ok(idx as i32)
}
