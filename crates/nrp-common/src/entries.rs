//! Fixed-size records carried in the content of reject and peers messages.

use crate::codec::CodecError;
use crate::types::{MsgType, RejectReason, IP4_PEER_SIZE, IP6_PEER_SIZE, REJECT_ENTRY_SIZE};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// One entry of a reject message: which type was declined and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RejectEntry {
    /// Raw tag of the declined message type.
    pub msg_type: u8,
    /// Raw reason code.
    pub reason: u8,
}

impl RejectEntry {
    /// Creates an entry from typed values.
    #[must_use]
    pub const fn new(msg_type: MsgType, reason: RejectReason) -> Self {
        Self {
            msg_type: msg_type as u8,
            reason: reason as u8,
        }
    }

    /// Typed message type, if known.
    #[must_use]
    pub const fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type)
    }

    /// Typed reason, if known.
    #[must_use]
    pub const fn reason(&self) -> Option<RejectReason> {
        RejectReason::from_u8(self.reason)
    }

    /// Returns `true` if the type is rejectable and the reason in range.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let type_ok = match MsgType::from_u8(self.msg_type) {
            Some(t) => t.is_rejectable(),
            None => false,
        };
        type_ok && self.reason < RejectReason::MAX
    }

    /// Wire encoding.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; REJECT_ENTRY_SIZE] {
        [self.msg_type, self.reason]
    }

    /// Decodes every whole entry in `content`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Misaligned`] if `content` is not a whole number
    /// of entries.
    pub fn decode_all(content: &[u8]) -> Result<Vec<Self>, CodecError> {
        chunks(content, REJECT_ENTRY_SIZE)?
            .map(|c| {
                Ok(Self {
                    msg_type: c[0],
                    reason: c[1],
                })
            })
            .collect()
    }
}

/// An IPv4 peer address as carried by `ip4peers` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ip4Peer {
    /// Address octets.
    pub ip: [u8; 4],
    /// Port in host order; big-endian on the wire.
    pub port: u16,
}

impl Ip4Peer {
    /// Wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; IP4_PEER_SIZE] {
        let mut out = [0u8; IP4_PEER_SIZE];
        out[..4].copy_from_slice(&self.ip);
        out[4..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decodes every whole entry in `content`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Misaligned`] on a partial trailing entry.
    pub fn decode_all(content: &[u8]) -> Result<Vec<Self>, CodecError> {
        chunks(content, IP4_PEER_SIZE)?
            .map(|c| {
                Ok(Self {
                    ip: try_into_array(&c[..4])?,
                    port: u16::from_be_bytes(try_into_array(&c[4..])?),
                })
            })
            .collect()
    }

    /// Socket address of this peer.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::from(self.ip)), self.port)
    }
}

/// An IPv6 peer address as carried by `ip6peers` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ip6Peer {
    /// Address octets.
    pub ip: [u8; 16],
    /// Port in host order; big-endian on the wire.
    pub port: u16,
}

impl Ip6Peer {
    /// Wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; IP6_PEER_SIZE] {
        let mut out = [0u8; IP6_PEER_SIZE];
        out[..16].copy_from_slice(&self.ip);
        out[16..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decodes every whole entry in `content`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Misaligned`] on a partial trailing entry.
    pub fn decode_all(content: &[u8]) -> Result<Vec<Self>, CodecError> {
        chunks(content, IP6_PEER_SIZE)?
            .map(|c| {
                Ok(Self {
                    ip: try_into_array(&c[..16])?,
                    port: u16::from_be_bytes(try_into_array(&c[16..])?),
                })
            })
            .collect()
    }

    /// Socket address of this peer.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.ip)), self.port)
    }
}

/// Encodes a socket address as a peer entry of its own family.
#[must_use]
pub fn encode_peer(addr: &SocketAddr) -> Vec<u8> {
    match addr.ip() {
        IpAddr::V4(ip) => Ip4Peer {
            ip: ip.octets(),
            port: addr.port(),
        }
        .to_bytes()
        .to_vec(),
        IpAddr::V6(ip) => Ip6Peer {
            ip: ip.octets(),
            port: addr.port(),
        }
        .to_bytes()
        .to_vec(),
    }
}

/// Decodes the content of a peers message into socket addresses.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedType`] for anything but `ip4peers` or
/// `ip6peers`, and [`CodecError::Misaligned`] on a partial entry.
pub fn decode_peers(peer_type: MsgType, content: &[u8]) -> Result<Vec<SocketAddr>, CodecError> {
    match peer_type {
        MsgType::Ip4Peers => Ok(Ip4Peer::decode_all(content)?
            .iter()
            .map(Ip4Peer::socket_addr)
            .collect()),
        MsgType::Ip6Peers => Ok(Ip6Peer::decode_all(content)?
            .iter()
            .map(Ip6Peer::socket_addr)
            .collect()),
        other => Err(CodecError::UnexpectedType(other.as_u8())),
    }
}

fn chunks(content: &[u8], size: usize) -> Result<std::slice::ChunksExact<'_, u8>, CodecError> {
    if content.len() % size != 0 {
        return Err(CodecError::Misaligned {
            len: content.len(),
            element: size,
        });
    }
    Ok(content.chunks_exact(size))
}

fn try_into_array<const N: usize>(data: &[u8]) -> Result<[u8; N], CodecError> {
    data.try_into().map_err(|_| CodecError::Truncated {
        expected: N,
        actual: data.len(),
    })
}
