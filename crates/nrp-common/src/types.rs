//! Core type definitions and protocol constants for NRP.

/// Largest UDP payload a request packet may occupy.
pub const MAX_REQUEST_MESSAGE_SIZE: usize = 65_507;
/// Largest UDP payload a response packet may occupy.
pub const MAX_RESPONSE_MESSAGE_SIZE: usize = 65_507;
/// Largest value a single-byte count field can hold.
pub const MAX_BYTE: usize = 255;

/// Size of a message header: `length:u16 BE`, `msgType:u8`, `countOrSize:u8`.
pub const MESSAGE_HEADER_SIZE: usize = 4;
/// Size of a packet header: `length:u16 BE`, `msgType:u8`, `msgCount:u8`.
pub const PACKET_HEADER_SIZE: usize = 4;
/// Size of one reject entry: `msgType:u8`, `reason:u8`.
pub const REJECT_ENTRY_SIZE: usize = 2;
/// Size of one IPv4 peer entry: 4 address bytes and a big-endian port.
pub const IP4_PEER_SIZE: usize = 6;
/// Size of one IPv6 peer entry: 16 address bytes and a big-endian port.
pub const IP6_PEER_SIZE: usize = 18;
/// Largest well-formed reject message (header plus 255 entries).
pub const MAX_REJECT_MESSAGE_SIZE: usize = MESSAGE_HEADER_SIZE + MAX_BYTE * REJECT_ENTRY_SIZE;

/// Response budget for IPv4 peers (minimum reassembly size less IP/UDP headers).
pub const IP4_PACKET_BUDGET: usize = 532;
/// Response budget for IPv6 peers (minimum MTU less IP/UDP headers).
pub const IP6_PACKET_BUDGET: usize = 1236;

/// Entropy bytes requested when the operator does not say otherwise.
pub const DEFAULT_ENTROPY_SIZE: u8 = 8;
/// Upper bound on entropy handled in one exchange.
pub const MAX_ENTROPY_SIZE: usize = 512;

/// Minimum interval between two contacts with the same peer.
pub const CLIENT_MIN_RETRY_SECONDS: u64 = 60;
/// How long a client waits for a response before counting a failure.
pub const CLIENT_RESPONSE_TIMEOUT_SECONDS: u64 = 30;
/// Consecutive failures after which a peer is banned.
pub const CLIENT_MAX_SERVER_TIMEOUT_COUNT: u32 = 5;
/// How long a banned peer address stays banned.
pub const SERVER_BAN_SECONDS: u64 = 3600;

/// Message type tags.
///
/// The numeric order is part of the protocol: validation decides legality
/// by comparing against [`MsgType::RESPONSE_MSG_MIN`] and
/// [`MsgType::REQUEST_MSG_MIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Packet header tag of a request.
    Request = 1,
    /// Packet header tag of a response.
    Response = 2,
    /// Response-only list of declined message types.
    Reject = 3,
    /// IPv4 peer addresses.
    Ip4Peers = 4,
    /// Random bytes.
    Entropy = 5,
    /// IPv6 peer addresses.
    Ip6Peers = 6,
    /// Public key and certificate (not implemented).
    PubKey = 7,
    /// Signing key (not implemented).
    SignKey = 8,
    /// Certificate chain (not implemented).
    CertChain = 9,
    /// Encryption key (not implemented).
    EncryptionKey = 10,
    /// Entropy encrypted with a one-time pad (not implemented).
    SecureEntropy = 11,
}

impl MsgType {
    /// Lowest tag legal inside a response packet.
    pub const RESPONSE_MSG_MIN: u8 = 3;
    /// Lowest tag legal inside a request packet.
    pub const REQUEST_MSG_MIN: u8 = 4;
    /// One past the highest tag this implementation knows.
    pub const MAX: u8 = 12;

    /// Decodes a wire tag, returning `None` for tags this build does not know.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Request,
            2 => Self::Response,
            3 => Self::Reject,
            4 => Self::Ip4Peers,
            5 => Self::Entropy,
            6 => Self::Ip6Peers,
            7 => Self::PubKey,
            8 => Self::SignKey,
            9 => Self::CertChain,
            10 => Self::EncryptionKey,
            11 => Self::SecureEntropy,
            _ => return None,
        })
    }

    /// Wire tag of this type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for the types this implementation carries payloads for.
    #[must_use]
    pub const fn is_implemented(self) -> bool {
        matches!(self, Self::Reject | Self::Ip4Peers | Self::Entropy | Self::Ip6Peers)
    }

    /// Returns `true` for `ip4peers` and `ip6peers`.
    #[must_use]
    pub const fn is_peers(self) -> bool {
        matches!(self, Self::Ip4Peers | Self::Ip6Peers)
    }

    /// Returns `true` if a reject entry may name this type.
    ///
    /// Entropy can never be rejected; every server must serve it.
    #[must_use]
    pub const fn is_rejectable(self) -> bool {
        let tag = self as u8;
        tag >= Self::REQUEST_MSG_MIN && !matches!(self, Self::Entropy)
    }

    /// Size of one content element of this type inside a response.
    #[must_use]
    pub const fn response_element_size(self) -> Option<usize> {
        match self {
            Self::Reject => Some(REJECT_ENTRY_SIZE),
            Self::Ip4Peers => Some(IP4_PEER_SIZE),
            Self::Entropy => Some(1),
            Self::Ip6Peers => Some(IP6_PEER_SIZE),
            _ => None,
        }
    }
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> Self {
        t as Self
    }
}

/// Reasons a server gives for declining a requested message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    /// Generic server-side error.
    Unspecified = 0,
    /// Congestion; clients should back off by 1.25x.
    Busy = 1,
    /// Server is shutting down.
    ShuttingDown = 2,
    /// Requested option is not configured; do not request it again.
    Unsupported = 3,
}

impl RejectReason {
    /// One past the highest reason code.
    pub const MAX: u8 = 4;

    /// Decodes a wire reason code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Unspecified,
            1 => Self::Busy,
            2 => Self::ShuttingDown,
            3 => Self::Unsupported,
            _ => return None,
        })
    }
}

/// Which side of an exchange a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

impl Direction {
    /// Packet header tag expected for this direction.
    #[must_use]
    pub const fn packet_type(self) -> MsgType {
        match self {
            Self::Request => MsgType::Request,
            Self::Response => MsgType::Response,
        }
    }

    /// Largest packet legal in this direction.
    #[must_use]
    pub const fn max_packet_size(self) -> usize {
        match self {
            Self::Request => MAX_REQUEST_MESSAGE_SIZE,
            Self::Response => MAX_RESPONSE_MESSAGE_SIZE,
        }
    }

    /// Returns `true` for [`Direction::Request`].
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(self, Self::Request)
    }
}
