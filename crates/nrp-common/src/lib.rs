//! Wire format of the NRP entropy-exchange protocol.
//!
//! This crate provides:
//! - Packet and message validation, walking and generation ([`codec`])
//! - Reject and peer entry records ([`entries`])
//! - Protocol type definitions and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod entries;
pub mod types;

pub use codec::{CodecError, Message, Packet, PacketBuilder};
pub use entries::{Ip4Peer, Ip6Peer, RejectEntry};
pub use types::{Direction, MsgType, RejectReason};
