//! Client side of one exchange: build the request, digest the response.

use crate::entropy::EntropySink;
use crate::metrics::counters;
use crate::registry::{Capabilities, PeerRegistry, ServerRecord};
use nrp_common::codec::Message;
use nrp_common::{CodecError, Direction, MsgType, Packet, PacketBuilder, RejectReason};
use tracing::{debug, warn};

const REQUEST_CAPACITY: usize = 64;

/// What the client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Entropy bytes requested per exchange (0 = server default).
    pub entropy_size: u8,
    /// Whether IPv4 peers are requested and contacted.
    pub ip4: bool,
    /// Whether IPv6 peers are requested and contacted.
    pub ip6: bool,
}

/// What one response contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeSummary {
    /// Entropy bytes absorbed.
    pub entropy_bytes: usize,
    /// New peers added to the probationary population.
    pub peers_added: usize,
    /// Reject entries applied.
    pub rejects: usize,
}

/// Builds the request for `server`.
///
/// Always asks for entropy, then for every peer family both enabled locally
/// and believed to be served by `server`.
///
/// # Errors
///
/// Propagates [`CodecError`] from the builder.
pub fn construct_request(server: &ServerRecord, settings: &ClientSettings) -> Result<Vec<u8>, CodecError> {
    let mut b = PacketBuilder::new(Direction::Request, REQUEST_CAPACITY);
    b.entropy_request(settings.entropy_size)?;
    if settings.ip4 && server.capabilities.contains(Capabilities::IP4_PEERS) {
        b.peers_request(MsgType::Ip4Peers, 0)?;
    }
    if settings.ip6 && server.capabilities.contains(Capabilities::IP6_PEERS) {
        b.peers_request(MsgType::Ip6Peers, 0)?;
    }
    b.finish()
}

/// Applies every entry of a reject message to `server` and returns how
/// many were understood.
pub fn apply_reject(server: &mut ServerRecord, msg: &Message<'_>) -> usize {
    let Some(entries) = msg.reject_entries() else {
        return 0;
    };
    let mut applied = 0;
    for entry in entries {
        let (Some(t), Some(reason)) = (entry.msg_type(), entry.reason()) else {
            continue;
        };
        match reason {
            RejectReason::Busy => server.back_off(),
            RejectReason::ShuttingDown => {
                server.capabilities.insert(Capabilities::SHUTTING_DOWN);
                server.back_off();
            }
            RejectReason::Unsupported => match t {
                MsgType::Ip4Peers => server.capabilities.set(Capabilities::IP4_PEERS, false),
                MsgType::Ip6Peers => server.capabilities.set(Capabilities::IP6_PEERS, false),
                MsgType::PubKey | MsgType::SignKey => {
                    server.capabilities.set(Capabilities::PUB_KEY, false);
                }
                _ => {}
            },
            RejectReason::Unspecified => {}
        }
        debug!(peer = %server.addr(), msg_type = ?t, reason = ?reason, "reject applied");
        applied += 1;
    }
    applied
}

/// Digests a validated response from `server`.
///
/// Entropy goes to `sink`, peers of enabled families to `registry`, and
/// rejects update `server`'s flags and retry interval in place. A response
/// without a `shuttingdown` reject clears an earlier shutdown flag.
pub fn process_response(
    server: &mut ServerRecord,
    packet: &Packet<'_>,
    registry: &PeerRegistry,
    sink: &dyn EntropySink,
    settings: &ClientSettings,
) -> ExchangeSummary {
    let mut summary = ExchangeSummary::default();
    if packet.direction().is_request() {
        return summary;
    }
    server.capabilities.remove(Capabilities::SHUTTING_DOWN);

    for msg in packet.messages() {
        match msg.msg_type() {
            Some(MsgType::Entropy) => match sink.absorb(msg.content()) {
                Ok(()) => {
                    summary.entropy_bytes += msg.content().len();
                    counters::entropy_bytes_total("received", msg.content().len());
                }
                Err(e) => warn!("failed to absorb entropy: {}", e),
            },
            Some(t @ (MsgType::Ip4Peers | MsgType::Ip6Peers)) => {
                let enabled = match t {
                    MsgType::Ip4Peers => settings.ip4,
                    _ => settings.ip6,
                };
                if !enabled {
                    continue;
                }
                match registry.add_servers_from_message(&msg) {
                    Ok(n) => summary.peers_added += n,
                    Err(e) => debug!(peer = %server.addr(), "unusable peers message: {}", e),
                }
            }
            Some(MsgType::Reject) => summary.rejects += apply_reject(server, &msg),
            _ => {}
        }
    }
    summary
}
