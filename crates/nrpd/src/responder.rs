//! Turns a validated request into a response packet.

use crate::entropy::EntropySource;
use crate::metrics::counters;
use crate::registry::PeerRegistry;
use nrp_common::types::{MAX_BYTE, MESSAGE_HEADER_SIZE, PACKET_HEADER_SIZE, REJECT_ENTRY_SIZE};
use nrp_common::{Direction, MsgType, Packet, PacketBuilder, RejectEntry, RejectReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the server is willing to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponderSettings {
    /// Entropy bytes returned when the client asks for 0.
    pub default_entropy: u8,
    /// Whether `ip4peers` requests are answered.
    pub serve_ip4_peers: bool,
    /// Whether `ip6peers` requests are answered.
    pub serve_ip6_peers: bool,
}

/// Size and count of the largest message of `requested` elements, each
/// `element_size` bytes, that fits in `available` bytes.
///
/// The count shrinks to what fits; `None` if not even one element does.
#[must_use]
pub fn fit_message(available: usize, element_size: usize, requested: usize) -> Option<(usize, usize)> {
    if requested == 0 || available <= MESSAGE_HEADER_SIZE {
        return None;
    }
    let room = available - MESSAGE_HEADER_SIZE;
    let count = match element_size {
        0 => requested,
        size => requested.min(room / size),
    };
    if count == 0 {
        return None;
    }
    Some((MESSAGE_HEADER_SIZE + count * element_size, count))
}

/// Builds responses from the registry and an entropy source.
#[derive(Debug)]
pub struct Responder {
    registry: Arc<PeerRegistry>,
    entropy: Arc<dyn EntropySource>,
    settings: ResponderSettings,
    shutting_down: AtomicBool,
}

impl Responder {
    /// Creates a responder.
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        entropy: Arc<dyn EntropySource>,
        settings: ResponderSettings,
    ) -> Self {
        Self {
            registry,
            entropy,
            settings,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Once set, every rejectable request is answered with `shuttingdown`.
    pub fn set_shutting_down(&self, on: bool) {
        self.shutting_down.store(on, Ordering::Relaxed);
    }

    /// Returns `true` while shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    fn served(&self, t: MsgType) -> bool {
        match t {
            MsgType::Ip4Peers => self.settings.serve_ip4_peers,
            MsgType::Ip6Peers => self.settings.serve_ip6_peers,
            MsgType::Entropy => true,
            _ => false,
        }
    }

    fn rejections(&self, request: &Packet<'_>) -> Vec<RejectEntry> {
        let shutting_down = self.is_shutting_down();
        let mut out: Vec<RejectEntry> = Vec::new();
        for msg in request.messages() {
            // Tags newer than this build are skipped, not rejected.
            let Some(t) = msg.msg_type() else { continue };
            if !t.is_rejectable() {
                continue;
            }
            let entry = if shutting_down {
                RejectEntry::new(t, RejectReason::ShuttingDown)
            } else if !self.served(t) {
                RejectEntry::new(t, RejectReason::Unsupported)
            } else {
                continue;
            };
            if !out.iter().any(|e| e.msg_type == entry.msg_type) {
                out.push(entry);
            }
        }
        out
    }

    /// Answers `request` within `budget` bytes.
    ///
    /// Rejections come first and their room is reserved before any data is
    /// packed. Data messages follow in the client's order; a message that
    /// does not fit shrinks to what does, or is skipped. Returns `None` when
    /// there is nothing to send.
    #[must_use]
    pub fn respond(&self, request: &Packet<'_>, budget: usize) -> Option<Vec<u8>> {
        if !request.direction().is_request() {
            return None;
        }
        let budget = budget.min(Direction::Response.max_packet_size());
        if budget <= PACKET_HEADER_SIZE + MESSAGE_HEADER_SIZE {
            return None;
        }

        let mut rejections = self.rejections(request);
        let room = budget - PACKET_HEADER_SIZE - MESSAGE_HEADER_SIZE;
        let fits = (room / REJECT_ENTRY_SIZE).min(MAX_BYTE);
        if rejections.len() > fits {
            warn!(
                dropped = rejections.len() - fits,
                "reject entries truncated to fit budget"
            );
            rejections.truncate(fits);
        }

        let mut builder = PacketBuilder::new(Direction::Response, budget);
        if !rejections.is_empty() && builder.reject(&rejections).is_err() {
            return None;
        }

        if !self.is_shutting_down() {
            for msg in request.messages() {
                let appended = match msg.msg_type() {
                    Some(MsgType::Entropy) => self.pack_entropy(&mut builder, msg.count_or_size()),
                    Some(t @ (MsgType::Ip4Peers | MsgType::Ip6Peers)) if self.served(t) => {
                        self.pack_peers(&mut builder, t, msg.count_or_size())
                    }
                    _ => true,
                };
                if !appended {
                    break;
                }
            }
        }

        if builder.msg_count() == 0 {
            return None;
        }
        builder.finish().ok()
    }

    /// Returns `false` once the packet cannot take another message.
    fn pack_entropy(&self, builder: &mut PacketBuilder, requested: u8) -> bool {
        let requested = match requested {
            0 => self.settings.default_entropy,
            n => n,
        };
        let Some((_, count)) = fit_message(builder.remaining(), 1, usize::from(requested)) else {
            return true;
        };
        let mut data = vec![0u8; count];
        if let Err(e) = self.entropy.fill(&mut data) {
            warn!("entropy source failed, skipping message: {}", e);
            return true;
        }
        match builder.entropy_response(&data) {
            Ok(()) => {
                counters::entropy_bytes_total("served", count);
                true
            }
            Err(e) => {
                debug!("entropy response not appended: {}", e);
                false
            }
        }
    }

    fn pack_peers(&self, builder: &mut PacketBuilder, peer_type: MsgType, requested: u8) -> bool {
        let available = self.registry.active_server_count(peer_type);
        let wanted = match requested {
            0 => available,
            n => usize::from(n).min(available),
        }
        .min(MAX_BYTE);
        let Some(element) = peer_type.response_element_size() else {
            return true;
        };
        let Some((_, count)) = fit_message(builder.remaining(), element, wanted) else {
            return true;
        };
        let list = match self.registry.get_server_list(peer_type, count) {
            Ok(list) => list,
            Err(e) => {
                debug!("no peers to serve: {}", e);
                return true;
            }
        };
        let Ok(count) = u8::try_from(list.len() / element) else {
            return true;
        };
        match builder.peers_response(peer_type, count, &list) {
            Ok(()) => true,
            Err(e) => {
                debug!("peers response not appended: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entropy::EntropyError;
    use nrp_common::codec::validate_response_packet;
    use nrp_common::types::{IP4_PACKET_BUDGET, IP4_PEER_SIZE};
    use std::net::SocketAddr;
    use std::time::Duration;

    #[derive(Debug)]
    struct Fixed(u8);

    impl EntropySource for Fixed {
        fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
            buf.fill(self.0);
            Ok(())
        }
    }

    fn settings() -> ResponderSettings {
        ResponderSettings {
            default_entropy: 8,
            serve_ip4_peers: true,
            serve_ip6_peers: false,
        }
    }

    fn responder(active: &[&str], settings: ResponderSettings) -> Responder {
        let seeds: Vec<SocketAddr> = active.iter().map(|s| s.parse().unwrap()).collect();
        let registry = Arc::new(
            PeerRegistry::new(&seeds, Duration::from_secs(3600), Arc::new(ManualClock::new()))
                .unwrap(),
        );
        for rec in registry.probationary_servers() {
            registry.mark_server_successful(&rec);
        }
        Responder::new(registry, Arc::new(Fixed(0x5A)), settings)
    }

    fn request(build: impl FnOnce(&mut PacketBuilder)) -> Vec<u8> {
        let mut b = PacketBuilder::new(Direction::Request, 256);
        build(&mut b);
        b.finish().unwrap()
    }

    fn parse(pkt: &[u8]) -> Packet<'_> {
        Packet::parse(pkt, Direction::Request).unwrap()
    }

    #[test]
    fn fit_message_table() {
        assert_eq!(fit_message(2, 2, 3), None);
        assert_eq!(fit_message(8, 2, 2), Some((8, 2)));
        assert_eq!(fit_message(5, 2, 1), None);
        assert_eq!(fit_message(7, 2, 2), Some((6, 1)));
        assert_eq!(fit_message(100, 1, 0), None);
    }

    #[test]
    fn default_entropy_served_for_zero_request() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let req = request(|b| b.entropy_request(0).unwrap());
        let resp = r.respond(&parse(&req), IP4_PACKET_BUDGET).unwrap();
        assert!(validate_response_packet(&resp));

        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msgs: Vec<_> = pkt.messages().collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type(), Some(MsgType::Entropy));
        assert_eq!(msgs[0].content(), &[0x5A; 8]);
    }

    #[test]
    fn unsupported_types_are_rejected_first() {
        let r = responder(&["10.0.0.1:8080", "10.0.0.2:8080"], settings());
        let req = request(|b| {
            b.entropy_request(16).unwrap();
            b.peers_request(MsgType::Ip4Peers, 0).unwrap();
            b.peers_request(MsgType::Ip6Peers, 0).unwrap();
            b.push(|buf, off| {
                buf[off..off + 4].copy_from_slice(&[0, 4, MsgType::PubKey.as_u8(), 0]);
                Ok(off + 4)
            })
            .unwrap();
        });
        let resp = r.respond(&parse(&req), IP4_PACKET_BUDGET).unwrap();
        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msgs: Vec<_> = pkt.messages().collect();

        assert_eq!(msgs[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(
            msgs[0].reject_entries().unwrap(),
            vec![
                RejectEntry::new(MsgType::Ip6Peers, RejectReason::Unsupported),
                RejectEntry::new(MsgType::PubKey, RejectReason::Unsupported),
            ]
        );
        assert_eq!(msgs[1].msg_type(), Some(MsgType::Entropy));
        assert_eq!(msgs[1].count_or_size(), 16);
        assert_eq!(msgs[2].msg_type(), Some(MsgType::Ip4Peers));
        assert_eq!(msgs[2].count_or_size(), 2);
        assert_eq!(msgs.len(), 3);
    }

    #[test]
    fn duplicate_rejections_are_collapsed() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let req = request(|b| {
            b.peers_request(MsgType::Ip6Peers, 0).unwrap();
            b.peers_request(MsgType::Ip6Peers, 3).unwrap();
        });
        let resp = r.respond(&parse(&req), IP4_PACKET_BUDGET).unwrap();
        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msgs: Vec<_> = pkt.messages().collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].reject_entries().unwrap().len(), 1);
    }

    #[test]
    fn unknown_future_tags_are_ignored() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let req = request(|b| {
            b.push(|buf, off| {
                buf[off..off + 4].copy_from_slice(&[0, 4, 200, 0]);
                Ok(off + 4)
            })
            .unwrap();
        });
        assert_eq!(r.respond(&parse(&req), IP4_PACKET_BUDGET), None);
    }

    #[test]
    fn shutting_down_rejects_everything_and_serves_nothing() {
        let r = responder(&["10.0.0.1:8080"], settings());
        r.set_shutting_down(true);
        let req = request(|b| {
            b.entropy_request(8).unwrap();
            b.peers_request(MsgType::Ip4Peers, 0).unwrap();
        });
        let resp = r.respond(&parse(&req), IP4_PACKET_BUDGET).unwrap();
        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msgs: Vec<_> = pkt.messages().collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(
            msgs[0].reject_entries().unwrap(),
            vec![RejectEntry::new(MsgType::Ip4Peers, RejectReason::ShuttingDown)]
        );
    }

    #[test]
    fn data_is_shrunk_to_budget_after_reserving_rejects() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let req = request(|b| {
            b.entropy_request(255).unwrap();
            b.peers_request(MsgType::Ip6Peers, 0).unwrap();
        });
        // header 4 + reject 6 leaves 30 bytes: a 26-byte entropy payload.
        let resp = r.respond(&parse(&req), 40).unwrap();
        assert_eq!(resp.len(), 40);
        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msgs: Vec<_> = pkt.messages().collect();
        assert_eq!(msgs[0].msg_type(), Some(MsgType::Reject));
        assert_eq!(msgs[1].count_or_size(), 26);
    }

    #[test]
    fn peers_limited_by_requested_count() {
        let r = responder(&["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"], settings());
        let req = request(|b| b.peers_request(MsgType::Ip4Peers, 2).unwrap());
        let resp = r.respond(&parse(&req), IP4_PACKET_BUDGET).unwrap();
        let pkt = Packet::parse(&resp, Direction::Response).unwrap();
        let msg = pkt.messages().next().unwrap();
        assert_eq!(msg.count_or_size(), 2);
        assert_eq!(msg.content().len(), 2 * IP4_PEER_SIZE);
    }

    #[test]
    fn no_active_peers_and_no_entropy_means_no_response() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let registry_empty = {
            let seeds: Vec<SocketAddr> = vec!["10.0.0.9:8080".parse().unwrap()];
            Arc::new(
                PeerRegistry::new(&seeds, Duration::from_secs(60), Arc::new(ManualClock::new()))
                    .unwrap(),
            )
        };
        let empty = Responder::new(registry_empty, Arc::new(Fixed(1)), settings());
        let req = request(|b| b.peers_request(MsgType::Ip4Peers, 0).unwrap());
        assert_eq!(empty.respond(&parse(&req), IP4_PACKET_BUDGET), None);
        assert!(r.respond(&parse(&req), IP4_PACKET_BUDGET).is_some());
    }

    #[test]
    fn tiny_budget_yields_nothing() {
        let r = responder(&["10.0.0.1:8080"], settings());
        let req = request(|b| b.entropy_request(8).unwrap());
        assert_eq!(r.respond(&parse(&req), 8), None);
    }
}
