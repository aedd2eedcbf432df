//! Known peers and fair selection among them.
//!
//! Peers live in one of two populations. **Probationary** peers were learned
//! from configuration or from another peer's `ip4peers`/`ip6peers` message
//! and have not yet answered us; **active** peers have. Selection alternates
//! between the two so a large active set never starves verification of new
//! peers. Repeated failures ban a peer's address for the ban cache's TTL.
//!
//! Each population has its own mutex and no operation holds both at once.
//! Promotion writes active then re-checks probationary; learning writes
//! probationary then re-checks active, so one of the two always sees the
//! other and a peer never stays in both. Selection hands out copies;
//! outcomes are reported back by address.

use crate::cache::ExpiringCache;
use crate::clock::Clock;
use crate::metrics::{counters, gauges};
use nrp_common::codec::Message;
use nrp_common::entries::{decode_peers, encode_peer};
use nrp_common::types::{CLIENT_MAX_SERVER_TIMEOUT_COUNT, CLIENT_MIN_RETRY_SECONDS};
use nrp_common::{CodecError, MsgType};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Minimum interval between contacts with one peer.
pub const MIN_RETRY: Duration = Duration::from_secs(CLIENT_MIN_RETRY_SECONDS);

const BACKOFF_FACTOR: f64 = 1.25;

/// Errors from registry construction and queries.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry needs at least one configured server as a fallback.
    #[error("no configured servers")]
    NoConfiguredServers,
    /// The message or query type is not `ip4peers`/`ip6peers`.
    #[error("not a peers type: {0}")]
    NotPeersType(u8),
    /// A peer list was requested with a zero count.
    #[error("invalid peer count {0}")]
    InvalidCount(usize),
    /// No active peer of the requested family exists.
    #[error("no active peers of type {0}")]
    NoServers(u8),
    /// Peer entries could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

bitflags::bitflags! {
    /// Per-peer capability and state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// The peer is addressed over IPv6.
        const IPV6 = 1 << 0;
        /// The peer has not answered us yet.
        const PROBATIONARY = 1 << 1;
        /// The peer is believed to serve `ip4peers`.
        const IP4_PEERS = 1 << 2;
        /// The peer is believed to serve `ip6peers`.
        const IP6_PEERS = 1 << 3;
        /// The peer is believed to serve key material.
        const PUB_KEY = 1 << 4;
        /// The peer's last answer carried a `shuttingdown` reject.
        const SHUTTING_DOWN = 1 << 5;
    }
}

/// A peer identity plus the state we negotiated with it.
///
/// Equality, hashing and ordering use the IP address only: the same host on
/// a different port, or with revised flags, is the same peer. IPv4 orders
/// before IPv6.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    addr: SocketAddr,
    /// Consecutive failed contacts.
    pub failure_count: u32,
    /// When we last contacted this peer.
    pub last_access: Option<Instant>,
    retry: Duration,
    /// Capability and state flags.
    pub capabilities: Capabilities,
}

impl ServerRecord {
    /// A fresh record: no failures, minimum retry, peers assumed served.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        let mut capabilities = Capabilities::IP4_PEERS | Capabilities::IP6_PEERS;
        capabilities.set(Capabilities::IPV6, addr.is_ipv6());
        Self {
            addr,
            failure_count: 0,
            last_access: None,
            retry: MIN_RETRY,
            capabilities,
        }
    }

    /// Socket address to contact.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Identity of the peer.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Returns `true` for IPv6 peers.
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        self.capabilities.contains(Capabilities::IPV6)
    }

    /// Returns `true` while the peer has not answered.
    #[must_use]
    pub fn is_probationary(&self) -> bool {
        self.capabilities.contains(Capabilities::PROBATIONARY)
    }

    /// Current retry interval, never below [`MIN_RETRY`].
    #[must_use]
    pub fn retry(&self) -> Duration {
        self.retry
    }

    /// Grows the retry interval by 1.25x.
    pub fn back_off(&mut self) {
        self.retry = self.retry.mul_f64(BACKOFF_FACTOR).max(MIN_RETRY);
    }

    /// Returns `true` once the retry interval has passed since the last contact.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_access.and_then(|t| t.checked_add(self.retry)) {
            Some(next) => now > next,
            None => self.last_access.is_none(),
        }
    }

    fn merge_from(&mut self, reported: &Self) {
        let probationary = self.is_probationary();
        self.capabilities = reported.capabilities;
        self.capabilities
            .set(Capabilities::PROBATIONARY, probationary);
        self.capabilities
            .set(Capabilities::IPV6, self.addr.is_ipv6());
        self.retry = self.retry.max(reported.retry);
    }
}

impl PartialEq for ServerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.ip() == other.ip()
    }
}

impl Eq for ServerRecord {}

impl Hash for ServerRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip().hash(state);
    }
}

impl PartialOrd for ServerRecord {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerRecord {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.ip().cmp(&other.ip())
    }
}

/// Population sizes at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Configured fallback servers.
    pub configured: usize,
    /// Verified peers.
    pub active: usize,
    /// Unverified peers.
    pub probationary: usize,
    /// Ban entries, including expired ones not yet swept.
    pub banned: usize,
}

#[derive(Debug, Default)]
struct ActiveSet {
    peers: BTreeMap<IpAddr, ServerRecord>,
    cursor: Option<IpAddr>,
}

impl ActiveSet {
    fn next(&mut self) -> Option<ServerRecord> {
        let after = match self.cursor {
            Some(c) => self
                .peers
                .range((Bound::Excluded(c), Bound::Unbounded))
                .next(),
            None => None,
        };
        let (ip, rec) = after.or_else(|| self.peers.iter().next())?;
        self.cursor = Some(*ip);
        Some(rec.clone())
    }
}

#[derive(Debug, Default)]
struct Probation {
    peers: Vec<ServerRecord>,
    cursor: usize,
}

impl Probation {
    fn next(&mut self) -> Option<ServerRecord> {
        if self.peers.is_empty() {
            return None;
        }
        if self.cursor >= self.peers.len() {
            self.cursor = 0;
        }
        let rec = self.peers[self.cursor].clone();
        self.cursor += 1;
        Some(rec)
    }

    fn position(&self, ip: IpAddr) -> Option<usize> {
        self.peers.iter().position(|r| r.ip() == ip)
    }

    fn remove(&mut self, index: usize) -> ServerRecord {
        if index < self.cursor {
            self.cursor -= 1;
        }
        self.peers.remove(index)
    }

    fn remove_ip(&mut self, ip: IpAddr) -> Option<ServerRecord> {
        self.position(ip).map(|i| self.remove(i))
    }
}

/// The authoritative peer sets.
#[derive(Debug)]
pub struct PeerRegistry {
    configured: Vec<ServerRecord>,
    active: Mutex<ActiveSet>,
    probationary: Mutex<Probation>,
    banned: ExpiringCache<IpAddr>,
    prefer_active: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl PeerRegistry {
    /// Creates a registry seeded with `configured` servers, all probationary.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoConfiguredServers`] if `configured` is empty.
    pub fn new(
        configured: &[SocketAddr],
        ban_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RegistryError> {
        if configured.is_empty() {
            return Err(RegistryError::NoConfiguredServers);
        }

        let configured: Vec<ServerRecord> = configured.iter().copied().map(ServerRecord::new).collect();
        let mut seeds: Vec<ServerRecord> = Vec::with_capacity(configured.len());
        for rec in &configured {
            if !seeds.contains(rec) {
                let mut rec = rec.clone();
                rec.capabilities.set(Capabilities::PROBATIONARY, true);
                seeds.push(rec);
            }
        }

        let registry = Self {
            configured,
            active: Mutex::new(ActiveSet::default()),
            probationary: Mutex::new(Probation {
                peers: seeds,
                cursor: 0,
            }),
            banned: ExpiringCache::with_clock(ban_ttl, clock.clone()),
            prefer_active: AtomicBool::new(true),
            clock,
        };
        registry.publish_gauges();
        Ok(registry)
    }

    fn active(&self) -> MutexGuard<'_, ActiveSet> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probationary(&self) -> MutexGuard<'_, Probation> {
        self.probationary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_gauges(&self) {
        gauges::peers_active(self.active().peers.len());
        gauges::peers_probationary(self.probationary().peers.len());
    }

    /// Picks the next peer to contact.
    ///
    /// Alternates between the active and probationary populations on every
    /// call, falling back to the other when the preferred one is empty and
    /// to the first configured server when both are. Each population is
    /// walked round-robin. The caller must report the outcome through
    /// [`mark_server_successful`](Self::mark_server_successful) or
    /// [`increment_server_fail_count`](Self::increment_server_fail_count).
    #[must_use]
    pub fn get_next_server(&self) -> ServerRecord {
        let prefer_active = self.prefer_active.fetch_xor(true, Ordering::Relaxed);
        let picked = if prefer_active {
            self.active().next().or_else(|| self.probationary().next())
        } else {
            self.probationary().next().or_else(|| self.active().next())
        };

        picked.unwrap_or_else(|| {
            warn!("no active or probationary peers, falling back to configured server");
            // The constructor guarantees at least one configured server.
            self.configured[0].clone()
        })
    }

    /// Records a good response from `rec`.
    ///
    /// Clears the failure count, stamps the access time, merges the flags
    /// and retry interval negotiated during the exchange, and promotes a
    /// probationary peer to active.
    pub fn mark_server_successful(&self, rec: &ServerRecord) {
        let now = self.clock.now();
        let ip = rec.ip();

        let promoted = self.probationary().remove_ip(ip);

        let mut stored = match promoted {
            Some(stored) => {
                info!(peer = %rec.addr(), "peer promoted to active");
                stored
            }
            None => {
                let mut active = self.active();
                if let Some(stored) = active.peers.get_mut(&ip) {
                    stored.merge_from(rec);
                    stored.failure_count = 0;
                    stored.last_access = Some(now);
                    return;
                }
                drop(active);
                if self.banned.is_present(&ip) {
                    debug!(peer = %rec.addr(), "ignoring success from banned peer");
                    return;
                }
                debug!(peer = %rec.addr(), "success from untracked peer, adding to active");
                ServerRecord::new(rec.addr())
            }
        };

        stored.merge_from(rec);
        stored.capabilities.set(Capabilities::PROBATIONARY, false);
        stored.failure_count = 0;
        stored.last_access = Some(now);
        self.active().peers.insert(ip, stored);
        // A concurrent announcement may have re-added the peer meanwhile.
        self.probationary().remove_ip(ip);
        self.publish_gauges();
    }

    /// Records a failed contact with `rec` and returns `true` if the peer
    /// was banned as a result.
    ///
    /// Backs the retry interval off by 1.25x. The peer is removed from its
    /// population and its address banned once it reaches
    /// `CLIENT_MAX_SERVER_TIMEOUT_COUNT` consecutive failures.
    pub fn increment_server_fail_count(&self, rec: &ServerRecord) -> bool {
        let now = self.clock.now();
        let ip = rec.ip();

        let apply = |stored: &mut ServerRecord| {
            stored.merge_from(rec);
            stored.failure_count = stored.failure_count.saturating_add(1);
            stored.back_off();
            stored.last_access = Some(now);
            stored.failure_count >= CLIENT_MAX_SERVER_TIMEOUT_COUNT
        };

        let in_probation = {
            let mut probation = self.probationary();
            match probation.position(ip) {
                Some(i) => {
                    if apply(&mut probation.peers[i]) {
                        probation.remove(i);
                        Some(true)
                    } else {
                        Some(false)
                    }
                }
                None => None,
            }
        };

        let ban = match in_probation {
            Some(ban) => ban,
            None => {
                let mut active = self.active();
                match active.peers.get_mut(&ip) {
                    Some(stored) => {
                        let ban = apply(stored);
                        if ban {
                            active.peers.remove(&ip);
                        }
                        ban
                    }
                    None => {
                        warn!(peer = %rec.addr(), "failure reported for untracked peer");
                        return false;
                    }
                }
            }
        };

        if ban {
            self.banned.add(ip);
            counters::peers_banned_total();
            info!(peer = %rec.addr(), "peer banned after repeated failures");
            self.publish_gauges();
        }
        ban
    }

    /// Adds the peers carried by an `ip4peers`/`ip6peers` message to the
    /// probationary population and returns how many were new.
    ///
    /// Banned, already known, unspecified and port-zero addresses are
    /// skipped. Existing records are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotPeersType`] for any other message type,
    /// or [`RegistryError::Codec`] if the content is not whole entries.
    pub fn add_servers_from_message(&self, msg: &Message<'_>) -> Result<usize, RegistryError> {
        let peer_type = msg
            .msg_type()
            .filter(|t| t.is_peers())
            .ok_or(RegistryError::NotPeersType(msg.msg_type_raw()))?;
        let addrs = decode_peers(peer_type, msg.content())?;

        let mut added = 0;
        for addr in addrs {
            if addr.ip().is_unspecified() || addr.port() == 0 {
                debug!(peer = %addr, "skipping unusable peer address");
                continue;
            }
            let ip = addr.ip();
            if self.banned.is_present(&ip) || self.active().peers.contains_key(&ip) {
                continue;
            }
            {
                let mut probation = self.probationary();
                if probation.position(ip).is_some() {
                    continue;
                }
                let mut rec = ServerRecord::new(addr);
                rec.capabilities.set(Capabilities::PROBATIONARY, true);
                probation.peers.push(rec);
            }
            // Promoted while unlocked: the active record wins.
            if self.active().peers.contains_key(&ip) {
                self.probationary().remove_ip(ip);
                continue;
            }
            added += 1;
        }

        if added > 0 {
            debug!(added, "learned new peers");
            counters::peers_added_total(added);
            self.publish_gauges();
        }
        Ok(added)
    }

    /// Number of active peers of the family `peer_type` names.
    #[must_use]
    pub fn active_server_count(&self, peer_type: MsgType) -> usize {
        let want_v6 = match peer_type {
            MsgType::Ip4Peers => false,
            MsgType::Ip6Peers => true,
            _ => return 0,
        };
        self.active()
            .peers
            .keys()
            .filter(|ip| ip.is_ipv6() == want_v6)
            .count()
    }

    /// Serializes up to `count` active peers of the family `peer_type`
    /// names as raw peer entries.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotPeersType`], [`RegistryError::InvalidCount`]
    /// for a zero count, or [`RegistryError::NoServers`] if none match.
    pub fn get_server_list(&self, peer_type: MsgType, count: usize) -> Result<Vec<u8>, RegistryError> {
        let want_v6 = match peer_type {
            MsgType::Ip4Peers => false,
            MsgType::Ip6Peers => true,
            other => return Err(RegistryError::NotPeersType(other.as_u8())),
        };
        if count == 0 {
            return Err(RegistryError::InvalidCount(0));
        }

        let out: Vec<u8> = self
            .active()
            .peers
            .values()
            .filter(|r| r.ip().is_ipv6() == want_v6)
            .take(count)
            .flat_map(|r| encode_peer(&r.addr()))
            .collect();

        if out.is_empty() {
            return Err(RegistryError::NoServers(peer_type.as_u8()));
        }
        Ok(out)
    }

    /// Bans `ip` for the ban cache's TTL without touching the populations.
    pub fn ban(&self, ip: IpAddr) {
        self.banned.add(ip);
    }

    /// Returns `true` if `ip` is currently banned.
    #[must_use]
    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.is_present(ip)
    }

    /// Returns `true` if `ip` is an active peer.
    #[must_use]
    pub fn is_active(&self, ip: &IpAddr) -> bool {
        self.active().peers.contains_key(ip)
    }

    /// Returns `true` if `ip` is a probationary peer.
    #[must_use]
    pub fn is_probationary(&self, ip: &IpAddr) -> bool {
        self.probationary().position(*ip).is_some()
    }

    /// Copy of the active population, IPv4 first.
    #[must_use]
    pub fn active_servers(&self) -> Vec<ServerRecord> {
        self.active().peers.values().cloned().collect()
    }

    /// Copy of the probationary population in insertion order.
    #[must_use]
    pub fn probationary_servers(&self) -> Vec<ServerRecord> {
        self.probationary().peers.clone()
    }

    /// The configured fallback servers.
    #[must_use]
    pub fn configured_servers(&self) -> &[ServerRecord] {
        &self.configured
    }

    /// Population sizes.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            configured: self.configured.len(),
            active: self.active().peers.len(),
            probationary: self.probationary().peers.len(),
            banned: self.banned.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn registry(seeds: &[&str]) -> (PeerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let seeds: Vec<SocketAddr> = seeds.iter().map(|s| addr(s)).collect();
        let reg = PeerRegistry::new(&seeds, Duration::from_secs(3600), clock.clone()).unwrap();
        (reg, clock)
    }

    #[test]
    fn empty_configuration_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let err = PeerRegistry::new(&[], Duration::from_secs(1), clock).unwrap_err();
        assert_eq!(err, RegistryError::NoConfiguredServers);
    }

    #[test]
    fn equality_ignores_port_and_flags() {
        let mut a = ServerRecord::new(addr("10.0.0.1:8080"));
        let b = ServerRecord::new(addr("10.0.0.1:9090"));
        a.capabilities.set(Capabilities::SHUTTING_DOWN, true);
        assert_eq!(a, b);
        assert_ne!(a, ServerRecord::new(addr("10.0.0.2:8080")));
    }

    #[test]
    fn ipv4_orders_before_ipv6() {
        let v4 = ServerRecord::new(addr("255.255.255.255:1"));
        let v6 = ServerRecord::new(addr("[::1]:1"));
        assert!(v4 < v6);
    }

    #[test]
    fn back_off_grows_by_quarter() {
        let mut rec = ServerRecord::new(addr("10.0.0.1:8080"));
        assert_eq!(rec.retry(), MIN_RETRY);
        rec.back_off();
        assert_eq!(rec.retry(), Duration::from_secs(75));
    }

    #[test]
    fn is_due_respects_retry_interval() {
        let clock = ManualClock::new();
        let mut rec = ServerRecord::new(addr("10.0.0.1:8080"));
        assert!(rec.is_due(clock.now()));
        rec.last_access = Some(clock.now());
        clock.advance(MIN_RETRY);
        assert!(!rec.is_due(clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(rec.is_due(clock.now()));
    }

    #[test]
    fn capabilities_set_and_clear() {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::IP4_PEERS, true);
        caps.set(Capabilities::PUB_KEY, true);
        assert!(caps.contains(Capabilities::IP4_PEERS | Capabilities::PUB_KEY));
        caps.set(Capabilities::PUB_KEY, false);
        assert!(!caps.contains(Capabilities::PUB_KEY));
        caps.remove(Capabilities::IP4_PEERS);
        assert!(caps.is_empty());
        assert_eq!(Capabilities::SHUTTING_DOWN.bits(), 1 << 5);
    }

    #[test]
    fn configured_servers_start_probationary() {
        let (reg, _) = registry(&["10.0.0.1:8080", "10.0.0.2:8080"]);
        assert_eq!(reg.stats().probationary, 2);
        assert_eq!(reg.stats().active, 0);
        assert!(reg.probationary_servers().iter().all(ServerRecord::is_probationary));
    }

    #[test]
    fn duplicate_seeds_are_collapsed() {
        let (reg, _) = registry(&["10.0.0.1:8080", "10.0.0.1:9090"]);
        assert_eq!(reg.stats().probationary, 1);
        assert_eq!(reg.stats().configured, 2);
    }

    #[test]
    fn selection_alternates_between_populations() {
        let (reg, _) = registry(&["10.0.0.1:8080", "10.0.0.2:8080"]);
        let first = reg.get_next_server();
        reg.mark_server_successful(&first);

        let picks: Vec<IpAddr> = (0..4).map(|_| reg.get_next_server().ip()).collect();
        for pair in picks.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn probationary_round_robin_wraps() {
        let (reg, _) = registry(&["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"]);
        let picks: Vec<IpAddr> = (0..6).map(|_| reg.get_next_server().ip()).collect();
        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_eq!(picks[2], picks[5]);
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn falls_back_to_configured_when_everything_is_banned() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        let rec = reg.get_next_server();
        for _ in 0..CLIENT_MAX_SERVER_TIMEOUT_COUNT {
            reg.increment_server_fail_count(&rec);
        }
        assert_eq!(reg.stats().probationary, 0);
        assert_eq!(reg.get_next_server().addr(), addr("10.0.0.1:8080"));
    }

    #[test]
    fn success_merges_negotiated_flags() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        let mut rec = reg.get_next_server();
        rec.capabilities.set(Capabilities::IP6_PEERS, false);
        rec.back_off();
        reg.mark_server_successful(&rec);

        let stored = &reg.active_servers()[0];
        assert!(!stored.capabilities.contains(Capabilities::IP6_PEERS));
        assert!(!stored.is_probationary());
        assert_eq!(stored.retry(), Duration::from_secs(75));
        assert_eq!(stored.failure_count, 0);
        assert!(stored.last_access.is_some());
    }

    #[test]
    fn failure_before_threshold_keeps_peer() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        let rec = reg.get_next_server();
        for _ in 1..CLIENT_MAX_SERVER_TIMEOUT_COUNT {
            assert!(!reg.increment_server_fail_count(&rec));
        }
        let stored = &reg.probationary_servers()[0];
        assert_eq!(stored.failure_count, CLIENT_MAX_SERVER_TIMEOUT_COUNT - 1);
        assert!(stored.retry() > MIN_RETRY);
        assert!(reg.increment_server_fail_count(&rec));
        assert!(reg.is_banned(&rec.ip()));
    }

    #[test]
    fn success_resets_failure_count() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        let rec = reg.get_next_server();
        reg.increment_server_fail_count(&rec);
        reg.increment_server_fail_count(&rec);
        reg.mark_server_successful(&rec);
        assert_eq!(reg.active_servers()[0].failure_count, 0);
    }

    #[test]
    fn failure_for_untracked_peer_is_ignored() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        let stranger = ServerRecord::new(addr("192.0.2.9:8080"));
        assert!(!reg.increment_server_fail_count(&stranger));
        assert_eq!(reg.stats().probationary, 1);
    }

    #[test]
    fn server_list_filters_by_family_and_count() {
        let (reg, _) = registry(&["10.0.0.1:8080", "10.0.0.2:8081", "[2001:db8::1]:8080"]);
        for rec in reg.probationary_servers() {
            reg.mark_server_successful(&rec);
        }
        assert_eq!(reg.active_server_count(MsgType::Ip4Peers), 2);
        assert_eq!(reg.active_server_count(MsgType::Ip6Peers), 1);
        assert_eq!(reg.active_server_count(MsgType::Entropy), 0);

        let one = reg.get_server_list(MsgType::Ip4Peers, 1).unwrap();
        assert_eq!(one, vec![10, 0, 0, 1, 0x1F, 0x90]);
        assert_eq!(reg.get_server_list(MsgType::Ip4Peers, 10).unwrap().len(), 12);
        assert_eq!(reg.get_server_list(MsgType::Ip6Peers, 10).unwrap().len(), 18);
        assert_eq!(
            reg.get_server_list(MsgType::Entropy, 1),
            Err(RegistryError::NotPeersType(5))
        );
        assert_eq!(
            reg.get_server_list(MsgType::Ip4Peers, 0),
            Err(RegistryError::InvalidCount(0))
        );
    }

    #[test]
    fn server_list_with_no_match_fails() {
        let (reg, _) = registry(&["10.0.0.1:8080"]);
        assert_eq!(
            reg.get_server_list(MsgType::Ip6Peers, 4),
            Err(RegistryError::NoServers(6))
        );
    }
}
