#![allow(dead_code)]

use nrp_common::{Direction, MsgType, PacketBuilder};
use nrpd::cache::ExpiringCache;
use nrpd::client::{ClientSockets, ClientState};
use nrpd::clock::{Clock, ManualClock, SystemClock};
use nrpd::entropy::{EntropyError, EntropySink, OsEntropy};
use nrpd::requester::ClientSettings;
use nrpd::responder::{Responder, ResponderSettings};
use nrpd::server::ServerState;
use nrpd::PeerRegistry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

pub const BAN_TTL: Duration = Duration::from_secs(3600);

/// Collects absorbed entropy in memory.
#[derive(Debug, Default)]
pub struct CollectingSink(pub Mutex<Vec<u8>>);

impl CollectingSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl EntropySink for CollectingSink {
    fn absorb(&self, data: &[u8]) -> Result<(), EntropyError> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// A registry whose seeds have all been promoted to active.
pub fn active_registry(peers: &[SocketAddr], clock: Arc<dyn Clock>) -> Arc<PeerRegistry> {
    let registry = Arc::new(PeerRegistry::new(peers, BAN_TTL, clock).unwrap());
    for rec in registry.probationary_servers() {
        registry.mark_server_successful(&rec);
    }
    registry
}

pub fn responder_settings() -> ResponderSettings {
    ResponderSettings {
        default_entropy: 8,
        serve_ip4_peers: true,
        serve_ip6_peers: true,
    }
}

pub fn client_settings() -> ClientSettings {
    ClientSettings {
        entropy_size: 8,
        ip4: true,
        ip6: false,
    }
}

/// Starts a server on an ephemeral localhost port advertising `peers`.
pub async fn start_server(
    peers: &[SocketAddr],
    rate_limit_window: Duration,
) -> (SocketAddr, Arc<ServerState>, watch::Sender<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = socket.local_addr().unwrap();

    let seeds = if peers.is_empty() {
        vec![server_addr]
    } else {
        peers.to_vec()
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = active_registry(&seeds, clock.clone());
    let state = Arc::new(ServerState {
        responder: Responder::new(registry, Arc::new(OsEntropy), responder_settings()),
        recent_clients: ExpiringCache::with_clock(rate_limit_window, clock),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = nrpd::run_with_shutdown(socket, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (server_addr, state, shutdown_tx)
}

/// Client state talking to `seed`, on a manual clock.
pub fn client_state(
    seed: SocketAddr,
    receive_timeout: Duration,
) -> (Arc<ClientState>, Arc<CollectingSink>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(PeerRegistry::new(&[seed], BAN_TTL, clock.clone()).unwrap());
    let sink = Arc::new(CollectingSink::default());
    let state = Arc::new(ClientState {
        registry,
        sink: sink.clone(),
        settings: client_settings(),
        receive_timeout,
        clock: clock.clone(),
    });
    (state, sink, clock)
}

pub async fn client_sockets() -> ClientSockets {
    ClientSockets {
        v4: Some(UdpSocket::bind("127.0.0.1:0").await.unwrap()),
        v6: None,
    }
}

pub fn entropy_request(size: u8) -> Vec<u8> {
    let mut b = PacketBuilder::new(Direction::Request, 64);
    b.entropy_request(size).unwrap();
    b.peers_request(MsgType::Ip4Peers, 0).unwrap();
    b.finish().unwrap()
}

/// Sends `bytes` to `to` and waits up to `wait` for one reply.
pub async fn request_raw(
    socket: &UdpSocket,
    to: SocketAddr,
    bytes: &[u8],
    wait: Duration,
) -> Option<Vec<u8>> {
    socket.send_to(bytes, to).await.unwrap();
    let mut buf = vec![0u8; 65_535];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => Some(buf[..n].to_vec()),
        _ => None,
    }
}
