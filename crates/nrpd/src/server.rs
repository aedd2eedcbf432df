use crate::cache::ExpiringCache;
use crate::error::NrpdError;
use crate::metrics::counters;
use crate::responder::Responder;
use nrp_common::types::{IP4_PACKET_BUDGET, IP6_PACKET_BUDGET, MAX_REQUEST_MESSAGE_SIZE};
use nrp_common::{Direction, Packet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Shared state for the server loop.
#[derive(Debug)]
pub struct ServerState {
    /// Builds responses.
    pub responder: Responder,
    /// Clients heard from within the rate-limit window.
    pub recent_clients: ExpiringCache<IpAddr>,
}

impl ServerState {
    /// Answers one datagram from `from`, or returns `None` to drop it.
    ///
    /// Malformed requests, clients inside their rate-limit window and
    /// requests with nothing to answer all get silence.
    pub fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        counters::packets_received_total();

        let request = match Packet::parse(data, Direction::Request) {
            Ok(request) => request,
            Err(e) => {
                trace!(peer = %from, "dropping malformed request: {}", e);
                counters::packets_dropped_total("malformed");
                return None;
            }
        };

        if self.recent_clients.is_present_add(from.ip()) {
            debug!(peer = %from, "dropping request inside rate-limit window");
            counters::packets_dropped_total("rate_limited");
            return None;
        }

        let budget = match from {
            SocketAddr::V4(_) => IP4_PACKET_BUDGET,
            SocketAddr::V6(_) => IP6_PACKET_BUDGET,
        };
        let response = self.responder.respond(&request, budget);
        if response.is_none() {
            counters::packets_dropped_total("nothing_to_send");
        }
        response
    }
}

/// # Errors
///
/// Returns an error if the socket's local address cannot be read.
pub async fn run(socket: UdpSocket, state: Arc<ServerState>) -> Result<(), NrpdError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(socket, state, shutdown_rx).await
}

/// Run the server receive loop until `shutdown` changes or its sender drops.
///
/// # Errors
///
/// Returns an error if the socket's local address cannot be read.
pub async fn run_with_shutdown(
    socket: UdpSocket,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), NrpdError> {
    let local_addr = socket.local_addr()?;
    info!(
        "server listening on {} (rate-limit window {:?})",
        local_addr,
        state.recent_clients.ttl()
    );
    let mut buf = vec![0u8; MAX_REQUEST_MESSAGE_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => {
                        let Some(response) = state.handle_datagram(&buf[..n], from) else {
                            continue;
                        };
                        match socket.send_to(&response, from).await {
                            Ok(_) => counters::responses_sent_total(),
                            Err(e) => debug!(peer = %from, "failed to send response: {}", e),
                        }
                    }
                    Err(e) => {
                        warn!("failed to receive datagram: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("shutdown signal received, server on {} stopping", local_addr);
                break;
            }
        }
    }

    Ok(())
}
