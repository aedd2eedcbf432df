use crate::clock::Clock;
use crate::entropy::EntropySink;
use crate::error::NrpdError;
use crate::metrics::{counters, histograms};
use crate::registry::{PeerRegistry, ServerRecord};
use crate::requester::{construct_request, process_response, ClientSettings, ExchangeSummary};
use nrp_common::types::MAX_RESPONSE_MESSAGE_SIZE;
use nrp_common::{Direction, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Shared state for the client loop.
#[derive(Debug)]
pub struct ClientState {
    /// Peers to contact and learn into.
    pub registry: Arc<PeerRegistry>,
    /// Where received entropy goes.
    pub sink: Arc<dyn EntropySink>,
    /// What to ask for.
    pub settings: ClientSettings,
    /// How long to wait for a response.
    pub receive_timeout: Duration,
    /// Time source for the retry gate.
    pub clock: Arc<dyn Clock>,
}

/// Client sockets, one per enabled family.
#[derive(Debug, Default)]
pub struct ClientSockets {
    /// Socket used to reach IPv4 peers.
    pub v4: Option<UdpSocket>,
    /// Socket used to reach IPv6 peers.
    pub v6: Option<UdpSocket>,
}

impl ClientSockets {
    /// Binds an ephemeral socket for every enabled family.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(settings: &ClientSettings) -> Result<Self, NrpdError> {
        let v4 = match settings.ip4 {
            true => Some(UdpSocket::bind("0.0.0.0:0").await?),
            false => None,
        };
        let v6 = match settings.ip6 {
            true => Some(UdpSocket::bind("[::]:0").await?),
            false => None,
        };
        Ok(Self { v4, v6 })
    }

    fn for_peer(&self, rec: &ServerRecord) -> Option<&UdpSocket> {
        match rec.is_ipv6() {
            true => self.v6.as_ref(),
            false => self.v4.as_ref(),
        }
    }
}

/// Result of one pass of the client loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The selected peer was not contacted (family disabled or not due).
    Skipped,
    /// The peer answered with a valid response.
    Success(ExchangeSummary),
    /// The request could not be sent.
    SendFailed,
    /// No response arrived in time.
    Timeout,
    /// The response failed validation.
    Invalid,
}

impl ExchangeOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Success(_) => "success",
            Self::SendFailed => "send_failed",
            Self::Timeout => "timeout",
            Self::Invalid => "invalid",
        }
    }
}

/// Contacts the registry's next peer once and reports the outcome back.
///
/// # Errors
///
/// Returns an error only if the request cannot be built; peer failures are
/// reported to the registry and surface as an [`ExchangeOutcome`].
pub async fn exchange_once(
    sockets: &ClientSockets,
    state: &ClientState,
) -> Result<ExchangeOutcome, NrpdError> {
    let mut rec = state.registry.get_next_server();
    let outcome = exchange_with(sockets, state, &mut rec).await?;
    counters::exchanges_total(outcome.label());
    Ok(outcome)
}

async fn exchange_with(
    sockets: &ClientSockets,
    state: &ClientState,
    rec: &mut ServerRecord,
) -> Result<ExchangeOutcome, NrpdError> {
    let registry = &state.registry;

    let family_enabled = match rec.is_ipv6() {
        true => state.settings.ip6,
        false => state.settings.ip4,
    };
    let Some(socket) = sockets.for_peer(rec).filter(|_| family_enabled) else {
        trace!(peer = %rec.addr(), "family disabled, skipping peer");
        return Ok(ExchangeOutcome::Skipped);
    };
    if !rec.is_due(state.clock.now()) {
        trace!(peer = %rec.addr(), "peer not due yet");
        return Ok(ExchangeOutcome::Skipped);
    }

    let request = construct_request(rec, &state.settings)?;
    let started = tokio::time::Instant::now();
    if let Err(e) = socket.send_to(&request, rec.addr()).await {
        debug!(peer = %rec.addr(), "failed to send request: {}", e);
        registry.increment_server_fail_count(rec);
        return Ok(ExchangeOutcome::SendFailed);
    }

    let mut buf = vec![0u8; MAX_RESPONSE_MESSAGE_SIZE];
    let deadline = started + state.receive_timeout;
    let received = tokio::time::timeout_at(deadline, async {
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            if from.ip() == rec.ip() {
                return Ok::<usize, std::io::Error>(n);
            }
            trace!(peer = %from, "ignoring datagram from unexpected peer");
        }
    })
    .await;

    let n = match received {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!(peer = %rec.addr(), "receive failed: {}", e);
            registry.increment_server_fail_count(rec);
            return Ok(ExchangeOutcome::SendFailed);
        }
        Err(_) => {
            debug!(peer = %rec.addr(), "no response within {:?}", state.receive_timeout);
            registry.increment_server_fail_count(rec);
            return Ok(ExchangeOutcome::Timeout);
        }
    };
    histograms::exchange_rtt_seconds(started.elapsed().as_secs_f64());

    let packet = match Packet::parse(&buf[..n], Direction::Response) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(peer = %rec.addr(), "invalid response: {}", e);
            registry.increment_server_fail_count(rec);
            return Ok(ExchangeOutcome::Invalid);
        }
    };

    let summary = process_response(rec, &packet, registry, state.sink.as_ref(), &state.settings);
    registry.mark_server_successful(rec);
    debug!(
        peer = %rec.addr(),
        entropy = summary.entropy_bytes,
        peers = summary.peers_added,
        rejects = summary.rejects,
        "exchange complete"
    );
    Ok(ExchangeOutcome::Success(summary))
}

/// Run one exchange every `interval` until `shutdown` changes or its sender
/// drops.
///
/// # Errors
///
/// Returns an error if a request cannot be built.
pub async fn run_with_shutdown(
    sockets: ClientSockets,
    state: Arc<ClientState>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), NrpdError> {
    info!(
        "client started with {} configured peers",
        state.registry.stats().configured
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            result = exchange_once(&sockets, &state) => {
                result?;
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("client stopped");
    Ok(())
}
