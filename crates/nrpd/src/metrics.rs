use crate::registry::PeerRegistry;
use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    active_peers: usize,
    probationary_peers: usize,
}

/// Readiness flag plus the registry whose populations `/health` reports.
#[derive(Clone)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
    registry: Arc<PeerRegistry>,
}

impl HealthState {
    /// Starts out ready.
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            registry,
        }
    }

    /// Cleared once shutdown begins.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Whether `/ready` answers 200.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn body(&self, status: &'static str) -> Json<StatusBody> {
        let stats = self.registry.stats();
        Json(StatusBody {
            status,
            active_peers: stats.active,
            probationary_peers: stats.probationary,
        })
    }
}

/// Serves `/metrics`, `/health` and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(health_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<StatusBody>) {
    (StatusCode::OK, state.body("healthy"))
}

/// 200 while serving, 503 once shutdown has begun.
async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<StatusBody>) {
    match state.is_ready() {
        true => (StatusCode::OK, state.body("ready")),
        false => (StatusCode::SERVICE_UNAVAILABLE, state.body("shutting down")),
    }
}

/// Peer population gauges.
pub mod gauges {
    /// Set the number of active peers.
    pub fn peers_active(n: usize) {
        metrics::gauge!("nrpd_peers_active").set(n as f64);
    }

    /// Set the number of probationary peers.
    pub fn peers_probationary(n: usize) {
        metrics::gauge!("nrpd_peers_probationary").set(n as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the received-datagrams counter.
    pub fn packets_received_total() {
        metrics::counter!("nrpd_packets_received_total").increment(1);
    }

    /// Increment the dropped-datagrams counter with the given reason label.
    pub fn packets_dropped_total(reason: &'static str) {
        metrics::counter!("nrpd_packets_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the responses-sent counter.
    pub fn responses_sent_total() {
        metrics::counter!("nrpd_responses_sent_total").increment(1);
    }

    /// Record a client exchange with the given outcome label.
    pub fn exchanges_total(outcome: &'static str) {
        metrics::counter!("nrpd_exchanges_total", "outcome" => outcome).increment(1);
    }

    /// Record peers learned from responses.
    pub fn peers_added_total(n: usize) {
        metrics::counter!("nrpd_peers_added_total").increment(n as u64);
    }

    /// Increment the banned-peers counter.
    pub fn peers_banned_total() {
        metrics::counter!("nrpd_peers_banned_total").increment(1);
    }

    /// Record entropy bytes moved in the given direction.
    pub fn entropy_bytes_total(direction: &'static str, bytes: usize) {
        metrics::counter!("nrpd_entropy_bytes_total", "direction" => direction)
            .increment(bytes as u64);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a client round-trip observation in seconds.
    pub fn exchange_rtt_seconds(value: f64) {
        metrics::histogram!("nrpd_exchange_rtt_seconds").record(value);
    }
}
