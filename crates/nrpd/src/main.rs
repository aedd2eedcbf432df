#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use nrpd::cache::ExpiringCache;
use nrpd::client::{self, ClientSockets, ClientState};
use nrpd::clock::{Clock, SystemClock};
use nrpd::config::{Args, DaemonConfig};
use nrpd::entropy::{OsEntropy, RandomDevice};
use nrpd::metrics::{start_metrics_server, HealthState};
use nrpd::responder::Responder;
use nrpd::server::{self, ServerState};
use nrpd::PeerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Time the server keeps answering with `shuttingdown` rejects before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let config: DaemonConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(PeerRegistry::new(
        &config.registry_seeds(),
        config.ban_ttl,
        clock.clone(),
    )?);

    // The sink is opened even for a server-only node so a bad device path
    // fails at start-up rather than on the first exchange.
    let sink = Arc::new(RandomDevice::open(&config.random_device)?);
    info!("absorbing received entropy into {}", sink.path().display());

    let health_state = HealthState::new(registry.clone());
    if let Some(metrics_addr) = config.metrics_addr {
        tokio::spawn({
            let health_state = health_state.clone();
            async move {
                if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                    warn!("metrics server error: {}", e);
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut tasks = JoinSet::new();

    let server_state = Arc::new(ServerState {
        responder: Responder::new(
            registry.clone(),
            Arc::new(OsEntropy),
            config.responder_settings(),
        ),
        recent_clients: ExpiringCache::with_clock(config.rate_limit_window, clock.clone()),
    });

    if config.server_enabled {
        let listens = std::iter::once(config.listen).chain(config.listen6);
        for addr in listens {
            let socket = UdpSocket::bind(addr).await?;
            info!("bound to {}", addr);
            tasks.spawn(server::run_with_shutdown(
                socket,
                server_state.clone(),
                shutdown_rx.clone(),
            ));
        }
    }

    if config.client_enabled {
        let settings = config.client_settings();
        let sockets = ClientSockets::bind(&settings).await?;
        let state = Arc::new(ClientState {
            registry: registry.clone(),
            sink,
            settings,
            receive_timeout: config.receive_timeout,
            clock,
        });
        tasks.spawn(client::run_with_shutdown(
            sockets,
            state,
            config.request_interval,
            shutdown_rx.clone(),
        ));
    }

    tokio::select! {
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Err(e)) => error!("daemon task failed: {}", e),
                Err(e) => error!("daemon task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            health_state.set_ready(false);
            server_state.responder.set_shutting_down(true);
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    }

    let _ = shutdown_tx.send(());
    while let Some(result) = tasks.join_next().await {
        if let Ok(Err(e)) = result {
            warn!("task ended with error: {}", e);
        }
    }

    let stats = registry.stats();
    info!(
        active = stats.active,
        probationary = stats.probationary,
        banned = stats.banned,
        "shut down"
    );
    Ok(())
}

fn init_tracing(args: &Args) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}
