use crate::requester::ClientSettings;
use crate::responder::ResponderSettings;
use clap::Parser;
use nrp_common::types::{
    CLIENT_MIN_RETRY_SECONDS, CLIENT_RESPONSE_TIMEOUT_SECONDS, DEFAULT_ENTROPY_SIZE,
    SERVER_BAN_SECONDS,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "nrpd")]
#[command(about = "Peer-to-peer entropy exchange daemon")]
#[command(version)]
pub struct Args {
    /// IPv4 socket address the server listens on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "NRPD_LISTEN")]
    pub listen: SocketAddr,
    /// IPv6 socket address the server listens on, if any.
    #[arg(long, env = "NRPD_LISTEN6")]
    pub listen6: Option<SocketAddr>,
    /// Do not answer requests.
    #[arg(long, env = "NRPD_NO_SERVER")]
    pub no_server: bool,
    /// Do not contact peers.
    #[arg(long, env = "NRPD_NO_CLIENT")]
    pub no_client: bool,
    /// Do not contact or request IPv4 peers.
    #[arg(long, env = "NRPD_NO_CLIENT_IP4")]
    pub no_client_ip4: bool,
    /// Contact and request IPv6 peers.
    #[arg(long, env = "NRPD_CLIENT_IP6")]
    pub client_ip6: bool,
    /// Answer `ip4peers` requests.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "NRPD_SERVE_IP4_PEERS")]
    pub serve_ip4_peers: bool,
    /// Answer `ip6peers` requests.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set, env = "NRPD_SERVE_IP6_PEERS")]
    pub serve_ip6_peers: bool,
    /// Entropy bytes served for a zero-size request and requested from peers.
    #[arg(long, default_value_t = DEFAULT_ENTROPY_SIZE, env = "NRPD_ENTROPY_SIZE")]
    pub entropy_size: u8,
    /// Seconds between client exchanges.
    #[arg(long, default_value_t = CLIENT_MIN_RETRY_SECONDS, env = "NRPD_REQUEST_INTERVAL")]
    pub request_interval: u64,
    /// Seconds to wait for a response.
    #[arg(long, default_value_t = CLIENT_RESPONSE_TIMEOUT_SECONDS, env = "NRPD_RECEIVE_TIMEOUT")]
    pub receive_timeout: u64,
    /// Seconds a client must wait between requests to this server.
    #[arg(long, default_value_t = CLIENT_MIN_RETRY_SECONDS, env = "NRPD_RATE_LIMIT_WINDOW")]
    pub rate_limit_window: u64,
    /// Seconds a failing peer stays banned.
    #[arg(long, default_value_t = SERVER_BAN_SECONDS, env = "NRPD_BAN_TTL")]
    pub ban_ttl: u64,
    /// Initial peer as `host:port`; repeat for several.
    #[arg(long = "seed", env = "NRPD_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<SocketAddr>,
    /// Device received entropy is written to.
    #[arg(long, default_value = "/dev/urandom", env = "NRPD_RANDOM_DEVICE")]
    pub random_device: PathBuf,
    /// Socket address for the metrics endpoint; disabled when absent.
    #[arg(long, env = "NRPD_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Also write logs to this file.
    #[arg(long, env = "NRPD_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// IPv4 listen address.
    pub listen: SocketAddr,
    /// IPv6 listen address.
    pub listen6: Option<SocketAddr>,
    /// Whether the server loop runs.
    pub server_enabled: bool,
    /// Whether the client loop runs.
    pub client_enabled: bool,
    /// Whether the client uses IPv4.
    pub client_ip4: bool,
    /// Whether the client uses IPv6.
    pub client_ip6: bool,
    /// Whether `ip4peers` requests are answered.
    pub serve_ip4_peers: bool,
    /// Whether `ip6peers` requests are answered.
    pub serve_ip6_peers: bool,
    /// Default entropy size in bytes.
    pub entropy_size: u8,
    /// Interval between client exchanges.
    pub request_interval: Duration,
    /// Response timeout.
    pub receive_timeout: Duration,
    /// Per-client rate-limit window.
    pub rate_limit_window: Duration,
    /// Ban duration.
    pub ban_ttl: Duration,
    /// Configured peers.
    pub seeds: Vec<SocketAddr>,
    /// Entropy sink device.
    pub random_device: PathBuf,
    /// Metrics endpoint.
    pub metrics_addr: Option<SocketAddr>,
}

impl DaemonConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !self.server_enabled && !self.client_enabled {
            return Err("server and client are both disabled".to_string());
        }
        if !self.listen.is_ipv4() {
            return Err("listen must be an IPv4 address".to_string());
        }
        if let Some(addr) = self.listen6 {
            if !addr.is_ipv6() {
                return Err("listen6 must be an IPv6 address".to_string());
            }
        }

        if self.entropy_size == 0 {
            return Err("entropy_size must be greater than 0".to_string());
        }

        let interval = self.request_interval.as_secs();
        if interval == 0 {
            return Err("request_interval must be greater than 0".to_string());
        }
        if interval > 86_400 {
            return Err(
                "request_interval exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }

        let timeout = self.receive_timeout.as_secs();
        if timeout == 0 {
            return Err("receive_timeout must be greater than 0".to_string());
        }
        if timeout > 300 {
            return Err("receive_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.rate_limit_window.is_zero() {
            return Err("rate_limit_window must be greater than 0".to_string());
        }
        if self.ban_ttl.is_zero() {
            return Err("ban_ttl must be greater than 0".to_string());
        }

        if self.client_enabled {
            if !self.client_ip4 && !self.client_ip6 {
                return Err("client enabled with both IPv4 and IPv6 disabled".to_string());
            }
            if self.seeds.is_empty() {
                return Err("at least one --seed is required when the client is enabled".to_string());
            }
        }
        if let Some(bad) = self.seeds.iter().find(|s| s.port() == 0 || s.ip().is_unspecified()) {
            return Err(format!("seed {} is not a reachable address", bad));
        }

        Ok(())
    }

    /// Servers the peer registry is seeded with.
    ///
    /// A server-only node has nobody to contact, so its own listen address
    /// stands in as the registry's fallback record. The client loop, the
    /// only caller of selection, does not run on such a node.
    #[must_use]
    pub fn registry_seeds(&self) -> Vec<SocketAddr> {
        if self.seeds.is_empty() {
            vec![self.listen]
        } else {
            self.seeds.clone()
        }
    }

    /// Settings for the server's responder.
    #[must_use]
    pub fn responder_settings(&self) -> ResponderSettings {
        ResponderSettings {
            default_entropy: self.entropy_size,
            serve_ip4_peers: self.serve_ip4_peers,
            serve_ip6_peers: self.serve_ip6_peers,
        }
    }

    /// Settings for the client's exchanges.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            entropy_size: self.entropy_size,
            ip4: self.client_ip4,
            ip6: self.client_ip6,
        }
    }
}

impl From<Args> for DaemonConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            listen6: args.listen6,
            server_enabled: !args.no_server,
            client_enabled: !args.no_client,
            client_ip4: !args.no_client_ip4,
            client_ip6: args.client_ip6,
            serve_ip4_peers: args.serve_ip4_peers,
            serve_ip6_peers: args.serve_ip6_peers,
            entropy_size: args.entropy_size,
            request_interval: Duration::from_secs(args.request_interval),
            receive_timeout: Duration::from_secs(args.receive_timeout),
            rate_limit_window: Duration::from_secs(args.rate_limit_window),
            ban_ttl: Duration::from_secs(args.ban_ttl),
            seeds: args.seeds,
            random_device: args.random_device,
            metrics_addr: args.metrics_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DaemonConfig {
        DaemonConfig {
            listen: "0.0.0.0:8080".parse().unwrap(),
            listen6: None,
            server_enabled: true,
            client_enabled: true,
            client_ip4: true,
            client_ip6: false,
            serve_ip4_peers: true,
            serve_ip6_peers: false,
            entropy_size: 8,
            request_interval: Duration::from_secs(60),
            receive_timeout: Duration::from_secs(30),
            rate_limit_window: Duration::from_secs(60),
            ban_ttl: Duration::from_secs(3600),
            seeds: vec!["192.0.2.1:8080".parse().unwrap()],
            random_device: PathBuf::from("/dev/urandom"),
            metrics_addr: None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_both_roles_disabled() {
        let mut config = valid_config();
        config.server_enabled = false;
        config.client_enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_family_mismatch() {
        let mut config = valid_config();
        config.listen = "[::]:8080".parse().unwrap();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.listen6 = Some("0.0.0.0:8080".parse().unwrap());
        assert!(config.validate().is_err());
        config.listen6 = Some("[::]:8080".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entropy_size_zero() {
        let mut config = valid_config();
        config.entropy_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("entropy_size"));
    }

    #[test]
    fn test_request_interval_bounds() {
        let mut config = valid_config();
        config.request_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.request_interval = Duration::from_secs(86_401);
        assert!(config.validate().is_err());
        config.request_interval = Duration::from_secs(86_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_receive_timeout_bounds() {
        let mut config = valid_config();
        config.receive_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.receive_timeout = Duration::from_secs(301);
        assert!(config.validate().is_err());
        config.receive_timeout = Duration::from_secs(300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_windows() {
        let mut config = valid_config();
        config.rate_limit_window = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.ban_ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_requires_seed() {
        let mut config = valid_config();
        config.seeds.clear();
        let err = config.validate().unwrap_err();
        assert!(err.contains("--seed"));

        config.client_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_requires_a_family() {
        let mut config = valid_config();
        config.client_ip4 = false;
        assert!(config.validate().is_err());
        config.client_ip6 = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unreachable_seed() {
        let mut config = valid_config();
        config.seeds.push("0.0.0.0:8080".parse().unwrap());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.seeds = vec!["192.0.2.1:0".parse().unwrap()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_only_node_seeds_registry_with_listen() {
        let mut config = valid_config();
        config.client_enabled = false;
        config.seeds.clear();
        assert_eq!(config.registry_seeds(), vec![config.listen]);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["nrpd", "--seed", "192.0.2.1:8080"]);
        let config: DaemonConfig = args.into();
        assert!(config.validate().is_ok());
        assert_eq!(config.entropy_size, DEFAULT_ENTROPY_SIZE);
        assert_eq!(config.request_interval, Duration::from_secs(60));
        assert_eq!(config.receive_timeout, Duration::from_secs(30));
        assert_eq!(config.ban_ttl, Duration::from_secs(3600));
        assert!(config.serve_ip4_peers);
        assert!(!config.serve_ip6_peers);
        assert!(config.client_ip4);
        assert!(!config.client_ip6);
    }

    #[test]
    fn test_args_repeated_seeds_and_toggles() {
        let args = Args::parse_from([
            "nrpd",
            "--seed",
            "192.0.2.1:8080",
            "--seed",
            "[2001:db8::1]:8080",
            "--no-server",
            "--client-ip6",
            "--serve-ip4-peers",
            "false",
            "-vv",
        ]);
        assert_eq!(args.verbose, 2);
        let config: DaemonConfig = args.into();
        assert_eq!(config.seeds.len(), 2);
        assert!(!config.server_enabled);
        assert!(config.client_ip6);
        assert!(!config.serve_ip4_peers);
    }
}
