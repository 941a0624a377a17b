//! CLI binary running cluster member lookup for a single node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meridian_lookup::{
    AddressServerConfig, FileWatchConfig, HttpAddressSource, LookupConfig, LookupCoordinator,
    MemberBroadcaster, StrategyFactory,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client could not be built
    #[error("address server client error: {0}")]
    Client(#[from] meridian_lookup::HttpSourceError),

    /// Lookup library error
    #[error(transparent)]
    Lookup(#[from] meridian_lookup::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Run as a single-node cluster, ignoring every other lookup setting
    #[arg(long, env = "MERIDIAN_STANDALONE")]
    standalone: bool,

    /// Lookup strategy to start with (`file` or `address-server`)
    #[arg(long, env = "MERIDIAN_LOOKUP_TYPE")]
    lookup_type: Option<String>,

    /// Address this node is reachable at
    #[arg(long, default_value = "127.0.0.1:8848", env = "MERIDIAN_LOCAL_ADDRESS")]
    local_address: String,

    /// Cluster file listing one peer per line
    #[arg(
        long,
        default_value = "conf/cluster.conf",
        env = "MERIDIAN_CLUSTER_CONF"
    )]
    cluster_conf: PathBuf,

    /// Static comma-separated peer list, used when the cluster file is absent
    #[arg(long, env = "MERIDIAN_MEMBER_LIST")]
    member_list: Option<String>,

    /// Cluster file re-check interval in milliseconds
    #[arg(long, default_value_t = 5000, env = "MERIDIAN_FILE_RECHECK_MS")]
    file_recheck_ms: u64,

    /// Full address server URL, overriding domain, port and paths
    #[arg(long, env = "MERIDIAN_ADDRESS_SERVER_URL")]
    address_server_url: Option<Url>,

    /// Address server host
    #[arg(long, default_value = "localhost", env = "MERIDIAN_ADDRESS_SERVER_DOMAIN")]
    address_server_domain: String,

    /// Address server port
    #[arg(long, default_value_t = 8080, env = "MERIDIAN_ADDRESS_SERVER_PORT")]
    address_server_port: u16,

    /// Context path of the server list
    #[arg(long, default_value = "cluster", env = "MERIDIAN_ADDRESS_SERVER_CONTEXT")]
    address_server_context: String,

    /// Name of the server list
    #[arg(
        long,
        default_value = "serverlist",
        env = "MERIDIAN_ADDRESS_SERVER_CLUSTER"
    )]
    address_server_cluster: String,

    /// Address server poll interval in milliseconds
    #[arg(long, default_value_t = 5000, env = "MERIDIAN_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Address server request timeout in milliseconds
    #[arg(long, default_value_t = 3000, env = "MERIDIAN_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: u64,

    /// Consecutive failed polls before the address server is reported unhealthy
    #[arg(long, default_value_t = 12, env = "MERIDIAN_UNHEALTHY_THRESHOLD")]
    unhealthy_threshold: u32,

    /// Upper bound on stopping a strategy, in milliseconds
    #[arg(long, default_value_t = 5000, env = "MERIDIAN_DEACTIVATE_TIMEOUT_MS")]
    deactivate_timeout_ms: u64,
}

impl Args {
    fn lookup_config(self) -> LookupConfig {
        LookupConfig {
            standalone: self.standalone,
            lookup_type: self.lookup_type,
            local_address: self.local_address,
            cluster_conf_path: self.cluster_conf,
            member_list: self.member_list,
            file_watch: FileWatchConfig {
                recheck_interval: Duration::from_millis(self.file_recheck_ms),
                ..FileWatchConfig::default()
            },
            address_server: AddressServerConfig {
                url: self.address_server_url,
                domain: self.address_server_domain,
                port: self.address_server_port,
                context_path: self.address_server_context,
                cluster_name: self.address_server_cluster,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                request_timeout: Duration::from_millis(self.request_timeout_ms),
                unhealthy_threshold: self.unhealthy_threshold,
            },
            deactivate_timeout: Duration::from_millis(self.deactivate_timeout_ms),
        }
    }
}

/// An operator command read from stdin.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Command {
    Switch(String),
    Refresh,
    Info,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()? {
            "switch" => Self::Switch(words.next().unwrap_or_default().to_string()),
            "refresh" => Self::Refresh,
            "info" => Self::Info,
            other => Self::Unknown(other.to_string()),
        };

        Some(command)
    }
}

async fn handle_command<F>(coordinator: &LookupCoordinator<F>, command: Command)
where
    F: StrategyFactory,
{
    match command {
        Command::Switch(name) => match coordinator.switch_lookup(&name).await {
            Ok(strategy) => info!("Lookup is now {}", strategy.kind()),
            Err(e) => error!("Cannot switch lookup: {}", e),
        },
        Command::Refresh => {
            if let Err(e) = coordinator.refresh().await {
                warn!("Refresh failed: {}", e);
            }
        }
        Command::Info => {
            for (key, value) in coordinator.info() {
                info!("{key}: {value}");
            }
        }
        Command::Unknown(other) => {
            warn!("Unknown command '{}', expected: switch <kind> | refresh | info", other);
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers ({}), using ctrl-c", e);
            }
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt signal");
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let source = HttpAddressSource::new(Duration::from_millis(args.request_timeout_ms))?;
    let config = args.lookup_config();

    let members = Arc::new(MemberBroadcaster::default());
    let mut subscription = members.subscribe();
    tokio::spawn(async move {
        while let Some(current) = subscription.changed().await {
            info!("Cluster members ({}): {}", current.len(), current);
        }
    });

    let coordinator = LookupCoordinator::new(config, source, members);
    coordinator.create_lookup().await?;

    let shutdown_token = CancellationToken::new();

    // Set up signal handlers
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = Command::parse(&line) {
                        handle_command(&coordinator, command).await;
                    }
                }
                Ok(None) => {
                    // No operator attached; keep running until signalled.
                    shutdown_token.cancelled().await;
                    break;
                }
                Err(e) => {
                    warn!("Stopped reading commands: {}", e);
                    shutdown_token.cancelled().await;
                    break;
                }
            }
        }
    }

    coordinator.shutdown().await;

    Ok(())
}
