//! Configuration for member lookup

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{ActivationError, Result};
use crate::member::Member;

/// Default address this node advertises in standalone mode
pub const DEFAULT_LOCAL_ADDRESS: &str = "127.0.0.1:8848";

/// Default location of the cluster file
pub const DEFAULT_CLUSTER_CONF_PATH: &str = "conf/cluster.conf";

/// Default interval between address server polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on waiting for background work to stop
pub const DEFAULT_DEACTIVATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level configuration for the lookup coordinator and its strategies.
#[derive(Clone, Debug)]
pub struct LookupConfig {
    /// Run as a single-node cluster; overrides every other selection.
    pub standalone: bool,

    /// Explicitly configured strategy wire name (`file` or `address-server`).
    pub lookup_type: Option<String>,

    /// The `host:port` this node is reachable at.
    pub local_address: String,

    /// Path of the cluster file.
    pub cluster_conf_path: PathBuf,

    /// Static comma-separated member list, used when no cluster file exists.
    pub member_list: Option<String>,

    /// Cluster file watching.
    pub file_watch: FileWatchConfig,

    /// Address server polling.
    pub address_server: AddressServerConfig,

    /// Upper bound on waiting for a strategy's background task to stop.
    pub deactivate_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            standalone: false,
            lookup_type: None,
            local_address: DEFAULT_LOCAL_ADDRESS.to_string(),
            cluster_conf_path: PathBuf::from(DEFAULT_CLUSTER_CONF_PATH),
            member_list: None,
            file_watch: FileWatchConfig::default(),
            address_server: AddressServerConfig::default(),
            deactivate_timeout: DEFAULT_DEACTIVATE_TIMEOUT,
        }
    }
}

impl LookupConfig {
    /// The explicitly configured strategy name, if non-blank.
    pub fn explicit_lookup_type(&self) -> Option<&str> {
        non_blank(self.lookup_type.as_deref())
    }

    /// The static member list, if non-blank.
    pub fn static_member_list(&self) -> Option<&str> {
        non_blank(self.member_list.as_deref())
    }

    /// Whether the cluster file currently exists.
    pub fn cluster_conf_exists(&self) -> bool {
        self.cluster_conf_path.is_file()
    }

    /// This node as a cluster member.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedAddress`] if `local_address` is not a
    /// valid `host:port`.
    pub fn local_member(&self) -> Result<Member> {
        Member::parse(&self.local_address)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Configuration for watching the cluster file.
#[derive(Clone, Debug)]
pub struct FileWatchConfig {
    /// Interval of the periodic re-check that backs up filesystem events.
    pub recheck_interval: Duration,

    /// Delay after a change event before re-reading, so bursts coalesce.
    pub settle_delay: Duration,
}

impl Default for FileWatchConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(50),
        }
    }
}

/// Configuration for polling the address server.
#[derive(Clone, Debug)]
pub struct AddressServerConfig {
    /// Full endpoint URL; when set, the other location fields are ignored.
    pub url: Option<Url>,

    /// Address server host.
    pub domain: String,

    /// Address server port.
    pub port: u16,

    /// Context path under which the server list is published.
    pub context_path: String,

    /// Name of the published server list.
    pub cluster_name: String,

    /// Interval between polls.
    pub poll_interval: Duration,

    /// Per-request timeout for the HTTP source.
    pub request_timeout: Duration,

    /// Consecutive failures after which the server is reported unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for AddressServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            domain: "localhost".to_string(),
            port: 8080,
            context_path: "cluster".to_string(),
            cluster_name: "serverlist".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(3),
            unhealthy_threshold: 12,
        }
    }
}

impl AddressServerConfig {
    /// The URL peers are fetched from.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::SourceUnavailable`] if the configured parts
    /// do not form a valid URL.
    pub fn endpoint(&self) -> Result<Url, ActivationError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let context = self.context_path.trim_matches('/');
        let cluster = self.cluster_name.trim_matches('/');
        let raw = if context.is_empty() {
            format!("http://{}:{}/{}", self.domain, self.port, cluster)
        } else {
            format!("http://{}:{}/{}/{}", self.domain, self.port, context, cluster)
        };

        Url::parse(&raw).map_err(|e| {
            ActivationError::SourceUnavailable(format!(
                "invalid address server endpoint '{raw}': {e}"
            ))
        })
    }
}
