//! Discovery by polling a remote address server

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{AddressServerConfig, LookupConfig};
use crate::error::{ActivationError, AddressSourceError, Error, Result};
use crate::kind::StrategyKind;
use crate::member::MemberSet;
use crate::sink::MembershipSink;
use crate::source::AddressSource;
use crate::strategy::DiscoveryStrategy;
use crate::task::BackgroundTask;

/// Lower bound for the poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll bookkeeping for one strategy instance.
#[derive(Debug)]
struct PollState {
    last_known: Option<MemberSet>,
    consecutive_failures: u32,
    healthy: bool,
    last_error: Option<String>,
    next_poll_deadline: Option<Instant>,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            last_known: None,
            consecutive_failures: 0,
            healthy: true,
            last_error: None,
            next_poll_deadline: None,
        }
    }
}

/// Everything a poll cycle needs, shared between the strategy and its task.
struct Poller<S>
where
    S: AddressSource,
{
    source: S,
    endpoint: Url,
    sink: Arc<dyn MembershipSink>,
    state: Arc<Mutex<PollState>>,
    unhealthy_threshold: u32,
    token: CancellationToken,
}

impl<S> Poller<S>
where
    S: AddressSource,
{
    /// Run one fetch-parse-apply cycle. Returns whether a new set was
    /// delivered. Failures keep the previous set in effect.
    async fn poll_once(&self) -> Result<bool> {
        let outcome = self.fetch_members().await;

        let mut state = self.state.lock();
        match outcome {
            Ok(members) => {
                if state.consecutive_failures > 0 {
                    info!(
                        "Address server {} recovered after {} failed polls",
                        self.endpoint, state.consecutive_failures
                    );
                }
                state.consecutive_failures = 0;
                state.healthy = true;
                state.last_error = None;

                if state.last_known.as_ref() == Some(&members) {
                    debug!("Address server members unchanged");
                    return Ok(false);
                }

                if self.token.is_cancelled() {
                    debug!("Lookup deactivated during poll, dropping result");
                    return Ok(false);
                }

                info!(
                    "Address server reported {} members: {}",
                    members.len(),
                    members
                );
                state.last_known = Some(members.clone());
                self.sink.apply(members);

                Ok(true)
            }
            Err(e) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let message = e.to_string();
                let repeated = state.last_error.as_deref() == Some(message.as_str());
                let failures = state.consecutive_failures;

                if failures >= self.unhealthy_threshold {
                    if state.healthy {
                        error!(
                            "Address server {} unhealthy after {} failed polls: {}",
                            self.endpoint, failures, message
                        );
                    } else if repeated {
                        debug!("Address server poll failed again ({}): {}", failures, message);
                    } else {
                        error!("Address server poll failed ({}): {}", failures, message);
                    }
                    state.healthy = false;
                } else {
                    warn!(
                        "Address server poll failed ({}), keeping previous members: {}",
                        failures, message
                    );
                }

                state.last_error = Some(message);
                Err(e)
            }
        }
    }

    async fn fetch_members(&self) -> Result<MemberSet> {
        let body = self
            .source
            .fetch(&self.endpoint)
            .await
            .map_err(|e| Error::Fetch(format!("{e} ({})", e.kind())))?;

        let members = MemberSet::parse_lines(&body);
        if members.is_empty() {
            return Err(Error::EmptyPeerList);
        }

        Ok(members)
    }

    async fn run(self: Arc<Self>, interval: Duration) {
        loop {
            let deadline = Instant::now() + interval;
            self.state.lock().next_poll_deadline = Some(deadline);

            tokio::select! {
                () = self.token.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {}
            }

            if let Ok(true) = self.poll_once().await {
                debug!("Address server poll delivered a new member set");
            }
        }

        self.state.lock().next_poll_deadline = None;
        debug!("Address server poller for {} exiting", self.endpoint);
    }
}

struct Running<S>
where
    S: AddressSource,
{
    poller: Arc<Poller<S>>,
    task: Option<BackgroundTask>,
}

/// Discovers members by polling an address server on a fixed interval.
pub struct AddressServerStrategy<S>
where
    S: AddressSource,
{
    source: S,
    endpoint: Url,
    config: AddressServerConfig,
    deactivate_timeout: Duration,
    activated: AtomicBool,
    state: Arc<Mutex<PollState>>,
    running: Mutex<Option<Running<S>>>,
}

impl<S> AddressServerStrategy<S>
where
    S: AddressSource,
{
    /// Create a strategy polling the endpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::SourceUnavailable`] if the endpoint URL
    /// cannot be constructed.
    pub fn new(
        source: S,
        config: AddressServerConfig,
        deactivate_timeout: Duration,
    ) -> Result<Self, ActivationError> {
        let endpoint = config.endpoint()?;

        Ok(Self {
            source,
            endpoint,
            config,
            deactivate_timeout,
            activated: AtomicBool::new(false),
            state: Arc::new(Mutex::new(PollState::default())),
            running: Mutex::new(None),
        })
    }

    /// Create a strategy from the lookup configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::SourceUnavailable`] if the endpoint URL
    /// cannot be constructed.
    pub fn from_config(source: S, config: &LookupConfig) -> Result<Self, ActivationError> {
        Self::new(
            source,
            config.address_server.clone(),
            config.deactivate_timeout,
        )
    }

    /// The URL being polled.
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Number of polls that have failed since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Whether the address server is considered healthy.
    pub fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    /// The member set most recently delivered to the sink.
    pub fn last_known_members(&self) -> Option<MemberSet> {
        self.state.lock().last_known.clone()
    }

    /// Time until the next scheduled poll, if polling.
    pub fn next_poll_in(&self) -> Option<Duration> {
        self.state
            .lock()
            .next_poll_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn poller(&self) -> Option<Arc<Poller<S>>> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.poller.clone())
    }
}

#[async_trait]
impl<S> DiscoveryStrategy for AddressServerStrategy<S>
where
    S: AddressSource,
{
    fn kind(&self) -> StrategyKind {
        StrategyKind::AddressServer
    }

    async fn activate(&self, sink: Arc<dyn MembershipSink>) -> Result<(), ActivationError> {
        if self.activated.swap(true, Ordering::SeqCst) {
            return Err(ActivationError::AlreadyActivated);
        }

        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        info!("Polling address server {} every {:?}", self.endpoint, interval);

        let poller = Arc::new(Poller {
            source: self.source.clone(),
            endpoint: self.endpoint.clone(),
            sink,
            state: self.state.clone(),
            unhealthy_threshold: self.config.unhealthy_threshold.max(1),
            token: CancellationToken::new(),
        });

        if poller.poll_once().await.is_err() {
            warn!(
                "Initial address server sync failed, retrying every {:?}",
                interval
            );
        }

        let task = BackgroundTask::spawn(
            "address server poll",
            poller.token.clone(),
            poller.clone().run(interval),
        )?;

        *self.running.lock() = Some(Running {
            poller,
            task: Some(task),
        });

        Ok(())
    }

    async fn deactivate(&self) {
        let task = self
            .running
            .lock()
            .as_mut()
            .and_then(|running| running.task.take());

        if let Some(task) = task {
            info!("Stopping address server poll of {}", self.endpoint);
            task.stop(self.deactivate_timeout).await;
        }
    }

    async fn refresh(&self) -> Result<()> {
        match self.poller() {
            Some(poller) if !poller.token.is_cancelled() => poller.poll_once().await.map(|_| ()),
            _ => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| running.task.is_some())
    }

    fn info(&self) -> BTreeMap<String, String> {
        let state = self.state.lock();

        BTreeMap::from([
            ("kind".to_string(), self.kind().to_string()),
            ("endpoint".to_string(), self.endpoint.to_string()),
            ("healthy".to_string(), state.healthy.to_string()),
            (
                "consecutive_failures".to_string(),
                state.consecutive_failures.to_string(),
            ),
        ])
    }
}

impl<S> std::fmt::Debug for AddressServerStrategy<S>
where
    S: AddressSource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressServerStrategy")
            .field("endpoint", &self.endpoint)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
