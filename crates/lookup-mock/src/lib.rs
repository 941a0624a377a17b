//! Mock implementations of the member lookup seams for testing purposes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use meridian_lookup::{
    ActivationError, AddressSource, DiscoveryStrategy, LookupConfig, MemberSet, MembershipSink,
    StrategyFactory, StrategyKind,
};
use parking_lot::Mutex;
use url::Url;

#[derive(Debug, Default)]
struct SourceState {
    script: VecDeque<Result<String, Error>>,
    fallback: Option<Result<String, Error>>,
    endpoints: Vec<Url>,
    fetch_delay: Duration,
}

/// Address source that answers from a script.
///
/// Scripted responses are consumed in order; once exhausted, the fallback
/// response (if any) is returned on every fetch.
#[derive(Clone, Debug, Default)]
pub struct MockAddressSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockAddressSource {
    /// Create a source with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that always answers with `body`.
    #[must_use]
    pub fn with_body(body: impl Into<String>) -> Self {
        let source = Self::new();
        source.set_body(body);
        source
    }

    /// Queue a successful response.
    pub fn push_body(&self, body: impl Into<String>) {
        self.state.lock().script.push_back(Ok(body.into()));
    }

    /// Queue a failed response.
    pub fn push_failure(&self, error: Error) {
        self.state.lock().script.push_back(Err(error));
    }

    /// Answer with `body` once the script is exhausted.
    pub fn set_body(&self, body: impl Into<String>) {
        self.state.lock().fallback = Some(Ok(body.into()));
    }

    /// Fail with `error` once the script is exhausted.
    pub fn set_failure(&self, error: Error) {
        self.state.lock().fallback = Some(Err(error));
    }

    /// Make every fetch started from now on take `delay` before answering.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().fetch_delay = delay;
    }

    /// Number of fetches started so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Endpoints fetched so far, in order.
    #[must_use]
    pub fn fetched_endpoints(&self) -> Vec<Url> {
        self.state.lock().endpoints.clone()
    }
}

#[async_trait]
impl AddressSource for MockAddressSource {
    type Error = Error;

    async fn fetch(&self, endpoint: &Url) -> Result<String, Self::Error> {
        let (response, delay) = {
            let mut state = self.state.lock();
            state.endpoints.push(endpoint.clone());

            let response = state
                .script
                .pop_front()
                .or_else(|| state.fallback.clone())
                .unwrap_or(Err(Error::NoResponse));
            (response, state.fetch_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        response
    }
}

/// Sink that records every delivered member set.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<MemberSet>>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries so far, in arrival order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<MemberSet> {
        self.deliveries.lock().clone()
    }

    /// Number of deliveries so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// The most recent delivery.
    #[must_use]
    pub fn last(&self) -> Option<MemberSet> {
        self.deliveries.lock().last().cloned()
    }

    /// Wait until at least `count` deliveries arrived or `timeout` elapsed.
    /// Returns whether the count was reached.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl MembershipSink for RecordingSink {
    fn apply(&self, discovered: MemberSet) {
        self.deliveries.lock().push(discovered);
    }
}

/// A lifecycle transition observed on a [`MockStrategy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleEvent {
    /// `activate` completed on the strategy with this id.
    Activated(usize, StrategyKind),

    /// `deactivate` was called on the strategy with this id.
    Deactivated(usize, StrategyKind),
}

/// Strategy that records its lifecycle and delivers a fixed member set.
#[derive(Debug)]
pub struct MockStrategy {
    id: usize,
    kind: StrategyKind,
    members: MemberSet,
    fail_activation: Option<ActivationError>,
    deactivate_delay: Duration,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    running: AtomicBool,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl MockStrategy {
    /// Identifier assigned by the factory, in build order starting at 0.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// How many times `activate` was called.
    #[must_use]
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// How many times `deactivate` was called.
    #[must_use]
    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryStrategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn activate(&self, sink: Arc<dyn MembershipSink>) -> Result<(), ActivationError> {
        self.activations.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.fail_activation {
            return Err(error.clone());
        }

        self.running.store(true, Ordering::SeqCst);
        sink.apply(self.members.clone());
        self.events
            .lock()
            .push(LifecycleEvent::Activated(self.id, self.kind));

        Ok(())
    }

    async fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .push(LifecycleEvent::Deactivated(self.id, self.kind));

        if !self.deactivate_delay.is_zero() {
            tokio::time::sleep(self.deactivate_delay).await;
        }

        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Factory producing [`MockStrategy`] instances and sharing one event log.
#[derive(Debug, Default)]
pub struct MockStrategyFactory {
    members: HashMap<StrategyKind, MemberSet>,
    failing: HashMap<StrategyKind, ActivationError>,
    deactivate_delay: Duration,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    built: Mutex<Vec<Arc<MockStrategy>>>,
}

impl MockStrategyFactory {
    /// Create a factory whose strategies deliver empty sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategies of `kind` deliver `members` on activation.
    #[must_use]
    pub fn with_members(mut self, kind: StrategyKind, members: MemberSet) -> Self {
        self.members.insert(kind, members);
        self
    }

    /// Strategies of `kind` fail to activate with `error`.
    #[must_use]
    pub fn with_failing(mut self, kind: StrategyKind, error: ActivationError) -> Self {
        self.failing.insert(kind, error);
        self
    }

    /// Every `deactivate` sleeps for `delay` before returning.
    #[must_use]
    pub const fn with_deactivate_delay(mut self, delay: Duration) -> Self {
        self.deactivate_delay = delay;
        self
    }

    /// Lifecycle events across all built strategies, in order.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// All strategies built so far, in build order.
    #[must_use]
    pub fn built(&self) -> Vec<Arc<MockStrategy>> {
        self.built.lock().clone()
    }
}

impl StrategyFactory for MockStrategyFactory {
    fn build(
        &self,
        kind: StrategyKind,
        _config: &LookupConfig,
    ) -> meridian_lookup::Result<Arc<dyn DiscoveryStrategy>> {
        let mut built = self.built.lock();

        let strategy = Arc::new(MockStrategy {
            id: built.len(),
            kind,
            members: self.members.get(&kind).cloned().unwrap_or_default(),
            fail_activation: self.failing.get(&kind).cloned(),
            deactivate_delay: self.deactivate_delay,
            events: self.events.clone(),
            running: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        });
        built.push(strategy.clone());

        let strategy: Arc<dyn DiscoveryStrategy> = strategy;
        Ok(strategy)
    }
}
