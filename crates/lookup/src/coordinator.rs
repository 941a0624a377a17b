//! Selection, installation and runtime switching of the active strategy

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LookupConfig;
use crate::error::Result;
use crate::factory::{DefaultStrategyFactory, StrategyFactory};
use crate::kind::StrategyKind;
use crate::sink::MembershipSink;
use crate::source::AddressSource;
use crate::strategy::DiscoveryStrategy;

/// The installed strategy.
#[derive(Debug)]
struct ActiveLookup {
    kind: StrategyKind,
    strategy: Arc<dyn DiscoveryStrategy>,
}

/// Owns the active discovery strategy and swaps it at runtime.
///
/// Constructed once at process start and shared by reference. Control
/// operations are serialised; readers see the active strategy without
/// blocking, and never observe an empty slot during a switch.
pub struct LookupCoordinator<F>
where
    F: StrategyFactory,
{
    config: LookupConfig,
    factory: F,
    sink: Arc<dyn MembershipSink>,
    active: ArcSwapOption<ActiveLookup>,
    control: Mutex<()>,
}

impl<S> LookupCoordinator<DefaultStrategyFactory<S>>
where
    S: AddressSource,
{
    /// Create a coordinator building the standard strategies.
    pub fn new(config: LookupConfig, source: S, sink: Arc<dyn MembershipSink>) -> Self {
        Self::with_factory(config, DefaultStrategyFactory::new(source), sink)
    }
}

impl<F> LookupCoordinator<F>
where
    F: StrategyFactory,
{
    /// Create a coordinator building strategies through `factory`.
    pub fn with_factory(config: LookupConfig, factory: F, sink: Arc<dyn MembershipSink>) -> Self {
        Self {
            config,
            factory,
            sink,
            active: ArcSwapOption::empty(),
            control: Mutex::new(()),
        }
    }

    /// The configuration strategies are built from.
    pub const fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// The factory strategies are built with.
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Decide which strategy the configuration asks for.
    ///
    /// Standalone mode always wins; then an explicit kind; then the file
    /// strategy if a cluster file or static list exists; otherwise the
    /// address server.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownStrategyKind`] if an explicit kind is
    /// configured but not recognised.
    pub fn choose_kind(&self) -> Result<StrategyKind> {
        if self.config.standalone {
            return Ok(StrategyKind::Standalone);
        }

        if let Some(name) = self.config.explicit_lookup_type() {
            return name.parse();
        }

        if self.config.cluster_conf_exists() || self.config.static_member_list().is_some() {
            return Ok(StrategyKind::FileConfig);
        }

        Ok(StrategyKind::AddressServer)
    }

    /// Select, activate and install the strategy the configuration asks for.
    /// A strategy that was already installed is deactivated afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownStrategyKind`] for an unrecognised
    /// configured kind, or an activation error if the strategy cannot start.
    /// Nothing is installed on failure.
    pub async fn create_lookup(&self) -> Result<Arc<dyn DiscoveryStrategy>> {
        let _control = self.control.lock().await;

        let kind = self.choose_kind()?;
        let next = self.activate(kind).await?;

        Ok(self.install(next).await)
    }

    /// Switch to the strategy named `name`. Switching to the active kind is a
    /// no-op returning the current instance.
    ///
    /// The new strategy is activated and published before the old one is
    /// deactivated, so there is always an active strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownStrategyKind`] for an unrecognised name,
    /// or an activation error if the new strategy cannot start. The current
    /// strategy is untouched on failure.
    pub async fn switch_lookup(&self, name: &str) -> Result<Arc<dyn DiscoveryStrategy>> {
        let kind: StrategyKind = name.parse()?;

        let _control = self.control.lock().await;

        if let Some(current) = self.active.load_full() {
            if current.kind == kind {
                debug!("Lookup already in {} mode, nothing to switch", kind);
                return Ok(current.strategy.clone());
            }
        }

        let next = self.activate(kind).await?;

        Ok(self.install(next).await)
    }

    /// The active strategy, if any.
    pub fn current_lookup(&self) -> Option<Arc<dyn DiscoveryStrategy>> {
        self.active
            .load_full()
            .map(|active| active.strategy.clone())
    }

    /// The kind of the active strategy, if any.
    pub fn current_kind(&self) -> Option<StrategyKind> {
        self.active.load_full().map(|active| active.kind)
    }

    /// Ask the active strategy to re-read its source now.
    ///
    /// # Errors
    ///
    /// Returns the strategy's refresh error.
    pub async fn refresh(&self) -> Result<()> {
        match self.current_lookup() {
            Some(strategy) => strategy.refresh().await,
            None => Ok(()),
        }
    }

    /// Diagnostic information about the active strategy.
    pub fn info(&self) -> BTreeMap<String, String> {
        self.current_lookup()
            .map(|strategy| strategy.info())
            .unwrap_or_default()
    }

    /// Deactivate the active strategy, if any. The coordinator can be used
    /// again with [`create_lookup`](Self::create_lookup).
    pub async fn shutdown(&self) {
        let _control = self.control.lock().await;

        if let Some(previous) = self.active.swap(None) {
            info!("Shutting down {} lookup", previous.kind);
            previous.strategy.deactivate().await;
        } else {
            debug!("No active lookup to shut down");
        }
    }

    async fn activate(&self, kind: StrategyKind) -> Result<ActiveLookup> {
        let strategy = self.factory.build(kind, &self.config)?;

        if let Err(e) = strategy.activate(self.sink.clone()).await {
            warn!("Failed to activate {} lookup: {}", kind, e);
            strategy.deactivate().await;
            return Err(e.into());
        }

        Ok(ActiveLookup { kind, strategy })
    }

    async fn install(&self, next: ActiveLookup) -> Arc<dyn DiscoveryStrategy> {
        let next = Arc::new(next);
        let strategy = next.strategy.clone();

        let previous = self.active.swap(Some(next));
        info!("Current addressing mode selection: {}", strategy.kind());

        if let Some(previous) = previous {
            debug!("Deactivating previous {} lookup", previous.kind);
            previous.strategy.deactivate().await;
        }

        strategy
    }
}

impl<F> Debug for LookupCoordinator<F>
where
    F: StrategyFactory,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCoordinator")
            .field("current_kind", &self.current_kind())
            .finish_non_exhaustive()
    }
}
