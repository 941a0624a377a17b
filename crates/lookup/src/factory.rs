//! Construction of strategy instances by kind

use std::sync::Arc;

use crate::address_server::AddressServerStrategy;
use crate::config::LookupConfig;
use crate::error::Result;
use crate::file::FileConfigStrategy;
use crate::kind::StrategyKind;
use crate::source::AddressSource;
use crate::standalone::StandaloneStrategy;
use crate::strategy::DiscoveryStrategy;

/// Builds a fresh, not yet activated, strategy for a kind.
pub trait StrategyFactory
where
    Self: Send + Sync + 'static,
{
    /// Build a new strategy instance of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot describe a strategy of
    /// that kind.
    fn build(&self, kind: StrategyKind, config: &LookupConfig)
    -> Result<Arc<dyn DiscoveryStrategy>>;
}

/// Builds the standard strategies, using `S` to reach the address server.
#[derive(Clone, Debug)]
pub struct DefaultStrategyFactory<S>
where
    S: AddressSource,
{
    source: S,
}

impl<S> DefaultStrategyFactory<S>
where
    S: AddressSource,
{
    /// Create a factory whose address-server strategies fetch through `source`.
    pub const fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S> StrategyFactory for DefaultStrategyFactory<S>
where
    S: AddressSource,
{
    fn build(
        &self,
        kind: StrategyKind,
        config: &LookupConfig,
    ) -> Result<Arc<dyn DiscoveryStrategy>> {
        let strategy: Arc<dyn DiscoveryStrategy> = match kind {
            StrategyKind::Standalone => Arc::new(StandaloneStrategy::from_config(config)?),
            StrategyKind::FileConfig => Arc::new(FileConfigStrategy::from_config(config)),
            StrategyKind::AddressServer => Arc::new(AddressServerStrategy::from_config(
                self.source.clone(),
                config,
            )?),
        };

        Ok(strategy)
    }
}
