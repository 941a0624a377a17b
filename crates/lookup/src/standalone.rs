//! Single-node discovery: the cluster is this node alone

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::LookupConfig;
use crate::error::{ActivationError, Result};
use crate::kind::StrategyKind;
use crate::member::{Member, MemberSet};
use crate::sink::MembershipSink;
use crate::strategy::DiscoveryStrategy;

/// Delivers `{self}` once on activation and never runs background work.
#[derive(Debug)]
pub struct StandaloneStrategy {
    local: Member,
    activated: AtomicBool,
}

impl StandaloneStrategy {
    /// Create a standalone strategy advertising `local`.
    pub const fn new(local: Member) -> Self {
        Self {
            local,
            activated: AtomicBool::new(false),
        }
    }

    /// Create a standalone strategy for the configured local address.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedAddress`] if the local address is invalid.
    pub fn from_config(config: &LookupConfig) -> Result<Self> {
        Ok(Self::new(config.local_member()?))
    }
}

#[async_trait]
impl DiscoveryStrategy for StandaloneStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Standalone
    }

    async fn activate(&self, sink: Arc<dyn MembershipSink>) -> Result<(), ActivationError> {
        if self.activated.swap(true, Ordering::SeqCst) {
            return Err(ActivationError::AlreadyActivated);
        }

        info!("Running standalone as {}", self.local);
        sink.apply(MemberSet::from_iter([self.local.clone()]));

        Ok(())
    }

    async fn deactivate(&self) {
        debug!("Standalone lookup has nothing to stop");
    }

    fn info(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("kind".to_string(), self.kind().to_string()),
            ("local".to_string(), self.local.to_string()),
        ])
    }
}
