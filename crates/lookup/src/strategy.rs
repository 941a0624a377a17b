//! The capability every discovery strategy provides

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ActivationError, Result};
use crate::kind::StrategyKind;
use crate::sink::MembershipSink;

/// One way of determining the current cluster membership.
#[async_trait]
pub trait DiscoveryStrategy: Debug + Send + Sync + 'static {
    /// Which kind of strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Begin delivering member sets to `sink`, starting any background work.
    /// May be called at most once per instance.
    async fn activate(&self, sink: Arc<dyn MembershipSink>) -> Result<(), ActivationError>;

    /// Stop all background work and release held resources. Idempotent and
    /// infallible; internal errors are logged.
    async fn deactivate(&self);

    /// Re-read the source now instead of waiting for the next change or poll.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this instance currently owns a running background task.
    fn is_running(&self) -> bool {
        false
    }

    /// Diagnostic key/value pairs describing this strategy.
    fn info(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("kind".to_string(), self.kind().to_string())])
    }
}
