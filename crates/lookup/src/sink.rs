//! Delivery of discovered member sets to the membership manager

use tokio::sync::watch;

use crate::member::MemberSet;

/// Consumer of discovered member sets.
///
/// Strategies call [`apply`](Self::apply) from their own background tasks,
/// possibly concurrently while a switch is in progress. Implementations must
/// be idempotent and must hand off quickly without blocking.
pub trait MembershipSink: Send + Sync + 'static {
    /// Apply a freshly discovered member set.
    fn apply(&self, discovered: MemberSet);
}

impl<F> MembershipSink for F
where
    F: Fn(MemberSet) + Send + Sync + 'static,
{
    fn apply(&self, discovered: MemberSet) {
        self(discovered);
    }
}

/// A sink that publishes the latest member set over a watch channel.
#[derive(Debug)]
pub struct MemberBroadcaster {
    sender: watch::Sender<MemberSet>,
}

impl MemberBroadcaster {
    /// Create a broadcaster holding `initial` as the current set.
    pub fn new(initial: MemberSet) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Subscribe to member set changes.
    pub fn subscribe(&self) -> MemberSubscription {
        MemberSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// The most recently applied member set.
    pub fn current(&self) -> MemberSet {
        self.sender.borrow().clone()
    }
}

impl Default for MemberBroadcaster {
    fn default() -> Self {
        Self::new(MemberSet::new())
    }
}

impl MembershipSink for MemberBroadcaster {
    fn apply(&self, discovered: MemberSet) {
        self.sender.send_replace(discovered);
    }
}

/// Receiving side of a [`MemberBroadcaster`].
#[derive(Clone, Debug)]
pub struct MemberSubscription {
    receiver: watch::Receiver<MemberSet>,
}

impl MemberSubscription {
    /// The most recently applied member set.
    pub fn current(&self) -> MemberSet {
        self.receiver.borrow().clone()
    }

    /// Wait for the next applied set. Returns `None` once the broadcaster is
    /// dropped.
    pub async fn changed(&mut self) -> Option<MemberSet> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
