//! Discovery strategy kinds and their wire names

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The closed set of ways a node can discover its peers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StrategyKind {
    /// The cluster is just this node.
    Standalone,

    /// Peers come from the cluster file or the static member list.
    FileConfig,

    /// Peers are polled from a remote address server.
    AddressServer,
}

impl StrategyKind {
    /// Kinds that can be named in configuration or passed to a runtime switch.
    pub const SELECTABLE: [Self; 2] = [Self::FileConfig, Self::AddressServer];

    /// The stable lowercase name used in configuration and logs.
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::FileConfig => "file",
            Self::AddressServer => "address-server",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Only selectable kinds parse; `standalone` is implied by standalone mode and
/// cannot be requested by name.
impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::SELECTABLE
            .into_iter()
            .find(|kind| kind.wire_name() == name)
            .ok_or_else(|| Error::UnknownStrategyKind(s.to_string()))
    }
}
