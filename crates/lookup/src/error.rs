//! Error types for member lookup

use std::error::Error as StdError;
use std::fmt::{self, Debug};
use std::path::PathBuf;

use thiserror::Error;

/// Result type for member lookup operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Member lookup errors
#[derive(Debug, Error)]
pub enum Error {
    /// A strategy could not be activated.
    #[error(transparent)]
    Activation(#[from] ActivationError),

    /// The address server answered with a body holding no usable peers.
    #[error("address server returned an empty peer list")]
    EmptyPeerList,

    /// The address server could not be reached or answered with an error.
    #[error("failed to fetch peer list: {0}")]
    Fetch(String),

    /// A cluster file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file that was being read.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A single peer entry is not a valid `host:port`.
    #[error("malformed address '{address}': {reason}")]
    MalformedAddress {
        /// The offending entry.
        address: String,

        /// Why it was rejected.
        reason: String,
    },

    /// The caller named a lookup strategy that does not exist.
    #[error("unknown lookup strategy '{0}', supported: [file, address-server]")]
    UnknownStrategyKind(String),
}

/// Errors raised while activating a discovery strategy.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ActivationError {
    /// `activate` was called a second time on the same instance.
    #[error("strategy has already been activated")]
    AlreadyActivated,

    /// The background task could not be started.
    #[error("failed to schedule background task: {0}")]
    Scheduling(String),

    /// The discovery source cannot be read or reached.
    #[error("discovery source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Marker trait for `AddressSource` errors
pub trait AddressSourceError: Debug + StdError + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> AddressSourceErrorKind;
}

/// The kind of address source error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressSourceErrorKind {
    /// The registry could not be reached at all.
    Unreachable,

    /// The registry answered with a non-success status.
    Status,

    /// Other/unknown error
    Other,
}

impl fmt::Display for AddressSourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
