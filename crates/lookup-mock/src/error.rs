//! Error types for the mock address source.

use meridian_lookup::{AddressSourceError, AddressSourceErrorKind};
use thiserror::Error;

/// Error type for the mock address source.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// Nothing was scripted for this fetch.
    #[error("no response scripted")]
    NoResponse,

    /// The scripted server answered with a non-success status.
    #[error("address server answered {0}")]
    Status(u16),

    /// The scripted server could not be reached.
    #[error("address server unreachable: {0}")]
    Unreachable(String),
}

impl AddressSourceError for Error {
    fn kind(&self) -> AddressSourceErrorKind {
        match self {
            Self::Status(_) => AddressSourceErrorKind::Status,
            Self::Unreachable(_) => AddressSourceErrorKind::Unreachable,
            Self::NoResponse => AddressSourceErrorKind::Other,
        }
    }
}
