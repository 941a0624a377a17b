//! Cluster member lookup: discovers the peers that make up the cluster and
//! feeds them to the membership manager.
//!
//! This crate provides:
//! - Member and member-set types, and peer-list parsing
//! - The [`DiscoveryStrategy`] capability with standalone, cluster-file and
//!   address-server implementations
//! - The [`LookupCoordinator`] that selects the strategy and switches it at
//!   runtime
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod address_server;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod file;
pub mod kind;
pub mod member;
pub mod sink;
pub mod source;
pub mod standalone;
pub mod strategy;
mod task;

pub use address_server::AddressServerStrategy;
pub use config::{AddressServerConfig, FileWatchConfig, LookupConfig};
pub use coordinator::LookupCoordinator;
pub use error::{
    ActivationError, AddressSourceError, AddressSourceErrorKind, Error, Result,
};
pub use factory::{DefaultStrategyFactory, StrategyFactory};
pub use file::{FileConfigStrategy, FileSource};
pub use kind::StrategyKind;
pub use member::{Member, MemberSet, parse_address};
pub use sink::{MemberBroadcaster, MemberSubscription, MembershipSink};
pub use source::{AddressSource, HttpAddressSource, HttpSourceError};
pub use standalone::StandaloneStrategy;
pub use strategy::DiscoveryStrategy;
