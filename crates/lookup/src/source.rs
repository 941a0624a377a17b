//! Abstract interface for fetching peer lists from an address registry, plus
//! the HTTP implementation used in deployments.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::error::{AddressSourceError, AddressSourceErrorKind};

/// Fetches the raw, line-delimited peer list from an address registry.
#[async_trait]
pub trait AddressSource
where
    Self: Send + Sync + Clone + Debug + 'static,
{
    /// The error type for this source.
    type Error: AddressSourceError;

    /// Fetch the raw body published at `endpoint`.
    async fn fetch(&self, endpoint: &Url) -> Result<String, Self::Error>;
}

/// Errors from [`HttpAddressSource`].
#[derive(Debug, Error)]
pub enum HttpSourceError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request failed before a response arrived.
    #[error("request to address server failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("address server {endpoint} answered {status}")]
    Status {
        /// The endpoint that was queried.
        endpoint: Url,

        /// The HTTP status code.
        status: u16,
    },
}

impl AddressSourceError for HttpSourceError {
    fn kind(&self) -> AddressSourceErrorKind {
        match self {
            Self::Request(e) if e.is_connect() || e.is_timeout() => {
                AddressSourceErrorKind::Unreachable
            }
            Self::Status { .. } => AddressSourceErrorKind::Status,
            Self::Client(_) | Self::Request(_) => AddressSourceErrorKind::Other,
        }
    }
}

/// Fetches peer lists over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpAddressSource {
    client: Client,
}

impl HttpAddressSource {
    /// Create a source whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpSourceError::Client`] if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self, HttpSourceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(HttpSourceError::Client)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    type Error = HttpSourceError;

    async fn fetch(&self, endpoint: &Url) -> Result<String, Self::Error> {
        let response = self.client.get(endpoint.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpSourceError::Status {
                endpoint: endpoint.clone(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
